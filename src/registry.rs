//! # Handle registry
//!
//! Every Environment, Transaction, Table and Cursor carries a
//! [`HandleState`]: an id, its kind, a released flag and a link to the
//! handle that owns it. A handle is usable only while neither it nor any
//! ancestor has been released, so closing an environment invalidates every
//! transaction, table and cursor under it without touching them.
//!
//! Release is idempotent: explicit `close`, `Drop` and a script finalizer
//! may all run it, in any order, any number of times.
//!
//! The per-environment [`HandleRegistry`] keeps weak references to the
//! states it handed out, so it never keeps a handle alive, and can answer
//! which handles are still live.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Identifier of a registered handle, unique within its registry.
pub type HandleId = u64;

/// Levels of the handle hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// An opened environment.
    Environment,
    /// A transaction.
    Transaction,
    /// An open table.
    Table,
    /// A cursor.
    Cursor,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::Environment => "environment",
            HandleKind::Transaction => "transaction",
            HandleKind::Table => "table",
            HandleKind::Cursor => "cursor",
        };
        f.write_str(name)
    }
}

/// Liveness of one handle.
#[derive(Debug)]
pub struct HandleState {
    id: HandleId,
    kind: HandleKind,
    released: AtomicBool,
    parent: Option<Arc<HandleState>>,
}

impl HandleState {
    /// The handle's id.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// The handle's kind.
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// The owning handle.
    pub fn parent(&self) -> Option<&Arc<HandleState>> {
        self.parent.as_ref()
    }

    /// Whether this handle itself has been released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Whether neither this handle nor any ancestor has been released.
    pub fn is_live(&self) -> bool {
        self.first_released().is_none()
    }

    /// Fails with [`Error::HandleClosed`] naming the released handle if this
    /// handle or an ancestor is gone.
    pub fn ensure_live(&self) -> Result<()> {
        match self.first_released() {
            Some(kind) => Err(Error::HandleClosed(kind)),
            None => Ok(()),
        }
    }

    /// Marks the handle released. Returns whether this call did it.
    pub fn release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    /// Kind of the outermost released handle on the chain to the root.
    fn first_released(&self) -> Option<HandleKind> {
        let mut released = None;
        let mut current = Some(self);
        while let Some(state) = current {
            if state.is_released() {
                released = Some(state.kind);
            }
            current = state.parent.as_deref();
        }
        released
    }
}

/// Weak index of the handles opened under one environment.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<HandleId, Weak<HandleState>>>,
}

impl HandleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new handle of `kind` owned by `parent`.
    pub fn register(&self, kind: HandleKind, parent: Option<&Arc<HandleState>>) -> Arc<HandleState> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let state = Arc::new(HandleState {
            id,
            kind,
            released: AtomicBool::new(false),
            parent: parent.cloned(),
        });
        let mut entries = self.entries.lock();
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.insert(id, Arc::downgrade(&state));
        state
    }

    /// Looks up a handle that is still referenced somewhere.
    pub fn lookup(&self, id: HandleId) -> Option<Arc<HandleState>> {
        self.entries.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Releases a handle by id. Unknown or already released ids are a
    /// no-op; returns whether this call released it.
    pub fn release(&self, id: HandleId) -> bool {
        self.lookup(id).is_some_and(|state| state.release())
    }

    /// Number of live handles of `kind`.
    pub fn live(&self, kind: HandleKind) -> usize {
        self.entries
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|state| state.kind == kind && state.is_live())
            .count()
    }
}
