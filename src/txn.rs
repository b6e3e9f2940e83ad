//! # Transactions
//!
//! ```text
//! active --commit--> committed
//! active --abort---> aborted
//! active --break---> broken --abort--> aborted
//! active --reset---> reset --renew--> active
//! ```
//!
//! `committed` and `aborted` are final. A failed commit leaves the
//! transaction aborted. Dropping a transaction that is not final aborts it.

use crate::constants::{TableFlags, TxnFlags};
use crate::cursor::Cursor;
use crate::engine::{codes, EngineError, RawTxn};
use crate::env::Environment;
use crate::registry::{HandleKind, HandleState};
use crate::table::Table;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    /// Usable.
    Active,
    /// Parked read-only transaction; `renew` re-activates it.
    Reset,
    /// Committed.
    Committed,
    /// Aborted, explicitly or by a failed commit.
    Aborted,
    /// Broken; only `abort` remains.
    Broken,
}

impl TxnState {
    /// Whether no further state change is possible.
    pub fn is_final(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnState::Active => "active",
            TxnState::Reset => "reset",
            TxnState::Committed => "committed",
            TxnState::Aborted => "aborted",
            TxnState::Broken => "broken",
        };
        f.write_str(name)
    }
}

/// A transaction against an [`Environment`].
pub struct Transaction {
    env: Environment,
    raw: RawTxn,
    handle: Arc<HandleState>,
    state: TxnState,
    flags: TxnFlags,
}

impl Transaction {
    pub(crate) fn begin(env: &Environment, flags: TxnFlags) -> Result<Self> {
        env.ensure_live()?;
        let raw = RawTxn::begin(env.raw(), flags).map_err(Error::TxnBeginFailed)?;
        let handle = env.registry().register(HandleKind::Transaction, Some(env.handle()));
        let state = if flags.contains(TxnFlags::RDONLY_PREPARE) { TxnState::Reset } else { TxnState::Active };
        log::debug!("Began transaction {} ({:?})", raw.id(), flags);
        Ok(Self { env: env.clone(), raw, handle, state, flags })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Flags the transaction was begun with.
    pub fn flags(&self) -> TxnFlags {
        self.flags
    }

    /// Whether this is a read-only transaction.
    pub fn is_read_only(&self) -> bool {
        self.flags.is_read_only()
    }

    /// Engine transaction id.
    pub fn id(&self) -> u64 {
        self.raw.id()
    }

    /// The owning environment.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Publishes every change. On failure the transaction is aborted.
    pub fn commit(&mut self) -> Result<()> {
        self.check()?;
        let id = self.raw.id();
        let result = self.raw.commit();
        self.finish(if result.is_ok() { TxnState::Committed } else { TxnState::Aborted });
        result.map_err(Error::CommitFailed)?;
        log::debug!("Committed transaction {}", id);
        Ok(())
    }

    /// Drops every change. Aborting a committed or aborted transaction is a
    /// no-op.
    pub fn abort(&mut self) -> Result<()> {
        if self.state.is_final() {
            return Ok(());
        }
        let result = self.raw.abort();
        self.finish(TxnState::Aborted);
        result.map_err(Error::AbortFailed)?;
        log::debug!("Aborted transaction {}", self.raw.id());
        Ok(())
    }

    /// Parks a read-only transaction, keeping its reader slot for
    /// [`renew`](Self::renew).
    pub fn reset(&mut self) -> Result<()> {
        self.check()?;
        self.raw.reset().map_err(Error::ResetFailed)?;
        self.state = TxnState::Reset;
        Ok(())
    }

    /// Re-activates a reset transaction on the newest snapshot.
    pub fn renew(&mut self) -> Result<()> {
        self.env.ensure_live()?;
        match self.state {
            TxnState::Reset => {}
            TxnState::Active => return Err(Error::RenewFailed(EngineError::new(codes::EINVAL))),
            other => return Err(Error::TxnNotActive(other)),
        }
        self.raw.renew().map_err(Error::RenewFailed)?;
        self.state = TxnState::Active;
        Ok(())
    }

    /// Takes the transaction out of service without committing; only
    /// [`abort`](Self::abort) is valid afterwards.
    pub fn break_(&mut self) -> Result<()> {
        self.check()?;
        self.raw.txn_break().map_err(Error::BreakFailed)?;
        self.state = TxnState::Broken;
        self.handle.release();
        Ok(())
    }

    /// Opens the default table (`None`) or a named table.
    pub fn open_table(&mut self, name: Option<&str>, flags: TableFlags) -> Result<Table> {
        self.check()?;
        let dbi = self.raw.dbi_open(name, flags).map_err(Error::TableOpenFailed)?;
        let table_flags = self.raw.dbi_flags(dbi).map_err(Error::TableOpenFailed)?;
        Ok(Table::new(&self.env, dbi, name.map(str::to_string), table_flags))
    }

    /// Opens a cursor over `table`, valid for this transaction only.
    pub fn cursor(&self, table: &Table) -> Result<Cursor> {
        self.check()?;
        table.check_owner(self)?;
        Ok(Cursor::new(self, table))
    }

    /// Fails unless the environment is open and the transaction is active.
    pub(crate) fn check(&self) -> Result<()> {
        self.env.ensure_live()?;
        match self.state {
            TxnState::Active => Ok(()),
            other => Err(Error::TxnNotActive(other)),
        }
    }

    pub(crate) fn raw(&self) -> &RawTxn {
        &self.raw
    }

    pub(crate) fn raw_mut(&mut self) -> &mut RawTxn {
        &mut self.raw
    }

    pub(crate) fn handle(&self) -> &Arc<HandleState> {
        &self.handle
    }

    fn finish(&mut self, state: TxnState) {
        self.state = state;
        self.handle.release();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.state.is_final() {
            if let Err(e) = self.raw.abort() {
                log::warn!("Failed to abort dropped transaction: {}", e);
            }
            log::debug!("Aborted transaction {} on drop", self.raw.id());
        }
        self.handle.release();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.raw.id())
            .field("state", &self.state)
            .field("flags", &self.flags)
            .finish()
    }
}
