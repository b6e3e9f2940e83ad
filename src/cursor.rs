//! Cursors: ordered traversal of a table within one transaction.
//!
//! A cursor remembers the key it is positioned on and re-seeks from it on
//! every move, so it sees the transaction's own uncommitted writes. It is
//! tied to the transaction that created it and dies with it.

use crate::codec::{self, Decoded};
use crate::engine::SeekOp;
use crate::registry::{HandleKind, HandleState};
use crate::table::{validate_key, Table};
use crate::txn::Transaction;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// A positioned entry: the raw key and its decoded value.
pub type Entry = (Vec<u8>, Decoded);

/// A cursor over one table.
pub struct Cursor {
    handle: Arc<HandleState>,
    dbi: u32,
    position: Option<Vec<u8>>,
}

impl Cursor {
    pub(crate) fn new(txn: &Transaction, table: &Table) -> Self {
        let handle = txn.env().registry().register(HandleKind::Cursor, Some(txn.handle()));
        Self { handle, dbi: table.dbi(), position: None }
    }

    /// The key the cursor is positioned on, if any.
    pub fn key(&self) -> Option<&[u8]> {
        self.position.as_deref()
    }

    /// Whether the cursor can no longer be used.
    pub fn is_closed(&self) -> bool {
        !self.handle.is_live()
    }

    /// Moves to the first entry.
    pub fn first(&mut self, txn: &Transaction) -> Result<Option<Entry>> {
        self.move_to(txn, SeekOp::First, None)
    }

    /// Moves to the last entry.
    pub fn last(&mut self, txn: &Transaction) -> Result<Option<Entry>> {
        self.move_to(txn, SeekOp::Last, None)
    }

    /// Moves to the entry after the current one; from an unpositioned
    /// cursor, to the first entry. At the end the position is kept and
    /// `None` returned.
    pub fn next(&mut self, txn: &Transaction) -> Result<Option<Entry>> {
        let anchor = self.position.clone();
        self.move_to(txn, SeekOp::Next, anchor.as_deref())
    }

    /// Moves to the entry before the current one; from an unpositioned
    /// cursor, to the last entry.
    pub fn prev(&mut self, txn: &Transaction) -> Result<Option<Entry>> {
        let anchor = self.position.clone();
        self.move_to(txn, SeekOp::Prev, anchor.as_deref())
    }

    /// Moves to the first entry at or after `key` in table order.
    pub fn seek(&mut self, txn: &Transaction, key: &[u8]) -> Result<Option<Entry>> {
        validate_key(key)?;
        self.move_to(txn, SeekOp::SetRange, Some(key))
    }

    /// Re-reads the current entry. `None` when unpositioned or when the
    /// entry has since been deleted.
    pub fn current(&self, txn: &Transaction) -> Result<Option<Entry>> {
        self.check(txn)?;
        let Some(key) = self.position.as_deref() else {
            return Ok(None);
        };
        match txn.raw().seek(self.dbi, SeekOp::SetKey, Some(key)) {
            Ok((key, value)) => Ok(Some((key, codec::decode(&value)?))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(Error::CursorFailed(e)),
        }
    }

    /// Closes the cursor. Closing twice is a no-op.
    pub fn close(&self) {
        self.handle.release();
    }

    fn move_to(&mut self, txn: &Transaction, op: SeekOp, anchor: Option<&[u8]>) -> Result<Option<Entry>> {
        self.check(txn)?;
        match txn.raw().seek(self.dbi, op, anchor) {
            Ok((key, value)) => {
                let decoded = codec::decode(&value)?;
                self.position = Some(key.clone());
                Ok(Some((key, decoded)))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(Error::CursorFailed(e)),
        }
    }

    fn check(&self, txn: &Transaction) -> Result<()> {
        self.handle.ensure_live()?;
        if !self.handle.parent().is_some_and(|owner| Arc::ptr_eq(owner, txn.handle())) {
            return Err(Error::WrongTransaction);
        }
        txn.check()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.handle.release();
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("dbi", &self.dbi)
            .field("position", &self.position)
            .field("closed", &self.is_closed())
            .finish()
    }
}
