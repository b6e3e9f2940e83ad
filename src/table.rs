//! Table access: typed get / put / delete.
//!
//! Keys are validated before the engine sees them: empty keys and keys over
//! [`MAX_KEY_LEN`] bytes are rejected. Values go through the [`codec`].
//!
//! A table handle belongs to the environment, not to the transaction that
//! opened it, and can be used with any later transaction of the same
//! environment.
//!
//! [`codec`]: crate::codec

use crate::codec::{self, Decoded, Value};
use crate::constants::{PutFlags, TableFlags};
use crate::env::Environment;
use crate::registry::{HandleKind, HandleState};
use crate::txn::Transaction;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Longest key accepted, in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Checks a key against the binding's limits.
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::EmptyKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::KeyTooLong { len: key.len(), max: MAX_KEY_LEN });
    }
    Ok(())
}

/// An open table.
pub struct Table {
    env: Environment,
    dbi: u32,
    name: Option<String>,
    flags: TableFlags,
    handle: Arc<HandleState>,
}

impl Table {
    pub(crate) fn new(env: &Environment, dbi: u32, name: Option<String>, flags: TableFlags) -> Self {
        let handle = env.registry().register(HandleKind::Table, Some(env.handle()));
        log::debug!("Opened table {:?} (dbi {})", name.as_deref().unwrap_or(""), dbi);
        Self { env: env.clone(), dbi, name, flags, handle }
    }

    /// Table name; `None` for the default table.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Engine table handle.
    pub fn dbi(&self) -> u32 {
        self.dbi
    }

    /// Persistent table flags.
    pub fn flags(&self) -> TableFlags {
        self.flags
    }

    /// Whether the table has been closed.
    pub fn is_closed(&self) -> bool {
        !self.handle.is_live()
    }

    /// Reads and decodes the value stored under `key`.
    ///
    /// An absent key is [`Error::NotFound`].
    pub fn get(&self, txn: &Transaction, key: &[u8]) -> Result<Decoded> {
        validate_key(key)?;
        self.check_owner(txn)?;
        txn.check()?;
        let data = txn.raw().get(self.dbi, key).map_err(Error::get_failed)?;
        codec::decode(&data)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, txn: &mut Transaction, key: &[u8], value: &Value) -> Result<()> {
        self.put_with(txn, key, value, PutFlags::UPSERT)
    }

    /// Stores `value` under `key` with explicit put flags.
    pub fn put_with(&self, txn: &mut Transaction, key: &[u8], value: &Value, flags: PutFlags) -> Result<()> {
        validate_key(key)?;
        self.check_owner(txn)?;
        txn.check()?;
        let encoded = codec::encode(value);
        txn.raw_mut().put(self.dbi, key, &encoded, flags).map_err(Error::PutFailed)
    }

    /// Removes `key`.
    pub fn delete(&self, txn: &mut Transaction, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.check_owner(txn)?;
        txn.check()?;
        txn.raw_mut().del(self.dbi, key).map_err(Error::DeleteFailed)
    }

    /// Releases the table handle against its environment. Closing twice,
    /// or after the environment was closed, is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.handle.release() {
            return Ok(());
        }
        if self.env.is_closed() {
            return Ok(());
        }
        self.env.raw().dbi_close(self.dbi).map_err(Error::TableCloseFailed)?;
        log::debug!("Closed table {:?} (dbi {})", self.name.as_deref().unwrap_or(""), self.dbi);
        Ok(())
    }

    /// Fails unless the table is open and `txn` belongs to its environment.
    pub(crate) fn check_owner(&self, txn: &Transaction) -> Result<()> {
        self.handle.ensure_live()?;
        if !self.env.same_as(txn.env()) {
            return Err(Error::WrongTransaction);
        }
        Ok(())
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close dropped table: {}", e);
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("dbi", &self.dbi)
            .field("flags", &self.flags)
            .field("closed", &self.is_closed())
            .finish()
    }
}
