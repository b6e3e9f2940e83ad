//! One-shot reads and writes on the default table.
//!
//! Each call runs in its own short-lived transaction and releases the
//! table and transaction on every path.

use crate::codec::{Decoded, Value};
use crate::constants::{TableFlags, TxnFlags};
use crate::env::Environment;
use crate::table::{validate_key, Table};
use crate::txn::Transaction;
use crate::{Error, Result};
use std::collections::HashMap;

impl Environment {
    /// Looks up every key in one read-only transaction.
    ///
    /// Best effort: keys that are empty, too long, absent, or hold a value
    /// of an unknown type are left out of the result instead of failing the
    /// whole batch. Only an empty `keys` or a failure to start the read is
    /// an error.
    pub fn get_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<HashMap<Vec<u8>, Value>> {
        if keys.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let mut txn = self.begin(TxnFlags::RDONLY)?;
        let result = txn
            .open_table(None, TableFlags::empty())
            .map(|table| {
                let found = collect(&txn, &table, keys);
                close_table(&table);
                found
            });
        if let Err(e) = txn.abort() {
            log::warn!("Failed to end batch read: {}", e);
        }
        result
    }

    /// Looks up a single key; `None` when it is absent or unreadable.
    pub fn get_one(&self, key: impl AsRef<[u8]>) -> Result<Option<Value>> {
        let key = key.as_ref();
        let mut found = self.get_many(&[key])?;
        Ok(found.remove(key))
    }

    /// Stores `value` under `key` in its own committed transaction.
    pub fn set(&self, key: impl AsRef<[u8]>, value: &Value) -> Result<()> {
        let key = key.as_ref();
        validate_key(key)?;
        let mut txn = self.begin(TxnFlags::READWRITE)?;
        let written = txn.open_table(None, TableFlags::empty()).and_then(|table| {
            let put = table.put(&mut txn, key, value);
            close_table(&table);
            put
        });
        match written {
            Ok(()) => txn.commit(),
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    log::warn!("Failed to abort after failed set: {}", abort);
                }
                Err(e)
            }
        }
    }
}

fn collect<K: AsRef<[u8]>>(txn: &Transaction, table: &Table, keys: &[K]) -> HashMap<Vec<u8>, Value> {
    let mut found = HashMap::with_capacity(keys.len());
    for key in keys {
        let key = key.as_ref();
        match table.get(txn, key) {
            Ok(Decoded::Value(value)) => {
                found.insert(key.to_vec(), value);
            }
            Ok(Decoded::Unknown { tag }) => {
                log::debug!("Skipping key {:?} with unknown value tag {:?}", String::from_utf8_lossy(key), tag);
            }
            Err(Error::EmptyKey | Error::KeyTooLong { .. } | Error::NotFound(_)) => {}
            Err(e) => {
                log::warn!("Skipping key {:?}: {}", String::from_utf8_lossy(key), e);
            }
        }
    }
    found
}

fn close_table(table: &Table) {
    if let Err(e) = table.close() {
        log::warn!("Failed to close table after batch: {}", e);
    }
}
