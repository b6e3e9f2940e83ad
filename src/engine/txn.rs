//! Transactions over the versioned store.
//!
//! A read transaction pins the sequence that was current when it began (or
//! was last renewed). A write transaction additionally buffers its changes
//! in a write set ordered like the store, which its own reads consult
//! first, and publishes the whole set as one commit.

use super::codes;
use super::env::{decode_catalog, encode_catalog, Shared, CATALOG_DBI, MAIN_DBI};
use super::memtable::{compare_keys, key_order};
use super::record::LogOp;
use super::{EngineError, Result, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::constants::{EnvFlags, PutFlags, TableFlags, TxnFlags};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Cursor positioning operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOp {
    /// First entry of the table.
    First,
    /// Last entry of the table.
    Last,
    /// First entry after the anchor (or the first entry without one).
    Next,
    /// Last entry before the anchor (or the last entry without one).
    Prev,
    /// First entry at or after the anchor.
    SetRange,
    /// Entry exactly at the anchor.
    SetKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Reset,
    Broken,
    Finished,
}

/// Write set key, ordered like the versioned store.
#[derive(Debug, Clone)]
struct WriteKey {
    dbi: u32,
    order: TableFlags,
    key: Vec<u8>,
}

impl WriteKey {
    fn new(dbi: u32, order: TableFlags, key: &[u8]) -> Self {
        Self { dbi, order, key: key.to_vec() }
    }
}

impl Ord for WriteKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dbi.cmp(&other.dbi).then_with(|| compare_keys(self.order, &self.key, &other.key))
    }
}

impl PartialOrd for WriteKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for WriteKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WriteKey {}

type WriteSet = BTreeMap<WriteKey, Option<Vec<u8>>>;

fn edge(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_slice()),
        Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// A transaction handle.
pub struct RawTxn {
    shared: Arc<Shared>,
    flags: TxnFlags,
    status: Status,
    snapshot: u64,
    pinned: Option<u64>,
    changes: Option<WriteSet>,
    holds_reader: bool,
    holds_writer: bool,
}

impl RawTxn {
    /// Begins a transaction on `env`.
    pub fn begin(env: &super::RawEnv, flags: TxnFlags) -> Result<Self> {
        let (shared, env_flags) = env.attach()?;

        let mut txn = Self {
            snapshot: shared.snapshot(),
            shared,
            flags,
            status: Status::Active,
            pinned: None,
            changes: None,
            holds_reader: false,
            holds_writer: false,
        };

        if flags.is_read_only() {
            txn.shared.acquire_reader()?;
            txn.holds_reader = true;
            if flags.contains(TxnFlags::RDONLY_PREPARE) {
                txn.status = Status::Reset;
            } else {
                txn.pin()?;
            }
        } else {
            if env_flags.contains(EnvFlags::RDONLY) {
                return Err(EngineError::new(codes::EACCES));
            }
            txn.shared.acquire_writer(flags.contains(TxnFlags::TRY))?;
            txn.holds_writer = true;
            txn.snapshot = txn.shared.snapshot();
            txn.changes = Some(WriteSet::new());
        }

        log::trace!("Began txn {} ({:?})", txn.id(), flags);
        Ok(txn)
    }

    /// Transaction id: the snapshot for readers, the sequence a commit
    /// would get for writers.
    pub fn id(&self) -> u64 {
        if self.holds_writer {
            self.snapshot + 1
        } else {
            self.snapshot
        }
    }

    /// Flags the transaction was begun with.
    pub fn flags(&self) -> TxnFlags {
        self.flags
    }

    /// Whether this is a read-only transaction.
    pub fn is_read_only(&self) -> bool {
        self.flags.is_read_only()
    }

    /// Publishes the changes and ends the transaction. The transaction is
    /// finished afterwards whether or not the commit succeeded.
    pub fn commit(&mut self) -> Result<()> {
        if self.status != Status::Active {
            if self.status != Status::Finished {
                self.release();
            }
            return Err(EngineError::new(codes::BAD_TXN));
        }
        if let Err(e) = self.shared.ensure_open() {
            self.release();
            return Err(e);
        }

        let result = match self.changes.take() {
            Some(changes) if !changes.is_empty() => {
                let ops = changes
                    .into_iter()
                    .map(|(WriteKey { dbi, key, .. }, value)| match value {
                        Some(value) => LogOp::Put { dbi, key, value },
                        None => LogOp::Delete { dbi, key },
                    })
                    .collect();
                self.shared.publish(ops, self.flags).map(|sequence| {
                    log::trace!("Committed txn {}", sequence);
                })
            }
            _ => Ok(()),
        };
        self.release();
        result
    }

    /// Drops the changes and ends the transaction.
    pub fn abort(&mut self) -> Result<()> {
        if self.status == Status::Finished {
            return Err(EngineError::new(codes::BAD_TXN));
        }
        self.release();
        Ok(())
    }

    /// Parks a read-only transaction, keeping its reader slot.
    pub fn reset(&mut self) -> Result<()> {
        if self.status == Status::Finished {
            return Err(EngineError::new(codes::BAD_TXN));
        }
        if !self.is_read_only() {
            return Err(EngineError::new(codes::EINVAL));
        }
        self.unpin();
        self.status = Status::Reset;
        Ok(())
    }

    /// Re-activates a reset read-only transaction on the newest snapshot.
    pub fn renew(&mut self) -> Result<()> {
        if matches!(self.status, Status::Finished | Status::Broken) {
            return Err(EngineError::new(codes::BAD_TXN));
        }
        if !self.is_read_only() {
            return Err(EngineError::new(codes::EINVAL));
        }
        self.shared.ensure_open()?;
        self.unpin();
        self.pin()?;
        self.status = Status::Active;
        Ok(())
    }

    /// Marks the transaction broken: only abort remains valid.
    pub fn txn_break(&mut self) -> Result<()> {
        if self.status == Status::Finished {
            return Err(EngineError::new(codes::BAD_TXN));
        }
        self.status = Status::Broken;
        Ok(())
    }

    /// Opens (optionally creating) a table and returns its handle.
    pub fn dbi_open(&mut self, name: Option<&str>, flags: TableFlags) -> Result<u32> {
        self.ensure_active()?;
        if let Some(name) = name {
            if name.is_empty() {
                return Err(EngineError::new(codes::EINVAL));
            }
            if name.len() > MAX_KEY_SIZE {
                return Err(EngineError::new(codes::BAD_VALSIZE));
            }
        }

        let wanted = flags.persistent();
        let accede = flags.contains(TableFlags::DB_ACCEDE);
        let create = flags.contains(TableFlags::CREATE);
        let catalog_key = name.map(|n| n.as_bytes().to_vec()).unwrap_or_default();

        let (dbi, table_flags) = match (name, self.catalog_lookup(&catalog_key)?) {
            (_, Some((dbi, stored))) => {
                if stored != wanted && !accede {
                    return Err(EngineError::new(codes::INCOMPATIBLE));
                }
                (dbi, stored)
            }
            (None, None) => {
                if wanted.is_empty() || accede {
                    (MAIN_DBI, TableFlags::empty())
                } else if create && !self.is_read_only() {
                    // Existing keys are ordered bytewise.
                    if key_order(wanted) != TableFlags::empty()
                        && self.step(MAIN_DBI, TableFlags::empty(), Bound::Unbounded, true).is_some()
                    {
                        return Err(EngineError::new(codes::INCOMPATIBLE));
                    }
                    self.write(CATALOG_DBI, TableFlags::empty(), catalog_key, Some(encode_catalog(MAIN_DBI, wanted)))?;
                    (MAIN_DBI, wanted)
                } else {
                    return Err(EngineError::new(codes::INCOMPATIBLE));
                }
            }
            (Some(_), None) => {
                if !create {
                    return Err(EngineError::new(codes::NOTFOUND));
                }
                if self.is_read_only() {
                    return Err(EngineError::new(codes::EACCES));
                }
                if self.named_tables() >= self.shared.max_dbs() as usize {
                    return Err(EngineError::new(codes::DBS_FULL));
                }
                let dbi = self.shared.alloc_dbi();
                self.write(CATALOG_DBI, TableFlags::empty(), catalog_key, Some(encode_catalog(dbi, wanted)))?;
                (dbi, wanted)
            }
        };

        self.shared.dbi_acquire(dbi, name.map(|n| n.as_bytes().to_vec()), table_flags);
        log::debug!("Opened table {:?} as dbi {}", name.unwrap_or(""), dbi);
        Ok(dbi)
    }

    /// Flags of table `dbi`, as visible to this transaction.
    pub fn dbi_flags(&self, dbi: u32) -> Result<TableFlags> {
        self.ensure_active()?;
        self.table(dbi)
    }

    /// Reads the value stored under `key`.
    pub fn get(&self, dbi: u32, key: &[u8]) -> Result<Vec<u8>> {
        self.ensure_active()?;
        let flags = self.table(dbi)?;
        check_key(flags, key)?;
        self.lookup(dbi, key_order(flags), key).ok_or_else(|| EngineError::new(codes::NOTFOUND))
    }

    /// Stores `value` under `key`.
    pub fn put(&mut self, dbi: u32, key: &[u8], value: &[u8], flags: PutFlags) -> Result<()> {
        self.ensure_writable()?;
        let table_flags = self.table(dbi)?;
        check_key(table_flags, key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(EngineError::new(codes::BAD_VALSIZE));
        }
        if flags.intersects(PutFlags::DUP_ONLY) {
            return Err(EngineError::new(codes::EINVAL));
        }

        let order = key_order(table_flags);
        let exists = self.lookup(dbi, order, key).is_some();
        if flags.contains(PutFlags::NOOVERWRITE) && exists {
            return Err(EngineError::new(codes::KEYEXIST));
        }
        if flags.contains(PutFlags::CURRENT) && !exists {
            return Err(EngineError::new(codes::NOTFOUND));
        }
        if flags.contains(PutFlags::APPEND) {
            if let Some((last, _)) = self.step(dbi, order, Bound::Unbounded, false) {
                if compare_keys(order, key, &last) != Ordering::Greater {
                    return Err(EngineError::new(codes::EKEYMISMATCH));
                }
            }
        }

        self.write(dbi, order, key.to_vec(), Some(value.to_vec()))
    }

    /// Removes `key`.
    pub fn del(&mut self, dbi: u32, key: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let flags = self.table(dbi)?;
        check_key(flags, key)?;
        let order = key_order(flags);
        if self.lookup(dbi, order, key).is_none() {
            return Err(EngineError::new(codes::NOTFOUND));
        }
        self.write(dbi, order, key.to_vec(), None)
    }

    /// Positions on an entry of table `dbi` relative to `anchor`.
    pub fn seek(&self, dbi: u32, op: SeekOp, anchor: Option<&[u8]>) -> Result<(Vec<u8>, Vec<u8>)> {
        self.ensure_active()?;
        let order = key_order(self.table(dbi)?);

        let found = match (op, anchor) {
            (SeekOp::First, _) | (SeekOp::Next, None) => self.step(dbi, order, Bound::Unbounded, true),
            (SeekOp::Last, _) | (SeekOp::Prev, None) => self.step(dbi, order, Bound::Unbounded, false),
            (SeekOp::Next, Some(a)) => self.step(dbi, order, Bound::Excluded(a), true),
            (SeekOp::Prev, Some(a)) => self.step(dbi, order, Bound::Excluded(a), false),
            (SeekOp::SetRange, Some(a)) => self.step(dbi, order, Bound::Included(a), true),
            (SeekOp::SetKey, Some(a)) => self.lookup(dbi, order, a).map(|value| (a.to_vec(), value)),
            (SeekOp::SetRange | SeekOp::SetKey, None) => return Err(EngineError::new(codes::EINVAL)),
        };
        found.ok_or_else(|| EngineError::new(codes::NOTFOUND))
    }

    fn ensure_active(&self) -> Result<()> {
        if self.status != Status::Active {
            return Err(EngineError::new(codes::BAD_TXN));
        }
        self.shared.ensure_open()
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_active()?;
        if self.is_read_only() {
            return Err(EngineError::new(codes::EACCES));
        }
        Ok(())
    }

    /// Flags of `dbi` if its table is visible to this transaction.
    fn table(&self, dbi: u32) -> Result<TableFlags> {
        let (name, _) = self.shared.dbi_slot(dbi)?;
        match self.catalog_lookup(&name.unwrap_or_default())? {
            Some((found, flags)) if found == dbi => Ok(flags),
            None if dbi == MAIN_DBI => Ok(TableFlags::empty()),
            _ => Err(EngineError::new(codes::BAD_DBI)),
        }
    }

    fn catalog_lookup(&self, name: &[u8]) -> Result<Option<(u32, TableFlags)>> {
        self.lookup(CATALOG_DBI, TableFlags::empty(), name).map(|value| decode_catalog(&value)).transpose()
    }

    /// Number of named tables in the catalog.
    fn named_tables(&self) -> usize {
        let mut count = 0;
        // The unnamed table's entry is the empty key.
        let mut from = Bound::Excluded(Vec::new());
        while let Some((name, _)) = self.step(CATALOG_DBI, TableFlags::empty(), edge(&from), true) {
            count += 1;
            from = Bound::Excluded(name);
        }
        count
    }

    fn lookup(&self, dbi: u32, order: TableFlags, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(changes) = &self.changes {
            if let Some(value) = changes.get(&WriteKey::new(dbi, order, key)) {
                return value.clone();
            }
        }
        self.shared.store.get(dbi, order, key, self.snapshot)
    }

    /// Nearest live entry of `dbi` past `from` in the direction of travel,
    /// merging the write set over the snapshot.
    fn step(&self, dbi: u32, order: TableFlags, from: Bound<&[u8]>, forward: bool) -> Option<(Vec<u8>, Vec<u8>)> {
        let mut bound = match from {
            Bound::Included(key) => Bound::Included(key.to_vec()),
            Bound::Excluded(key) => Bound::Excluded(key.to_vec()),
            Bound::Unbounded => Bound::Unbounded,
        };
        loop {
            let stored = if forward {
                self.shared.store.next_visible(dbi, order, edge(&bound), self.snapshot)
            } else {
                self.shared.store.prev_visible(dbi, order, edge(&bound), self.snapshot)
            };
            let Some((key, value)) = self.pending(dbi, order, edge(&bound), forward) else {
                return stored;
            };

            let stored_first = stored.as_ref().is_some_and(|(stored_key, _)| {
                let ord = compare_keys(order, stored_key, &key);
                if forward {
                    ord == Ordering::Less
                } else {
                    ord == Ordering::Greater
                }
            });
            if stored_first {
                return stored;
            }
            match value {
                Some(value) => return Some((key, value)),
                // Deleted here: keep going past it.
                None => bound = Bound::Excluded(key),
            }
        }
    }

    /// Nearest write-set entry of `dbi` past `from`, tombstones included.
    fn pending(
        &self,
        dbi: u32,
        order: TableFlags,
        from: Bound<&[u8]>,
        forward: bool,
    ) -> Option<(Vec<u8>, Option<Vec<u8>>)> {
        let changes = self.changes.as_ref()?;
        let start = Bound::Included(WriteKey::new(dbi, order, &[]));
        let end = match dbi.checked_add(1) {
            Some(next) => Bound::Excluded(WriteKey::new(next, TableFlags::empty(), &[])),
            None => Bound::Unbounded,
        };
        let found = match (from, forward) {
            (Bound::Unbounded, true) => changes.range((start, end)).next(),
            (Bound::Unbounded, false) => changes.range((start, end)).next_back(),
            (Bound::Included(key), true) => changes.range((Bound::Included(WriteKey::new(dbi, order, key)), end)).next(),
            (Bound::Excluded(key), true) => changes.range((Bound::Excluded(WriteKey::new(dbi, order, key)), end)).next(),
            (Bound::Included(key), false) => {
                changes.range((start, Bound::Included(WriteKey::new(dbi, order, key)))).next_back()
            }
            (Bound::Excluded(key), false) => {
                changes.range((start, Bound::Excluded(WriteKey::new(dbi, order, key)))).next_back()
            }
        };
        found.map(|(key, value)| (key.key.clone(), value.clone()))
    }

    fn write(&mut self, dbi: u32, order: TableFlags, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        let changes = self.changes.as_mut().ok_or_else(|| EngineError::new(codes::EACCES))?;
        changes.insert(WriteKey { dbi, order, key }, value);
        Ok(())
    }

    fn pin(&mut self) -> Result<()> {
        let snapshot = self.shared.pin_snapshot()?;
        self.snapshot = snapshot;
        self.pinned = Some(snapshot);
        Ok(())
    }

    fn unpin(&mut self) {
        if let Some(snapshot) = self.pinned.take() {
            self.shared.unpin_snapshot(snapshot);
        }
    }

    fn release(&mut self) {
        self.unpin();
        if self.holds_reader {
            self.shared.release_reader();
            self.holds_reader = false;
        }
        if self.holds_writer {
            self.shared.release_writer();
            self.holds_writer = false;
        }
        self.changes = None;
        self.status = Status::Finished;
    }
}


impl Drop for RawTxn {
    fn drop(&mut self) {
        if self.status != Status::Finished {
            self.release();
        }
    }
}

fn check_key(flags: TableFlags, key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(EngineError::new(codes::BAD_VALSIZE));
    }
    if flags.contains(TableFlags::INTEGERKEY) && key.len() != 4 && key.len() != 8 {
        return Err(EngineError::new(codes::BAD_VALSIZE));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RawEnv;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open(path: &Path) -> RawEnv {
        let env = RawEnv::create();
        env.set_max_dbs(2).unwrap();
        env.open(path, EnvFlags::NOSUBDIR, 0o664).unwrap();
        env
    }

    fn main_dbi(txn: &mut RawTxn) -> u32 {
        txn.dbi_open(None, TableFlags::empty()).unwrap()
    }

    #[test]
    fn test_read_your_writes_and_commit() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));

        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = main_dbi(&mut txn);
        txn.put(dbi, b"key", b"value", PutFlags::UPSERT).unwrap();
        assert_eq!(txn.get(dbi, b"key").unwrap(), b"value");
        txn.commit().unwrap();

        let reader = RawTxn::begin(&env, TxnFlags::RDONLY).unwrap();
        assert_eq!(reader.get(dbi, b"key").unwrap(), b"value");
        assert_eq!(reader.get(dbi, b"nope").unwrap_err().code(), codes::NOTFOUND);
    }

    #[test]
    fn test_snapshot_isolation() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));

        let mut setup = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = main_dbi(&mut setup);
        setup.commit().unwrap();

        let mut reader = RawTxn::begin(&env, TxnFlags::RDONLY).unwrap();
        let mut writer = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        writer.put(dbi, b"k", b"v", PutFlags::UPSERT).unwrap();
        writer.commit().unwrap();

        assert!(reader.get(dbi, b"k").unwrap_err().is_not_found());
        reader.reset().unwrap();
        reader.renew().unwrap();
        assert_eq!(reader.get(dbi, b"k").unwrap(), b"v");
    }

    #[test]
    fn test_finished_txn_is_bad() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));

        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = main_dbi(&mut txn);
        txn.commit().unwrap();
        assert_eq!(txn.get(dbi, b"k").unwrap_err().code(), codes::BAD_TXN);
        assert_eq!(txn.commit().unwrap_err().code(), codes::BAD_TXN);
        assert_eq!(txn.abort().unwrap_err().code(), codes::BAD_TXN);
    }

    #[test]
    fn test_put_flags() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));
        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = main_dbi(&mut txn);

        txn.put(dbi, b"b", b"1", PutFlags::UPSERT).unwrap();
        assert_eq!(txn.put(dbi, b"b", b"2", PutFlags::NOOVERWRITE).unwrap_err().code(), codes::KEYEXIST);
        assert_eq!(txn.put(dbi, b"c", b"2", PutFlags::CURRENT).unwrap_err().code(), codes::NOTFOUND);
        txn.put(dbi, b"b", b"3", PutFlags::CURRENT).unwrap();
        assert_eq!(txn.put(dbi, b"a", b"x", PutFlags::APPEND).unwrap_err().code(), codes::EKEYMISMATCH);
        txn.put(dbi, b"c", b"x", PutFlags::APPEND).unwrap();
        assert_eq!(txn.put(dbi, b"d", b"x", PutFlags::NODUPDATA).unwrap_err().code(), codes::EINVAL);
        assert_eq!(txn.get(dbi, b"b").unwrap(), b"3");
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));
        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = main_dbi(&mut txn);

        assert!(txn.del(dbi, b"k").unwrap_err().is_not_found());
        txn.put(dbi, b"k", b"v", PutFlags::UPSERT).unwrap();
        txn.del(dbi, b"k").unwrap();
        assert!(txn.get(dbi, b"k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));
        let mut setup = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = main_dbi(&mut setup);
        setup.commit().unwrap();

        let mut txn = RawTxn::begin(&env, TxnFlags::RDONLY).unwrap();
        assert_eq!(txn.put(dbi, b"k", b"v", PutFlags::UPSERT).unwrap_err().code(), codes::EACCES);
        assert_eq!(txn.dbi_open(Some("new"), TableFlags::CREATE).unwrap_err().code(), codes::EACCES);
    }

    #[test]
    fn test_named_tables() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));

        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        assert!(txn.dbi_open(Some("users"), TableFlags::empty()).unwrap_err().is_not_found());
        let users = txn.dbi_open(Some("users"), TableFlags::CREATE).unwrap();
        let posts = txn.dbi_open(Some("posts"), TableFlags::CREATE | TableFlags::REVERSEKEY).unwrap();
        assert_ne!(users, posts);
        assert_eq!(txn.dbi_open(Some("third"), TableFlags::CREATE).unwrap_err().code(), codes::DBS_FULL);
        assert_eq!(txn.dbi_open(Some("posts"), TableFlags::empty()).unwrap_err().code(), codes::INCOMPATIBLE);
        assert_eq!(txn.dbi_open(Some("posts"), TableFlags::DB_ACCEDE).unwrap(), posts);
        txn.put(users, b"k", b"u", PutFlags::UPSERT).unwrap();
        txn.commit().unwrap();

        let reader = RawTxn::begin(&env, TxnFlags::RDONLY).unwrap();
        assert_eq!(reader.get(users, b"k").unwrap(), b"u");
        assert_eq!(reader.dbi_flags(posts).unwrap(), TableFlags::REVERSEKEY);
    }

    #[test]
    fn test_aborted_table_is_bad_dbi() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));

        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = txn.dbi_open(Some("tmp"), TableFlags::CREATE).unwrap();
        txn.abort().unwrap();

        let reader = RawTxn::begin(&env, TxnFlags::RDONLY).unwrap();
        assert_eq!(reader.get(dbi, b"k").unwrap_err().code(), codes::BAD_DBI);
    }

    #[test]
    fn test_writer_exclusion() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));

        let mut first = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let err = RawTxn::begin(&env, TxnFlags::READWRITE).err().unwrap();
        assert_eq!(err.code(), codes::TXN_OVERLAPPING);

        thread::scope(|s| {
            let env = &env;
            let handle = s.spawn(move || RawTxn::begin(env, TxnFlags::TRY).err().map(|e| e.code()));
            assert_eq!(handle.join().unwrap(), Some(codes::BUSY));

            let waiter = s.spawn(move || RawTxn::begin(env, TxnFlags::READWRITE).map(|_| ()).is_ok());
            thread::sleep(Duration::from_millis(50));
            first.abort().unwrap();
            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn test_readers_full() {
        let dir = TempDir::new().unwrap();
        let env = RawEnv::create();
        env.set_max_readers(1).unwrap();
        env.open(&dir.path().join("db"), EnvFlags::NOSUBDIR, 0o664).unwrap();

        let first = RawTxn::begin(&env, TxnFlags::RDONLY).unwrap();
        assert_eq!(RawTxn::begin(&env, TxnFlags::RDONLY).err().unwrap().code(), codes::READERS_FULL);
        drop(first);
        RawTxn::begin(&env, TxnFlags::RDONLY).unwrap();
    }

    #[test]
    fn test_prepare_starts_reset() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));
        let mut setup = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = main_dbi(&mut setup);
        setup.commit().unwrap();

        let mut txn = RawTxn::begin(&env, TxnFlags::RDONLY_PREPARE).unwrap();
        assert_eq!(txn.get(dbi, b"k").unwrap_err().code(), codes::BAD_TXN);
        txn.renew().unwrap();
        assert!(txn.get(dbi, b"k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_break() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));
        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = main_dbi(&mut txn);
        txn.txn_break().unwrap();
        assert_eq!(txn.put(dbi, b"k", b"v", PutFlags::UPSERT).unwrap_err().code(), codes::BAD_TXN);
        assert_eq!(txn.commit().unwrap_err().code(), codes::BAD_TXN);
        RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
    }

    #[test]
    fn test_seek_orders() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));
        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = txn.dbi_open(Some("rev"), TableFlags::CREATE | TableFlags::REVERSEKEY).unwrap();
        for key in [&b"ab"[..], b"ba", b"cc"] {
            txn.put(dbi, key, b"v", PutFlags::UPSERT).unwrap();
        }

        // Reverse-key order compares from the last byte: "ba", "ab", "cc".
        assert_eq!(txn.seek(dbi, SeekOp::First, None).unwrap().0, b"ba");
        assert_eq!(txn.seek(dbi, SeekOp::Next, Some(b"ba")).unwrap().0, b"ab");
        assert_eq!(txn.seek(dbi, SeekOp::Last, None).unwrap().0, b"cc");
        assert_eq!(txn.seek(dbi, SeekOp::Prev, Some(b"ba")).unwrap_err().code(), codes::NOTFOUND);
        assert_eq!(txn.seek(dbi, SeekOp::SetRange, Some(b"zb")).unwrap().0, b"cc");
    }

    #[test]
    fn test_integer_keys() {
        assert_eq!(
            compare_keys(TableFlags::INTEGERKEY, &2u32.to_ne_bytes(), &256u32.to_ne_bytes()),
            Ordering::Less
        );
        assert_eq!(check_key(TableFlags::INTEGERKEY, b"abc").unwrap_err().code(), codes::BAD_VALSIZE);
        assert!(check_key(TableFlags::INTEGERKEY, &7u64.to_ne_bytes()).is_ok());
        assert_eq!(check_key(TableFlags::empty(), &[0u8; MAX_KEY_SIZE + 1]).unwrap_err().code(), codes::BAD_VALSIZE);
    }

    fn walk(txn: &RawTxn, dbi: u32, forward: bool) -> Vec<Vec<u8>> {
        let (mut op, step) = if forward { (SeekOp::First, SeekOp::Next) } else { (SeekOp::Last, SeekOp::Prev) };
        let mut anchor: Option<Vec<u8>> = None;
        let mut keys = Vec::new();
        while let Ok((key, _)) = txn.seek(dbi, op, anchor.as_deref()) {
            keys.push(key.clone());
            anchor = Some(key);
            op = step;
        }
        keys
    }

    #[test]
    fn test_cursor_walk_merges_pending_writes() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));

        let mut setup = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = main_dbi(&mut setup);
        let mut expected = BTreeMap::new();
        for i in (0..4000u32).step_by(2) {
            let key = format!("key{:05}", i).into_bytes();
            setup.put(dbi, &key, b"stored", PutFlags::UPSERT).unwrap();
            expected.insert(key, ());
        }
        setup.commit().unwrap();

        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        for i in (1..4000u32).step_by(2) {
            let key = format!("key{:05}", i).into_bytes();
            txn.put(dbi, &key, b"pending", PutFlags::UPSERT).unwrap();
            expected.insert(key, ());
        }
        for i in (0..4000u32).step_by(6) {
            let key = format!("key{:05}", i).into_bytes();
            txn.del(dbi, &key).unwrap();
            expected.remove(&key);
        }

        let forward = walk(&txn, dbi, true);
        assert_eq!(forward, expected.keys().cloned().collect::<Vec<_>>());
        let mut backward = walk(&txn, dbi, false);
        backward.reverse();
        assert_eq!(backward, forward);

        assert_eq!(txn.seek(dbi, SeekOp::SetRange, Some(b"key00000")).unwrap().0, b"key00001");
        assert_eq!(txn.seek(dbi, SeekOp::SetKey, Some(b"key00002")).unwrap(), (b"key00002".to_vec(), b"stored".to_vec()));
        assert!(txn.seek(dbi, SeekOp::SetKey, Some(b"key00006")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_integer_keys_of_both_widths() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));
        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = txn.dbi_open(Some("ints"), TableFlags::CREATE | TableFlags::INTEGERKEY).unwrap();

        txn.put(dbi, &5u64.to_ne_bytes(), b"wide", PutFlags::UPSERT).unwrap();
        txn.put(dbi, &300u32.to_ne_bytes(), b"b", PutFlags::UPSERT).unwrap();
        txn.put(dbi, &2u32.to_ne_bytes(), b"a", PutFlags::UPSERT).unwrap();
        txn.commit().unwrap();

        let reader = RawTxn::begin(&env, TxnFlags::RDONLY).unwrap();
        let keys = walk(&reader, dbi, true);
        assert_eq!(keys, vec![2u32.to_ne_bytes().to_vec(), 300u32.to_ne_bytes().to_vec(), 5u64.to_ne_bytes().to_vec()]);
    }

    #[test]
    fn test_main_table_order_is_fixed_once_used() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));
        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = main_dbi(&mut txn);
        txn.put(dbi, b"k", b"v", PutFlags::UPSERT).unwrap();

        let err = txn.dbi_open(None, TableFlags::CREATE | TableFlags::REVERSEKEY).unwrap_err();
        assert_eq!(err.code(), codes::INCOMPATIBLE);
        assert_eq!(txn.dbi_flags(dbi).unwrap(), TableFlags::empty());
    }

    #[test]
    fn test_aborted_main_flags_do_not_stick() {
        let dir = TempDir::new().unwrap();
        let env = open(&dir.path().join("db"));

        let mut txn = RawTxn::begin(&env, TxnFlags::READWRITE).unwrap();
        let dbi = txn.dbi_open(None, TableFlags::CREATE | TableFlags::REVERSEKEY).unwrap();
        assert_eq!(txn.dbi_flags(dbi).unwrap(), TableFlags::REVERSEKEY);
        txn.abort().unwrap();

        let reader = RawTxn::begin(&env, TxnFlags::RDONLY).unwrap();
        assert_eq!(reader.dbi_flags(dbi).unwrap(), TableFlags::empty());
    }
}
