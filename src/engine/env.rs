//! Environments: configuration, open/close, shared state.
//!
//! A [`RawEnv`] goes through `created -> opened -> closed`. Limits are set
//! while created; `open` binds it to a path. Several `RawEnv`s opened on the
//! same data file in one process share a single [`Shared`] state, found
//! through a process-wide registry, so they see each other's commits and
//! serialize their writers.
//!
//! Across processes, coordination goes through file locks:
//!
//! - the lock file is held shared by every opener, exclusive under
//!   [`EnvFlags::EXCLUSIVE`]
//! - a write transaction holds an exclusive lock on the data file, then
//!   reads any commits other processes appended before it starts
//! - a read transaction picks up appended commits when it begins
//! - compaction rewrites the data file only while no other process has the
//!   environment open

use super::codes;
use super::datafile::{DataFile, Mark};
use super::memtable::{key_order, VersionedStore};
use super::record::{CommitRecord, LogOp};
use super::{strerror, EngineError, Result};
use crate::constants::{DebugFlags, EnvFlags, EnvOption, TableFlags, TxnFlags};
use fs2::FileExt;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[cfg(test)]
use super::datafile::Fault;

/// Internal table mapping table names to `(dbi, flags)`.
pub(crate) const CATALOG_DBI: u32 = 0;
/// The default (unnamed) table.
pub(crate) const MAIN_DBI: u32 = 1;
/// First handle given to a named table.
const FIRST_NAMED_DBI: u32 = 2;

/// Reader slots of an environment nobody configured.
const DEFAULT_READERS: u32 = 114;
/// Upper bound for `max_readers`.
pub const MAX_READERS_LIMIT: u32 = 32767;
/// Upper bound for `max_dbs`.
pub const MAX_DBS_LIMIT: u32 = 32765;

/// Smallest data file that is ever compacted automatically.
const COMPACT_MIN_SIZE: u64 = 1 << 20;

const DATA_FILE: &str = "mdbx.dat";
const LOCK_FILE: &str = "mdbx.lck";
const LOCK_SUFFIX: &str = "-lck";

static OPEN_ENVS: Lazy<Mutex<HashMap<PathBuf, Weak<Shared>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Encodes a catalog entry.
pub(crate) fn encode_catalog(dbi: u32, flags: TableFlags) -> Vec<u8> {
    let mut value = Vec::with_capacity(8);
    value.extend_from_slice(&dbi.to_le_bytes());
    value.extend_from_slice(&flags.bits().to_le_bytes());
    value
}

/// Decodes a catalog entry.
pub(crate) fn decode_catalog(value: &[u8]) -> Result<(u32, TableFlags)> {
    if value.len() != 8 {
        return Err(EngineError::new(codes::CORRUPTED));
    }
    let dbi = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
    let bits = u32::from_le_bytes([value[4], value[5], value[6], value[7]]);
    Ok((dbi, TableFlags::from_bits_retain(bits)))
}

/// Data file size that triggers the next automatic compaction, given the
/// size of the live data.
fn compact_threshold(live: u64) -> u64 {
    live.saturating_mul(2).max(COMPACT_MIN_SIZE)
}

/// Snapshot of environment statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvInfo {
    /// Id of the last committed write transaction.
    pub last_txn_id: u64,
    /// Configured reader slots.
    pub max_readers: u32,
    /// Reader slots currently taken.
    pub readers_in_use: u32,
    /// Open table handles.
    pub open_tables: usize,
    /// Size of the data file in bytes.
    pub data_size: u64,
}

/// Runtime tunables, indexed by [`EnvOption`].
#[derive(Debug, Clone)]
pub(crate) struct Tunables {
    values: [u64; 15],
}

impl Default for Tunables {
    fn default() -> Self {
        let mut values = [0u64; 15];
        values[EnvOption::RpAugmentLimit as usize] = 1024;
        values[EnvOption::LooseLimit as usize] = 64;
        values[EnvOption::DpReserveLimit as usize] = 1024;
        values[EnvOption::TxnDpLimit as usize] = 65536;
        values[EnvOption::TxnDpInitial as usize] = 1024;
        values[EnvOption::SpillMaxDenominator as usize] = 8;
        values[EnvOption::SpillMinDenominator as usize] = 8;
        values[EnvOption::MergeThreshold16Dot16Percent as usize] = 65536 / 4;
        Self { values }
    }
}

impl Tunables {
    fn get(&self, option: EnvOption) -> u64 {
        self.values[option as usize]
    }

    fn set(&mut self, option: EnvOption, value: u64) -> Result<()> {
        let valid = match option {
            EnvOption::MaxDb | EnvOption::MaxReaders => false,
            EnvOption::SyncPeriod => value <= u32::MAX as u64,
            EnvOption::LooseLimit
            | EnvOption::SpillMaxDenominator
            | EnvOption::SpillMinDenominator
            | EnvOption::SpillParent4ChildDenominator => value <= 255,
            EnvOption::TxnDpLimit | EnvOption::TxnDpInitial => value >= 1 && value <= i32::MAX as u64,
            EnvOption::MergeThreshold16Dot16Percent => (8192..=32768).contains(&value),
            EnvOption::PrefaultWriteEnable => value <= 1,
            _ => true,
        };
        if !valid {
            return Err(EngineError::new(codes::EINVAL));
        }
        self.values[option as usize] = value;
        Ok(())
    }
}

struct DbiSlot {
    name: Option<Vec<u8>>,
    flags: TableFlags,
    refs: usize,
}

/// State shared by every handle opened on the same data file.
pub(crate) struct Shared {
    data_path: PathBuf,
    flags: EnvFlags,
    mode: u32,
    max_readers: u32,
    max_dbs: u32,
    pub(crate) store: VersionedStore,
    committed: AtomicU64,
    file: Mutex<Option<DataFile>>,
    lock: Mutex<Option<File>>,
    writer_lock: Mutex<Option<File>>,
    open: AtomicBool,
    poisoned: AtomicBool,
    attached: AtomicUsize,
    readers: Mutex<u32>,
    /// Snapshot -> number of read transactions on it.
    pins: Mutex<BTreeMap<u64, usize>>,
    writer: Mutex<Option<ThreadId>>,
    writer_released: Condvar,
    dbis: Mutex<HashMap<u32, DbiSlot>>,
    /// Key order of every table in the catalog.
    orders: Mutex<HashMap<u32, TableFlags>>,
    next_dbi: AtomicU32,
    compact_at: AtomicU64,
    tunables: Mutex<Tunables>,
    last_sync: Mutex<Instant>,
}

impl Shared {
    fn open(
        data_path: &Path,
        lock_path: &Path,
        flags: EnvFlags,
        mode: u32,
        max_readers: u32,
        max_dbs: u32,
        tunables: Tunables,
    ) -> Result<Self> {
        let read_only = flags.contains(EnvFlags::RDONLY);
        if read_only && !data_path.exists() {
            return Err(EngineError::new(codes::ENOENT));
        }

        let lock = open_lock_file(lock_path, read_only)?;
        if flags.contains(EnvFlags::EXCLUSIVE) {
            FileExt::try_lock_exclusive(&lock)?;
        } else {
            FileExt::try_lock_shared(&lock)?;
        }

        let (file, records) = DataFile::open(data_path, read_only, mode)?;
        let writer_lock = File::open(data_path)?;

        let shared = Self {
            data_path: data_path.to_path_buf(),
            flags,
            mode,
            max_readers,
            max_dbs,
            store: VersionedStore::new(),
            committed: AtomicU64::new(0),
            file: Mutex::new(Some(file)),
            lock: Mutex::new(Some(lock)),
            writer_lock: Mutex::new(Some(writer_lock)),
            open: AtomicBool::new(true),
            poisoned: AtomicBool::new(false),
            attached: AtomicUsize::new(1),
            readers: Mutex::new(0),
            pins: Mutex::new(BTreeMap::new()),
            writer: Mutex::new(None),
            writer_released: Condvar::new(),
            dbis: Mutex::new(HashMap::new()),
            orders: Mutex::new(HashMap::new()),
            next_dbi: AtomicU32::new(FIRST_NAMED_DBI),
            compact_at: AtomicU64::new(COMPACT_MIN_SIZE),
            tunables: Mutex::new(tunables),
            last_sync: Mutex::new(Instant::now()),
        };

        for record in &records {
            shared.apply(record);
        }
        if !read_only {
            shared.repair()?;
        }
        shared.store.prune_all(shared.snapshot());
        shared.compact_at.store(compact_threshold(shared.store.approximate_size() as u64), Ordering::Relaxed);

        log::info!(
            "Opened data file {:?}: {} commits replayed, last txn {}",
            data_path,
            records.len(),
            shared.snapshot()
        );
        Ok(shared)
    }

    /// Drops a torn tail left by a crashed writer. Skipped while another
    /// process holds the writer lock; its next writer repairs instead.
    fn repair(&self) -> Result<()> {
        let guard = self.writer_lock.lock();
        let Some(lock) = guard.as_ref() else {
            return Ok(());
        };
        if FileExt::try_lock_exclusive(lock).is_err() {
            log::debug!("Not repairing {:?}: a writer is active", self.data_path);
            return Ok(());
        }
        let result = self.catch_up(true);
        let _ = FileExt::unlock(lock);
        result
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(EngineError::new(codes::EBADSIGN))
        }
    }

    pub(crate) fn max_dbs(&self) -> u32 {
        self.max_dbs
    }

    /// Sequence of the newest commit.
    pub(crate) fn snapshot(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    /// Registers a reader on the newest snapshot and returns it.
    pub(crate) fn pin_snapshot(&self) -> Result<u64> {
        self.catch_up(false)?;
        let mut pins = self.pins.lock();
        let snapshot = self.snapshot();
        *pins.entry(snapshot).or_insert(0) += 1;
        Ok(snapshot)
    }

    pub(crate) fn unpin_snapshot(&self, snapshot: u64) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&snapshot) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&snapshot);
            }
        }
    }

    /// Oldest snapshot any reader may still ask for.
    fn horizon(&self) -> u64 {
        let pins = self.pins.lock();
        pins.keys().next().copied().unwrap_or_else(|| self.snapshot())
    }

    /// Applies commits other processes appended since this handle last
    /// looked. Without `repair`, a busy data file means a local commit is in
    /// flight and the check is skipped.
    fn catch_up(&self, repair: bool) -> Result<()> {
        let mut guard = if repair {
            self.file.lock()
        } else {
            match self.file.try_lock() {
                Some(guard) => guard,
                None => return Ok(()),
            }
        };
        let file = guard.as_mut().ok_or_else(|| EngineError::new(codes::EBADSIGN))?;

        let records = file.read_new(repair)?;
        let current = self.snapshot();
        for record in records.iter().filter(|r| r.sequence > current) {
            self.apply(record);
            self.prune_written(record);
        }
        if !records.is_empty() {
            log::debug!("Picked up {} commits to {:?}, last txn {}", records.len(), self.data_path, self.snapshot());
        }
        Ok(())
    }

    pub(crate) fn acquire_reader(&self) -> Result<()> {
        let mut readers = self.readers.lock();
        if *readers >= self.max_readers {
            return Err(EngineError::new(codes::READERS_FULL));
        }
        *readers += 1;
        Ok(())
    }

    pub(crate) fn release_reader(&self) {
        let mut readers = self.readers.lock();
        *readers = readers.saturating_sub(1);
    }

    /// Takes the writer lock, waiting for the current writer unless
    /// `try_only`, and catches up with other processes' commits.
    pub(crate) fn acquire_writer(&self, try_only: bool) -> Result<()> {
        let me = thread::current().id();
        {
            let mut owner = self.writer.lock();
            loop {
                match *owner {
                    None => {
                        *owner = Some(me);
                        break;
                    }
                    Some(id) if id == me => return Err(EngineError::new(codes::TXN_OVERLAPPING)),
                    Some(_) if try_only => return Err(EngineError::new(codes::BUSY)),
                    Some(_) => self.writer_released.wait(&mut owner),
                }
            }
        }

        if let Err(e) = self.lock_writer_file(try_only) {
            *self.writer.lock() = None;
            self.writer_released.notify_one();
            return Err(e);
        }
        if let Err(e) = self.catch_up(true) {
            self.release_writer();
            return Err(e);
        }
        Ok(())
    }

    fn lock_writer_file(&self, try_only: bool) -> Result<()> {
        let guard = self.writer_lock.lock();
        let file = guard.as_ref().ok_or_else(|| EngineError::new(codes::EBADSIGN))?;
        if try_only {
            FileExt::try_lock_exclusive(file)?;
        } else {
            FileExt::lock_exclusive(file)?;
        }
        Ok(())
    }

    pub(crate) fn release_writer(&self) {
        if let Some(file) = self.writer_lock.lock().as_ref() {
            let _ = FileExt::unlock(file);
        }
        *self.writer.lock() = None;
        self.writer_released.notify_one();
    }

    /// Next unused table handle.
    pub(crate) fn alloc_dbi(&self) -> u32 {
        self.next_dbi.fetch_add(1, Ordering::AcqRel)
    }

    /// Flags of an open table handle, with the name it was opened under.
    pub(crate) fn dbi_slot(&self, dbi: u32) -> Result<(Option<Vec<u8>>, TableFlags)> {
        self.dbis
            .lock()
            .get(&dbi)
            .map(|slot| (slot.name.clone(), slot.flags))
            .ok_or_else(|| EngineError::new(codes::BAD_DBI))
    }

    pub(crate) fn dbi_acquire(&self, dbi: u32, name: Option<Vec<u8>>, flags: TableFlags) {
        let mut dbis = self.dbis.lock();
        let slot = dbis.entry(dbi).or_insert(DbiSlot { name, flags, refs: 0 });
        slot.flags = flags;
        slot.refs += 1;
    }

    fn dbi_release(&self, dbi: u32) -> Result<()> {
        let mut dbis = self.dbis.lock();
        let slot = dbis.get_mut(&dbi).ok_or_else(|| EngineError::new(codes::BAD_DBI))?;
        slot.refs -= 1;
        if slot.refs == 0 {
            dbis.remove(&dbi);
        }
        Ok(())
    }

    /// Makes `ops` durable and visible under the next sequence. On failure
    /// the data file is cut back to where it was, so the commit is gone for
    /// good.
    pub(crate) fn publish(&self, ops: Vec<LogOp>, txn_flags: TxnFlags) -> Result<u64> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(EngineError::new(codes::PANIC));
        }
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| EngineError::new(codes::EBADSIGN))?;

        let sequence = self.snapshot() + 1;
        let record = CommitRecord::new(sequence, ops);
        let mark = file.mark();
        if let Err(e) = self.write_record(file, mark, &record, txn_flags) {
            log::warn!("Rolling back txn {} in {:?}: {}", sequence, self.data_path, e);
            if let Err(rewind) = file.rewind(mark) {
                return Err(self.poison(&rewind));
            }
            return Err(e);
        }

        self.apply(&record);
        if crate::debug_flags().contains(DebugFlags::ASSERT) {
            self.verify_applied(&record).map_err(|e| self.poison(&e))?;
        }
        self.prune_written(&record);
        self.maybe_compact(file);
        Ok(sequence)
    }

    fn write_record(&self, file: &mut DataFile, mark: Mark, record: &CommitRecord, txn_flags: TxnFlags) -> Result<()> {
        file.append(&record.encode()?)?;
        if self.must_sync(file, txn_flags) {
            file.sync()?;
            *self.last_sync.lock() = Instant::now();
        }
        if crate::debug_flags().contains(DebugFlags::AUDIT) && file.read_back(mark)? != std::slice::from_ref(record) {
            return Err(EngineError::with_message(
                codes::CORRUPTED,
                format!("{}: txn {} did not read back", strerror(codes::CORRUPTED), record.sequence),
            ));
        }
        Ok(())
    }

    fn must_sync(&self, file: &DataFile, txn_flags: TxnFlags) -> bool {
        if !self.flags.is_nosync() && !txn_flags.contains(TxnFlags::NOSYNC) {
            return true;
        }
        let tunables = self.tunables.lock();
        let sync_bytes = tunables.get(EnvOption::SyncBytes);
        if sync_bytes > 0 && file.unsynced() >= sync_bytes {
            return true;
        }
        let sync_period = tunables.get(EnvOption::SyncPeriod);
        sync_period > 0 && self.last_sync.lock().elapsed() >= Duration::from_secs_f64(sync_period as f64 / 65536.0)
    }

    /// Inserts the versions of `record` and makes its sequence current.
    fn apply(&self, record: &CommitRecord) {
        let mut orders = self.orders.lock();
        for op in &record.ops {
            match op {
                LogOp::Put { dbi, key, value } => {
                    if *dbi == CATALOG_DBI {
                        match decode_catalog(value) {
                            Ok((table, flags)) => {
                                orders.insert(table, key_order(flags));
                                self.next_dbi.fetch_max(table.saturating_add(1), Ordering::AcqRel);
                            }
                            Err(e) => log::warn!("Bad catalog entry {:?} in txn {}: {}", key, record.sequence, e),
                        }
                    }
                    let order = orders.get(dbi).copied().unwrap_or(TableFlags::empty());
                    self.store.put(*dbi, order, key, value, record.sequence);
                }
                LogOp::Delete { dbi, key } => {
                    let order = orders.get(dbi).copied().unwrap_or(TableFlags::empty());
                    self.store.delete(*dbi, order, key, record.sequence);
                }
            }
        }
        self.committed.store(record.sequence, Ordering::Release);
    }

    /// Checks that every change of `record` reads back at its sequence.
    fn verify_applied(&self, record: &CommitRecord) -> Result<()> {
        let orders = self.orders.lock();
        for op in &record.ops {
            let (dbi, key, expected) = match op {
                LogOp::Put { dbi, key, value } => (*dbi, key, Some(value)),
                LogOp::Delete { dbi, key } => (*dbi, key, None),
            };
            let order = orders.get(&dbi).copied().unwrap_or(TableFlags::empty());
            if self.store.get(dbi, order, key, record.sequence).as_ref() != expected {
                return Err(EngineError::with_message(
                    codes::PANIC,
                    format!("{}: txn {} is not visible after commit", strerror(codes::PANIC), record.sequence),
                ));
            }
        }
        Ok(())
    }

    /// Drops the versions `record` superseded that no reader can see.
    fn prune_written(&self, record: &CommitRecord) {
        let horizon = self.horizon();
        let orders = self.orders.lock();
        for op in &record.ops {
            let (LogOp::Put { dbi, key, .. } | LogOp::Delete { dbi, key }) = op;
            let order = orders.get(dbi).copied().unwrap_or(TableFlags::empty());
            self.store.prune(*dbi, order, key, horizon);
        }
    }

    fn poison(&self, cause: &EngineError) -> EngineError {
        log::error!("Environment {:?} is no longer usable: {}", self.data_path, cause);
        self.poisoned.store(true, Ordering::Release);
        EngineError::with_message(codes::PANIC, format!("{}: {}", strerror(codes::PANIC), cause))
    }

    fn maybe_compact(&self, file: &mut DataFile) {
        if file.size() < self.compact_at.load(Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.compact_file(file) {
            if e.code() == codes::BUSY {
                log::debug!("Not compacting {:?}: another process has it open", self.data_path);
            } else {
                log::warn!("Failed to compact {:?}: {}", self.data_path, e);
            }
            self.compact_at.store(file.size().saturating_mul(2), Ordering::Relaxed);
        }
    }

    /// Rewrites the data file as a single commit holding the live data.
    /// The caller holds the writer.
    fn compact_file(&self, file: &mut DataFile) -> Result<()> {
        self.with_sole_access(|| {
            let before = file.size();
            let committed = self.snapshot();
            let ops = self
                .store
                .live(committed)
                .into_iter()
                .map(|(dbi, key, value)| LogOp::Put { dbi, key, value })
                .collect();
            *file = DataFile::write_compacted(&self.data_path, self.mode, &CommitRecord::new(committed, ops))?;
            self.reopen_writer_lock().map_err(|e| self.poison(&e))?;

            let dropped = self.store.prune_all(self.horizon());
            self.compact_at.store(compact_threshold(file.size()), Ordering::Relaxed);
            log::info!(
                "Compacted {:?}: {} -> {} bytes, {} stale versions dropped",
                self.data_path,
                before,
                file.size(),
                dropped
            );
            Ok(())
        })
    }

    /// Runs `f` holding the lock file exclusively, which fails with
    /// `BUSY` while another process has the environment open.
    fn with_sole_access<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard = self.lock.lock();
        let lock = guard.as_ref().ok_or_else(|| EngineError::new(codes::EBADSIGN))?;
        if self.flags.contains(EnvFlags::EXCLUSIVE) {
            return f();
        }

        if let Err(e) = FileExt::try_lock_exclusive(lock) {
            // A refused upgrade may have dropped the shared lock.
            if let Err(relock) = FileExt::try_lock_shared(lock) {
                log::warn!("Lost the shared lock on {:?}: {}", self.data_path, relock);
            }
            return Err(e.into());
        }
        let result = f();
        if let Err(e) = FileExt::try_lock_shared(lock) {
            log::warn!("Failed to downgrade the lock on {:?}: {}", self.data_path, e);
        }
        result
    }

    /// Moves the writer lock onto a freshly written data file.
    fn reopen_writer_lock(&self) -> Result<()> {
        let file = File::open(&self.data_path)?;
        FileExt::lock_exclusive(&file)?;
        *self.writer_lock.lock() = Some(file);
        Ok(())
    }

    /// Compacts the data file now. The caller holds the writer.
    fn compact(&self) -> Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| EngineError::new(codes::EBADSIGN))?;
        self.compact_file(file)
    }

    fn sync(&self, force: bool) -> Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| EngineError::new(codes::EBADSIGN))?;
        if force || file.unsynced() > 0 {
            file.sync()?;
            *self.last_sync.lock() = Instant::now();
        }
        Ok(())
    }

    fn fd(&self) -> Result<i64> {
        self.file.lock().as_ref().map(DataFile::fd).ok_or_else(|| EngineError::new(codes::EBADSIGN))
    }

    fn info(&self) -> EnvInfo {
        EnvInfo {
            last_txn_id: self.snapshot(),
            max_readers: self.max_readers,
            readers_in_use: *self.readers.lock(),
            open_tables: self.dbis.lock().len(),
            data_size: self.file.lock().as_ref().map(DataFile::size).unwrap_or(0),
        }
    }

    #[cfg(test)]
    fn inject_fault(&self, fault: Fault) -> Result<()> {
        let mut guard = self.file.lock();
        guard.as_mut().ok_or_else(|| EngineError::new(codes::EBADSIGN))?.inject(fault);
        Ok(())
    }

    /// Final close: flushes the data file and drops the file locks.
    fn shutdown(&self) {
        self.open.store(false, Ordering::Release);
        if let Some(mut file) = self.file.lock().take() {
            if !self.flags.contains(EnvFlags::UTTERLY_NOSYNC) && !self.flags.contains(EnvFlags::RDONLY) {
                if let Err(e) = file.sync() {
                    log::warn!("Failed to sync {:?} on close: {}", self.data_path, e);
                }
            }
        }
        self.writer_lock.lock().take();
        if let Some(lock) = self.lock.lock().take() {
            let _ = FileExt::unlock(&lock);
        }
        self.dbis.lock().clear();
        log::info!("Closed data file {:?}", self.data_path);
    }
}

fn open_lock_file(path: &Path, read_only: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    match options.open(path) {
        Ok(file) => Ok(file),
        Err(_) if read_only => Ok(OpenOptions::new().read(true).open(path)?),
        Err(e) => Err(e.into()),
    }
}

/// Resolves `(data file, lock file)` for `path`.
fn layout(path: &Path, flags: EnvFlags) -> Result<(PathBuf, PathBuf)> {
    if flags.contains(EnvFlags::NOSUBDIR) {
        let mut lock = path.as_os_str().to_owned();
        lock.push(LOCK_SUFFIX);
        return Ok((path.to_path_buf(), PathBuf::from(lock)));
    }
    if !path.is_dir() {
        if flags.contains(EnvFlags::RDONLY) {
            return Err(EngineError::new(codes::ENOENT));
        }
        fs::create_dir_all(path)?;
    }
    Ok((path.join(DATA_FILE), path.join(LOCK_FILE)))
}

/// Registry key for a data file.
fn canonical(data_path: &Path) -> PathBuf {
    if let Ok(path) = data_path.canonicalize() {
        return path;
    }
    let parent = match data_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), data_path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => data_path.to_path_buf(),
    }
}


enum EnvState {
    Created { max_readers: u32, max_dbs: u32, tunables: Tunables },
    Opened { shared: Arc<Shared>, flags: EnvFlags, path: PathBuf },
    Closed,
}

/// An environment handle.
pub struct RawEnv {
    state: Mutex<EnvState>,
}

impl RawEnv {
    /// Creates an unopened environment with default limits.
    pub fn create() -> Self {
        Self {
            state: Mutex::new(EnvState::Created {
                max_readers: DEFAULT_READERS,
                max_dbs: 0,
                tunables: Tunables::default(),
            }),
        }
    }

    /// Sets the number of reader slots. Only valid before `open`.
    pub fn set_max_readers(&self, readers: u32) -> Result<()> {
        match &mut *self.state.lock() {
            EnvState::Created { max_readers, .. } => {
                if readers == 0 || readers > MAX_READERS_LIMIT {
                    return Err(EngineError::new(codes::EINVAL));
                }
                *max_readers = readers;
                Ok(())
            }
            EnvState::Opened { .. } => Err(EngineError::new(codes::EPERM)),
            EnvState::Closed => Err(EngineError::new(codes::EBADSIGN)),
        }
    }

    /// Sets the number of named tables. Only valid before `open`.
    pub fn set_max_dbs(&self, dbs: u32) -> Result<()> {
        match &mut *self.state.lock() {
            EnvState::Created { max_dbs, .. } => {
                if dbs > MAX_DBS_LIMIT {
                    return Err(EngineError::new(codes::EINVAL));
                }
                *max_dbs = dbs;
                Ok(())
            }
            EnvState::Opened { .. } => Err(EngineError::new(codes::EPERM)),
            EnvState::Closed => Err(EngineError::new(codes::EBADSIGN)),
        }
    }

    /// Opens the environment at `path`.
    pub fn open(&self, path: &Path, flags: EnvFlags, mode: u32) -> Result<()> {
        let mut state = self.state.lock();
        let (max_readers, max_dbs, tunables) = match &*state {
            EnvState::Created { max_readers, max_dbs, tunables } => (*max_readers, *max_dbs, tunables.clone()),
            EnvState::Opened { .. } => return Err(EngineError::new(codes::EPERM)),
            EnvState::Closed => return Err(EngineError::new(codes::EBADSIGN)),
        };
        if path.as_os_str().is_empty() {
            return Err(EngineError::new(codes::EINVAL));
        }

        let (data_path, lock_path) = layout(path, flags)?;
        let key = canonical(&data_path);

        let mut open_envs = OPEN_ENVS.lock();
        let live = open_envs.get(&key).and_then(Weak::upgrade).filter(|s| s.is_open());
        let (shared, effective) = match live {
            Some(shared) => {
                if flags.contains(EnvFlags::EXCLUSIVE) || shared.flags.contains(EnvFlags::EXCLUSIVE) {
                    return Err(EngineError::new(codes::BUSY));
                }
                let mut effective = flags;
                if (flags & EnvFlags::SHARED_MODE) != (shared.flags & EnvFlags::SHARED_MODE) {
                    if !flags.contains(EnvFlags::ACCEDE) {
                        return Err(EngineError::new(codes::INCOMPATIBLE));
                    }
                    effective = (flags - EnvFlags::SHARED_MODE) | (shared.flags & EnvFlags::SHARED_MODE);
                }
                if shared.flags.contains(EnvFlags::RDONLY) && !flags.contains(EnvFlags::RDONLY) {
                    return Err(EngineError::new(codes::EACCES));
                }
                shared.attached.fetch_add(1, Ordering::AcqRel);
                log::debug!("Attached to open environment {:?}", key);
                (shared, effective)
            }
            None => {
                let shared = Arc::new(Shared::open(
                    &data_path,
                    &lock_path,
                    flags,
                    mode,
                    max_readers,
                    max_dbs,
                    tunables,
                )?);
                open_envs.insert(key, Arc::downgrade(&shared));
                (shared, flags)
            }
        };

        *state = EnvState::Opened { shared, flags: effective, path: path.to_path_buf() };
        Ok(())
    }

    /// Closes the environment. Closing twice is a no-op.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), EnvState::Closed);
        if let EnvState::Opened { shared, .. } = previous {
            let mut open_envs = OPEN_ENVS.lock();
            if shared.attached.fetch_sub(1, Ordering::AcqRel) == 1 {
                open_envs.retain(|_, weak| !std::ptr::eq(weak.as_ptr(), Arc::as_ptr(&shared)));
                shared.shutdown();
            }
        }
    }

    /// Whether `open` succeeded and `close` has not run.
    pub fn is_open(&self) -> bool {
        matches!(&*self.state.lock(), EnvState::Opened { .. })
    }

    /// The path the environment was opened with.
    pub fn path(&self) -> Result<PathBuf> {
        match &*self.state.lock() {
            EnvState::Opened { path, .. } => Ok(path.clone()),
            EnvState::Created { .. } => Err(EngineError::new(codes::EINVAL)),
            EnvState::Closed => Err(EngineError::new(codes::EBADSIGN)),
        }
    }

    /// OS handle of the data file.
    pub fn fd(&self) -> Result<i64> {
        self.shared()?.fd()
    }

    /// Flags the environment is operating with.
    pub fn flags(&self) -> Result<EnvFlags> {
        match &*self.state.lock() {
            EnvState::Opened { flags, .. } => Ok(*flags),
            EnvState::Created { .. } => Err(EngineError::new(codes::EINVAL)),
            EnvState::Closed => Err(EngineError::new(codes::EBADSIGN)),
        }
    }

    /// Configured reader slots.
    pub fn max_readers(&self) -> Result<u32> {
        match &*self.state.lock() {
            EnvState::Created { max_readers, .. } => Ok(*max_readers),
            EnvState::Opened { shared, .. } => Ok(shared.max_readers),
            EnvState::Closed => Err(EngineError::new(codes::EBADSIGN)),
        }
    }

    /// Configured named tables.
    pub fn max_dbs(&self) -> Result<u32> {
        match &*self.state.lock() {
            EnvState::Created { max_dbs, .. } => Ok(*max_dbs),
            EnvState::Opened { shared, .. } => Ok(shared.max_dbs),
            EnvState::Closed => Err(EngineError::new(codes::EBADSIGN)),
        }
    }

    /// Sets a tunable by its numeric identifier.
    pub fn set_option(&self, option: u32, value: u64) -> Result<()> {
        let option = EnvOption::from_u32(option).ok_or_else(|| EngineError::new(codes::EINVAL))?;
        match option {
            EnvOption::MaxDb => {
                let dbs = u32::try_from(value).map_err(|_| EngineError::new(codes::EINVAL))?;
                return self.set_max_dbs(dbs);
            }
            EnvOption::MaxReaders => {
                let readers = u32::try_from(value).map_err(|_| EngineError::new(codes::EINVAL))?;
                return self.set_max_readers(readers);
            }
            _ => {}
        }
        match &mut *self.state.lock() {
            EnvState::Created { tunables, .. } => tunables.set(option, value),
            EnvState::Opened { shared, .. } => shared.tunables.lock().set(option, value),
            EnvState::Closed => Err(EngineError::new(codes::EBADSIGN)),
        }
    }

    /// Reads a tunable by its numeric identifier.
    pub fn get_option(&self, option: u32) -> Result<u64> {
        let option = EnvOption::from_u32(option).ok_or_else(|| EngineError::new(codes::EINVAL))?;
        match option {
            EnvOption::MaxDb => return self.max_dbs().map(u64::from),
            EnvOption::MaxReaders => return self.max_readers().map(u64::from),
            _ => {}
        }
        match &*self.state.lock() {
            EnvState::Created { tunables, .. } => Ok(tunables.get(option)),
            EnvState::Opened { shared, .. } => Ok(shared.tunables.lock().get(option)),
            EnvState::Closed => Err(EngineError::new(codes::EBADSIGN)),
        }
    }

    /// Flushes the data file; with `force`, fsyncs even when nothing is
    /// pending.
    pub fn sync(&self, force: bool) -> Result<()> {
        let shared = self.shared()?;
        if shared.flags.contains(EnvFlags::RDONLY) {
            return Ok(());
        }
        shared.sync(force)
    }

    /// Releases one reference to table handle `dbi`.
    pub fn dbi_close(&self, dbi: u32) -> Result<()> {
        self.shared()?.dbi_release(dbi)
    }

    /// Current statistics.
    pub fn info(&self) -> Result<EnvInfo> {
        Ok(self.shared()?.info())
    }

    /// Rewrites the data file down to the live data, waiting for the
    /// current writer first.
    ///
    /// Fails with `BUSY` while another process has the environment open.
    pub fn compact(&self) -> Result<()> {
        let shared = self.shared()?;
        if shared.flags.contains(EnvFlags::RDONLY) {
            return Err(EngineError::new(codes::EACCES));
        }
        shared.acquire_writer(false)?;
        let result = shared.compact();
        shared.release_writer();
        result
    }

    /// Shared state plus the flags of this handle, for beginning a
    /// transaction.
    pub(crate) fn attach(&self) -> Result<(Arc<Shared>, EnvFlags)> {
        match &*self.state.lock() {
            EnvState::Opened { shared, flags, .. } => Ok((Arc::clone(shared), *flags)),
            EnvState::Created { .. } => Err(EngineError::new(codes::EPERM)),
            EnvState::Closed => Err(EngineError::new(codes::EBADSIGN)),
        }
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        self.attach().map(|(shared, _)| shared)
    }

    /// Opens `path` with state of its own, bypassing the in-process
    /// registry the way a second process would.
    #[cfg(test)]
    pub(crate) fn open_detached(path: &Path, flags: EnvFlags) -> Result<Self> {
        let (data_path, lock_path) = layout(path, flags)?;
        let shared = Shared::open(&data_path, &lock_path, flags, 0o664, DEFAULT_READERS, 4, Tunables::default())?;
        Ok(Self { state: Mutex::new(EnvState::Opened { shared: Arc::new(shared), flags, path: path.to_path_buf() }) })
    }

    /// Makes the next data file append or sync fail.
    #[cfg(test)]
    pub(crate) fn inject_fault(&self, fault: Fault) -> Result<()> {
        self.shared()?.inject_fault(fault)
    }
}

impl Default for RawEnv {
    fn default() -> Self {
        Self::create()
    }
}

impl Drop for RawEnv {
    fn drop(&mut self) {
        self.close();
    }
}
