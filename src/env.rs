//! The environment handle.

use crate::config::EnvOptions;
use crate::constants::{EnvFlags, TxnFlags};
use crate::engine::{EnvInfo, RawEnv};
use crate::registry::{HandleKind, HandleRegistry, HandleState};
use crate::txn::Transaction;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct EnvInner {
    raw: RawEnv,
    handle: Arc<HandleState>,
    registry: HandleRegistry,
}

/// An open storage environment.
///
/// Cloning is cheap and yields another reference to the same environment;
/// closing any clone closes it for all of them.
///
/// # Example
///
/// ```rust,no_run
/// use mdbx_lua::{EnvOptions, Environment, TxnFlags, TableFlags, Value};
///
/// # fn main() -> Result<(), mdbx_lua::Error> {
/// let env = Environment::open("./data.mdbx", EnvOptions::default())?;
///
/// let mut txn = env.begin(TxnFlags::READWRITE)?;
/// let table = txn.open_table(None, TableFlags::empty())?;
/// table.put(&mut txn, b"greeting", &Value::from("hello"))?;
/// txn.commit()?;
///
/// assert_eq!(env.get_one(b"greeting")?, Some(Value::from("hello")));
/// env.close();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl Environment {
    /// Opens the environment at `path`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPath`] for an empty path
    /// - [`Error::InvalidOption`] if `options` fail validation
    /// - [`Error::CreateFailed`] if the engine rejects the limits
    /// - [`Error::OpenFailed`] if the engine cannot open the files
    pub fn open(path: impl AsRef<Path>, options: EnvOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidPath);
        }
        options.validate()?;

        let raw = RawEnv::create();
        let configured = raw
            .set_max_readers(options.resolved_max_readers())
            .and_then(|_| raw.set_max_dbs(options.resolved_max_tables()));
        if let Err(e) = configured {
            raw.close();
            return Err(Error::CreateFailed(e));
        }
        if let Err(e) = raw.open(path, options.flags, options.mode) {
            raw.close();
            return Err(Error::OpenFailed(e));
        }

        let registry = HandleRegistry::new();
        let handle = registry.register(HandleKind::Environment, None);
        log::info!(
            "Opened environment {:?} (flags {:?}, max_readers {}, max_tables {})",
            path,
            options.flags,
            options.resolved_max_readers(),
            options.resolved_max_tables()
        );

        Ok(Self { inner: Arc::new(EnvInner { raw, handle, registry }) })
    }

    /// Closes the environment. Closing twice is a no-op; every transaction,
    /// table and cursor under it becomes unusable.
    pub fn close(&self) {
        if self.inner.handle.release() {
            self.inner.raw.close();
            log::info!("Closed environment");
        }
    }

    /// Whether the environment has been closed.
    pub fn is_closed(&self) -> bool {
        !self.inner.handle.is_live()
    }

    /// The path the environment was opened with.
    pub fn path(&self) -> Result<PathBuf> {
        self.ensure_live()?;
        self.inner.raw.path().map_err(Error::QueryFailed)
    }

    /// OS handle of the data file.
    pub fn fd(&self) -> Result<i64> {
        self.ensure_live()?;
        self.inner.raw.fd().map_err(Error::QueryFailed)
    }

    /// Configured maximum of named tables.
    pub fn max_tables(&self) -> Result<u32> {
        self.ensure_live()?;
        self.inner.raw.max_dbs().map_err(Error::QueryFailed)
    }

    /// Configured maximum of concurrent readers.
    pub fn max_readers(&self) -> Result<u32> {
        self.ensure_live()?;
        self.inner.raw.max_readers().map_err(Error::QueryFailed)
    }

    /// Flags the environment operates with.
    pub fn flags(&self) -> Result<EnvFlags> {
        self.ensure_live()?;
        self.inner.raw.flags().map_err(Error::QueryFailed)
    }

    /// Current statistics.
    pub fn info(&self) -> Result<EnvInfo> {
        self.ensure_live()?;
        self.inner.raw.info().map_err(Error::QueryFailed)
    }

    /// Sets a runtime tunable. Accepts an [`EnvOption`](crate::EnvOption) or a raw option id,
    /// which is handed to the engine unchecked.
    pub fn set_option(&self, option: impl Into<u32>, value: u64) -> Result<()> {
        self.ensure_live()?;
        self.inner.raw.set_option(option.into(), value).map_err(Error::SetOptionFailed)
    }

    /// Reads a runtime tunable.
    pub fn get_option(&self, option: impl Into<u32>) -> Result<u64> {
        self.ensure_live()?;
        self.inner.raw.get_option(option.into()).map_err(Error::QueryFailed)
    }

    /// Flushes pending commits to disk; `force` fsyncs even when nothing is
    /// pending.
    pub fn sync(&self, force: bool) -> Result<()> {
        self.ensure_live()?;
        self.inner.raw.sync(force).map_err(Error::SyncFailed)
    }

    /// Rewrites the data file to hold only live entries. Needs write access
    /// and no other process attached; fails with `BUSY` otherwise.
    pub fn compact(&self) -> Result<()> {
        self.ensure_live()?;
        self.inner.raw.compact().map_err(Error::CompactFailed)
    }

    /// Begins a transaction.
    pub fn begin(&self, flags: TxnFlags) -> Result<Transaction> {
        Transaction::begin(self, flags)
    }

    /// Begins a read-only transaction.
    pub fn begin_read(&self) -> Result<Transaction> {
        self.begin(TxnFlags::RDONLY)
    }

    /// Number of live handles of `kind` under this environment.
    pub fn live_handles(&self, kind: HandleKind) -> usize {
        self.inner.registry.live(kind)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        self.inner.handle.ensure_live()
    }

    pub(crate) fn raw(&self) -> &RawEnv {
        &self.inner.raw
    }

    pub(crate) fn handle(&self) -> &Arc<HandleState> {
        &self.inner.handle
    }

    pub(crate) fn registry(&self) -> &HandleRegistry {
        &self.inner.registry
    }

    /// Whether `other` refers to the same open environment.
    pub fn same_as(&self, other: &Environment) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Drop for EnvInner {
    fn drop(&mut self) {
        if self.handle.release() {
            self.raw.close();
            log::debug!("Closed environment on drop");
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.inner.handle.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
