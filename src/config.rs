//! Configuration options for opening an environment.

use crate::constants::EnvFlags;
use crate::{Error, Result};

pub use crate::engine::{MAX_DBS_LIMIT as MAX_TABLES_LIMIT, MAX_READERS_LIMIT};

/// Reader slots used when `max_readers` is left unset.
pub const DEFAULT_MAX_READERS: u32 = 126;

/// Named tables allowed when `max_tables` is left unset.
pub const DEFAULT_MAX_TABLES: u32 = 120;

/// Permission bits of newly created files.
pub const DEFAULT_MODE: u32 = 0o664;

/// Options for [`Environment::open`](crate::Environment::open).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOptions {
    /// Environment open flags.
    /// Default: `NOSUBDIR` (the path names the data file itself)
    pub flags: EnvFlags,

    /// Maximum concurrent read transactions. `0` means unset.
    /// Default: 0 (resolves to [`DEFAULT_MAX_READERS`])
    pub max_readers: u32,

    /// Maximum named tables. `0` means unset.
    /// Default: 0 (resolves to [`DEFAULT_MAX_TABLES`])
    pub max_tables: u32,

    /// Permission bits for created files.
    /// Default: 0o664
    pub mode: u32,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self { flags: EnvFlags::NOSUBDIR, max_readers: 0, max_tables: 0, mode: DEFAULT_MODE }
    }
}

impl EnvOptions {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the open flags.
    pub fn flags(mut self, flags: EnvFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the maximum number of concurrent readers.
    pub fn max_readers(mut self, readers: u32) -> Self {
        self.max_readers = readers;
        self
    }

    /// Sets the maximum number of named tables.
    pub fn max_tables(mut self, tables: u32) -> Self {
        self.max_tables = tables;
        self
    }

    /// Sets the permission bits of created files.
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Reader slots after applying the default.
    pub fn resolved_max_readers(&self) -> u32 {
        if self.max_readers == 0 {
            DEFAULT_MAX_READERS
        } else {
            self.max_readers
        }
    }

    /// Named tables after applying the default.
    pub fn resolved_max_tables(&self) -> u32 {
        if self.max_tables == 0 {
            DEFAULT_MAX_TABLES
        } else {
            self.max_tables
        }
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> Result<()> {
        if EnvFlags::from_bits(self.flags.bits()).is_none() {
            return Err(Error::invalid_option(format!("unknown environment flags {:#x}", self.flags.bits())));
        }
        if self.max_readers > MAX_READERS_LIMIT {
            return Err(Error::invalid_option(format!("max_readers must be <= {}", MAX_READERS_LIMIT)));
        }
        if self.max_tables > MAX_TABLES_LIMIT {
            return Err(Error::invalid_option(format!("max_tables must be <= {}", MAX_TABLES_LIMIT)));
        }
        if self.mode > 0o7777 {
            return Err(Error::invalid_option(format!("mode {:#o} is not a permission mask", self.mode)));
        }
        Ok(())
    }
}
