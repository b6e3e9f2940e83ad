//! # mdbx-lua - Typed Transactional Key-Value Storage for Lua
//!
//! mdbx-lua exposes an embedded MVCC key-value engine to Lua scripts (and to
//! Rust callers) through a small, typed API. Values are one of three scalar
//! kinds (text, number, boolean) stored with a one-byte type tag, so a value
//! comes back as the same kind it was written as.
//!
//! ## Architecture
//!
//! - **Engine**: versioned store, commit log and table catalog behind the
//!   MDBX transactional contract (flags, error codes, reader slots)
//! - **Codec**: tag + payload encoding of [`Value`]s
//! - **Handles**: [`Environment`] → [`Transaction`] → [`Table`] / [`Cursor`],
//!   each tracked by the [`registry`] so a released handle fails loudly
//! - **Host**: the `mdbx` Lua module built on `mlua`
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use mdbx_lua::{EnvOptions, Environment, TableFlags, TxnFlags, Value};
//!
//! # fn main() -> Result<(), mdbx_lua::Error> {
//! let env = Environment::open("./data.mdbx", EnvOptions::default())?;
//!
//! // One-shot writes and batch reads
//! env.set("name", &Value::from("mdbx"))?;
//! env.set("version", &Value::from(0.1))?;
//! let found = env.get_many(&["name", "version", "missing"])?;
//! assert_eq!(found.len(), 2);
//!
//! // Explicit transactions
//! let mut txn = env.begin(TxnFlags::READWRITE)?;
//! let table = txn.open_table(Some("flags"), TableFlags::CREATE)?;
//! table.put(&mut txn, b"enabled", &Value::from(true))?;
//! txn.commit()?;
//!
//! env.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
mod batch;
pub mod codec;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod engine;
pub mod env;
pub mod error;
pub mod host;
pub mod registry;
pub mod table;
pub mod txn;

// Re-exports
pub use codec::{Decoded, Value};
pub use config::EnvOptions;
pub use constants::{DebugFlags, EnvFlags, EnvOption, LogLevel, PutFlags, TableFlags, TxnFlags};
pub use cursor::Cursor;
pub use engine::{strerror, EngineError, EnvInfo};
pub use env::Environment;
pub use error::{Error, ErrorKind, Result};
pub use registry::HandleKind;
pub use table::{Table, MAX_KEY_LEN};
pub use txn::{Transaction, TxnState};

use std::sync::atomic::{AtomicU32, Ordering};

static DEBUG_FLAGS: AtomicU32 = AtomicU32::new(0);

/// Sets the log level and returns the previous one.
///
/// [`LogLevel::DontChange`] only queries. The level is applied to the `log`
/// facade, so it also bounds what an installed logger receives.
pub fn set_log_level(level: LogLevel) -> LogLevel {
    let previous = LogLevel::from_filter(log::max_level());
    if level != LogLevel::DontChange {
        log::set_max_level(level.to_filter());
    }
    previous
}

/// Sets the log level and the debug flags; returns the previous log level.
///
/// Two flags change engine behavior: [`DebugFlags::ASSERT`] re-reads every
/// written key from the store after a commit is applied, and
/// [`DebugFlags::AUDIT`] reads each commit back from the data file before
/// it is published. A mismatch fails the commit. The remaining flags are
/// accepted and reported back by [`debug_flags`] but have no effect.
pub fn setup_debug(level: LogLevel, flags: DebugFlags) -> LogLevel {
    DEBUG_FLAGS.store(flags.bits(), Ordering::Relaxed);
    set_log_level(level)
}

/// Debug flags last given to [`setup_debug`].
pub fn debug_flags() -> DebugFlags {
    DebugFlags::from_bits_truncate(DEBUG_FLAGS.load(Ordering::Relaxed))
}

/// Serializes tests that change the global debug flags.
#[cfg(test)]
pub(crate) static DEBUG_FLAGS_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
