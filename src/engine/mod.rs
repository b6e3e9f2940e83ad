//! # Storage backend
//!
//! The embedded transactional engine the bindings sit on. It exposes the
//! narrow, MDBX-shaped capability the handle layer consumes:
//!
//! - [`RawEnv`]: create / configure / open / close an environment, query its
//!   path, file descriptor and limits, tune runtime options
//! - [`RawTxn`]: begin / commit / abort / reset / renew / break, plus
//!   `get` / `put` / `del` and table (dbi) open
//!
//! Every failure is reported as an [`EngineError`] carrying the engine's
//! numeric code (see [`codes`]) and its human readable message, exactly as
//! [`strerror`] renders it.
//!
//! ## Design
//!
//! - A versioned skip list keyed by `(dbi, key, sequence)` holds every
//!   committed version, keys in table order; a read transaction pins the
//!   sequence it started at, and versions older than every pin are pruned
//! - Each write transaction buffers its changes and publishes them under a
//!   single new sequence on commit
//! - Commits are appended to a checksummed data file and replayed on open;
//!   a failed append is cut back off the file, and the file is compacted to
//!   its live data once it outgrows it

pub mod codes;
mod datafile;
mod env;
mod memtable;
mod record;
mod txn;

pub use env::{EnvInfo, RawEnv, MAX_DBS_LIMIT, MAX_READERS_LIMIT};
pub use txn::{RawTxn, SeekOp};

#[cfg(test)]
pub(crate) use datafile::Fault;

use std::fmt;
use std::io;

/// Result type of the storage backend.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Largest key the backend accepts, in bytes.
pub const MAX_KEY_SIZE: usize = 2022;

/// Largest value the backend accepts, in bytes.
pub const MAX_VALUE_SIZE: usize = 0x7fff_0000;

/// A failed engine call: the numeric code plus its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    code: i32,
    message: String,
}

impl EngineError {
    /// Creates an error for `code` with the engine's standard message.
    pub fn new(code: i32) -> Self {
        Self { code, message: strerror(code) }
    }

    /// Creates an error for `code` with a custom message.
    pub fn with_message(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// The engine error code.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this is the engine's "no matching key/data pair" code.
    pub fn is_not_found(&self) -> bool {
        self.code == codes::NOTFOUND
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        let code = match err.raw_os_error() {
            _ if err.kind() == io::ErrorKind::WouldBlock => codes::BUSY,
            Some(code) => code,
            None => codes::EIO,
        };
        Self { code, message: err.to_string() }
    }
}

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        Self::with_message(codes::CORRUPTED, format!("{}: {}", strerror(codes::CORRUPTED), err))
    }
}

/// Translates an engine error code into its message.
///
/// Negative codes are engine specific; positive codes are OS `errno` values
/// and are rendered by the operating system.
pub fn strerror(code: i32) -> String {
    let msg = match code {
        codes::SUCCESS => "MDBX_SUCCESS: Successful",
        codes::RESULT_TRUE => "MDBX_RESULT_TRUE: Successful, but the result is true",
        codes::KEYEXIST => "MDBX_KEYEXIST: Key/data pair already exists",
        codes::NOTFOUND => "MDBX_NOTFOUND: No matching key/data pair found",
        codes::PAGE_NOTFOUND => "MDBX_PAGE_NOTFOUND: Requested page not found",
        codes::CORRUPTED => "MDBX_CORRUPTED: Database is corrupted",
        codes::PANIC => "MDBX_PANIC: Environment had fatal error",
        codes::VERSION_MISMATCH => "MDBX_VERSION_MISMATCH: DB version mismatch libmdbx",
        codes::INVALID => "MDBX_INVALID: File is not an MDBX file",
        codes::MAP_FULL => "MDBX_MAP_FULL: Environment mapsize limit reached",
        codes::DBS_FULL => "MDBX_DBS_FULL: Too many DBI-handles (maxdbs reached)",
        codes::READERS_FULL => "MDBX_READERS_FULL: Too many readers (maxreaders reached)",
        codes::TXN_FULL => "MDBX_TXN_FULL: Transaction has too many dirty pages",
        codes::CURSOR_FULL => "MDBX_CURSOR_FULL: Cursor stack limit reached",
        codes::PAGE_FULL => "MDBX_PAGE_FULL: Page has no more space",
        codes::UNABLE_EXTEND_MAPSIZE => {
            "MDBX_UNABLE_EXTEND_MAPSIZE: Database engine was unable to extend mapping"
        }
        codes::INCOMPATIBLE => "MDBX_INCOMPATIBLE: Environment or database is not compatible with the requested operation or the specified flags",
        codes::BAD_RSLOT => "MDBX_BAD_RSLOT: Invalid reuse of reader locktable slot",
        codes::BAD_TXN => "MDBX_BAD_TXN: Transaction is not valid for requested operation, e.g. had errored and be must aborted, has a child, or is invalid",
        codes::BAD_VALSIZE => "MDBX_BAD_VALSIZE: Invalid size or alignment of key or data for target database, either invalid subDB name",
        codes::BAD_DBI => "MDBX_BAD_DBI: The specified DBI-handle is invalid or changed by another thread/transaction",
        codes::PROBLEM => "MDBX_PROBLEM: Unexpected internal error, transaction should be aborted",
        codes::BUSY => "MDBX_BUSY: Another write transaction is running, or environment is already used while opening with MDBX_EXCLUSIVE flag",
        codes::EMULTIVAL => "MDBX_EMULTIVAL: The specified key has more than one associated value",
        codes::EBADSIGN => "MDBX_EBADSIGN: Wrong signature of a runtime object(s), e.g. memory corruption or double-free",
        codes::WANNA_RECOVERY => "MDBX_WANNA_RECOVERY: Database should be recovered, but this could NOT be done automatically for now since it opened in read-only mode",
        codes::EKEYMISMATCH => "MDBX_EKEYMISMATCH: The given key value is mismatched to the current cursor position",
        codes::TOO_LARGE => "MDBX_TOO_LARGE: Database is too large for current system, e.g. could NOT be mapped into RAM",
        codes::THREAD_MISMATCH => "MDBX_THREAD_MISMATCH: A thread has attempted to use a not owned object, e.g. a transaction that started by another thread",
        codes::TXN_OVERLAPPING => "MDBX_TXN_OVERLAPPING: Overlapping read and write transactions for the current thread",
        code if code > 0 => return io::Error::from_raw_os_error(code).to_string(),
        _ => return format!("MDBX_UNKNOWN: Unknown error code {}", code),
    };
    msg.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strerror_engine_codes() {
        assert_eq!(strerror(codes::NOTFOUND), "MDBX_NOTFOUND: No matching key/data pair found");
        assert!(strerror(codes::BUSY).starts_with("MDBX_BUSY"));
        assert!(strerror(-1234).contains("-1234"));
    }

    #[test]
    fn test_strerror_errno() {
        let msg = strerror(codes::EINVAL);
        assert!(!msg.is_empty());
        assert!(!msg.starts_with("MDBX_"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::from_raw_os_error(codes::EACCES);
        let err: EngineError = io_err.into();
        assert_eq!(err.code(), codes::EACCES);

        let io_err = io::Error::new(io::ErrorKind::WouldBlock, "locked");
        let err: EngineError = io_err.into();
        assert_eq!(err.code(), codes::BUSY);
    }
}
