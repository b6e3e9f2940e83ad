//! Error types for mdbx-lua.
//!
//! Caller mistakes (bad keys, unsupported values, bad options) are reported
//! before the engine is touched. Engine failures wrap the [`EngineError`]
//! with its code and message, tagged with the operation that failed.

use crate::engine::EngineError;
use crate::registry::HandleKind;
use crate::txn::TxnState;
use thiserror::Error;

/// The result type used throughout mdbx-lua.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classes of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller passed something invalid; nothing was attempted.
    Validation,
    /// The engine refused or failed an operation.
    Resource,
    /// The key is absent.
    NotFound,
    /// A released handle was used.
    HandleClosed,
    /// The handle is in the wrong state for the operation.
    InvalidState,
}

/// The error type for mdbx-lua operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A zero-length key.
    #[error("empty key")]
    EmptyKey,

    /// A key longer than the binding accepts.
    #[error("key too long: {len} bytes (max {max})")]
    KeyTooLong {
        /// Length of the rejected key.
        len: usize,
        /// Longest accepted key.
        max: usize,
    },

    /// A value of a type the codec cannot store.
    #[error("bad value type: {0}")]
    UnsupportedType(String),

    /// A stored value with a known tag but a malformed payload.
    #[error("fail to decode value: {0}")]
    DecodeError(String),

    /// An empty environment path.
    #[error("empty path")]
    InvalidPath,

    /// An option or flag outside what the engine accepts.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A batch lookup without keys.
    #[error("at least one key required")]
    EmptyBatch,

    /// A cursor used with a transaction other than its own.
    #[error("cursor belongs to another transaction")]
    WrongTransaction,

    /// The environment handle could not be created or configured.
    #[error("fail to create env: {0}")]
    CreateFailed(EngineError),

    /// The environment could not be opened.
    #[error("fail to open env: {0}")]
    OpenFailed(EngineError),

    /// An environment property could not be read.
    #[error("fail to query env: {0}")]
    QueryFailed(EngineError),

    /// A tunable could not be set.
    #[error("fail to set option: {0}")]
    SetOptionFailed(EngineError),

    /// The data file could not be flushed.
    #[error("fail to sync env: {0}")]
    SyncFailed(EngineError),

    /// The data file could not be rewritten.
    #[error("fail to compact env: {0}")]
    CompactFailed(EngineError),

    /// A transaction could not be started.
    #[error("fail to begin txn: {0}")]
    TxnBeginFailed(EngineError),

    /// The commit failed; the transaction is over.
    #[error("fail to commit txn: {0}")]
    CommitFailed(EngineError),

    /// The abort failed.
    #[error("fail to abort txn: {0}")]
    AbortFailed(EngineError),

    /// The reset failed.
    #[error("fail to reset txn: {0}")]
    ResetFailed(EngineError),

    /// The renew failed.
    #[error("fail to renew txn: {0}")]
    RenewFailed(EngineError),

    /// The break failed.
    #[error("fail to break txn: {0}")]
    BreakFailed(EngineError),

    /// A table could not be opened.
    #[error("fail to open dbi: {0}")]
    TableOpenFailed(EngineError),

    /// A table could not be closed.
    #[error("fail to close dbi: {0}")]
    TableCloseFailed(EngineError),

    /// A read failed for a reason other than absence.
    #[error("fail to get data: {0}")]
    GetFailed(EngineError),

    /// A write failed.
    #[error("fail to set data: {0}")]
    PutFailed(EngineError),

    /// A delete failed.
    #[error("fail to delete data: {0}")]
    DeleteFailed(EngineError),

    /// A cursor could not be positioned.
    #[error("fail to move cursor: {0}")]
    CursorFailed(EngineError),

    /// The key is absent.
    #[error("{0}")]
    NotFound(EngineError),

    /// A released handle was used.
    #[error("{0} is closed")]
    HandleClosed(HandleKind),

    /// The transaction is not active.
    #[error("transaction is {0}")]
    TxnNotActive(TxnState),

    /// A script failed.
    #[error("script error: {0}")]
    Script(String),
}

impl Error {
    /// Creates an unsupported type error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Error::UnsupportedType(type_name.into())
    }

    /// Creates a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::DecodeError(msg.into())
    }

    /// Creates an invalid option error.
    pub fn invalid_option(msg: impl Into<String>) -> Self {
        Error::InvalidOption(msg.into())
    }

    /// Classifies a failed read: absence becomes [`Error::NotFound`].
    pub(crate) fn get_failed(err: EngineError) -> Self {
        if err.is_not_found() {
            Error::NotFound(err)
        } else {
            Error::GetFailed(err)
        }
    }

    /// The broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyKey
            | Error::KeyTooLong { .. }
            | Error::UnsupportedType(_)
            | Error::DecodeError(_)
            | Error::InvalidPath
            | Error::InvalidOption(_)
            | Error::EmptyBatch => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::HandleClosed(_) => ErrorKind::HandleClosed,
            Error::TxnNotActive(_) | Error::WrongTransaction => ErrorKind::InvalidState,
            _ => ErrorKind::Resource,
        }
    }

    /// The wrapped engine error, if any.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Error::CreateFailed(e)
            | Error::OpenFailed(e)
            | Error::QueryFailed(e)
            | Error::SetOptionFailed(e)
            | Error::SyncFailed(e)
            | Error::CompactFailed(e)
            | Error::TxnBeginFailed(e)
            | Error::CommitFailed(e)
            | Error::AbortFailed(e)
            | Error::ResetFailed(e)
            | Error::RenewFailed(e)
            | Error::BreakFailed(e)
            | Error::TableOpenFailed(e)
            | Error::TableCloseFailed(e)
            | Error::GetFailed(e)
            | Error::PutFailed(e)
            | Error::DeleteFailed(e)
            | Error::CursorFailed(e)
            | Error::NotFound(e) => Some(e),
            _ => None,
        }
    }

    /// The wrapped engine error code, if any.
    pub fn engine_code(&self) -> Option<i32> {
        self.engine_error().map(EngineError::code)
    }

    /// Whether the engine reported the key as absent.
    pub fn is_not_found(&self) -> bool {
        self.engine_error().is_some_and(EngineError::is_not_found)
    }
}

impl From<mlua::Error> for Error {
    fn from(err: mlua::Error) -> Self {
        Error::Script(err.to_string())
    }
}
