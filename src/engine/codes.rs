//! Engine return codes.
//!
//! Negative values are engine specific and byte-identical to the engine's
//! own definitions. Positive values are the POSIX `errno` codes the engine
//! reuses.

/// Successful result.
pub const SUCCESS: i32 = 0;
/// Successful result with a special meaning ("true").
pub const RESULT_TRUE: i32 = -1;

/// Key/data pair already exists.
pub const KEYEXIST: i32 = -30799;
/// No matching key/data pair found.
pub const NOTFOUND: i32 = -30798;
/// Requested page not found.
pub const PAGE_NOTFOUND: i32 = -30797;
/// Database is corrupted.
pub const CORRUPTED: i32 = -30796;
/// Environment had a fatal error.
pub const PANIC: i32 = -30795;
/// Database format version mismatch.
pub const VERSION_MISMATCH: i32 = -30794;
/// File is not a database file.
pub const INVALID: i32 = -30793;
/// Environment mapsize reached.
pub const MAP_FULL: i32 = -30792;
/// Environment maxdbs reached.
pub const DBS_FULL: i32 = -30791;
/// Environment maxreaders reached.
pub const READERS_FULL: i32 = -30790;
/// Transaction has too many dirty pages.
pub const TXN_FULL: i32 = -30788;
/// Cursor stack too deep.
pub const CURSOR_FULL: i32 = -30787;
/// Page has not enough space.
pub const PAGE_FULL: i32 = -30786;
/// Database was unable to extend the mapping.
pub const UNABLE_EXTEND_MAPSIZE: i32 = -30785;
/// Environment or table is not compatible with the requested operation.
pub const INCOMPATIBLE: i32 = -30784;
/// Invalid reuse of reader locktable slot.
pub const BAD_RSLOT: i32 = -30783;
/// Transaction is not valid for the requested operation.
pub const BAD_TXN: i32 = -30782;
/// Invalid size or alignment of key or data.
pub const BAD_VALSIZE: i32 = -30781;
/// The DBI handle is invalid.
pub const BAD_DBI: i32 = -30780;
/// Unexpected internal error.
pub const PROBLEM: i32 = -30779;
/// Another write transaction is running, or the environment is locked.
pub const BUSY: i32 = -30778;
/// The key has more than one associated value.
pub const EMULTIVAL: i32 = -30421;
/// Wrong signature of a runtime object.
pub const EBADSIGN: i32 = -30420;
/// Database should be recovered but was opened read-only.
pub const WANNA_RECOVERY: i32 = -30419;
/// The given key does not match the expected position.
pub const EKEYMISMATCH: i32 = -30418;
/// Database is too large for the current system.
pub const TOO_LARGE: i32 = -30417;
/// A thread used an object it does not own.
pub const THREAD_MISMATCH: i32 = -30416;
/// Overlapping read and write transactions for the current thread.
pub const TXN_OVERLAPPING: i32 = -30415;

/// Operation not permitted.
pub const EPERM: i32 = 1;
/// No such file or directory.
pub const ENOENT: i32 = 2;
/// I/O error.
pub const EIO: i32 = 5;
/// Permission denied.
pub const EACCES: i32 = 13;
/// Invalid argument.
pub const EINVAL: i32 = 22;
