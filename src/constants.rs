//! Engine enumerations: flag sets, log levels, debug flags and tunable
//! option identifiers.
//!
//! All numeric values are byte-identical to the engine's own definitions.
//! [`CONSTANTS`] lists every one of them under its engine name (without the
//! `MDBX_` prefix) and is what the Lua module exports.

use bitflags::bitflags;

bitflags! {
    /// Environment open flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EnvFlags: u32 {
        /// Extra validation of database structure on open.
        const VALIDATION = 0x2000;
        /// The path is the data file itself, not a directory.
        const NOSUBDIR = 0x4000;
        /// Read-only access.
        const RDONLY = 0x20000;
        /// Refuse to share the environment with any other opener.
        const EXCLUSIVE = 0x400000;
        /// Join an already open environment using its existing mode.
        const ACCEDE = 0x4000_0000;
        /// Writable memory map.
        const WRITEMAP = 0x80000;
        /// Do not tie reader slots to threads.
        const NOTLS = 0x200000;
        /// Disable read-ahead.
        const NORDAHEAD = 0x800000;
        /// Skip zero-initialisation of fresh pages.
        const NOMEMINIT = 0x100_0000;
        /// Coalesce reclaimed pages.
        const COALESCE = 0x200_0000;
        /// Reclaim pages in LIFO order.
        const LIFORECLAIM = 0x400_0000;
        /// Fill released pages with garbage (debugging aid).
        const PAGEPERTURB = 0x800_0000;
        /// Skip the metadata sync on commit.
        const NOMETASYNC = 0x40000;
        /// Do not fsync on commit; the OS flushes eventually.
        const SAFE_NOSYNC = 0x10000;
        /// Never fsync.
        const UTTERLY_NOSYNC = 0x110000;
    }
}

impl EnvFlags {
    /// Flags every opener of a shared environment has to agree on.
    pub const SHARED_MODE: Self = Self::WRITEMAP
        .union(Self::NOMETASYNC)
        .union(Self::SAFE_NOSYNC)
        .union(Self::UTTERLY_NOSYNC);

    /// Whether commits skip the fsync.
    pub fn is_nosync(self) -> bool {
        self.contains(Self::SAFE_NOSYNC)
    }
}

bitflags! {
    /// Transaction begin flags. The empty set means read-write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TxnFlags: u32 {
        /// Read-only transaction.
        const RDONLY = 0x20000;
        /// Read-only transaction that starts reset, to be renewed later.
        const RDONLY_PREPARE = 0x102_0000;
        /// Fail with `MDBX_BUSY` instead of waiting for the writer lock.
        const TRY = 0x1000_0000;
        /// Skip the metadata sync on this commit.
        const NOMETASYNC = 0x40000;
        /// Skip the fsync on this commit.
        const NOSYNC = 0x10000;
    }
}

impl TxnFlags {
    /// Read-write transaction.
    pub const READWRITE: Self = Self::empty();

    /// Whether these flags begin a read-only transaction.
    pub fn is_read_only(self) -> bool {
        self.contains(Self::RDONLY)
    }
}

bitflags! {
    /// Table (dbi) open flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TableFlags: u32 {
        /// Compare keys from their last byte to their first.
        const REVERSEKEY = 0x02;
        /// Allow duplicate keys.
        const DUPSORT = 0x04;
        /// Keys are native 32/64-bit unsigned integers.
        const INTEGERKEY = 0x08;
        /// Duplicates are all of one size.
        const DUPFIXED = 0x10;
        /// Duplicates are native integers.
        const INTEGERDUP = 0x20;
        /// Compare duplicates from their last byte.
        const REVERSEDUP = 0x40;
        /// Create the table if it does not exist.
        const CREATE = 0x40000;
        /// Open an existing table whatever flags it was created with.
        const DB_ACCEDE = 0x4000_0000;
    }
}

impl TableFlags {
    /// Flags that belong to the opening call rather than the table.
    pub const OPEN_ONLY: Self = Self::CREATE.union(Self::DB_ACCEDE);

    /// The persistent part of these flags.
    pub fn persistent(self) -> Self {
        self.difference(Self::OPEN_ONLY)
    }
}

bitflags! {
    /// Put flags. The empty set means upsert.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PutFlags: u32 {
        /// Fail with `MDBX_KEYEXIST` if the key is present.
        const NOOVERWRITE = 0x10;
        /// Do not add a duplicate key/data pair.
        const NODUPDATA = 0x20;
        /// Replace the existing value; fail if the key is absent.
        const CURRENT = 0x40;
        /// Replace all duplicates of the key.
        const ALLDUPS = 0x80;
        /// Reserve space without copying data.
        const RESERVE = 0x10000;
        /// The key sorts after every existing key.
        const APPEND = 0x20000;
        /// The duplicate sorts after every existing duplicate.
        const APPENDDUP = 0x40000;
        /// Store multiple fixed-size duplicates at once.
        const MULTIPLE = 0x80000;
    }
}

impl PutFlags {
    /// Insert or replace.
    pub const UPSERT: Self = Self::empty();

    /// Flags that only make sense on `DUPSORT` tables.
    pub const DUP_ONLY: Self = Self::NODUPDATA
        .union(Self::ALLDUPS)
        .union(Self::APPENDDUP)
        .union(Self::MULTIPLE)
        .union(Self::RESERVE);
}

bitflags! {
    /// Engine debug flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DebugFlags: u32 {
        /// Enable assertions.
        const ASSERT = 1;
        /// Audit internal structures.
        const AUDIT = 2;
        /// Inject scheduling jitter.
        const JITTER = 4;
        /// Include all pages in dumps.
        const DUMP = 8;
        /// Allow opening the same file twice in one process.
        const LEGACY_MULTIOPEN = 16;
        /// Allow overlapping read and write transactions per thread.
        const LEGACY_OVERLAP = 32;
        /// Do not upgrade the on-disk format.
        const DONT_UPGRADE = 64;
    }
}

/// Engine log levels, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum LogLevel {
    /// Query the current level without changing it.
    DontChange = -1,
    /// Unrecoverable errors.
    Fatal = 0,
    /// Errors.
    Error = 1,
    /// Warnings.
    Warn = 2,
    /// Notable events.
    Notice = 3,
    /// Informational messages.
    Verbose = 4,
    /// Debug output.
    Debug = 5,
    /// Call tracing.
    Trace = 6,
    /// Everything.
    Extra = 7,
}

impl LogLevel {
    /// Converts the engine's numeric level.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            -1 => LogLevel::DontChange,
            0 => LogLevel::Fatal,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Notice,
            4 => LogLevel::Verbose,
            5 => LogLevel::Debug,
            6 => LogLevel::Trace,
            7 => LogLevel::Extra,
            _ => return None,
        })
    }

    /// The `log` crate filter this level maps onto.
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Fatal | LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Notice | LogLevel::Verbose => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace | LogLevel::Extra => log::LevelFilter::Trace,
            LogLevel::DontChange => log::max_level(),
        }
    }

    /// The closest level to a `log` crate filter.
    pub fn from_filter(filter: log::LevelFilter) -> Self {
        match filter {
            log::LevelFilter::Off => LogLevel::Fatal,
            log::LevelFilter::Error => LogLevel::Error,
            log::LevelFilter::Warn => LogLevel::Warn,
            log::LevelFilter::Info => LogLevel::Verbose,
            log::LevelFilter::Debug => LogLevel::Debug,
            log::LevelFilter::Trace => LogLevel::Trace,
        }
    }
}

/// Runtime tunable option identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EnvOption {
    /// Maximum number of named tables (before open only).
    MaxDb = 0,
    /// Maximum number of reader slots (before open only).
    MaxReaders = 1,
    /// Unsynced bytes that force a sync in no-sync modes.
    SyncBytes = 2,
    /// Period, in 1/65536 s, that forces a sync in no-sync modes.
    SyncPeriod = 3,
    /// Reclaim list augmentation limit.
    RpAugmentLimit = 4,
    /// Loose page limit.
    LooseLimit = 5,
    /// Dirty page reserve limit.
    DpReserveLimit = 6,
    /// Dirty page limit per transaction.
    TxnDpLimit = 7,
    /// Initial dirty page list size.
    TxnDpInitial = 8,
    /// Spill max denominator.
    SpillMaxDenominator = 9,
    /// Spill min denominator.
    SpillMinDenominator = 10,
    /// Spill parent-for-child denominator.
    SpillParent4ChildDenominator = 11,
    /// Page merge threshold, 16.16 fixed point percent.
    MergeThreshold16Dot16Percent = 12,
    /// Write-through threshold.
    WritethroughThreshold = 13,
    /// Prefault pages on write.
    PrefaultWriteEnable = 14,
}

impl EnvOption {
    /// Every option, in identifier order.
    pub const ALL: [EnvOption; 15] = [
        EnvOption::MaxDb,
        EnvOption::MaxReaders,
        EnvOption::SyncBytes,
        EnvOption::SyncPeriod,
        EnvOption::RpAugmentLimit,
        EnvOption::LooseLimit,
        EnvOption::DpReserveLimit,
        EnvOption::TxnDpLimit,
        EnvOption::TxnDpInitial,
        EnvOption::SpillMaxDenominator,
        EnvOption::SpillMinDenominator,
        EnvOption::SpillParent4ChildDenominator,
        EnvOption::MergeThreshold16Dot16Percent,
        EnvOption::WritethroughThreshold,
        EnvOption::PrefaultWriteEnable,
    ];

    /// Converts the engine's option identifier.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// The engine's name for the option.
    pub fn name(self) -> &'static str {
        match self {
            EnvOption::MaxDb => "opt_max_db",
            EnvOption::MaxReaders => "opt_max_readers",
            EnvOption::SyncBytes => "opt_sync_bytes",
            EnvOption::SyncPeriod => "opt_sync_period",
            EnvOption::RpAugmentLimit => "opt_rp_augment_limit",
            EnvOption::LooseLimit => "opt_loose_limit",
            EnvOption::DpReserveLimit => "opt_dp_reserve_limit",
            EnvOption::TxnDpLimit => "opt_txn_dp_limit",
            EnvOption::TxnDpInitial => "opt_txn_dp_initial",
            EnvOption::SpillMaxDenominator => "opt_spill_max_denominator",
            EnvOption::SpillMinDenominator => "opt_spill_min_denominator",
            EnvOption::SpillParent4ChildDenominator => "opt_spill_parent4child_denominator",
            EnvOption::MergeThreshold16Dot16Percent => "opt_merge_threshold_16dot16_percent",
            EnvOption::WritethroughThreshold => "opt_writethrough_threshold",
            EnvOption::PrefaultWriteEnable => "opt_prefault_write_enable",
        }
    }
}

impl From<EnvOption> for u32 {
    fn from(option: EnvOption) -> Self {
        option as u32
    }
}

/// Every named engine constant, as exported to scripts.
pub static CONSTANTS: &[(&str, i64)] = &[
    // Environment flags
    ("ENV_DEFAULTS", 0),
    ("VALIDATION", 0x2000),
    ("NOSUBDIR", 0x4000),
    ("RDONLY", 0x20000),
    ("EXCLUSIVE", 0x400000),
    ("ACCEDE", 0x4000_0000),
    ("WRITEMAP", 0x80000),
    ("NOTLS", 0x200000),
    ("NORDAHEAD", 0x800000),
    ("NOMEMINIT", 0x100_0000),
    ("COALESCE", 0x200_0000),
    ("LIFORECLAIM", 0x400_0000),
    ("PAGEPERTURB", 0x800_0000),
    ("SYNC_DURABLE", 0),
    ("NOMETASYNC", 0x40000),
    ("SAFE_NOSYNC", 0x10000),
    ("MAPASYNC", 0x10000),
    ("UTTERLY_NOSYNC", 0x110000),
    // Transaction flags
    ("TXN_READWRITE", 0),
    ("TXN_RDONLY", 0x20000),
    ("TXN_RDONLY_PREPARE", 0x102_0000),
    ("TXN_TRY", 0x1000_0000),
    ("TXN_NOMETASYNC", 0x40000),
    ("TXN_NOSYNC", 0x10000),
    // Table flags
    ("DB_DEFAULTS", 0),
    ("REVERSEKEY", 0x02),
    ("DUPSORT", 0x04),
    ("INTEGERKEY", 0x08),
    ("DUPFIXED", 0x10),
    ("INTEGERDUP", 0x20),
    ("REVERSEDUP", 0x40),
    ("CREATE", 0x40000),
    ("DB_ACCEDE", 0x4000_0000),
    // Put flags
    ("UPSERT", 0),
    ("NOOVERWRITE", 0x10),
    ("NODUPDATA", 0x20),
    ("CURRENT", 0x40),
    ("ALLDUPS", 0x80),
    ("RESERVE", 0x10000),
    ("APPEND", 0x20000),
    ("APPENDDUP", 0x40000),
    ("MULTIPLE", 0x80000),
    // Log levels
    ("LOG_FATAL", 0),
    ("LOG_ERROR", 1),
    ("LOG_WARN", 2),
    ("LOG_NOTICE", 3),
    ("LOG_VERBOSE", 4),
    ("LOG_DEBUG", 5),
    ("LOG_TRACE", 6),
    ("LOG_EXTRA", 7),
    ("LOG_DONTCHANGE", -1),
    // Debug flags
    ("DBG_NONE", 0),
    ("DBG_ASSERT", 1),
    ("DBG_AUDIT", 2),
    ("DBG_JITTER", 4),
    ("DBG_DUMP", 8),
    ("DBG_LEGACY_MULTIOPEN", 16),
    ("DBG_LEGACY_OVERLAP", 32),
    ("DBG_DONT_UPGRADE", 64),
    ("DBG_DONTCHANGE", -1),
    // Tunable options
    ("opt_max_db", 0),
    ("opt_max_readers", 1),
    ("opt_sync_bytes", 2),
    ("opt_sync_period", 3),
    ("opt_rp_augment_limit", 4),
    ("opt_loose_limit", 5),
    ("opt_dp_reserve_limit", 6),
    ("opt_txn_dp_limit", 7),
    ("opt_txn_dp_initial", 8),
    ("opt_spill_max_denominator", 9),
    ("opt_spill_min_denominator", 10),
    ("opt_spill_parent4child_denominator", 11),
    ("opt_merge_threshold_16dot16_percent", 12),
    ("opt_writethrough_threshold", 13),
    ("opt_prefault_write_enable", 14),
];

/// Looks up a named constant.
pub fn lookup(name: &str) -> Option<i64> {
    CONSTANTS.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}
