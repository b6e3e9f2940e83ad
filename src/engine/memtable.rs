//! # Versioned store
//!
//! Every committed version of every key lives in one skip list, ordered so
//! that the newest version of a key comes first:
//!
//! ```text
//! VersionKey:
//!   [dbi: u32] [key: table order] [sequence: u64 (descending)] [type: u8 (descending)]
//! ```
//!
//! Keys of one table are ordered by that table's comparator (bytewise,
//! reverse or integer), so a cursor step is a single range seek.
//!
//! A reader holding snapshot `S` sees, per key, the newest entry with
//! `sequence <= S`; a tombstone hides the key. Nothing is overwritten in
//! place, so readers never block writers. Versions no snapshot can reach any
//! more are dropped by [`VersionedStore::prune`].

use crate::constants::TableFlags;
use crossbeam_skiplist::SkipMap;
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

/// Per-entry bookkeeping overhead counted by [`VersionedStore::approximate_size`].
const ENTRY_OVERHEAD: usize = 16;

/// The flags that decide how a table orders its keys.
pub(crate) fn key_order(flags: TableFlags) -> TableFlags {
    flags & (TableFlags::REVERSEKEY | TableFlags::INTEGERKEY)
}

/// Compares two keys the way a table with `flags` orders them.
///
/// Integer keys sort by width first (4-byte before 8-byte), then by native
/// value, which keeps the order total when both widths are mixed.
pub(crate) fn compare_keys(flags: TableFlags, a: &[u8], b: &[u8]) -> Ordering {
    if flags.contains(TableFlags::INTEGERKEY) {
        match (a.len(), b.len()) {
            (4, 4) => {
                let x = u32::from_ne_bytes([a[0], a[1], a[2], a[3]]);
                let y = u32::from_ne_bytes([b[0], b[1], b[2], b[3]]);
                return x.cmp(&y);
            }
            (8, 8) => {
                let mut x = [0u8; 8];
                let mut y = [0u8; 8];
                x.copy_from_slice(a);
                y.copy_from_slice(b);
                return u64::from_ne_bytes(x).cmp(&u64::from_ne_bytes(y));
            }
            (la, lb) if la != lb => return la.cmp(&lb),
            _ => {}
        }
    }
    if flags.contains(TableFlags::REVERSEKEY) {
        return a.iter().rev().cmp(b.iter().rev());
    }
    a.cmp(b)
}

/// Kind of a stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ValueType {
    /// The key was deleted at this sequence.
    Deletion = 0,
    /// The key held a value at this sequence.
    Value = 1,
}

/// Sort key of the versioned store.
#[derive(Debug, Clone)]
pub(crate) struct VersionKey {
    dbi: u32,
    order: TableFlags,
    key: Vec<u8>,
    sequence: u64,
    value_type: ValueType,
}

impl VersionKey {
    fn new(dbi: u32, order: TableFlags, key: Vec<u8>, sequence: u64, value_type: ValueType) -> Self {
        Self { dbi, order: key_order(order), key, sequence, value_type }
    }

    /// Sorts before every version of `key`.
    fn newest(dbi: u32, order: TableFlags, key: &[u8]) -> Self {
        Self::new(dbi, order, key.to_vec(), u64::MAX, ValueType::Value)
    }

    /// Sorts after every version of `key`.
    fn oldest(dbi: u32, order: TableFlags, key: &[u8]) -> Self {
        Self::new(dbi, order, key.to_vec(), 0, ValueType::Deletion)
    }

    fn same_key(&self, dbi: u32, key: &[u8]) -> bool {
        self.dbi == dbi && self.key == key
    }

    fn size(&self, value: &[u8]) -> usize {
        self.key.len() + value.len() + ENTRY_OVERHEAD
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dbi
            .cmp(&other.dbi)
            .then_with(|| compare_keys(self.order, &self.key, &other.key))
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| other.value_type.cmp(&self.value_type))
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionKey {}

/// Multi-version key/value storage shared by all transactions of an
/// environment.
pub(crate) struct VersionedStore {
    data: SkipMap<VersionKey, Vec<u8>>,
    size: AtomicUsize,
}

impl VersionedStore {
    pub(crate) fn new() -> Self {
        Self { data: SkipMap::new(), size: AtomicUsize::new(0) }
    }

    /// Records `value` for `key` at `sequence`.
    pub(crate) fn put(&self, dbi: u32, order: TableFlags, key: &[u8], value: &[u8], sequence: u64) {
        let version = VersionKey::new(dbi, order, key.to_vec(), sequence, ValueType::Value);
        self.size.fetch_add(version.size(value), AtomicOrdering::Relaxed);
        self.data.insert(version, value.to_vec());
    }

    /// Records a tombstone for `key` at `sequence`.
    pub(crate) fn delete(&self, dbi: u32, order: TableFlags, key: &[u8], sequence: u64) {
        let version = VersionKey::new(dbi, order, key.to_vec(), sequence, ValueType::Deletion);
        self.size.fetch_add(version.size(&[]), AtomicOrdering::Relaxed);
        self.data.insert(version, Vec::new());
    }

    /// Returns the value of `key` as of `snapshot`.
    pub(crate) fn get(&self, dbi: u32, order: TableFlags, key: &[u8], snapshot: u64) -> Option<Vec<u8>> {
        for entry in self.data.range(VersionKey::newest(dbi, order, key)..) {
            let version = entry.key();
            if !version.same_key(dbi, key) {
                break;
            }
            if version.sequence <= snapshot {
                return match version.value_type {
                    ValueType::Value => Some(entry.value().clone()),
                    ValueType::Deletion => None,
                };
            }
        }
        None
    }

    /// First live entry of `dbi` at or after `from` (in table order) as of
    /// `snapshot`.
    pub(crate) fn next_visible(
        &self,
        dbi: u32,
        order: TableFlags,
        from: Bound<&[u8]>,
        snapshot: u64,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let lower = match from {
            Bound::Included(key) => Bound::Included(VersionKey::newest(dbi, order, key)),
            Bound::Excluded(key) => Bound::Excluded(VersionKey::oldest(dbi, order, key)),
            Bound::Unbounded => Bound::Included(VersionKey::newest(dbi, order, &[])),
        };

        // Key whose visible version was a tombstone.
        let mut deleted: Option<Vec<u8>> = None;
        for entry in self.data.range((lower, Bound::Unbounded)) {
            let version = entry.key();
            if version.dbi != dbi {
                break;
            }
            if deleted.as_deref() == Some(version.key.as_slice()) || version.sequence > snapshot {
                continue;
            }
            if version.value_type == ValueType::Value {
                return Some((version.key.clone(), entry.value().clone()));
            }
            deleted = Some(version.key.clone());
        }
        None
    }

    /// Last live entry of `dbi` at or before `to` (in table order) as of
    /// `snapshot`.
    pub(crate) fn prev_visible(
        &self,
        dbi: u32,
        order: TableFlags,
        to: Bound<&[u8]>,
        snapshot: u64,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let start = VersionKey::newest(dbi, order, &[]);
        let mut upper = match to {
            Bound::Included(key) => Bound::Included(VersionKey::oldest(dbi, order, key)),
            Bound::Excluded(key) => Bound::Excluded(VersionKey::newest(dbi, order, key)),
            Bound::Unbounded => match dbi.checked_add(1) {
                Some(next) => Bound::Excluded(VersionKey::newest(next, TableFlags::empty(), &[])),
                None => Bound::Unbounded,
            },
        };

        loop {
            let entry = self.data.range((Bound::Included(start.clone()), upper)).next_back()?;
            if entry.key().dbi != dbi {
                return None;
            }
            let candidate = entry.key().key.clone();
            if let Some(value) = self.get(dbi, order, &candidate, snapshot) {
                return Some((candidate, value));
            }
            // The empty key sorts first in every table order.
            if candidate.is_empty() {
                return None;
            }
            upper = Bound::Excluded(VersionKey::newest(dbi, order, &candidate));
        }
    }

    /// Every live `(key, value)` of `dbi` as of `snapshot`, in table order.
    pub(crate) fn scan(&self, dbi: u32, order: TableFlags, snapshot: u64) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        let mut from: Bound<Vec<u8>> = Bound::Unbounded;
        loop {
            let bound = match &from {
                Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
                _ => Bound::Unbounded,
            };
            let Some((key, value)) = self.next_visible(dbi, order, bound, snapshot) else {
                return out;
            };
            from = Bound::Excluded(key.clone());
            out.push((key, value));
        }
    }

    /// Every live `(dbi, key, value)` as of `snapshot`, in store order.
    pub(crate) fn live(&self, snapshot: u64) -> Vec<(u32, Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        let mut decided: Option<(u32, Vec<u8>)> = None;
        for entry in self.data.iter() {
            let version = entry.key();
            if version.sequence > snapshot {
                continue;
            }
            if let Some((dbi, key)) = &decided {
                if version.same_key(*dbi, key) {
                    continue;
                }
            }
            decided = Some((version.dbi, version.key.clone()));
            if version.value_type == ValueType::Value {
                out.push((version.dbi, version.key.clone(), entry.value().clone()));
            }
        }
        out
    }

    /// Drops the versions of `key` no snapshot at or above `horizon` can
    /// see. Returns how many were dropped.
    pub(crate) fn prune(&self, dbi: u32, order: TableFlags, key: &[u8], horizon: u64) -> usize {
        let mut base: Option<VersionKey> = None;
        let mut stale = Vec::new();
        for entry in self.data.range(VersionKey::newest(dbi, order, key)..) {
            let version = entry.key();
            if !version.same_key(dbi, key) {
                break;
            }
            if base.is_some() {
                stale.push(version.clone());
            } else if version.sequence <= horizon {
                base = Some(version.clone());
            }
        }
        // A tombstone at the horizon hides nothing once the versions under
        // it are gone, so it goes last.
        if let Some(base) = base.filter(|b| b.value_type == ValueType::Deletion) {
            stale.push(base);
        }
        self.remove_all(&stale)
    }

    /// [`prune`](Self::prune) for every key.
    pub(crate) fn prune_all(&self, horizon: u64) -> usize {
        let mut stale = Vec::new();
        let mut tombstone: Option<VersionKey> = None;
        let mut base: Option<(u32, Vec<u8>)> = None;
        let mut current: Option<(u32, Vec<u8>)> = None;

        for entry in self.data.iter() {
            let version = entry.key();
            let same = current.as_ref().is_some_and(|(d, k)| version.same_key(*d, k));
            if !same {
                stale.extend(tombstone.take());
                current = Some((version.dbi, version.key.clone()));
                base = None;
            }
            if base.is_some() {
                stale.push(version.clone());
            } else if version.sequence <= horizon {
                base = Some((version.dbi, version.key.clone()));
                if version.value_type == ValueType::Deletion {
                    tombstone = Some(version.clone());
                }
            }
        }
        stale.extend(tombstone);
        self.remove_all(&stale)
    }

    fn remove_all(&self, versions: &[VersionKey]) -> usize {
        let mut removed = 0;
        for version in versions {
            if let Some(entry) = self.data.remove(version) {
                self.size.fetch_sub(version.size(entry.value()), AtomicOrdering::Relaxed);
                removed += 1;
            }
        }
        removed
    }

    /// Number of stored versions, superseded ones included.
    pub(crate) fn version_count(&self) -> usize {
        self.data.len()
    }

    /// Approximate number of bytes held, including superseded versions.
    pub(crate) fn approximate_size(&self) -> usize {
        self.size.load(AtomicOrdering::Relaxed)
    }
}
