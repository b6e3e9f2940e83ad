//! Commit records: the unit of durability.
//!
//! A committed write transaction is persisted as one [`CommitRecord`] holding
//! every change it made, in order, tagged with the sequence under which the
//! changes became visible. Records are serialized with bincode.

use super::Result;
use serde::{Deserialize, Serialize};

/// A single change inside a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum LogOp {
    /// Store `value` under `key` in table `dbi`.
    Put {
        /// Target table.
        dbi: u32,
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove `key` from table `dbi`.
    Delete {
        /// Target table.
        dbi: u32,
        /// Key bytes.
        key: Vec<u8>,
    },
}

/// Everything one write transaction changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CommitRecord {
    /// Sequence the changes are visible at.
    pub(crate) sequence: u64,
    /// Changes in application order.
    pub(crate) ops: Vec<LogOp>,
}

impl CommitRecord {
    pub(crate) fn new(sequence: u64, ops: Vec<LogOp>) -> Self {
        Self { sequence, ops }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::codes;

    #[test]
    fn test_record_encode_decode() {
        let record = CommitRecord::new(
            7,
            vec![
                LogOp::Put { dbi: 1, key: b"k".to_vec(), value: b"sv\0".to_vec() },
                LogOp::Delete { dbi: 2, key: b"gone".to_vec() },
            ],
        );

        let bytes = record.encode().unwrap();
        assert_eq!(CommitRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn test_record_decode_garbage() {
        let err = CommitRecord::decode(&[0xff, 0x01]).unwrap_err();
        assert_eq!(err.code(), codes::CORRUPTED);
    }
}
