//! Per-bucket staging buffer for uncommitted transaction writes.

use indexmap::IndexMap;

use crate::bucket::BatchOp;
use crate::value::{Record, Value};

/// An update staged against a record the transaction read.
#[derive(Debug, Clone)]
pub(crate) struct StagedUpdate {
    /// The fully-prepared replacement record.
    pub record: Record,
    /// `_version` the transaction observed when it first read the record.
    pub expected_version: u64,
}

/// What the buffer knows about a key.
#[derive(Debug)]
pub(crate) enum OverlayEntry {
    /// A staged insert or update shadows the live record.
    Staged(Record),
    /// The key is staged for deletion.
    Deleted,
    /// The buffer has nothing for this key; fall through to the live bucket.
    Miss,
}

/// Staged operations for one bucket within one transaction.
///
/// Maps keep first-staged order so the commit batch is deterministic. A key
/// appears in at most one of `inserts`/`updates`; it may sit in both
/// `deletes` and `inserts` when the transaction deletes a live record and
/// re-inserts its key.
#[derive(Debug, Default)]
pub(crate) struct WriteBuffer {
    pub inserts: IndexMap<Value, Record>,
    pub updates: IndexMap<Value, StagedUpdate>,
    pub deletes: IndexMap<Value, Option<u64>>,
}

impl WriteBuffer {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Resolve a key against the overlay. Staged inserts win over staged
    /// deletes so a delete-then-reinsert reads back the new record.
    pub fn overlay_get(&self, key: &Value) -> OverlayEntry {
        if let Some(record) = self.inserts.get(key) {
            return OverlayEntry::Staged(record.clone());
        }
        if let Some(staged) = self.updates.get(key) {
            return OverlayEntry::Staged(staged.record.clone());
        }
        if self.deletes.contains_key(key) {
            return OverlayEntry::Deleted;
        }
        OverlayEntry::Miss
    }

    /// Turn the buffer into a commit batch: deletes, then updates, then
    /// inserts, each in first-staged order. Deletes go first so a value
    /// released by a delete can be claimed again later in the same batch.
    pub fn into_ops(self) -> Vec<BatchOp> {
        let mut ops = Vec::with_capacity(
            self.deletes.len() + self.updates.len() + self.inserts.len(),
        );
        for (key, expected_version) in self.deletes {
            ops.push(BatchOp::Delete {
                key,
                expected_version,
            });
        }
        for (key, staged) in self.updates {
            ops.push(BatchOp::Update {
                key,
                record: staged.record,
                expected_version: staged.expected_version,
            });
        }
        for (_, record) in self.inserts {
            ops.push(BatchOp::Insert { record });
        }
        ops
    }
}
