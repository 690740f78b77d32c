//! Mailbox messages and reply types for bucket actors.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::Error;
use crate::event::BucketEvent;
use crate::filter::Filter;
use crate::value::{FieldMap, Record, Value};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, Error>>;

/// One page of a cursor-based scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Records in insertion order.
    pub records: Vec<Record>,
    /// Whether records remain past this page.
    pub has_more: bool,
    /// Primary key of the last record, usable as the next `after` cursor.
    pub next_cursor: Option<Value>,
}

/// Aggregation over a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    /// Sum of numeric values; 0 on empty input.
    Sum,
    /// Mean of numeric values; 0 on empty input.
    Avg,
    /// Smallest numeric value; none on empty input.
    Min,
    /// Largest numeric value; none on empty input.
    Max,
}

/// Counters exposed by a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketStats {
    /// Bucket name.
    pub bucket: String,
    /// Number of live records.
    pub record_count: usize,
    /// Number of secondary indexes.
    pub index_count: usize,
    /// Current autoincrement counter.
    pub autoincrement_counter: u64,
}

/// A bucket's full state, used for persistence and restore.
///
/// Records are listed in insertion order so a restored bucket scans the same
/// way the original did; indexes are rebuilt from the records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    /// `(primary key, record)` pairs in insertion order.
    pub records: Vec<(Value, Record)>,
    /// Autoincrement counter at snapshot time.
    pub autoincrement_counter: u64,
}

/// One operation of a transaction batch, fully prepared at stage time.
#[derive(Debug, Clone)]
pub(crate) enum BatchOp {
    /// Insert a prepared record (its autoincrement value was reserved when
    /// it was staged; commit must not bump the counter again).
    Insert { record: Record },
    /// Replace the record at `key`, expecting the live `_version` to match.
    Update {
        key: Value,
        record: Record,
        expected_version: u64,
    },
    /// Delete the record at `key`. `expected_version` is the version the
    /// transaction observed, or `None` when it observed absence.
    Delete {
        key: Value,
        expected_version: Option<u64>,
    },
}

/// Inverse of one applied batch operation, replayed on rollback.
#[derive(Debug, Clone)]
pub(crate) enum UndoOp {
    /// Remove the record inserted under `key`.
    Remove { key: Value },
    /// Put `record` back under `key` (undoes an update or a delete).
    Restore { key: Value, record: Record },
}

/// Result of a successfully applied batch.
#[derive(Debug)]
pub(crate) struct BatchOutcome {
    /// Events for every applied operation, unpublished until the whole
    /// transaction commits.
    pub events: Vec<BucketEvent>,
    /// Undo log in apply order.
    pub undo: Vec<UndoOp>,
}

/// Requests a bucket actor handles, one at a time.
pub(crate) enum BucketRequest {
    Insert {
        fields: FieldMap,
        reply: Reply<Record>,
    },
    Get {
        key: Value,
        reply: Reply<Option<Record>>,
    },
    Update {
        key: Value,
        changes: FieldMap,
        reply: Reply<Record>,
    },
    Delete {
        key: Value,
        reply: Reply<Option<Record>>,
    },
    Clear {
        reply: Reply<usize>,
    },
    All {
        reply: Reply<Vec<Record>>,
    },
    Find {
        filter: Filter,
        reply: Reply<Vec<Record>>,
    },
    FindOne {
        filter: Filter,
        reply: Reply<Option<Record>>,
    },
    Count {
        filter: Option<Filter>,
        reply: Reply<usize>,
    },
    First {
        count: usize,
        reply: Reply<Vec<Record>>,
    },
    Last {
        count: usize,
        reply: Reply<Vec<Record>>,
    },
    Paginate {
        after: Option<Value>,
        limit: usize,
        reply: Reply<Page>,
    },
    Aggregate {
        op: AggregateOp,
        field: String,
        filter: Option<Filter>,
        reply: Reply<Option<f64>>,
    },
    PurgeExpired {
        now: i64,
        reply: Reply<usize>,
    },
    Snapshot {
        reply: Reply<BucketSnapshot>,
    },
    Stats {
        reply: Reply<BucketStats>,
    },
    ReserveAutoincrement {
        reply: Reply<u64>,
    },
    CommitBatch {
        ops: Vec<BatchOp>,
        reply: Reply<BatchOutcome>,
    },
    RollbackBatch {
        undo: Vec<UndoOp>,
        reply: Reply<()>,
    },
}
