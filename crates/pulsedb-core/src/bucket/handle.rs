//! Stateless handle to a bucket actor.

use tokio::sync::{mpsc, oneshot};

use super::message::{
    AggregateOp, BatchOp, BatchOutcome, BucketRequest, BucketSnapshot, BucketStats, Page, Reply,
    UndoOp,
};
use crate::error::Error;
use crate::filter::Filter;
use crate::value::{FieldMap, Record, Value};

/// Clonable handle sending requests into a bucket's mailbox.
///
/// Every call enqueues one message and awaits its reply; requests from one
/// caller are processed in order, and no two requests on the same bucket
/// ever interleave.
#[derive(Clone, Debug)]
pub struct BucketHandle {
    name: String,
    tx: mpsc::UnboundedSender<BucketRequest>,
}

impl BucketHandle {
    pub(crate) fn new(name: String, tx: mpsc::UnboundedSender<BucketRequest>) -> Self {
        Self { name, tx }
    }

    /// The bucket this handle points at.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn closed(&self) -> Error {
        Error::BucketClosed {
            bucket: self.name.clone(),
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> BucketRequest,
    ) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Insert a record built from the given payload.
    pub async fn insert(&self, fields: FieldMap) -> Result<Record, Error> {
        self.request(|reply| BucketRequest::Insert { fields, reply })
            .await
    }

    /// Fetch a record by primary key.
    pub async fn get(&self, key: impl Into<Value>) -> Result<Option<Record>, Error> {
        let key = key.into();
        self.request(|reply| BucketRequest::Get { key, reply }).await
    }

    /// Update a record; fails with [`Error::NotFound`] when the key is absent.
    pub async fn update(
        &self,
        key: impl Into<Value>,
        changes: FieldMap,
    ) -> Result<Record, Error> {
        let key = key.into();
        self.request(|reply| BucketRequest::Update { key, changes, reply })
            .await
    }

    /// Delete a record; a missing key is a silent no-op returning `None`.
    pub async fn delete(&self, key: impl Into<Value>) -> Result<Option<Record>, Error> {
        let key = key.into();
        self.request(|reply| BucketRequest::Delete { key, reply })
            .await
    }

    /// Remove every record, returning how many were dropped.
    pub async fn clear(&self) -> Result<usize, Error> {
        self.request(|reply| BucketRequest::Clear { reply }).await
    }

    /// All records in insertion order.
    pub async fn all(&self) -> Result<Vec<Record>, Error> {
        self.request(|reply| BucketRequest::All { reply }).await
    }

    /// Records matching the filter.
    pub async fn find(&self, filter: Filter) -> Result<Vec<Record>, Error> {
        self.request(|reply| BucketRequest::Find { filter, reply })
            .await
    }

    /// First record matching the filter.
    pub async fn find_one(&self, filter: Filter) -> Result<Option<Record>, Error> {
        self.request(|reply| BucketRequest::FindOne { filter, reply })
            .await
    }

    /// Number of records in the bucket.
    pub async fn count(&self) -> Result<usize, Error> {
        self.request(|reply| BucketRequest::Count { filter: None, reply })
            .await
    }

    /// Number of records matching the filter.
    pub async fn count_where(&self, filter: Filter) -> Result<usize, Error> {
        self.request(|reply| BucketRequest::Count {
            filter: Some(filter),
            reply,
        })
        .await
    }

    /// The first `count` records in insertion order.
    pub async fn first(&self, count: usize) -> Result<Vec<Record>, Error> {
        self.request(|reply| BucketRequest::First { count, reply })
            .await
    }

    /// The last `count` records, still in insertion order.
    pub async fn last(&self, count: usize) -> Result<Vec<Record>, Error> {
        self.request(|reply| BucketRequest::Last { count, reply })
            .await
    }

    /// One page of records after the `after` cursor.
    pub async fn paginate(
        &self,
        after: Option<Value>,
        limit: usize,
    ) -> Result<Page, Error> {
        self.request(|reply| BucketRequest::Paginate { after, limit, reply })
            .await
    }

    /// Sum of a numeric field; 0 when nothing matches.
    pub async fn sum(&self, field: &str, filter: Option<Filter>) -> Result<f64, Error> {
        self.aggregate(AggregateOp::Sum, field, filter)
            .await
            .map(|v| v.unwrap_or(0.0))
    }

    /// Mean of a numeric field; 0 when nothing matches.
    pub async fn avg(&self, field: &str, filter: Option<Filter>) -> Result<f64, Error> {
        self.aggregate(AggregateOp::Avg, field, filter)
            .await
            .map(|v| v.unwrap_or(0.0))
    }

    /// Smallest value of a numeric field; `None` when nothing matches.
    pub async fn min(&self, field: &str, filter: Option<Filter>) -> Result<Option<f64>, Error> {
        self.aggregate(AggregateOp::Min, field, filter).await
    }

    /// Largest value of a numeric field; `None` when nothing matches.
    pub async fn max(&self, field: &str, filter: Option<Filter>) -> Result<Option<f64>, Error> {
        self.aggregate(AggregateOp::Max, field, filter).await
    }

    async fn aggregate(
        &self,
        op: AggregateOp,
        field: &str,
        filter: Option<Filter>,
    ) -> Result<Option<f64>, Error> {
        let field = field.to_string();
        self.request(|reply| BucketRequest::Aggregate {
            op,
            field,
            filter,
            reply,
        })
        .await
    }

    /// Delete every record whose `_expiresAt` is at or before `now`.
    pub async fn purge_expired(&self, now: i64) -> Result<usize, Error> {
        self.request(|reply| BucketRequest::PurgeExpired { now, reply })
            .await
    }

    /// Full bucket state for persistence.
    pub async fn snapshot(&self) -> Result<BucketSnapshot, Error> {
        self.request(|reply| BucketRequest::Snapshot { reply }).await
    }

    /// Bucket counters.
    pub async fn stats(&self) -> Result<BucketStats, Error> {
        self.request(|reply| BucketRequest::Stats { reply }).await
    }

    /// Reserve the next autoincrement value for a staged transaction insert.
    pub(crate) async fn reserve_autoincrement(&self) -> Result<u64, Error> {
        self.request(|reply| BucketRequest::ReserveAutoincrement { reply })
            .await
    }

    /// Apply a transaction batch; events come back unpublished.
    pub(crate) async fn commit_batch(&self, ops: Vec<BatchOp>) -> Result<BatchOutcome, Error> {
        self.request(|reply| BucketRequest::CommitBatch { ops, reply })
            .await
    }

    /// Replay an undo log from a failed transaction.
    pub(crate) async fn rollback_batch(&self, undo: Vec<UndoOp>) -> Result<(), Error> {
        self.request(|reply| BucketRequest::RollbackBatch { undo, reply })
            .await
    }
}
