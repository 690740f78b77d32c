//! Recording context handed to query functions.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bucket::{BucketHandle, Page};
use crate::error::Error;
use crate::filter::Filter;
use crate::registry::BucketRegistry;
use crate::value::{Record, Value};

/// Dependencies recorded during one query run.
#[derive(Debug, Clone, Default)]
pub(crate) struct DependencySet {
    /// Buckets read wholesale (scans, filters, counts, aggregates).
    pub buckets: HashSet<String>,
    /// Individual records read by key.
    pub records: HashSet<(String, Value)>,
}

impl DependencySet {
    /// Dependencies present in `self` but not in `other`.
    pub fn difference(&self, other: &DependencySet) -> DependencySet {
        DependencySet {
            buckets: self.buckets.difference(&other.buckets).cloned().collect(),
            records: self.records.difference(&other.records).cloned().collect(),
        }
    }
}

/// The only view of the store a query function gets.
///
/// Bucket reads made through it are recorded into the dependency set the
/// query manager uses to decide which mutations wake which subscriptions.
#[derive(Clone)]
pub struct QueryContext {
    registry: Arc<BucketRegistry>,
    deps: Arc<Mutex<DependencySet>>,
}

impl QueryContext {
    pub(crate) fn new(registry: Arc<BucketRegistry>) -> Self {
        Self {
            registry,
            deps: Arc::new(Mutex::new(DependencySet::default())),
        }
    }

    /// A recording view of one bucket.
    pub fn bucket(&self, name: &str) -> QueryBucket {
        QueryBucket {
            name: name.to_string(),
            registry: Arc::clone(&self.registry),
            deps: Arc::clone(&self.deps),
        }
    }

    pub(crate) fn take_deps(&self) -> DependencySet {
        std::mem::take(&mut self.deps.lock())
    }
}

/// Recording proxy for one bucket inside a query function.
pub struct QueryBucket {
    name: String,
    registry: Arc<BucketRegistry>,
    deps: Arc<Mutex<DependencySet>>,
}

impl QueryBucket {
    fn handle(&self) -> Result<BucketHandle, Error> {
        self.registry.handle(&self.name)
    }

    fn record_bucket_dep(&self) {
        self.deps.lock().buckets.insert(self.name.clone());
    }

    fn record_record_dep(&self, key: &Value) {
        self.deps
            .lock()
            .records
            .insert((self.name.clone(), key.clone()));
    }

    /// Point read; records a record-level dependency on `(bucket, key)`.
    pub async fn get(&self, key: impl Into<Value>) -> Result<Option<Record>, Error> {
        let key = key.into();
        self.record_record_dep(&key);
        self.handle()?.get(key).await
    }

    /// Full scan; records a bucket-level dependency.
    pub async fn all(&self) -> Result<Vec<Record>, Error> {
        self.record_bucket_dep();
        self.handle()?.all().await
    }

    /// Filtered scan; records a bucket-level dependency.
    pub async fn find(&self, filter: Filter) -> Result<Vec<Record>, Error> {
        self.record_bucket_dep();
        self.handle()?.find(filter).await
    }

    /// First match; records a bucket-level dependency.
    pub async fn find_one(&self, filter: Filter) -> Result<Option<Record>, Error> {
        self.record_bucket_dep();
        self.handle()?.find_one(filter).await
    }

    /// Record count; records a bucket-level dependency.
    pub async fn count(&self) -> Result<usize, Error> {
        self.record_bucket_dep();
        self.handle()?.count().await
    }

    /// Filtered count; records a bucket-level dependency.
    pub async fn count_where(&self, filter: Filter) -> Result<usize, Error> {
        self.record_bucket_dep();
        self.handle()?.count_where(filter).await
    }

    /// First `count` records; records a bucket-level dependency.
    pub async fn first(&self, count: usize) -> Result<Vec<Record>, Error> {
        self.record_bucket_dep();
        self.handle()?.first(count).await
    }

    /// Last `count` records; records a bucket-level dependency.
    pub async fn last(&self, count: usize) -> Result<Vec<Record>, Error> {
        self.record_bucket_dep();
        self.handle()?.last(count).await
    }

    /// One page; records a bucket-level dependency.
    pub async fn paginate(&self, after: Option<Value>, limit: usize) -> Result<Page, Error> {
        self.record_bucket_dep();
        self.handle()?.paginate(after, limit).await
    }

    /// Sum aggregate; records a bucket-level dependency.
    pub async fn sum(&self, field: &str, filter: Option<Filter>) -> Result<f64, Error> {
        self.record_bucket_dep();
        self.handle()?.sum(field, filter).await
    }

    /// Mean aggregate; records a bucket-level dependency.
    pub async fn avg(&self, field: &str, filter: Option<Filter>) -> Result<f64, Error> {
        self.record_bucket_dep();
        self.handle()?.avg(field, filter).await
    }

    /// Min aggregate; records a bucket-level dependency.
    pub async fn min(&self, field: &str, filter: Option<Filter>) -> Result<Option<f64>, Error> {
        self.record_bucket_dep();
        self.handle()?.min(field, filter).await
    }

    /// Max aggregate; records a bucket-level dependency.
    pub async fn max(&self, field: &str, filter: Option<Filter>) -> Result<Option<f64>, Error> {
        self.record_bucket_dep();
        self.handle()?.max(field, filter).await
    }
}
