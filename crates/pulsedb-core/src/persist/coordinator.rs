//! Debounced snapshot writes for persistent buckets.
//!
//! The coordinator listens to every mutation event, marks persistent buckets
//! dirty, and arms a single debounce timer. When the timer fires the dirty
//! set is drained and each bucket's snapshot goes through the adapter.
//! Adapter failures are routed to the user's `on_error` callback and never
//! reach the event pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::adapter::{PersistedState, SnapshotMetadata, StorageAdapter};
use crate::bucket::BucketSnapshot;
use crate::error::Error;
use crate::event::BucketEvent;
use crate::registry::BucketRegistry;
use crate::time::now_ms;

/// Version stamped into snapshot metadata.
const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Callback receiving adapter errors.
pub type PersistenceErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Persistence settings for a store.
#[derive(Clone)]
pub struct PersistenceConfig {
    /// The storage backend.
    pub adapter: Arc<dyn StorageAdapter>,
    /// Debounce window between a mutation and its snapshot write.
    pub debounce: Duration,
    /// Receives adapter errors; they are otherwise logged and dropped.
    pub on_error: Option<PersistenceErrorCallback>,
}

impl PersistenceConfig {
    /// Configure persistence over the given adapter with a 1s debounce.
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter,
            debounce: Duration::from_millis(1_000),
            on_error: None,
        }
    }

    /// Override the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Install an adapter-error callback.
    pub fn with_on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

pub(crate) struct PersistenceManager {
    inner: Arc<PersistenceInner>,
}

struct PersistenceInner {
    store_name: String,
    registry: Arc<BucketRegistry>,
    adapter: Arc<dyn StorageAdapter>,
    debounce: Duration,
    on_error: Option<PersistenceErrorCallback>,
    dirty: Mutex<HashSet<String>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceManager {
    pub fn new(
        store_name: String,
        registry: Arc<BucketRegistry>,
        config: PersistenceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PersistenceInner {
                store_name,
                registry,
                adapter: config.adapter,
                debounce: config.debounce,
                on_error: config.on_error,
                dirty: Mutex::new(HashSet::new()),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Storage key for one bucket's snapshot.
    pub fn storage_key(store: &str, bucket: &str) -> String {
        format!("{store}:bucket:{bucket}")
    }

    /// Bus handler marking persistent buckets dirty.
    pub fn event_handler(&self) -> Arc<dyn Fn(&BucketEvent) + Send + Sync> {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |event| PersistenceInner::note_event(&inner, event.bucket()))
    }

    /// Load a bucket's snapshot, if one was persisted.
    pub async fn load_bucket(&self, bucket: &str) -> Result<Option<BucketSnapshot>, Error> {
        let key = Self::storage_key(&self.inner.store_name, bucket);
        Ok(self
            .inner
            .adapter
            .load(&key)
            .await?
            .map(|persisted| persisted.state))
    }

    /// Forget a dropped bucket so a pending flush does not chase it.
    pub fn forget(&self, bucket: &str) {
        self.inner.dirty.lock().remove(bucket);
    }

    /// Mark every persistent bucket dirty and flush immediately. Called at
    /// shutdown while the bucket actors are still able to snapshot.
    pub async fn flush_all(&self) {
        {
            let mut dirty = self.inner.dirty.lock();
            for (name, _, definition) in self.inner.registry.entries() {
                if definition.persistent {
                    dirty.insert(name);
                }
            }
        }
        self.cancel_timer();
        PersistenceInner::flush(&self.inner).await;
    }

    /// Abort the debounce timer. Safe on every shutdown path.
    pub fn shutdown(&self) {
        self.cancel_timer();
    }

    /// Close the adapter.
    pub async fn close(&self) {
        if let Err(error) = self.inner.adapter.close().await {
            PersistenceInner::report(&self.inner, &error);
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
    }
}

impl PersistenceInner {
    fn note_event(inner: &Arc<Self>, bucket: &str) {
        let persistent = inner
            .registry
            .definition(bucket)
            .map(|definition| definition.persistent)
            .unwrap_or(false);
        if !persistent {
            return;
        }

        inner.dirty.lock().insert(bucket.to_string());

        let mut timer = inner.timer.lock();
        if timer.is_some() {
            return;
        }
        let task_inner = Arc::clone(inner);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(task_inner.debounce).await;
            // Clear the slot first so events arriving during the flush arm
            // a fresh window.
            *task_inner.timer.lock() = None;
            Self::flush(&task_inner).await;
        }));
    }

    async fn flush(inner: &Arc<Self>) {
        let buckets: Vec<String> = {
            let mut dirty = inner.dirty.lock();
            dirty.drain().collect()
        };

        for bucket in buckets {
            if let Err(error) = Self::flush_bucket(inner, &bucket).await {
                tracing::warn!(bucket = %bucket, error = %error, "snapshot flush failed");
                Self::report(inner, &error);
            }
        }
    }

    async fn flush_bucket(inner: &Arc<Self>, bucket: &str) -> Result<(), Error> {
        let handle = inner.registry.handle(bucket)?;
        let state = handle.snapshot().await?;
        let persisted = PersistedState {
            state,
            metadata: SnapshotMetadata {
                persisted_at: now_ms(),
                server_id: inner.store_name.clone(),
                schema_version: SNAPSHOT_SCHEMA_VERSION,
            },
        };
        let key = PersistenceManager::storage_key(&inner.store_name, bucket);
        inner.adapter.save(&key, persisted).await
    }

    fn report(inner: &Arc<Self>, error: &Error) {
        if let Some(callback) = &inner.on_error {
            callback(error);
        }
    }
}
