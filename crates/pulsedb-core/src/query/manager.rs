//! Subscription bookkeeping and re-evaluation scheduling.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use super::context::{DependencySet, QueryContext};
use crate::error::Error;
use crate::event::BucketEvent;
use crate::registry::BucketRegistry;
use crate::value::Value;

/// A registered query function.
pub(crate) type QueryFn =
    Arc<dyn Fn(QueryContext, Option<Value>) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync>;

/// Subscriber callback, invoked with each changed result.
pub(crate) type QueryCallback = Arc<dyn Fn(&Value) + Send + Sync>;

struct SubscriptionState {
    id: u64,
    query: String,
    params: Option<Value>,
    callback: QueryCallback,
    last_result: Mutex<Value>,
    deps: Mutex<DependencySet>,
    /// Set when an event lands while a re-evaluation is already in flight;
    /// exactly one follow-up run is scheduled.
    rerun_requested: AtomicBool,
}

pub(crate) struct QueryManager {
    inner: Arc<QueryManagerInner>,
}

struct QueryManagerInner {
    registry: Arc<BucketRegistry>,
    queries: RwLock<HashMap<String, QueryFn>>,
    subscriptions: Mutex<HashMap<u64, Arc<SubscriptionState>>>,
    /// Bucket-level dependency index: bucket -> subscription ids.
    bucket_index: Mutex<HashMap<String, HashSet<u64>>>,
    /// Record-level dependency index: bucket -> key -> subscription ids.
    record_index: Mutex<HashMap<String, HashMap<Value, HashSet<u64>>>>,
    /// Subscriptions with a re-evaluation in flight.
    pending: Mutex<HashSet<u64>>,
    settled: Notify,
    next_id: AtomicU64,
}

impl QueryManager {
    pub fn new(registry: Arc<BucketRegistry>) -> Self {
        Self {
            inner: Arc::new(QueryManagerInner {
                registry,
                queries: RwLock::new(HashMap::new()),
                subscriptions: Mutex::new(HashMap::new()),
                bucket_index: Mutex::new(HashMap::new()),
                record_index: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashSet::new()),
                settled: Notify::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Bus handler: computes the affected subscriptions for an event and
    /// schedules their re-evaluation. Synchronous and cheap, so it can run
    /// on the mutating actor's task.
    pub fn event_handler(&self) -> Arc<dyn Fn(&BucketEvent) + Send + Sync> {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |event| QueryManagerInner::handle_event(&inner, event))
    }

    pub fn define(&self, name: &str, query: QueryFn) -> Result<(), Error> {
        let mut queries = self.inner.queries.write();
        if queries.contains_key(name) {
            return Err(Error::QueryAlreadyDefined {
                query: name.to_string(),
            });
        }
        queries.insert(name.to_string(), query);
        Ok(())
    }

    /// One-shot execution; dependencies are recorded and discarded.
    pub async fn run(&self, name: &str, params: Option<Value>) -> Result<Value, Error> {
        let query = self.query_fn(name)?;
        let ctx = QueryContext::new(Arc::clone(&self.inner.registry));
        query(ctx, params).await
    }

    /// Run once, install dependencies, deliver the initial result, and keep
    /// the subscription live until unsubscribed.
    pub async fn subscribe(
        &self,
        name: &str,
        params: Option<Value>,
        callback: QueryCallback,
    ) -> Result<QuerySubscription, Error> {
        let query = self.query_fn(name)?;
        let ctx = QueryContext::new(Arc::clone(&self.inner.registry));
        let result = query(ctx.clone(), params.clone()).await?;
        let deps = ctx.take_deps();

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SubscriptionState {
            id,
            query: name.to_string(),
            params,
            callback,
            last_result: Mutex::new(result.clone()),
            deps: Mutex::new(deps.clone()),
            rerun_requested: AtomicBool::new(false),
        });

        self.inner.subscriptions.lock().insert(id, Arc::clone(&state));
        self.inner.install(id, &deps);

        // Initial fire: the subscriber always sees the current result once.
        (state.callback)(&result);

        Ok(QuerySubscription {
            id,
            manager: Arc::downgrade(&self.inner),
        })
    }

    /// Wait until no re-evaluation is pending.
    pub async fn settle(&self) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.pending.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    pub fn query_count(&self) -> usize {
        self.inner.queries.read().len()
    }

    /// Drop every subscription; used at store shutdown.
    pub fn clear(&self) {
        self.inner.subscriptions.lock().clear();
        self.inner.bucket_index.lock().clear();
        self.inner.record_index.lock().clear();
    }

    fn query_fn(&self, name: &str) -> Result<QueryFn, Error> {
        self.inner
            .queries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::QueryNotDefined {
                query: name.to_string(),
            })
    }
}

impl QueryManagerInner {
    fn install(&self, id: u64, deps: &DependencySet) {
        let mut bucket_index = self.bucket_index.lock();
        for bucket in &deps.buckets {
            bucket_index.entry(bucket.clone()).or_default().insert(id);
        }
        drop(bucket_index);

        let mut record_index = self.record_index.lock();
        for (bucket, key) in &deps.records {
            record_index
                .entry(bucket.clone())
                .or_default()
                .entry(key.clone())
                .or_default()
                .insert(id);
        }
    }

    fn uninstall(&self, id: u64, deps: &DependencySet) {
        let mut bucket_index = self.bucket_index.lock();
        for bucket in &deps.buckets {
            if let Some(ids) = bucket_index.get_mut(bucket) {
                ids.remove(&id);
                if ids.is_empty() {
                    bucket_index.remove(bucket);
                }
            }
        }
        drop(bucket_index);

        let mut record_index = self.record_index.lock();
        for (bucket, key) in &deps.records {
            if let Some(keys) = record_index.get_mut(bucket) {
                if let Some(ids) = keys.get_mut(key) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        keys.remove(key);
                    }
                }
                if keys.is_empty() {
                    record_index.remove(bucket);
                }
            }
        }
    }

    fn handle_event(inner: &Arc<Self>, event: &BucketEvent) {
        let bucket = event.bucket();
        let key = event.key();

        let mut affected: HashSet<u64> = HashSet::new();
        if let Some(ids) = inner.bucket_index.lock().get(bucket) {
            affected.extend(ids.iter().copied());
        }
        if let Some(ids) = inner
            .record_index
            .lock()
            .get(bucket)
            .and_then(|keys| keys.get(key))
        {
            affected.extend(ids.iter().copied());
        }

        for id in affected {
            Self::schedule(inner, id);
        }
    }

    fn schedule(inner: &Arc<Self>, id: u64) {
        let Some(state) = inner.subscriptions.lock().get(&id).cloned() else {
            return;
        };
        {
            let mut pending = inner.pending.lock();
            if pending.contains(&id) {
                // Coalesce: exactly one follow-up run after the current one.
                state.rerun_requested.store(true, Ordering::SeqCst);
                return;
            }
            pending.insert(id);
        }
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            Self::reevaluate(&inner, &state).await;
        });
    }

    async fn reevaluate(inner: &Arc<Self>, state: &Arc<SubscriptionState>) {
        loop {
            let query = inner.queries.read().get(&state.query).cloned();
            if let Some(query) = query {
                let ctx = QueryContext::new(Arc::clone(&inner.registry));
                let outcome = query(ctx.clone(), state.params.clone()).await;
                let deps = ctx.take_deps();

                // Swap the dependency sets with no window where the
                // subscription is missing from the indexes: the old entries
                // stay installed while the query runs, so an event landing
                // mid-run still finds them and schedules the follow-up.
                // Install the new set, then drop only the stale entries.
                let alive = inner.subscriptions.lock().contains_key(&state.id);
                if alive {
                    let old_deps =
                        std::mem::replace(&mut *state.deps.lock(), deps.clone());
                    inner.install(state.id, &deps);
                    inner.uninstall(state.id, &old_deps.difference(&deps));
                }

                match outcome {
                    Ok(result) => {
                        let changed = {
                            let mut last = state.last_result.lock();
                            if *last != result {
                                *last = result.clone();
                                true
                            } else {
                                false
                            }
                        };
                        if changed && alive {
                            (state.callback)(&result);
                        }
                    }
                    Err(error) => {
                        // The subscription stays installed so a later event
                        // can recover it.
                        tracing::warn!(
                            query = %state.query,
                            subscription = state.id,
                            error = %error,
                            "reactive query re-evaluation failed"
                        );
                    }
                }
            }

            if !state.rerun_requested.swap(false, Ordering::SeqCst) {
                break;
            }
        }

        let mut pending = inner.pending.lock();
        pending.remove(&state.id);
        if pending.is_empty() {
            inner.settled.notify_waiters();
        }
    }

    fn unsubscribe(&self, id: u64) {
        let Some(state) = self.subscriptions.lock().remove(&id) else {
            return;
        };
        let deps = state.deps.lock().clone();
        self.uninstall(id, &deps);
    }
}

/// Handle to a live subscription.
pub struct QuerySubscription {
    id: u64,
    manager: Weak<QueryManagerInner>,
}

impl QuerySubscription {
    /// Stable id of the subscription.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the subscription and its dependency index entries.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.manager.upgrade() {
            inner.unsubscribe(self.id);
        }
    }
}
