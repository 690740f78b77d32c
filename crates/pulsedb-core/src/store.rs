//! The store facade: lifecycle, bucket registry, and component wiring.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::bucket::{spawn_bucket, BucketHandle, BucketStats};
use crate::error::Error;
use crate::event::{BucketEvent, EventBus, EventSubscription};
use crate::persist::{PersistenceConfig, PersistenceManager};
use crate::query::{QueryContext, QueryManager, QuerySubscription};
use crate::registry::{BucketRegistry, BucketRuntime};
use crate::schema::BucketDefinition;
use crate::ttl::{purge_all, TtlSweeper};
use crate::txn::{run_transaction, Transaction};
use crate::value::Value;

/// Store boot configuration.
#[derive(Clone)]
pub struct StoreConfig {
    /// Instance name; prefixes persistence storage keys.
    pub name: String,
    /// Snapshot persistence; `None` keeps the store purely in-memory.
    pub persistence: Option<PersistenceConfig>,
    /// How often the TTL sweeper runs.
    pub ttl_check_interval: Duration,
}

impl StoreConfig {
    /// Configuration with the given instance name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Enable snapshot persistence.
    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Override the TTL sweep interval.
    pub fn with_ttl_check_interval(mut self, interval: Duration) -> Self {
        self.ttl_check_interval = interval;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "pulsedb".to_string(),
            persistence: None,
            ttl_check_interval: Duration::from_millis(30_000),
        }
    }
}

/// Store-wide counters.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Instance name.
    pub name: String,
    /// Per-bucket counters.
    pub buckets: Vec<BucketStats>,
    /// Registered query functions.
    pub queries: usize,
    /// Live reactive subscriptions.
    pub subscriptions: usize,
}

/// An in-memory, schema-validated, reactive document store.
///
/// Cheap to clone; all clones share one instance. The store stays usable
/// until [`stop`](Store::stop), which flushes persistent buckets and shuts
/// every component down in order.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    name: String,
    bus: Arc<EventBus>,
    registry: Arc<BucketRegistry>,
    queries: QueryManager,
    persistence: Option<PersistenceManager>,
    ttl: TtlSweeper,
    stopped: AtomicBool,
}

impl Store {
    /// Boot a store instance.
    pub async fn start(config: StoreConfig) -> Result<Store, Error> {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(BucketRegistry::new());

        let queries = QueryManager::new(Arc::clone(&registry));
        bus.subscribe("bucket.*.*", queries.event_handler());

        let persistence = config.persistence.map(|persistence_config| {
            let manager = PersistenceManager::new(
                config.name.clone(),
                Arc::clone(&registry),
                persistence_config,
            );
            bus.subscribe("bucket.*.*", manager.event_handler());
            manager
        });

        let ttl = TtlSweeper::start(Arc::clone(&registry), config.ttl_check_interval);

        tracing::debug!(store = %config.name, "store started");
        Ok(Store {
            inner: Arc::new(StoreInner {
                name: config.name,
                bus,
                registry,
                queries,
                persistence,
                ttl,
                stopped: AtomicBool::new(false),
            }),
        })
    }

    fn ensure_running(&self) -> Result<(), Error> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            Err(Error::StoreStopped)
        } else {
            Ok(())
        }
    }

    /// The instance name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register a bucket and spawn its actor.
    ///
    /// Persistent buckets are restored from their snapshot, rebuilding the
    /// table, indexes, and autoincrement counter.
    pub async fn define_bucket(
        &self,
        name: &str,
        definition: BucketDefinition,
    ) -> Result<(), Error> {
        self.ensure_running()?;
        definition.validate(name)?;
        if self.inner.registry.contains(name) {
            return Err(Error::BucketAlreadyExists {
                bucket: name.to_string(),
            });
        }

        let initial = match (&self.inner.persistence, definition.persistent) {
            (Some(persistence), true) => persistence.load_bucket(name).await?,
            _ => None,
        };

        let definition = Arc::new(definition);
        let (handle, join) = spawn_bucket(
            name,
            Arc::clone(&definition),
            Arc::clone(&self.inner.bus),
            initial,
        )?;

        let runtime = BucketRuntime {
            definition,
            handle,
            join,
        };
        if let Err(error) = self.inner.registry.insert(name.to_string(), runtime) {
            // Lost a definition race; the freshly spawned actor is orphaned.
            return Err(error);
        }
        Ok(())
    }

    /// A stateless handle to a bucket.
    pub fn bucket(&self, name: &str) -> Result<BucketHandle, Error> {
        self.ensure_running()?;
        self.inner.registry.handle(name)
    }

    /// Unregister a bucket and terminate its actor. Sibling buckets are
    /// unaffected.
    pub async fn drop_bucket(&self, name: &str) -> Result<(), Error> {
        self.ensure_running()?;
        let runtime = self
            .inner
            .registry
            .remove(name)
            .ok_or_else(|| Error::BucketNotDefined {
                bucket: name.to_string(),
            })?;
        if let Some(persistence) = &self.inner.persistence {
            persistence.forget(name);
        }
        runtime.join.abort();
        Ok(())
    }

    /// Run a block atomically across any number of buckets.
    pub async fn transaction<F, Fut, T>(&self, block: F) -> Result<T, Error>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        self.ensure_running()?;
        run_transaction(
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.bus),
            block,
        )
        .await
    }

    /// Register a named reactive query.
    pub fn define_query<F, Fut>(&self, name: &str, query: F) -> Result<(), Error>
    where
        F: Fn(QueryContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Error>> + Send + 'static,
    {
        self.ensure_running()?;
        let wrapped: crate::query::QueryFn =
            Arc::new(move |ctx, params| Box::pin(query(ctx, params)));
        self.inner.queries.define(name, wrapped)
    }

    /// Run a named query once, without subscribing.
    pub async fn run_query(&self, name: &str, params: Option<Value>) -> Result<Value, Error> {
        self.ensure_running()?;
        self.inner.queries.run(name, params).await
    }

    /// Subscribe to a named query. The callback fires once with the current
    /// result and again whenever a mutation changes it.
    pub async fn subscribe<F>(
        &self,
        name: &str,
        params: Option<Value>,
        callback: F,
    ) -> Result<QuerySubscription, Error>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.ensure_running()?;
        self.inner
            .queries
            .subscribe(name, params, Arc::new(callback))
            .await
    }

    /// Subscribe to the event bus. `*` matches exactly one topic segment,
    /// e.g. `bucket.*.inserted` or `bucket.users.*`.
    pub fn on<F>(&self, pattern: &str, handler: F) -> Result<EventSubscription, Error>
    where
        F: Fn(&BucketEvent) + Send + Sync + 'static,
    {
        self.ensure_running()?;
        let id = self.inner.bus.subscribe(pattern, Arc::new(handler));
        Ok(EventSubscription::new(id, &self.inner.bus))
    }

    /// Wait until every pending query re-evaluation has finished.
    pub async fn settle(&self) {
        self.inner.queries.settle().await;
    }

    /// Purge expired records from every TTL bucket now.
    pub async fn purge_ttl(&self) -> Result<usize, Error> {
        self.ensure_running()?;
        Ok(purge_all(&self.inner.registry).await)
    }

    /// Store-wide counters.
    pub async fn stats(&self) -> Result<StoreStats, Error> {
        self.ensure_running()?;
        let mut buckets = Vec::new();
        for (_, handle, _) in self.inner.registry.entries() {
            buckets.push(handle.stats().await?);
        }
        buckets.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(StoreStats {
            name: self.inner.name.clone(),
            buckets,
            queries: self.inner.queries.query_count(),
            subscriptions: self.inner.queries.subscription_count(),
        })
    }

    /// Shut the store down: TTL sweeper stops, persistent buckets flush
    /// while their actors can still answer, actors stop, the bus clears.
    /// Idempotent.
    pub async fn stop(&self) -> Result<(), Error> {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.ttl.stop();

        if let Some(persistence) = &self.inner.persistence {
            persistence.flush_all().await;
            persistence.shutdown();
            persistence.close().await;
        }

        self.inner.queries.clear();

        for runtime in self.inner.registry.drain() {
            runtime.join.abort();
        }

        self.inner.bus.clear();
        tracing::debug!(store = %self.inner.name, "store stopped");
        Ok(())
    }
}
