//! Shared bucket registry.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::bucket::BucketHandle;
use crate::error::Error;
use crate::schema::BucketDefinition;

/// Everything the store holds for one live bucket.
pub(crate) struct BucketRuntime {
    pub definition: Arc<BucketDefinition>,
    pub handle: BucketHandle,
    pub join: JoinHandle<()>,
}

/// Name-keyed registry of live buckets, shared by the store facade, the
/// transaction coordinator, and the query manager.
pub(crate) struct BucketRegistry {
    buckets: DashMap<String, BucketRuntime>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Register a bucket; fails when the name is taken.
    pub fn insert(&self, name: String, runtime: BucketRuntime) -> Result<(), Error> {
        match self.buckets.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Err(Error::BucketAlreadyExists {
                bucket: entry.key().clone(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(runtime);
                Ok(())
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buckets.contains_key(name)
    }

    pub fn handle(&self, name: &str) -> Result<BucketHandle, Error> {
        self.buckets
            .get(name)
            .map(|runtime| runtime.handle.clone())
            .ok_or_else(|| Error::BucketNotDefined {
                bucket: name.to_string(),
            })
    }

    pub fn definition(&self, name: &str) -> Result<Arc<BucketDefinition>, Error> {
        self.buckets
            .get(name)
            .map(|runtime| Arc::clone(&runtime.definition))
            .ok_or_else(|| Error::BucketNotDefined {
                bucket: name.to_string(),
            })
    }

    pub fn remove(&self, name: &str) -> Option<BucketRuntime> {
        self.buckets.remove(name).map(|(_, runtime)| runtime)
    }

    /// Snapshot of `(name, handle, definition)` for every bucket.
    pub fn entries(&self) -> Vec<(String, BucketHandle, Arc<BucketDefinition>)> {
        self.buckets
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().handle.clone(),
                    Arc::clone(&entry.value().definition),
                )
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.buckets.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Remove and return every bucket.
    pub fn drain(&self) -> Vec<BucketRuntime> {
        let names = self.names();
        names
            .into_iter()
            .filter_map(|name| self.remove(&name))
            .collect()
    }
}
