//! The storage-adapter contract and the in-memory test adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bucket::BucketSnapshot;
use crate::error::Error;

/// Metadata written next to every persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Epoch milliseconds when the snapshot was taken.
    pub persisted_at: i64,
    /// The store that produced the snapshot.
    pub server_id: String,
    /// Snapshot layout version.
    pub schema_version: u32,
}

/// One bucket's persisted payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Records and the autoincrement counter.
    pub state: BucketSnapshot,
    /// Write metadata.
    pub metadata: SnapshotMetadata,
}

/// Contract every storage backend satisfies.
///
/// The store treats the adapter as opaque I/O: any implementation honoring
/// these three calls works, whether it writes files, a key-value store, or
/// nothing at all.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Persist `state` under `key`, replacing any previous value.
    async fn save(&self, key: &str, state: PersistedState) -> Result<(), Error>;

    /// Load the state previously saved under `key`.
    async fn load(&self, key: &str) -> Result<Option<PersistedState>, Error>;

    /// Release any resources. Called once at store shutdown.
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Keeps snapshots in a map. Useful in tests and for ephemeral stores.
#[derive(Default)]
pub struct MemoryAdapter {
    entries: Mutex<HashMap<String, PersistedState>>,
}

impl MemoryAdapter {
    /// Create an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Peek at a stored snapshot.
    pub fn entry(&self, key: &str) -> Option<PersistedState> {
        self.entries.lock().get(key).cloned()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been saved.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn save(&self, key: &str, state: PersistedState) -> Result<(), Error> {
        self.entries.lock().insert(key.to_string(), state);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<PersistedState>, Error> {
        Ok(self.entries.lock().get(key).cloned())
    }
}
