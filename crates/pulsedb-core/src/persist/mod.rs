//! Snapshot persistence through an opaque storage adapter.

mod adapter;
mod coordinator;

pub use adapter::{MemoryAdapter, PersistedState, SnapshotMetadata, StorageAdapter};
pub use coordinator::PersistenceConfig;

pub(crate) use coordinator::PersistenceManager;
