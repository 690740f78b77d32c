//! PulseDB Core - Bucket actors, schema validation, transactions, and
//! reactive queries.
//!
//! This crate provides the engine behind PulseDB: an in-memory,
//! schema-validated, reactive document store. Data lives in named buckets,
//! each owned by a sequential actor; every mutation validates against the
//! bucket's schema, maintains its secondary indexes, and emits a typed event
//! that wakes reactive queries and the persistence coordinator.

pub mod bucket;
pub mod error;
pub mod event;
pub mod filter;
pub mod index;
pub mod persist;
pub mod query;
pub mod schema;
pub mod store;
pub mod time;
pub mod txn;
pub mod value;

mod registry;
mod ttl;

pub use bucket::{AggregateOp, BucketHandle, BucketSnapshot, BucketStats, Page};
pub use error::{Error, IssueCode, ValidationIssue};
pub use event::{BucketEvent, EventBus, EventKind, EventSubscription, TopicPattern};
pub use filter::Filter;
pub use index::IndexManager;
pub use persist::{
    MemoryAdapter, PersistedState, PersistenceConfig, SnapshotMetadata, StorageAdapter,
};
pub use query::{QueryBucket, QueryContext, QuerySubscription};
pub use schema::{
    BucketDefinition, DefaultValue, FieldDefinition, FieldFormat, FieldType, GeneratedBy,
    SchemaValidator, TtlSpec,
};
pub use store::{Store, StoreConfig, StoreStats};
pub use txn::{Transaction, TransactionBucket};
pub use value::{
    FieldMap, Record, Value, META_CREATED_AT, META_EXPIRES_AT, META_UPDATED_AT, META_VERSION,
};
