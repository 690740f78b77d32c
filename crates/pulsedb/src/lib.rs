//! PulseDB - An in-memory, schema-validated, reactive document store.
//!
//! Data is organized into named buckets addressed by a primary-key field.
//! Every mutation validates against the bucket's schema, maintains its
//! secondary indexes, emits a typed event, and wakes any reactive query that
//! depends on the changed data. Multi-bucket writes can be grouped into
//! atomic transactions with optimistic concurrency.
//!
//! # Example
//!
//! ```
//! use pulsedb::{
//!     BucketDefinition, FieldDefinition, FieldMap, FieldType, Filter, GeneratedBy, Store,
//!     StoreConfig, Value,
//! };
//!
//! # async fn demo() -> Result<(), pulsedb::Error> {
//! let store = Store::start(StoreConfig::new("app")).await?;
//!
//! store
//!     .define_bucket(
//!         "users",
//!         BucketDefinition::new("id")
//!             .with_field(
//!                 "id",
//!                 FieldDefinition::new(FieldType::String).generated(GeneratedBy::Uuid),
//!             )
//!             .with_field(
//!                 "email",
//!                 FieldDefinition::new(FieldType::String).required().unique(),
//!             ),
//!     )
//!     .await?;
//!
//! let users = store.bucket("users")?;
//! let mut fields = FieldMap::new();
//! fields.insert("email".to_string(), Value::from("ada@example.com"));
//! let record = users.insert(fields).await?;
//!
//! let found = users
//!     .find_one(Filter::new().eq("email", "ada@example.com"))
//!     .await?;
//! assert_eq!(found.as_ref().and_then(|r| r.get("id")), record.get("id"));
//!
//! store.stop().await?;
//! # Ok(())
//! # }
//! ```

pub use pulsedb_core::*;
