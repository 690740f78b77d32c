//! Bucket schema definitions and validation.
//!
//! A [`BucketDefinition`] names the primary-key field and describes every
//! declared field; it is immutable once the bucket is registered. The
//! [`SchemaValidator`] turns raw payloads into fully-formed records and
//! rejects invalid ones with the complete list of issues.

mod bucket;
mod field;
mod types;
mod validator;

pub use bucket::BucketDefinition;
pub use field::{DefaultValue, FieldDefinition};
pub use types::{FieldFormat, FieldType, GeneratedBy, TtlSpec};
pub use validator::SchemaValidator;
