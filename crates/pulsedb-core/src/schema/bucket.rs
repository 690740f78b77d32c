//! Bucket definitions.

use indexmap::IndexMap;
use regex::Regex;

use super::field::FieldDefinition;
use super::types::TtlSpec;
use crate::error::Error;

/// Immutable definition of a bucket: key field, schema, indexes, policies.
#[derive(Debug, Clone)]
pub struct BucketDefinition {
    /// The primary-key field; its value uniquely identifies a record.
    pub key_field: String,
    /// Declared fields, in declaration order.
    pub schema: IndexMap<String, FieldDefinition>,
    /// Fields carrying a secondary index, in declaration order.
    pub indexes: Vec<String>,
    /// Optional per-record time-to-live.
    pub ttl: Option<TtlSpec>,
    /// Optional record-count cap; oldest records are evicted past it.
    pub max_size: Option<usize>,
    /// Whether the bucket participates in snapshot persistence.
    pub persistent: bool,
}

impl BucketDefinition {
    /// Create a definition keyed by the given field.
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            schema: IndexMap::new(),
            indexes: Vec::new(),
            ttl: None,
            max_size: None,
            persistent: false,
        }
    }

    /// Add a field to the schema.
    pub fn with_field(mut self, name: impl Into<String>, field: FieldDefinition) -> Self {
        self.schema.insert(name.into(), field);
        self
    }

    /// Declare a secondary index on a field.
    pub fn with_index(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.indexes.contains(&field) {
            self.indexes.push(field);
        }
        self
    }

    /// Set the per-record time-to-live.
    pub fn with_ttl(mut self, ttl: impl Into<TtlSpec>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    /// Cap the bucket at `max_size` records.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Mark the bucket as persistent.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Resolved TTL in milliseconds. Only meaningful after [`validate`].
    ///
    /// [`validate`]: BucketDefinition::validate
    pub fn ttl_millis(&self) -> Option<u64> {
        self.ttl.as_ref().and_then(TtlSpec::to_millis)
    }

    /// Validate the definition before a bucket is registered under `bucket`.
    pub fn validate(&self, bucket: &str) -> Result<(), Error> {
        let invalid = |reason: String| Error::InvalidDefinition {
            bucket: bucket.to_string(),
            reason,
        };

        if !self.schema.contains_key(&self.key_field) {
            return Err(invalid(format!(
                "key field '{}' is not in the schema",
                self.key_field
            )));
        }

        for field in &self.indexes {
            if !self.schema.contains_key(field) {
                return Err(invalid(format!("index field '{field}' is not in the schema")));
            }
        }

        if let Some(ttl) = &self.ttl {
            if ttl.to_millis().is_none() {
                return Err(invalid(format!("invalid ttl: {ttl:?}")));
            }
        }

        if self.max_size == Some(0) {
            return Err(invalid("max_size must be at least 1".to_string()));
        }

        for (name, field) in &self.schema {
            if let Some(pattern) = &field.pattern {
                if let Err(e) = Regex::new(pattern) {
                    return Err(invalid(format!("invalid pattern on field '{name}': {e}")));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::FieldType;

    fn base() -> BucketDefinition {
        BucketDefinition::new("id")
            .with_field("id", FieldDefinition::new(FieldType::String))
            .with_field("email", FieldDefinition::new(FieldType::String))
    }

    #[test]
    fn test_valid_definition() {
        assert!(base().with_index("email").validate("users").is_ok());
    }

    #[test]
    fn test_unknown_key_field_rejected() {
        let def = BucketDefinition::new("missing")
            .with_field("id", FieldDefinition::new(FieldType::String));
        let err = def.validate("users").unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition { .. }));
    }

    #[test]
    fn test_unknown_index_field_rejected() {
        let err = base().with_index("nope").validate("users").unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition { .. }));
    }

    #[test]
    fn test_bad_ttl_rejected() {
        let err = base().with_ttl("soon").validate("users").unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition { .. }));
        assert!(base().with_ttl("30s").validate("users").is_ok());
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let def = base().with_field(
            "code",
            FieldDefinition::new(FieldType::String).with_pattern("["),
        );
        let err = def.validate("users").unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition { .. }));
    }

    #[test]
    fn test_duplicate_index_declarations_collapse() {
        let def = base().with_index("email").with_index("email");
        assert_eq!(def.indexes.len(), 1);
    }
}
