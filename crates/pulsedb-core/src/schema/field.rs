//! Field definitions for buckets.

use std::fmt;
use std::sync::Arc;

use super::types::{FieldFormat, FieldType, GeneratedBy};
use crate::value::Value;

/// Default value for a field left absent after generation.
#[derive(Clone)]
pub enum DefaultValue {
    /// A static value, copied on each insert.
    Value(Value),
    /// A producer invoked on each insert.
    Producer(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    /// Produce the default for one insert.
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(value) => value.clone(),
            DefaultValue::Producer(producer) => producer(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
            DefaultValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// A field definition within a bucket schema.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    /// Field data type.
    pub field_type: FieldType,
    /// Whether the field must be present and non-null.
    pub required: bool,
    /// Default applied when the field is absent on insert.
    pub default: Option<DefaultValue>,
    /// Generation strategy applied when the field is absent on insert.
    pub generated: Option<GeneratedBy>,
    /// Whether the field carries a unique index.
    pub unique: bool,
    /// Allowed values, if the field is an enumeration.
    pub one_of: Option<Vec<Value>>,
    /// String format constraint.
    pub format: Option<FieldFormat>,
    /// Inclusive numeric minimum.
    pub min: Option<f64>,
    /// Inclusive numeric maximum.
    pub max: Option<f64>,
    /// Minimum string length in characters.
    pub min_length: Option<usize>,
    /// Maximum string length in characters.
    pub max_length: Option<usize>,
    /// Regex source the string must match.
    pub pattern: Option<String>,
}

impl FieldDefinition {
    /// Create an optional field of the given type.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            default: None,
            generated: None,
            unique: false,
            one_of: None,
            format: None,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
        }
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set a static default value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    /// Set a default producer invoked per insert.
    pub fn with_default_fn<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Producer(Arc::new(producer)));
        self
    }

    /// Set the generation strategy.
    pub fn generated(mut self, strategy: GeneratedBy) -> Self {
        self.generated = Some(strategy);
        self
    }

    /// Mark the field as unique; it implicitly gains a unique index.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Restrict the field to a set of allowed values.
    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.one_of = Some(values);
        self
    }

    /// Set the string format constraint.
    pub fn with_format(mut self, format: FieldFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set the inclusive numeric minimum.
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Set the inclusive numeric maximum.
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Set the minimum string length.
    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    /// Set the maximum string length.
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Set the regex the string must match.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builder() {
        let field = FieldDefinition::new(FieldType::String)
            .required()
            .unique()
            .with_format(FieldFormat::Email)
            .max_length(120);

        assert_eq!(field.field_type, FieldType::String);
        assert!(field.required);
        assert!(field.unique);
        assert_eq!(field.format, Some(FieldFormat::Email));
        assert_eq!(field.max_length, Some(120));
        assert!(field.default.is_none());
    }

    #[test]
    fn test_default_value_static_and_producer() {
        let fixed = DefaultValue::Value(Value::Number(7.0));
        assert_eq!(fixed.produce(), Value::Number(7.0));

        let produced = DefaultValue::Producer(Arc::new(|| Value::String("fresh".into())));
        assert_eq!(produced.produce(), Value::String("fresh".into()));
    }

    #[test]
    fn test_generated_field() {
        let field = FieldDefinition::new(FieldType::String).generated(GeneratedBy::Uuid);
        assert_eq!(field.generated, Some(GeneratedBy::Uuid));
    }
}
