//! Record preparation and constraint validation.
//!
//! The validator owns the compiled form of one bucket's schema. It produces
//! fully-formed records for inserts and updates, and checks every declared
//! constraint, collecting all issues before failing atomically.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::bucket::BucketDefinition;
use super::types::{FieldFormat, FieldType, GeneratedBy};
use crate::error::{Error, IssueCode, ValidationIssue};
use crate::time::now_ms;
use crate::value::{is_metadata_field, FieldMap, Record, Value, META_CREATED_AT, META_UPDATED_AT, META_VERSION};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("url regex"));

/// Accept an RFC 3339 datetime or a plain `YYYY-MM-DD` date. Both parsers
/// reject calendar-invalid dates such as `2023-02-30`.
fn is_valid_date_string(text: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(text).is_ok()
        || chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

/// Per-bucket record validator.
pub struct SchemaValidator {
    bucket: String,
    definition: Arc<BucketDefinition>,
    patterns: HashMap<String, Regex>,
}

impl SchemaValidator {
    /// Build a validator, compiling every declared pattern once.
    pub fn new(bucket: impl Into<String>, definition: Arc<BucketDefinition>) -> Result<Self, Error> {
        let bucket = bucket.into();
        let mut patterns = HashMap::new();
        for (name, field) in &definition.schema {
            if let Some(source) = &field.pattern {
                let regex = Regex::new(source).map_err(|e| Error::InvalidDefinition {
                    bucket: bucket.clone(),
                    reason: format!("invalid pattern on field '{name}': {e}"),
                })?;
                patterns.insert(name.clone(), regex);
            }
        }
        Ok(Self {
            bucket,
            definition,
            patterns,
        })
    }

    /// The bucket this validator belongs to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Produce a fully-formed insert record from a raw payload.
    ///
    /// Absent generated fields are filled from their strategy (`counter` is
    /// the bucket's autoincrement value reserved for this insert), then
    /// absent defaulted fields, then metadata; the result is validated.
    pub fn prepare_insert(&self, input: FieldMap, counter: u64) -> Result<Record, Error> {
        let now = now_ms();
        let mut record = Record::from(input);

        for (name, field) in &self.definition.schema {
            if let Some(strategy) = field.generated {
                if !record.contains(name) {
                    record.set(name.clone(), generate(strategy, field.field_type, counter, now));
                }
            }
        }

        for (name, field) in &self.definition.schema {
            if let Some(default) = &field.default {
                if !record.contains(name) {
                    record.set(name.clone(), default.produce());
                }
            }
        }

        record.set(META_VERSION, 1u64);
        record.set(META_CREATED_AT, now);
        record.set(META_UPDATED_AT, now);

        self.validate(&record)?;
        Ok(record)
    }

    /// Produce the merged record for an update.
    ///
    /// The primary-key field, generated fields, and metadata fields are
    /// silently stripped from `changes` before merging over `existing`.
    pub fn prepare_update(&self, existing: &Record, changes: FieldMap) -> Result<Record, Error> {
        let now = now_ms();
        let mut sanitized = changes;
        sanitized.remove(&self.definition.key_field);
        for (name, field) in &self.definition.schema {
            if field.generated.is_some() {
                sanitized.remove(name.as_str());
            }
        }
        sanitized.retain(|name, _| !is_metadata_field(name));

        let mut merged = existing.clone();
        for (name, value) in sanitized {
            merged.set(name, value);
        }
        merged.set(META_VERSION, existing.version() + 1);
        merged.set(META_UPDATED_AT, now);

        self.validate(&merged)?;
        Ok(merged)
    }

    /// Check every declared constraint, collecting all issues.
    pub fn validate(&self, record: &Record) -> Result<(), Error> {
        let mut issues = Vec::new();

        for (name, field) in &self.definition.schema {
            let value = match record.get(name) {
                Some(v) if !v.is_null() => v,
                _ => {
                    // The key field must exist once generation and defaults
                    // ran, whether or not it is marked required.
                    if field.required || *name == self.definition.key_field {
                        issues.push(ValidationIssue::new(
                            name.clone(),
                            "field is required",
                            IssueCode::Required,
                        ));
                    }
                    continue;
                }
            };

            if !type_matches(field.field_type, value) {
                issues.push(ValidationIssue::new(
                    name.clone(),
                    format!(
                        "expected {}, got {}",
                        field.field_type.as_str(),
                        value.type_name()
                    ),
                    IssueCode::Type,
                ));
                continue;
            }

            if let Some(allowed) = &field.one_of {
                if !allowed.contains(value) {
                    issues.push(ValidationIssue::new(
                        name.clone(),
                        format!("value {value} is not in the allowed set"),
                        IssueCode::Enum,
                    ));
                }
            }

            match value {
                Value::String(text) => {
                    self.check_string(name, field, text, &mut issues);
                }
                Value::Number(number) => {
                    check_number(name, field, *number, &mut issues);
                }
                _ => {}
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation { issues })
        }
    }

    fn check_string(
        &self,
        name: &str,
        field: &super::field::FieldDefinition,
        text: &str,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let chars = text.chars().count();
        if let Some(min) = field.min_length {
            if chars < min {
                issues.push(ValidationIssue::new(
                    name,
                    format!("length {chars} is below minimum {min}"),
                    IssueCode::MinLength,
                ));
            }
        }
        if let Some(max) = field.max_length {
            if chars > max {
                issues.push(ValidationIssue::new(
                    name,
                    format!("length {chars} exceeds maximum {max}"),
                    IssueCode::MaxLength,
                ));
            }
        }
        if let Some(regex) = self.patterns.get(name) {
            if !regex.is_match(text) {
                issues.push(ValidationIssue::new(
                    name,
                    format!("value does not match pattern {}", regex.as_str()),
                    IssueCode::Pattern,
                ));
            }
        }
        if let Some(format) = field.format {
            let ok = match format {
                FieldFormat::Email => EMAIL_RE.is_match(text),
                FieldFormat::Url => URL_RE.is_match(text),
                FieldFormat::IsoDate => is_valid_date_string(text),
            };
            if !ok {
                issues.push(ValidationIssue::new(
                    name,
                    format!("value is not a valid {format:?}"),
                    IssueCode::Format,
                ));
            }
        }
    }
}

fn check_number(
    name: &str,
    field: &super::field::FieldDefinition,
    number: f64,
    issues: &mut Vec<ValidationIssue>,
) {
    if let Some(min) = field.min {
        if number < min {
            issues.push(ValidationIssue::new(
                name,
                format!("value {number} is below minimum {min}"),
                IssueCode::Min,
            ));
        }
    }
    if let Some(max) = field.max {
        if number > max {
            issues.push(ValidationIssue::new(
                name,
                format!("value {number} exceeds maximum {max}"),
                IssueCode::Max,
            ));
        }
    }
}

fn type_matches(field_type: FieldType, value: &Value) -> bool {
    match field_type {
        FieldType::String => matches!(value, Value::String(_)),
        FieldType::Number => matches!(value, Value::Number(n) if !n.is_nan()),
        FieldType::Boolean => matches!(value, Value::Bool(_)),
        FieldType::Object => matches!(value, Value::Map(_)),
        FieldType::Array => matches!(value, Value::List(_)),
        FieldType::Date => match value {
            Value::Date(_) => true,
            Value::Number(n) => n.is_finite(),
            Value::String(text) => is_valid_date_string(text),
            _ => false,
        },
    }
}

fn generate(strategy: GeneratedBy, field_type: FieldType, counter: u64, now: i64) -> Value {
    match strategy {
        GeneratedBy::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
        GeneratedBy::Cuid => Value::String(cuid2::create_id()),
        GeneratedBy::Autoincrement => Value::Number(counter as f64),
        GeneratedBy::Timestamp => {
            if field_type == FieldType::Date {
                Value::Date(now)
            } else {
                Value::Number(now as f64)
            }
        }
    }
}
