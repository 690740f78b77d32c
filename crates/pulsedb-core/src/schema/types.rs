//! Scalar schema types.

use crate::time::parse_ttl_text;

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// 64-bit float; NaN is rejected, infinity is allowed.
    Number,
    /// Boolean.
    Boolean,
    /// A plain map (not an array, not null).
    Object,
    /// An array.
    Array,
    /// A date: date value, finite numeric epoch, or parseable date string.
    Date,
}

impl FieldType {
    /// Name used in validation messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Date => "date",
        }
    }
}

/// Value generation strategy for a field left absent on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedBy {
    /// Random v4 UUID string.
    Uuid,
    /// Collision-resistant CUID string.
    Cuid,
    /// Next value of the bucket's autoincrement counter.
    Autoincrement,
    /// Insert-time timestamp.
    Timestamp,
}

/// String format constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    /// Email address.
    Email,
    /// HTTP(S) URL.
    Url,
    /// ISO-8601 date or datetime; calendar-invalid dates are rejected.
    IsoDate,
}

/// TTL duration: raw milliseconds or a `"<number><s|m|h|d>"` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtlSpec {
    /// Positive milliseconds.
    Millis(u64),
    /// Duration string, e.g. `"30s"`, `"1.5h"`.
    Text(String),
}

impl TtlSpec {
    /// Resolve to milliseconds; `None` when the duration is invalid.
    pub fn to_millis(&self) -> Option<u64> {
        match self {
            TtlSpec::Millis(ms) if *ms > 0 => Some(*ms),
            TtlSpec::Millis(_) => None,
            TtlSpec::Text(text) => parse_ttl_text(text),
        }
    }
}

impl From<u64> for TtlSpec {
    fn from(ms: u64) -> Self {
        TtlSpec::Millis(ms)
    }
}

impl From<&str> for TtlSpec {
    fn from(text: &str) -> Self {
        TtlSpec::Text(text.to_string())
    }
}

impl From<String> for TtlSpec {
    fn from(text: String) -> Self {
        TtlSpec::Text(text)
    }
}
