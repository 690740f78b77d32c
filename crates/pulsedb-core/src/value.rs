//! Runtime value and record types.
//!
//! Every field stored in a bucket is a [`Value`]: a tagged sum over the types
//! the schema language knows about. Equality and hashing are structural and
//! deliberately stricter than IEEE semantics: NaN equals NaN and `-0.0`
//! hashes like `0.0`, so the same routine can back index keys, filter
//! equality, and reactive result deduplication.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Raw user payload: field name to value, before metadata is attached.
pub type FieldMap = BTreeMap<String, Value>;

/// Record metadata: version, starts at 1 on insert.
pub const META_VERSION: &str = "_version";
/// Record metadata: creation time, epoch milliseconds.
pub const META_CREATED_AT: &str = "_createdAt";
/// Record metadata: last write time, epoch milliseconds.
pub const META_UPDATED_AT: &str = "_updatedAt";
/// Record metadata: optional expiry time, epoch milliseconds.
pub const META_EXPIRES_AT: &str = "_expiresAt";

/// A runtime value stored in a record field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit floating point number.
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// String-keyed map of values.
    Map(BTreeMap<String, Value>),
    /// Date as milliseconds since the Unix epoch.
    Date(i64),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as list reference.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Try to get as map reference.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Try to get as epoch-millisecond date.
    pub fn as_date(&self) -> Option<i64> {
        match self {
            Value::Date(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Name of the value's runtime type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "array",
            Value::Map(_) => "object",
            Value::Date(_) => "date",
        }
    }
}

/// Bit pattern used for hashing a number: canonicalizes NaN and negative zero
/// so that equal values hash equally.
fn number_bits(n: f64) -> u64 {
    if n.is_nan() {
        f64::NAN.to_bits()
    } else if n == 0.0 {
        0
    } else {
        n.to_bits()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => (a.is_nan() && b.is_nan()) || a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Number(n) => {
                2u8.hash(state);
                number_bits(*n).hash(state);
            }
            Value::String(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::List(items) => {
                4u8.hash(state);
                items.hash(state);
            }
            Value::Map(entries) => {
                5u8.hash(state);
                for (k, v) in entries {
                    k.hash(state);
                    v.hash(state);
                }
            }
            Value::Date(ms) => {
                6u8.hash(state);
                ms.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "'{s}'"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Date(ms) => write!(f, "date({ms})"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Map(record.fields)
    }
}

/// A stored record: user payload merged with system metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a field value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Remove a field, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Check whether a field is present (null counts as present).
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// All fields, metadata included.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Consume into the underlying field map.
    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    /// The record's `_version`, 0 if absent.
    pub fn version(&self) -> u64 {
        self.get(META_VERSION)
            .and_then(Value::as_f64)
            .map(|v| v as u64)
            .unwrap_or(0)
    }

    /// The record's `_createdAt` epoch milliseconds, 0 if absent.
    pub fn created_at(&self) -> i64 {
        self.get(META_CREATED_AT)
            .and_then(Value::as_f64)
            .map(|v| v as i64)
            .unwrap_or(0)
    }

    /// The record's `_updatedAt` epoch milliseconds, 0 if absent.
    pub fn updated_at(&self) -> i64 {
        self.get(META_UPDATED_AT)
            .and_then(Value::as_f64)
            .map(|v| v as i64)
            .unwrap_or(0)
    }

    /// The record's `_expiresAt` epoch milliseconds, if set.
    pub fn expires_at(&self) -> Option<i64> {
        self.get(META_EXPIRES_AT)
            .and_then(Value::as_f64)
            .map(|v| v as i64)
    }
}

impl From<FieldMap> for Record {
    fn from(fields: FieldMap) -> Self {
        Self { fields }
    }
}

/// Check whether a field name is system metadata.
pub fn is_metadata_field(name: &str) -> bool {
    name.starts_with('_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        v.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_nan_equals_nan() {
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_eq!(
            hash_of(&Value::Number(f64::NAN)),
            hash_of(&Value::Number(f64::NAN))
        );
    }

    #[test]
    fn test_negative_zero_hashes_like_zero() {
        assert_eq!(Value::Number(-0.0), Value::Number(0.0));
        assert_eq!(hash_of(&Value::Number(-0.0)), hash_of(&Value::Number(0.0)));
    }

    #[test]
    fn test_cross_type_inequality() {
        assert_ne!(Value::Number(1.0), Value::String("1".into()));
        assert_ne!(Value::Null, Value::Bool(false));
        assert_ne!(Value::Date(100), Value::Number(100.0));
    }

    #[test]
    fn test_deep_equality_of_nested_values() {
        let mut a = BTreeMap::new();
        a.insert("xs".to_string(), Value::List(vec![Value::Number(f64::NAN)]));
        let mut b = BTreeMap::new();
        b.insert("xs".to_string(), Value::List(vec![Value::Number(f64::NAN)]));
        assert_eq!(Value::Map(a), Value::Map(b));
    }

    #[test]
    fn test_record_metadata_accessors() {
        let mut record = Record::new();
        record.set(META_VERSION, 3i64);
        record.set(META_CREATED_AT, 1_000i64);
        record.set(META_UPDATED_AT, 2_000i64);
        assert_eq!(record.version(), 3);
        assert_eq!(record.created_at(), 1_000);
        assert_eq!(record.updated_at(), 2_000);
        assert_eq!(record.expires_at(), None);

        record.set(META_EXPIRES_AT, 5_000i64);
        assert_eq!(record.expires_at(), Some(5_000));
    }

    #[test]
    fn test_metadata_field_detection() {
        assert!(is_metadata_field("_version"));
        assert!(is_metadata_field("_custom"));
        assert!(!is_metadata_field("email"));
    }
}
