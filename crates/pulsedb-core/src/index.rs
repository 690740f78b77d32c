//! Secondary indexes for one bucket.
//!
//! Each indexed field maps a field value to the primary key(s) carrying it:
//! unique indexes are 1-to-1, non-unique indexes are 1-to-N. Null and absent
//! values are never indexed. Writes are two-phase: all unique constraints are
//! checked before any index entry is touched, so a rejected record leaves the
//! indexes exactly as they were.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::error::Error;
use crate::schema::BucketDefinition;
use crate::value::{Record, Value};

/// Index manager owning every secondary index of one bucket.
pub struct IndexManager {
    bucket: String,
    /// Unique indexes: field -> value -> owning primary key.
    unique: IndexMap<String, HashMap<Value, Value>>,
    /// Non-unique indexes: field -> value -> primary keys, in insertion order.
    multi: IndexMap<String, HashMap<Value, IndexSet<Value>>>,
}

impl IndexManager {
    /// Build the index set for a bucket definition.
    ///
    /// A field listed in `indexes` whose schema marks it `unique` becomes a
    /// unique index; a `unique` field not listed still gets one implicitly.
    pub fn new(bucket: impl Into<String>, definition: &BucketDefinition) -> Self {
        let mut unique = IndexMap::new();
        let mut multi = IndexMap::new();

        for field in &definition.indexes {
            let is_unique = definition
                .schema
                .get(field)
                .map(|f| f.unique)
                .unwrap_or(false);
            if is_unique {
                unique.insert(field.clone(), HashMap::new());
            } else {
                multi.insert(field.clone(), HashMap::new());
            }
        }
        for (name, field) in &definition.schema {
            if field.unique && !unique.contains_key(name) {
                unique.insert(name.clone(), HashMap::new());
            }
        }

        Self {
            bucket: bucket.into(),
            unique,
            multi,
        }
    }

    /// Whether the field carries any index.
    pub fn is_indexed(&self, field: &str) -> bool {
        self.unique.contains_key(field) || self.multi.contains_key(field)
    }

    /// Number of indexes maintained.
    pub fn index_count(&self) -> usize {
        self.unique.len() + self.multi.len()
    }

    /// Validate a record against every unique index without mutating state.
    pub fn validate_insert(&self, key: &Value, record: &Record) -> Result<(), Error> {
        for (field, entries) in &self.unique {
            if let Some(value) = indexable(record.get(field)) {
                if let Some(owner) = entries.get(value) {
                    if owner != key {
                        return Err(self.unique_violation(field, value));
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate changed unique values of an update without mutating state.
    pub fn validate_update(&self, key: &Value, old: &Record, new: &Record) -> Result<(), Error> {
        for (field, entries) in &self.unique {
            let old_value = indexable(old.get(field));
            let new_value = indexable(new.get(field));
            if new_value == old_value {
                continue;
            }
            if let Some(value) = new_value {
                if let Some(owner) = entries.get(value) {
                    if owner != key {
                        return Err(self.unique_violation(field, value));
                    }
                }
            }
        }
        Ok(())
    }

    /// Index a new record. Phase 1 checks every unique constraint; phase 2
    /// writes the entries. Nothing is modified on failure.
    pub fn add_record(&mut self, key: &Value, record: &Record) -> Result<(), Error> {
        self.validate_insert(key, record)?;

        for (field, entries) in &mut self.unique {
            if let Some(value) = indexable(record.get(field)) {
                entries.insert(value.clone(), key.clone());
            }
        }
        for (field, entries) in &mut self.multi {
            if let Some(value) = indexable(record.get(field)) {
                entries.entry(value.clone()).or_default().insert(key.clone());
            }
        }
        Ok(())
    }

    /// Drop a record's entries from every index. Empty posting sets are
    /// garbage-collected.
    pub fn remove_record(&mut self, key: &Value, record: &Record) {
        for (field, entries) in &mut self.unique {
            if let Some(value) = indexable(record.get(field)) {
                if entries.get(value) == Some(key) {
                    entries.remove(value);
                }
            }
        }
        for (field, entries) in &mut self.multi {
            if let Some(value) = indexable(record.get(field)) {
                if let Some(keys) = entries.get_mut(value) {
                    keys.shift_remove(key);
                    if keys.is_empty() {
                        entries.remove(value);
                    }
                }
            }
        }
    }

    /// Move a record's entries from its old values to its new ones, touching
    /// only indexes whose value actually changed.
    pub fn update_record(&mut self, key: &Value, old: &Record, new: &Record) -> Result<(), Error> {
        self.validate_update(key, old, new)?;

        for (field, entries) in &mut self.unique {
            let old_value = indexable(old.get(field)).cloned();
            let new_value = indexable(new.get(field)).cloned();
            if old_value == new_value {
                continue;
            }
            if let Some(value) = old_value {
                if entries.get(&value) == Some(key) {
                    entries.remove(&value);
                }
            }
            if let Some(value) = new_value {
                entries.insert(value, key.clone());
            }
        }
        for (field, entries) in &mut self.multi {
            let old_value = indexable(old.get(field)).cloned();
            let new_value = indexable(new.get(field)).cloned();
            if old_value == new_value {
                continue;
            }
            if let Some(value) = old_value {
                if let Some(keys) = entries.get_mut(&value) {
                    keys.shift_remove(key);
                    if keys.is_empty() {
                        entries.remove(&value);
                    }
                }
            }
            if let Some(value) = new_value {
                entries.entry(value).or_default().insert(key.clone());
            }
        }
        Ok(())
    }

    /// Look up the primary keys carrying `value` on `field`.
    ///
    /// Returns `None` when the field is not indexed (callers fall back to a
    /// full scan) and an empty list when the probe value is null.
    pub fn lookup(&self, field: &str, value: &Value) -> Option<Vec<Value>> {
        if let Some(entries) = self.unique.get(field) {
            if value.is_null() {
                return Some(Vec::new());
            }
            return Some(entries.get(value).cloned().into_iter().collect());
        }
        if let Some(entries) = self.multi.get(field) {
            if value.is_null() {
                return Some(Vec::new());
            }
            return Some(
                entries
                    .get(value)
                    .map(|keys| keys.iter().cloned().collect())
                    .unwrap_or_default(),
            );
        }
        None
    }

    /// Fields carrying a unique index.
    pub(crate) fn unique_fields(&self) -> impl Iterator<Item = &str> {
        self.unique.keys().map(String::as_str)
    }

    /// The primary key currently owning `value` on a unique field, if any.
    pub(crate) fn unique_owner(&self, field: &str, value: &Value) -> Option<&Value> {
        self.unique.get(field).and_then(|entries| entries.get(value))
    }

    /// Drop every entry, keeping the index structure.
    pub fn clear(&mut self) {
        for entries in self.unique.values_mut() {
            entries.clear();
        }
        for entries in self.multi.values_mut() {
            entries.clear();
        }
    }

    /// Rebuild all indexes from a table's contents.
    pub fn rebuild<'a>(
        &mut self,
        entries: impl Iterator<Item = (&'a Value, &'a Record)>,
    ) -> Result<(), Error> {
        self.clear();
        for (key, record) in entries {
            self.add_record(key, record)?;
        }
        Ok(())
    }

    fn unique_violation(&self, field: &str, value: &Value) -> Error {
        Error::UniqueConstraint {
            bucket: self.bucket.clone(),
            field: field.to_string(),
            value: value.clone(),
        }
    }
}

/// A value participates in an index only when present and non-null.
fn indexable(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldType};
    use crate::value::FieldMap;

    fn definition() -> BucketDefinition {
        BucketDefinition::new("id")
            .with_field("id", FieldDefinition::new(FieldType::String))
            .with_field("email", FieldDefinition::new(FieldType::String).unique())
            .with_field("status", FieldDefinition::new(FieldType::String))
            .with_index("status")
    }

    fn record(entries: Vec<(&str, Value)>) -> Record {
        let fields: FieldMap = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Record::from(fields)
    }

    fn key(s: &str) -> Value {
        Value::from(s)
    }

    #[test]
    fn test_unique_flag_implies_unique_index() {
        let manager = IndexManager::new("users", &definition());
        assert!(manager.is_indexed("email"));
        assert!(manager.is_indexed("status"));
        assert!(!manager.is_indexed("id"));
        assert_eq!(manager.index_count(), 2);
    }

    #[test]
    fn test_declared_index_on_unique_field_stays_unique() {
        let def = BucketDefinition::new("id")
            .with_field("id", FieldDefinition::new(FieldType::String))
            .with_field("email", FieldDefinition::new(FieldType::String).unique())
            .with_index("email");
        let mut manager = IndexManager::new("users", &def);

        manager
            .add_record(&key("u1"), &record(vec![("email", Value::from("a@x.com"))]))
            .unwrap();
        let err = manager
            .add_record(&key("u2"), &record(vec![("email", Value::from("a@x.com"))]))
            .unwrap_err();
        assert!(matches!(err, Error::UniqueConstraint { field, .. } if field == "email"));
        assert_eq!(manager.index_count(), 1);
    }

    #[test]
    fn test_two_phase_add_leaves_no_partial_state() {
        let mut manager = IndexManager::new("users", &definition());
        manager
            .add_record(
                &key("u1"),
                &record(vec![
                    ("email", Value::from("a@x.com")),
                    ("status", Value::from("active")),
                ]),
            )
            .unwrap();

        // Second record collides on email; its status must not be indexed.
        let err = manager.add_record(
            &key("u2"),
            &record(vec![
                ("email", Value::from("a@x.com")),
                ("status", Value::from("idle")),
            ]),
        );
        assert!(err.is_err());
        assert_eq!(manager.lookup("status", &Value::from("idle")), Some(vec![]));
        assert_eq!(
            manager.lookup("email", &Value::from("a@x.com")),
            Some(vec![key("u1")])
        );
    }

    #[test]
    fn test_null_values_are_not_indexed() {
        let mut manager = IndexManager::new("users", &definition());
        manager
            .add_record(&key("u1"), &record(vec![("email", Value::Null)]))
            .unwrap();
        manager
            .add_record(&key("u2"), &record(vec![("email", Value::Null)]))
            .unwrap();
        assert_eq!(manager.lookup("email", &Value::Null), Some(vec![]));
    }

    #[test]
    fn test_lookup_unindexed_field_returns_none() {
        let manager = IndexManager::new("users", &definition());
        assert_eq!(manager.lookup("name", &Value::from("x")), None);
    }

    #[test]
    fn test_update_moves_entries_only_on_change() {
        let mut manager = IndexManager::new("users", &definition());
        let old = record(vec![
            ("email", Value::from("a@x.com")),
            ("status", Value::from("active")),
        ]);
        manager.add_record(&key("u1"), &old).unwrap();

        let new = record(vec![
            ("email", Value::from("a@x.com")),
            ("status", Value::from("idle")),
        ]);
        manager.update_record(&key("u1"), &old, &new).unwrap();

        assert_eq!(
            manager.lookup("status", &Value::from("idle")),
            Some(vec![key("u1")])
        );
        assert_eq!(manager.lookup("status", &Value::from("active")), Some(vec![]));
        assert_eq!(
            manager.lookup("email", &Value::from("a@x.com")),
            Some(vec![key("u1")])
        );
    }

    #[test]
    fn test_update_to_taken_unique_value_fails() {
        let mut manager = IndexManager::new("users", &definition());
        let r1 = record(vec![("email", Value::from("a@x.com"))]);
        let r2 = record(vec![("email", Value::from("b@x.com"))]);
        manager.add_record(&key("u1"), &r1).unwrap();
        manager.add_record(&key("u2"), &r2).unwrap();

        let moved = record(vec![("email", Value::from("a@x.com"))]);
        let err = manager.update_record(&key("u2"), &r2, &moved).unwrap_err();
        assert!(matches!(err, Error::UniqueConstraint { .. }));
        // Old entry survives the rejected update.
        assert_eq!(
            manager.lookup("email", &Value::from("b@x.com")),
            Some(vec![key("u2")])
        );
    }

    #[test]
    fn test_update_keeping_same_unique_value_is_allowed() {
        let mut manager = IndexManager::new("users", &definition());
        let old = record(vec![("email", Value::from("a@x.com"))]);
        manager.add_record(&key("u1"), &old).unwrap();
        let new = record(vec![
            ("email", Value::from("a@x.com")),
            ("status", Value::from("active")),
        ]);
        manager.update_record(&key("u1"), &old, &new).unwrap();
        assert_eq!(
            manager.lookup("email", &Value::from("a@x.com")),
            Some(vec![key("u1")])
        );
    }

    #[test]
    fn test_remove_garbage_collects_empty_sets() {
        let mut manager = IndexManager::new("users", &definition());
        let r = record(vec![("status", Value::from("active"))]);
        manager.add_record(&key("u1"), &r).unwrap();
        manager.remove_record(&key("u1"), &r);
        assert_eq!(manager.lookup("status", &Value::from("active")), Some(vec![]));
    }

    #[test]
    fn test_non_unique_index_accumulates_keys() {
        let mut manager = IndexManager::new("users", &definition());
        for k in ["u1", "u2", "u3"] {
            manager
                .add_record(&key(k), &record(vec![("status", Value::from("active"))]))
                .unwrap();
        }
        assert_eq!(
            manager.lookup("status", &Value::from("active")),
            Some(vec![key("u1"), key("u2"), key("u3")])
        );
    }

    #[test]
    fn test_rebuild_matches_incremental_state() {
        let mut live = IndexManager::new("users", &definition());
        let mut table: IndexMap<Value, Record> = IndexMap::new();

        for (k, email, status) in [
            ("u1", "a@x.com", "active"),
            ("u2", "b@x.com", "idle"),
            ("u3", "c@x.com", "active"),
        ] {
            let r = record(vec![
                ("email", Value::from(email)),
                ("status", Value::from(status)),
            ]);
            live.add_record(&key(k), &r).unwrap();
            table.insert(key(k), r);
        }
        let removed = table.shift_remove(&key("u2")).unwrap();
        live.remove_record(&key("u2"), &removed);

        let mut rebuilt = IndexManager::new("users", &definition());
        rebuilt.rebuild(table.iter()).unwrap();

        for (field, probe) in [
            ("email", Value::from("a@x.com")),
            ("email", Value::from("b@x.com")),
            ("status", Value::from("active")),
            ("status", Value::from("idle")),
        ] {
            assert_eq!(rebuilt.lookup(field, &probe), live.lookup(field, &probe));
        }
    }
}
