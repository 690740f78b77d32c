//! The bucket actor: single-threaded owner of one bucket's state.
//!
//! The actor drains its mailbox one request at a time. Handlers are
//! synchronous, so there is never a suspension point between a mutation and
//! the event it emits: subscribers always observe post-commit state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::handle::BucketHandle;
use super::message::{
    AggregateOp, BatchOp, BatchOutcome, BucketRequest, BucketSnapshot, BucketStats, Page, UndoOp,
};
use crate::error::{Error, IssueCode, ValidationIssue};
use crate::event::{BucketEvent, EventBus};
use crate::filter::Filter;
use crate::index::IndexManager;
use crate::schema::{BucketDefinition, SchemaValidator};
use crate::value::{FieldMap, Record, Value, META_EXPIRES_AT};

/// Spawn the actor task for a bucket, optionally restoring from a snapshot.
///
/// Restoring rebuilds the table, every index, and the autoincrement counter.
pub(crate) fn spawn_bucket(
    name: &str,
    definition: Arc<BucketDefinition>,
    bus: Arc<EventBus>,
    initial: Option<BucketSnapshot>,
) -> Result<(BucketHandle, JoinHandle<()>), Error> {
    let validator = SchemaValidator::new(name, Arc::clone(&definition))?;
    let mut indexes = IndexManager::new(name, &definition);
    let mut table: IndexMap<Value, Record> = IndexMap::new();
    let mut autoincrement = 0;

    if let Some(snapshot) = initial {
        for (key, record) in snapshot.records {
            table.insert(key, record);
        }
        indexes.rebuild(table.iter())?;
        autoincrement = snapshot.autoincrement_counter;
    }

    let ttl_ms = definition.ttl_millis();
    let actor = BucketActor {
        name: name.to_string(),
        definition,
        ttl_ms,
        table,
        validator,
        indexes,
        autoincrement,
        bus,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let join = tokio::spawn(actor.run(rx));
    Ok((BucketHandle::new(name.to_string(), tx), join))
}

struct BucketActor {
    name: String,
    definition: Arc<BucketDefinition>,
    ttl_ms: Option<u64>,
    table: IndexMap<Value, Record>,
    validator: SchemaValidator,
    indexes: IndexManager,
    autoincrement: u64,
    bus: Arc<EventBus>,
}

impl BucketActor {
    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<BucketRequest>) {
        while let Some(request) = mailbox.recv().await {
            self.handle(request);
        }
        tracing::debug!(bucket = %self.name, "bucket actor stopped");
    }

    fn handle(&mut self, request: BucketRequest) {
        match request {
            BucketRequest::Insert { fields, reply } => {
                let _ = reply.send(self.insert(fields));
            }
            BucketRequest::Get { key, reply } => {
                let _ = reply.send(Ok(self.table.get(&key).cloned()));
            }
            BucketRequest::Update { key, changes, reply } => {
                let _ = reply.send(self.update(key, changes));
            }
            BucketRequest::Delete { key, reply } => {
                let _ = reply.send(Ok(self.delete(key)));
            }
            BucketRequest::Clear { reply } => {
                let _ = reply.send(Ok(self.clear()));
            }
            BucketRequest::All { reply } => {
                let _ = reply.send(Ok(self.table.values().cloned().collect()));
            }
            BucketRequest::Find { filter, reply } => {
                let records = self.find_refs(&filter).into_iter().cloned().collect();
                let _ = reply.send(Ok(records));
            }
            BucketRequest::FindOne { filter, reply } => {
                let record = self.find_refs(&filter).first().map(|r| (*r).clone());
                let _ = reply.send(Ok(record));
            }
            BucketRequest::Count { filter, reply } => {
                let count = match filter {
                    Some(filter) => self.find_refs(&filter).len(),
                    None => self.table.len(),
                };
                let _ = reply.send(Ok(count));
            }
            BucketRequest::First { count, reply } => {
                let records = self.table.values().take(count).cloned().collect();
                let _ = reply.send(Ok(records));
            }
            BucketRequest::Last { count, reply } => {
                let skip = self.table.len().saturating_sub(count);
                let records = self.table.values().skip(skip).cloned().collect();
                let _ = reply.send(Ok(records));
            }
            BucketRequest::Paginate { after, limit, reply } => {
                let _ = reply.send(Ok(self.paginate(after.as_ref(), limit)));
            }
            BucketRequest::Aggregate { op, field, filter, reply } => {
                let _ = reply.send(Ok(self.aggregate(op, &field, filter.as_ref())));
            }
            BucketRequest::PurgeExpired { now, reply } => {
                let _ = reply.send(Ok(self.purge_expired(now)));
            }
            BucketRequest::Snapshot { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            BucketRequest::Stats { reply } => {
                let _ = reply.send(Ok(BucketStats {
                    bucket: self.name.clone(),
                    record_count: self.table.len(),
                    index_count: self.indexes.index_count(),
                    autoincrement_counter: self.autoincrement,
                }));
            }
            BucketRequest::ReserveAutoincrement { reply } => {
                self.autoincrement += 1;
                let _ = reply.send(Ok(self.autoincrement));
            }
            BucketRequest::CommitBatch { ops, reply } => {
                let _ = reply.send(self.commit_batch(ops));
            }
            BucketRequest::RollbackBatch { undo, reply } => {
                self.replay_undo(&undo);
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn publish(&self, event: BucketEvent) {
        self.bus.publish(&event);
    }

    fn missing_key_error(&self) -> Error {
        Error::Validation {
            issues: vec![ValidationIssue::new(
                self.definition.key_field.clone(),
                "field is required",
                IssueCode::Required,
            )],
        }
    }

    fn record_key(&self, record: &Record) -> Result<Value, Error> {
        record
            .get(&self.definition.key_field)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| self.missing_key_error())
    }

    fn insert(&mut self, fields: FieldMap) -> Result<Record, Error> {
        // The counter bumps before anything can fail: it stays monotonic
        // whether or not any field consumes it.
        self.autoincrement += 1;
        let mut record = self.validator.prepare_insert(fields, self.autoincrement)?;
        let key = self.record_key(&record)?;

        if let Some(ttl) = self.ttl_ms {
            if record.expires_at().is_none() {
                record.set(META_EXPIRES_AT, record.created_at() + ttl as i64);
            }
        }

        if let Some(max_size) = self.definition.max_size {
            while self.table.len() >= max_size {
                let oldest = self
                    .table
                    .iter()
                    .min_by_key(|(_, record)| record.created_at())
                    .map(|(key, _)| key.clone());
                let Some(victim) = oldest else { break };
                if let Some(evicted) = self.table.shift_remove(&victim) {
                    self.indexes.remove_record(&victim, &evicted);
                    self.publish(BucketEvent::Deleted {
                        bucket: self.name.clone(),
                        key: victim,
                        record: evicted,
                    });
                }
            }
        }

        self.indexes.add_record(&key, &record)?;
        self.table.insert(key.clone(), record.clone());
        self.publish(BucketEvent::Inserted {
            bucket: self.name.clone(),
            key,
            record: record.clone(),
        });
        Ok(record)
    }

    fn update(&mut self, key: Value, changes: FieldMap) -> Result<Record, Error> {
        let existing = self.table.get(&key).cloned().ok_or_else(|| Error::NotFound {
            bucket: self.name.clone(),
            key: key.clone(),
        })?;

        let updated = self.validator.prepare_update(&existing, changes)?;
        self.indexes.update_record(&key, &existing, &updated)?;
        self.table.insert(key.clone(), updated.clone());
        self.publish(BucketEvent::Updated {
            bucket: self.name.clone(),
            key,
            old_record: existing,
            new_record: updated.clone(),
        });
        Ok(updated)
    }

    /// Idempotent: deleting a missing key is a no-op and emits nothing.
    fn delete(&mut self, key: Value) -> Option<Record> {
        let record = self.table.shift_remove(&key)?;
        self.indexes.remove_record(&key, &record);
        self.publish(BucketEvent::Deleted {
            bucket: self.name.clone(),
            key,
            record: record.clone(),
        });
        Some(record)
    }

    fn clear(&mut self) -> usize {
        let drained: Vec<(Value, Record)> = self.table.drain(..).collect();
        self.indexes.clear();
        let count = drained.len();
        for (key, record) in drained {
            self.publish(BucketEvent::Deleted {
                bucket: self.name.clone(),
                key,
                record,
            });
        }
        count
    }

    /// Resolve a filter to matching records.
    ///
    /// Terms are tried in insertion order; the first indexed field narrows
    /// the candidates via the index, the remaining terms post-filter. With
    /// no indexed term the whole table is scanned in insertion order.
    fn find_refs(&self, filter: &Filter) -> Vec<&Record> {
        if filter.is_empty() {
            return self.table.values().collect();
        }
        for (i, (field, value)) in filter.terms().iter().enumerate() {
            if let Some(keys) = self.indexes.lookup(field, value) {
                return keys
                    .iter()
                    .filter_map(|key| self.table.get(key))
                    .filter(|record| filter.matches_excluding(record, i))
                    .collect();
            }
        }
        self.table
            .values()
            .filter(|record| filter.matches(record))
            .collect()
    }

    fn paginate(&self, after: Option<&Value>, limit: usize) -> Page {
        let start = match after {
            None => 0,
            Some(cursor) => match self.table.get_index_of(cursor) {
                Some(position) => position + 1,
                None => {
                    return Page {
                        records: Vec::new(),
                        has_more: false,
                        next_cursor: None,
                    }
                }
            },
        };

        let mut records = Vec::new();
        let mut next_cursor = None;
        for (key, record) in self.table.iter().skip(start).take(limit) {
            next_cursor = Some(key.clone());
            records.push(record.clone());
        }
        let has_more = start + records.len() < self.table.len();
        Page {
            records,
            has_more,
            next_cursor,
        }
    }

    /// Aggregate a numeric field; non-numeric values are ignored.
    fn aggregate(&self, op: AggregateOp, field: &str, filter: Option<&Filter>) -> Option<f64> {
        let records: Vec<&Record> = match filter {
            Some(filter) => self.find_refs(filter),
            None => self.table.values().collect(),
        };
        let values: Vec<f64> = records
            .iter()
            .filter_map(|record| record.get(field).and_then(Value::as_f64))
            .collect();

        match op {
            AggregateOp::Sum => Some(values.iter().sum()),
            AggregateOp::Avg => {
                if values.is_empty() {
                    Some(0.0)
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            AggregateOp::Min => values.into_iter().reduce(f64::min),
            AggregateOp::Max => values.into_iter().reduce(f64::max),
        }
    }

    fn purge_expired(&mut self, now: i64) -> usize {
        let expired: Vec<Value> = self
            .table
            .iter()
            .filter(|(_, record)| record.expires_at().is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(record) = self.table.shift_remove(key) {
                self.indexes.remove_record(key, &record);
                self.publish(BucketEvent::Deleted {
                    bucket: self.name.clone(),
                    key: key.clone(),
                    record,
                });
            }
        }
        expired.len()
    }

    fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            records: self
                .table
                .iter()
                .map(|(key, record)| (key.clone(), record.clone()))
                .collect(),
            autoincrement_counter: self.autoincrement,
        }
    }

    fn conflict(&self, key: &Value, field: Option<String>) -> Error {
        Error::TransactionConflict {
            bucket: self.name.clone(),
            key: key.clone(),
            field,
        }
    }

    /// Apply a transaction batch: two-phase at the batch level.
    ///
    /// Phase 1 validates every operation against live state plus the staged
    /// effects of earlier operations in the batch, without mutating anything.
    /// Phase 2 applies all operations, recording undo entries; events are
    /// returned to the coordinator, not published.
    fn commit_batch(&mut self, ops: Vec<BatchOp>) -> Result<BatchOutcome, Error> {
        self.prevalidate_batch(&ops)?;

        let mut events = Vec::new();
        let mut undo = Vec::new();
        for op in ops {
            if let Err(error) = self.apply_batch_op(op, &mut events, &mut undo) {
                // Phase 1 makes this unreachable; restore anyway so a bug
                // cannot leave the bucket half-applied.
                self.replay_undo(&undo);
                return Err(error);
            }
        }
        Ok(BatchOutcome { events, undo })
    }

    fn prevalidate_batch(&self, ops: &[BatchOp]) -> Result<(), Error> {
        let mut removed: HashSet<Value> = HashSet::new();
        let mut staged_keys: HashSet<Value> = HashSet::new();
        let mut freed: HashSet<(String, Value)> = HashSet::new();
        let mut claimed: HashMap<(String, Value), Value> = HashMap::new();

        for op in ops {
            match op {
                BatchOp::Delete {
                    key,
                    expected_version,
                } => match (self.table.get(key), expected_version) {
                    (Some(live), Some(version)) if live.version() == *version => {
                        removed.insert(key.clone());
                        for field in self.indexes.unique_fields() {
                            if let Some(value) = live.get(field).filter(|v| !v.is_null()) {
                                freed.insert((field.to_string(), value.clone()));
                            }
                        }
                    }
                    // Observed absent, still absent: idempotent no-op.
                    (None, None) => {}
                    _ => return Err(self.conflict(key, None)),
                },
                BatchOp::Update {
                    key,
                    record,
                    expected_version,
                } => {
                    if removed.contains(key) || staged_keys.contains(key) {
                        return Err(self.conflict(key, None));
                    }
                    let live = self
                        .table
                        .get(key)
                        .ok_or_else(|| self.conflict(key, None))?;
                    if live.version() != *expected_version {
                        return Err(self.conflict(key, None));
                    }
                    self.check_batch_uniques(key, Some(live), record, &mut freed, &mut claimed)?;
                }
                BatchOp::Insert { record } => {
                    let key = self.record_key(record)?;
                    if staged_keys.contains(&key)
                        || (self.table.contains_key(&key) && !removed.contains(&key))
                    {
                        return Err(self.conflict(&key, None));
                    }
                    self.check_batch_uniques(&key, None, record, &mut freed, &mut claimed)?;
                    staged_keys.insert(key);
                }
            }
        }
        Ok(())
    }

    fn check_batch_uniques(
        &self,
        key: &Value,
        old: Option<&Record>,
        new: &Record,
        freed: &mut HashSet<(String, Value)>,
        claimed: &mut HashMap<(String, Value), Value>,
    ) -> Result<(), Error> {
        for field in self.indexes.unique_fields() {
            let old_value = old.and_then(|r| r.get(field)).filter(|v| !v.is_null());
            let new_value = new.get(field).filter(|v| !v.is_null());
            if old_value == new_value {
                continue;
            }
            if let Some(value) = old_value {
                freed.insert((field.to_string(), value.clone()));
            }
            if let Some(value) = new_value {
                let slot = (field.to_string(), value.clone());
                if let Some(owner) = claimed.get(&slot) {
                    if owner != key {
                        return Err(self.conflict(key, Some(field.to_string())));
                    }
                }
                if !freed.contains(&slot) {
                    if let Some(owner) = self.indexes.unique_owner(field, value) {
                        if owner != key {
                            return Err(self.conflict(key, Some(field.to_string())));
                        }
                    }
                }
                claimed.insert(slot, key.clone());
            }
        }
        Ok(())
    }

    fn apply_batch_op(
        &mut self,
        op: BatchOp,
        events: &mut Vec<BucketEvent>,
        undo: &mut Vec<UndoOp>,
    ) -> Result<(), Error> {
        match op {
            BatchOp::Delete { key, .. } => {
                if let Some(record) = self.table.shift_remove(&key) {
                    self.indexes.remove_record(&key, &record);
                    undo.push(UndoOp::Restore {
                        key: key.clone(),
                        record: record.clone(),
                    });
                    events.push(BucketEvent::Deleted {
                        bucket: self.name.clone(),
                        key,
                        record,
                    });
                }
                Ok(())
            }
            BatchOp::Update { key, record, .. } => {
                let old = self
                    .table
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| self.conflict(&key, None))?;
                self.indexes.update_record(&key, &old, &record)?;
                self.table.insert(key.clone(), record.clone());
                undo.push(UndoOp::Restore {
                    key: key.clone(),
                    record: old.clone(),
                });
                events.push(BucketEvent::Updated {
                    bucket: self.name.clone(),
                    key,
                    old_record: old,
                    new_record: record,
                });
                Ok(())
            }
            BatchOp::Insert { record } => {
                let key = self.record_key(&record)?;
                self.indexes.add_record(&key, &record)?;
                self.table.insert(key.clone(), record.clone());
                undo.push(UndoOp::Remove { key: key.clone() });
                events.push(BucketEvent::Inserted {
                    bucket: self.name.clone(),
                    key,
                    record,
                });
                Ok(())
            }
        }
    }

    /// Replay an undo log in reverse. Best-effort: individual failures are
    /// logged and the remaining entries are still replayed.
    fn replay_undo(&mut self, undo: &[UndoOp]) {
        for op in undo.iter().rev() {
            match op {
                UndoOp::Remove { key } => {
                    if let Some(record) = self.table.shift_remove(key) {
                        self.indexes.remove_record(key, &record);
                    }
                }
                UndoOp::Restore { key, record } => {
                    match self.table.get(key).cloned() {
                        Some(current) => {
                            if let Err(error) = self.indexes.update_record(key, &current, record) {
                                tracing::warn!(
                                    bucket = %self.name,
                                    error = %error,
                                    "index restore failed during rollback"
                                );
                            }
                        }
                        None => {
                            if let Err(error) = self.indexes.add_record(key, record) {
                                tracing::warn!(
                                    bucket = %self.name,
                                    error = %error,
                                    "index restore failed during rollback"
                                );
                            }
                        }
                    }
                    self.table.insert(key.clone(), record.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldType, GeneratedBy};

    fn users_definition() -> Arc<BucketDefinition> {
        Arc::new(
            BucketDefinition::new("id")
                .with_field(
                    "id",
                    FieldDefinition::new(FieldType::String).generated(GeneratedBy::Uuid),
                )
                .with_field(
                    "email",
                    FieldDefinition::new(FieldType::String).required().unique(),
                )
                .with_field("status", FieldDefinition::new(FieldType::String))
                .with_index("status"),
        )
    }

    fn fields(entries: Vec<(&str, Value)>) -> FieldMap {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    async fn spawn_users() -> BucketHandle {
        let bus = Arc::new(EventBus::new());
        let (handle, _join) = spawn_bucket("users", users_definition(), bus, None).unwrap();
        handle
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let handle = spawn_users().await;
        let record = handle
            .insert(fields(vec![("email", Value::from("a@x.com"))]))
            .await
            .unwrap();
        assert_eq!(record.version(), 1);

        let key = record.get("id").cloned().unwrap();
        let fetched = handle.get(key).await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn test_unique_violation_leaves_state_intact() {
        let handle = spawn_users().await;
        let first = handle
            .insert(fields(vec![("email", Value::from("a@x.com"))]))
            .await
            .unwrap();
        handle
            .insert(fields(vec![("email", Value::from("b@x.com"))]))
            .await
            .unwrap();

        let err = handle
            .insert(fields(vec![("email", Value::from("a@x.com"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UniqueConstraint { field, .. } if field == "email"));

        assert_eq!(handle.count().await.unwrap(), 2);
        let found = handle
            .find_one(Filter::new().eq("email", "a@x.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.get("id"), first.get("id"));
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_moves_index() {
        let handle = spawn_users().await;
        let record = handle
            .insert(fields(vec![
                ("email", Value::from("a@x.com")),
                ("status", Value::from("active")),
            ]))
            .await
            .unwrap();
        let key = record.get("id").cloned().unwrap();

        let updated = handle
            .update(key, fields(vec![("status", Value::from("idle"))]))
            .await
            .unwrap();
        assert_eq!(updated.version(), 2);

        let idle = handle.find(Filter::new().eq("status", "idle")).await.unwrap();
        assert_eq!(idle.len(), 1);
        let active = handle
            .find(Filter::new().eq("status", "active"))
            .await
            .unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_key_fails() {
        let handle = spawn_users().await;
        let err = handle
            .update(Value::from("ghost"), FieldMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let handle = spawn_users().await;
        let record = handle
            .insert(fields(vec![("email", Value::from("a@x.com"))]))
            .await
            .unwrap();
        let key = record.get("id").cloned().unwrap();

        assert!(handle.delete(key.clone()).await.unwrap().is_some());
        assert!(handle.delete(key).await.unwrap().is_none());
        assert_eq!(handle.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_autoincrement_counts_every_insert() {
        let handle = spawn_users().await;
        handle
            .insert(fields(vec![("email", Value::from("a@x.com"))]))
            .await
            .unwrap();
        let _ = handle
            .insert(fields(vec![("email", Value::from("a@x.com"))]))
            .await;
        handle
            .insert(fields(vec![("email", Value::from("b@x.com"))]))
            .await
            .unwrap();

        // Failed insert still consumed a counter value.
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.autoincrement_counter, 3);
        assert_eq!(stats.record_count, 2);
        assert_eq!(stats.index_count, 2);
    }

    #[tokio::test]
    async fn test_max_size_evicts_oldest_first() {
        let definition = Arc::new(
            BucketDefinition::new("id")
                .with_field("id", FieldDefinition::new(FieldType::String))
                .with_max_size(2),
        );
        let bus = Arc::new(EventBus::new());
        let (handle, _join) = spawn_bucket("logs", definition, bus, None).unwrap();

        for id in ["a", "b", "c"] {
            handle
                .insert(fields(vec![("id", Value::from(id))]))
                .await
                .unwrap();
        }

        assert_eq!(handle.count().await.unwrap(), 2);
        assert!(handle.get(Value::from("a")).await.unwrap().is_none());
        assert!(handle.get(Value::from("b")).await.unwrap().is_some());
        assert!(handle.get(Value::from("c")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ttl_attach_and_purge() {
        let definition = Arc::new(
            BucketDefinition::new("id")
                .with_field("id", FieldDefinition::new(FieldType::String))
                .with_ttl(1_000u64),
        );
        let bus = Arc::new(EventBus::new());
        let (handle, _join) = spawn_bucket("sessions", definition, bus, None).unwrap();

        let record = handle
            .insert(fields(vec![("id", Value::from("s1"))]))
            .await
            .unwrap();
        let expires = record.expires_at().unwrap();
        assert_eq!(expires, record.created_at() + 1_000);

        assert_eq!(handle.purge_expired(expires - 1).await.unwrap(), 0);
        assert_eq!(handle.purge_expired(expires).await.unwrap(), 1);
        assert_eq!(handle.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pagination_walks_insertion_order() {
        let definition = Arc::new(
            BucketDefinition::new("id")
                .with_field("id", FieldDefinition::new(FieldType::String)),
        );
        let bus = Arc::new(EventBus::new());
        let (handle, _join) = spawn_bucket("items", definition, bus, None).unwrap();

        for id in ["a", "b", "c", "d", "e"] {
            handle
                .insert(fields(vec![("id", Value::from(id))]))
                .await
                .unwrap();
        }

        let page = handle.paginate(None, 2).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.next_cursor, Some(Value::from("b")));

        let page = handle.paginate(Some(Value::from("b")), 2).await.unwrap();
        assert_eq!(page.records[0].get("id"), Some(&Value::from("c")));
        assert!(page.has_more);

        let page = handle.paginate(Some(Value::from("d")), 2).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, Some(Value::from("e")));

        let page = handle.paginate(Some(Value::from("e")), 2).await.unwrap();
        assert!(page.records.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn test_aggregates() {
        let definition = Arc::new(
            BucketDefinition::new("id")
                .with_field("id", FieldDefinition::new(FieldType::String))
                .with_field("total", FieldDefinition::new(FieldType::Number))
                .with_field("status", FieldDefinition::new(FieldType::String))
                .with_index("status"),
        );
        let bus = Arc::new(EventBus::new());
        let (handle, _join) = spawn_bucket("orders", definition, bus, None).unwrap();

        for (id, total, status) in [("a", 10.0, "open"), ("b", 20.0, "open"), ("c", 5.0, "done")] {
            handle
                .insert(fields(vec![
                    ("id", Value::from(id)),
                    ("total", Value::Number(total)),
                    ("status", Value::from(status)),
                ]))
                .await
                .unwrap();
        }
        // A record whose field is non-numeric is ignored by aggregates.
        handle
            .insert(fields(vec![
                ("id", Value::from("d")),
                ("status", Value::from("open")),
            ]))
            .await
            .unwrap();

        assert_eq!(handle.sum("total", None).await.unwrap(), 35.0);
        assert_eq!(handle.avg("total", None).await.unwrap(), 35.0 / 3.0);
        assert_eq!(handle.min("total", None).await.unwrap(), Some(5.0));
        assert_eq!(handle.max("total", None).await.unwrap(), Some(20.0));

        let open = Filter::new().eq("status", "open");
        assert_eq!(handle.sum("total", Some(open.clone())).await.unwrap(), 30.0);
        assert_eq!(handle.max("total", Some(open)).await.unwrap(), Some(20.0));

        let none = Filter::new().eq("status", "void");
        assert_eq!(handle.sum("total", Some(none.clone())).await.unwrap(), 0.0);
        assert_eq!(handle.avg("total", Some(none.clone())).await.unwrap(), 0.0);
        assert_eq!(handle.min("total", Some(none)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_restore_preserves_everything() {
        let handle = spawn_users().await;
        for email in ["a@x.com", "b@x.com"] {
            handle
                .insert(fields(vec![
                    ("email", Value::from(email)),
                    ("status", Value::from("active")),
                ]))
                .await
                .unwrap();
        }
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.autoincrement_counter, 2);

        let bus = Arc::new(EventBus::new());
        let (restored, _join) =
            spawn_bucket("users", users_definition(), bus, Some(snapshot.clone())).unwrap();

        assert_eq!(restored.count().await.unwrap(), 2);
        assert_eq!(restored.snapshot().await.unwrap(), snapshot);
        // Indexes were rebuilt: unique constraint still enforced.
        let err = restored
            .insert(fields(vec![("email", Value::from("a@x.com"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UniqueConstraint { .. }));
        // Counter restored: next autoincrement continues past the snapshot.
        assert_eq!(restored.stats().await.unwrap().autoincrement_counter, 3);
    }

    #[tokio::test]
    async fn test_find_prefers_first_indexed_term() {
        let handle = spawn_users().await;
        handle
            .insert(fields(vec![
                ("email", Value::from("a@x.com")),
                ("status", Value::from("active")),
            ]))
            .await
            .unwrap();
        handle
            .insert(fields(vec![
                ("email", Value::from("b@x.com")),
                ("status", Value::from("active")),
            ]))
            .await
            .unwrap();

        // "nickname" is unindexed, "status" is: the status term narrows,
        // the nickname term post-filters everything out.
        let found = handle
            .find(Filter::new().eq("nickname", "none").eq("status", "active"))
            .await
            .unwrap();
        assert!(found.is_empty());

        let found = handle
            .find(Filter::new().eq("status", "active").eq("email", "b@x.com"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("email"), Some(&Value::from("b@x.com")));
    }
}
