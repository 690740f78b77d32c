//! Transaction execution: staging, ordered commit, best-effort rollback.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::buffer::{OverlayEntry, StagedUpdate, WriteBuffer};
use crate::bucket::{BucketHandle, UndoOp};
use crate::error::{Error, IssueCode, ValidationIssue};
use crate::event::{BucketEvent, EventBus};
use crate::filter::Filter;
use crate::registry::BucketRegistry;
use crate::schema::SchemaValidator;
use crate::value::{FieldMap, Record, Value};

struct TxInner {
    registry: Arc<BucketRegistry>,
    /// Buffers in first-touch order; commit walks them in this order.
    buffers: Mutex<IndexMap<String, WriteBuffer>>,
    validators: Mutex<HashMap<String, Arc<SchemaValidator>>>,
}

impl TxInner {
    fn with_buffer<T>(&self, bucket: &str, f: impl FnOnce(&mut WriteBuffer) -> T) -> T {
        let mut buffers = self.buffers.lock();
        f(buffers.entry(bucket.to_string()).or_default())
    }
}

/// Handle to a running transaction, passed to the user block.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
}

impl Transaction {
    fn new(registry: Arc<BucketRegistry>) -> Self {
        Self {
            inner: Arc::new(TxInner {
                registry,
                buffers: Mutex::new(IndexMap::new()),
                validators: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A transactional view of one bucket. Fails when the bucket is unknown.
    pub fn bucket(&self, name: &str) -> Result<TransactionBucket, Error> {
        let handle = self.inner.registry.handle(name)?;
        let validator = {
            let mut validators = self.inner.validators.lock();
            match validators.get(name) {
                Some(validator) => Arc::clone(validator),
                None => {
                    let definition = self.inner.registry.definition(name)?;
                    let validator = Arc::new(SchemaValidator::new(name, definition)?);
                    validators.insert(name.to_string(), Arc::clone(&validator));
                    validator
                }
            }
        };
        // Touch the buffer so commit order is first-touch order.
        self.inner.with_buffer(name, |_| ());
        Ok(TransactionBucket {
            name: name.to_string(),
            handle,
            validator,
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Transactional view of one bucket: writes stage into the transaction's
/// buffer, reads see the buffer overlaid on live state.
#[derive(Clone)]
pub struct TransactionBucket {
    name: String,
    handle: BucketHandle,
    validator: Arc<SchemaValidator>,
    inner: Arc<TxInner>,
}

impl TransactionBucket {
    fn not_found(&self, key: &Value) -> Error {
        Error::NotFound {
            bucket: self.name.clone(),
            key: key.clone(),
        }
    }

    /// Stage an insert. The record is fully prepared here, schema-validated
    /// and with generated fields resolved, so invalid writes fail inside the
    /// block instead of at commit.
    pub async fn insert(&self, fields: FieldMap) -> Result<Record, Error> {
        // Reserve an autoincrement value from the live actor; the counter
        // stays monotonic whether or not this transaction commits.
        let counter = self.handle.reserve_autoincrement().await?;
        let record = self.validator.prepare_insert(fields, counter)?;
        let key = self.record_key(&record)?;

        self.inner.with_buffer(&self.name, |buffer| {
            buffer.inserts.insert(key, record.clone());
        });
        Ok(record)
    }

    /// Stage an update against the overlay record.
    pub async fn update(
        &self,
        key: impl Into<Value>,
        changes: FieldMap,
    ) -> Result<Record, Error> {
        let key = key.into();

        enum Base {
            StagedInsert(Record),
            StagedUpdate(Record, u64),
            Deleted,
            Live,
        }

        let base = self.inner.with_buffer(&self.name, |buffer| {
            if let Some(record) = buffer.inserts.get(&key) {
                return Base::StagedInsert(record.clone());
            }
            if let Some(staged) = buffer.updates.get(&key) {
                return Base::StagedUpdate(staged.record.clone(), staged.expected_version);
            }
            if buffer.deletes.contains_key(&key) {
                return Base::Deleted;
            }
            Base::Live
        });

        match base {
            Base::Deleted => Err(self.not_found(&key)),
            Base::StagedInsert(record) => {
                // Still an insert at commit; the staged record just advances.
                let updated = self.validator.prepare_update(&record, changes)?;
                self.inner.with_buffer(&self.name, |buffer| {
                    buffer.inserts.insert(key, updated.clone());
                });
                Ok(updated)
            }
            Base::StagedUpdate(record, expected_version) => {
                let updated = self.validator.prepare_update(&record, changes)?;
                self.inner.with_buffer(&self.name, |buffer| {
                    buffer.updates.insert(
                        key,
                        StagedUpdate {
                            record: updated.clone(),
                            expected_version,
                        },
                    );
                });
                Ok(updated)
            }
            Base::Live => {
                let existing = self
                    .handle
                    .get(key.clone())
                    .await?
                    .ok_or_else(|| self.not_found(&key))?;
                let updated = self.validator.prepare_update(&existing, changes)?;
                self.inner.with_buffer(&self.name, |buffer| {
                    buffer.updates.insert(
                        key,
                        StagedUpdate {
                            record: updated.clone(),
                            expected_version: existing.version(),
                        },
                    );
                });
                Ok(updated)
            }
        }
    }

    /// Stage a delete. Returns the record the transaction observed, if any.
    pub async fn delete(&self, key: impl Into<Value>) -> Result<Option<Record>, Error> {
        let key = key.into();

        enum Staged {
            CancelledInsert(Record),
            CollapsedUpdate(Record),
            AlreadyDeleted,
            Live,
        }

        let staged = self.inner.with_buffer(&self.name, |buffer| {
            if let Some(record) = buffer.inserts.shift_remove(&key) {
                return Staged::CancelledInsert(record);
            }
            if let Some(update) = buffer.updates.shift_remove(&key) {
                buffer.deletes.insert(key.clone(), Some(update.expected_version));
                return Staged::CollapsedUpdate(update.record);
            }
            if buffer.deletes.contains_key(&key) {
                return Staged::AlreadyDeleted;
            }
            Staged::Live
        });

        match staged {
            Staged::CancelledInsert(record) => Ok(Some(record)),
            Staged::CollapsedUpdate(record) => Ok(Some(record)),
            Staged::AlreadyDeleted => Ok(None),
            Staged::Live => {
                let live = self.handle.get(key.clone()).await?;
                let expected = live.as_ref().map(Record::version);
                self.inner.with_buffer(&self.name, |buffer| {
                    buffer.deletes.insert(key, expected);
                });
                Ok(live)
            }
        }
    }

    /// Read a record through the overlay.
    pub async fn get(&self, key: impl Into<Value>) -> Result<Option<Record>, Error> {
        let key = key.into();
        let overlay = self
            .inner
            .with_buffer(&self.name, |buffer| match buffer.overlay_get(&key) {
                OverlayEntry::Staged(record) => Some(Some(record)),
                OverlayEntry::Deleted => Some(None),
                OverlayEntry::Miss => None,
            });
        match overlay {
            Some(result) => Ok(result),
            None => self.handle.get(key).await,
        }
    }

    /// All records through the overlay: live records minus staged deletes,
    /// patched with staged updates, plus staged inserts.
    pub async fn all(&self) -> Result<Vec<Record>, Error> {
        let key_field = self.record_key_field().await?;
        let live = self.handle.all().await?;

        Ok(self.inner.with_buffer(&self.name, |buffer| {
            let mut out = Vec::with_capacity(live.len() + buffer.inserts.len());
            for record in live {
                let Some(key) = record.get(&key_field).cloned() else {
                    continue;
                };
                if buffer.inserts.contains_key(&key) {
                    // Deleted and re-inserted; the staged version is
                    // appended below.
                    continue;
                }
                if let Some(staged) = buffer.updates.get(&key) {
                    out.push(staged.record.clone());
                    continue;
                }
                if buffer.deletes.contains_key(&key) {
                    continue;
                }
                out.push(record);
            }
            out.extend(buffer.inserts.values().cloned());
            out
        }))
    }

    /// Records matching the filter, through the overlay.
    pub async fn find(&self, filter: Filter) -> Result<Vec<Record>, Error> {
        let mut records = self.all().await?;
        records.retain(|record| filter.matches(record));
        Ok(records)
    }

    /// First record matching the filter, through the overlay.
    pub async fn find_one(&self, filter: Filter) -> Result<Option<Record>, Error> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    /// Record count through the overlay.
    pub async fn count(&self) -> Result<usize, Error> {
        Ok(self.all().await?.len())
    }

    /// Count of records matching the filter, through the overlay.
    pub async fn count_where(&self, filter: Filter) -> Result<usize, Error> {
        Ok(self.find(filter).await?.len())
    }

    fn record_key(&self, record: &Record) -> Result<Value, Error> {
        let definition = self.inner.registry.definition(&self.name)?;
        record
            .get(&definition.key_field)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| Error::Validation {
                issues: vec![ValidationIssue::new(
                    definition.key_field.clone(),
                    "field is required",
                    IssueCode::Required,
                )],
            })
    }

    async fn record_key_field(&self) -> Result<String, Error> {
        Ok(self.inner.registry.definition(&self.name)?.key_field.clone())
    }
}

/// Run a user block as one atomic transaction.
///
/// Commit walks the touched buckets in first-touch order; each bucket's
/// batch is two-phase validated and applied by its actor. On the first
/// failure every already-committed bucket is rolled back in reverse order,
/// best-effort, and the original error is rethrown. Events are published
/// only after every bucket committed.
pub(crate) async fn run_transaction<F, Fut, T>(
    registry: Arc<BucketRegistry>,
    bus: Arc<EventBus>,
    block: F,
) -> Result<T, Error>
where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let tx = Transaction::new(Arc::clone(&registry));
    let value = block(tx.clone()).await?;

    let buffers = {
        let mut guard = tx.inner.buffers.lock();
        std::mem::take(&mut *guard)
    };

    let mut committed: Vec<(BucketHandle, Vec<UndoOp>)> = Vec::new();
    let mut events: Vec<BucketEvent> = Vec::new();
    let mut failure: Option<Error> = None;

    for (bucket, buffer) in buffers {
        if buffer.is_empty() {
            continue;
        }
        let result = match registry.handle(&bucket) {
            Ok(handle) => match handle.commit_batch(buffer.into_ops()).await {
                Ok(outcome) => {
                    events.extend(outcome.events);
                    committed.push((handle, outcome.undo));
                    Ok(())
                }
                Err(error) => Err(error),
            },
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            failure = Some(error);
            break;
        }
    }

    if let Some(error) = failure {
        for (handle, undo) in committed.into_iter().rev() {
            if undo.is_empty() {
                continue;
            }
            if let Err(rollback_error) = handle.rollback_batch(undo).await {
                tracing::warn!(
                    bucket = %handle.name(),
                    error = %rollback_error,
                    "rollback failed after transaction abort"
                );
            }
        }
        return Err(error);
    }

    for event in &events {
        bus.publish(event);
    }
    Ok(value)
}
