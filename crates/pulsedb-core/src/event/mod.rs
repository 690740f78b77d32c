//! Mutation events and the store's pub/sub bus.

mod bus;

pub use bus::{EventBus, EventSubscription, TopicPattern};

use crate::value::{Record, Value};

/// The kind of a bucket event, also the last topic segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A record was inserted.
    Inserted,
    /// A record was updated.
    Updated,
    /// A record was deleted (explicitly, by eviction, or by TTL purge).
    Deleted,
}

impl EventKind {
    /// Topic segment for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Inserted => "inserted",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }
}

/// A typed event describing exactly one mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketEvent {
    /// A record was inserted.
    Inserted {
        /// Bucket name.
        bucket: String,
        /// Primary key of the new record.
        key: Value,
        /// The inserted record.
        record: Record,
    },
    /// A record was updated.
    Updated {
        /// Bucket name.
        bucket: String,
        /// Primary key of the record.
        key: Value,
        /// The record before the update.
        old_record: Record,
        /// The record after the update.
        new_record: Record,
    },
    /// A record was deleted.
    Deleted {
        /// Bucket name.
        bucket: String,
        /// Primary key of the removed record.
        key: Value,
        /// The record as it was removed.
        record: Record,
    },
}

impl BucketEvent {
    /// The bucket the event belongs to.
    pub fn bucket(&self) -> &str {
        match self {
            BucketEvent::Inserted { bucket, .. }
            | BucketEvent::Updated { bucket, .. }
            | BucketEvent::Deleted { bucket, .. } => bucket,
        }
    }

    /// The primary key the event is about.
    pub fn key(&self) -> &Value {
        match self {
            BucketEvent::Inserted { key, .. }
            | BucketEvent::Updated { key, .. }
            | BucketEvent::Deleted { key, .. } => key,
        }
    }

    /// The event kind.
    pub fn kind(&self) -> EventKind {
        match self {
            BucketEvent::Inserted { .. } => EventKind::Inserted,
            BucketEvent::Updated { .. } => EventKind::Updated,
            BucketEvent::Deleted { .. } => EventKind::Deleted,
        }
    }

    /// Topic this event publishes under: `bucket.<name>.<kind>`.
    pub fn topic(&self) -> String {
        format!("bucket.{}.{}", self.bucket(), self.kind().as_str())
    }
}
