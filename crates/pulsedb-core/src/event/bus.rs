//! In-process pub/sub bus with dot-separated topics.
//!
//! Patterns match segment-by-segment; `*` matches exactly one segment, so a
//! pattern only matches topics of the same length. Dispatch is synchronous
//! and isolated: a panicking handler is contained and never stalls the
//! mutation that published the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::BucketEvent;

/// A parsed topic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

impl TopicPattern {
    /// Parse a pattern such as `bucket.*.inserted`.
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('.')
            .map(|segment| {
                if segment == "*" {
                    Segment::Wildcard
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Check a concrete topic against the pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let mut count = 0;
        for (i, part) in topic.split('.').enumerate() {
            count = i + 1;
            match self.segments.get(i) {
                Some(Segment::Wildcard) => {}
                Some(Segment::Literal(expected)) if expected == part => {}
                _ => return false,
            }
        }
        count == self.segments.len()
    }
}

/// Handler invoked for every matching event.
pub(crate) type EventHandler = Arc<dyn Fn(&BucketEvent) + Send + Sync>;

struct BusEntry {
    id: u64,
    pattern: TopicPattern,
    handler: EventHandler,
}

/// The store's event bus.
pub struct EventBus {
    entries: RwLock<Vec<BusEntry>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for a topic pattern, returning its id.
    pub(crate) fn subscribe(&self, pattern: &str, handler: EventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().push(BusEntry {
            id,
            pattern: TopicPattern::parse(pattern),
            handler,
        });
        id
    }

    /// Remove a handler; returns whether it existed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Publish one event to every matching handler.
    ///
    /// Handlers run on the publisher's task. A panicking handler is isolated
    /// so one broken consumer cannot stall mutations.
    pub fn publish(&self, event: &BucketEvent) {
        let topic = event.topic();
        let handlers: Vec<EventHandler> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|entry| entry.pattern.matches(&topic))
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::warn!(topic = %topic, "event handler panicked");
            }
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a bus subscription created through the store.
pub struct EventSubscription {
    id: u64,
    bus: Weak<EventBus>,
}

impl EventSubscription {
    pub(crate) fn new(id: u64, bus: &Arc<EventBus>) -> Self {
        Self {
            id,
            bus: Arc::downgrade(bus),
        }
    }

    /// Remove the subscription from the bus.
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
