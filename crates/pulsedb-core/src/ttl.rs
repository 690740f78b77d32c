//! Periodic TTL enforcement.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::registry::BucketRegistry;
use crate::time::now_ms;

/// Background task driving `purge_expired` on every TTL bucket.
pub(crate) struct TtlSweeper {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TtlSweeper {
    /// Start sweeping on the given interval.
    pub fn start(registry: Arc<BucketRegistry>, interval: Duration) -> Self {
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh store
            // does not sweep before anything can expire.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                purge_all(&registry).await;
            }
        });
        Self {
            handle: Mutex::new(Some(join)),
        }
    }

    /// Stop the sweeper. Safe to call more than once.
    pub fn stop(&self) {
        if let Some(join) = self.handle.lock().take() {
            join.abort();
        }
    }
}

impl Drop for TtlSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Purge expired records from every TTL bucket, returning the total purged.
pub(crate) async fn purge_all(registry: &BucketRegistry) -> usize {
    let now = now_ms();
    let mut purged = 0;
    for (bucket, handle, definition) in registry.entries() {
        if definition.ttl.is_none() {
            continue;
        }
        match handle.purge_expired(now).await {
            Ok(count) => purged += count,
            Err(error) => {
                tracing::warn!(bucket = %bucket, error = %error, "ttl purge failed");
            }
        }
    }
    purged
}
