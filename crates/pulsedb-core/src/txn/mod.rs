//! Atomic multi-bucket transactions.
//!
//! A transaction stages writes in per-bucket buffers while the user block
//! runs, then commits bucket-by-bucket with optimistic concurrency checks.
//! Events from committed buckets are held back until every bucket succeeds.

mod buffer;
mod coordinator;

pub use coordinator::{Transaction, TransactionBucket};

pub(crate) use coordinator::run_transaction;
