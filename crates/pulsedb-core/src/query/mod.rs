//! Reactive queries with automatic dependency tracking.
//!
//! A query is a pure async function over a [`QueryContext`]. Every read the
//! function performs is recorded as a dependency, at record granularity for
//! point reads and bucket granularity for everything else. Subscriptions are
//! re-evaluated when a mutation touches a dependency, and their callback
//! fires only when the result actually changed.

mod context;
mod manager;

pub use context::{QueryBucket, QueryContext};
pub use manager::QuerySubscription;

pub(crate) use context::DependencySet;
pub(crate) use manager::{QueryCallback, QueryFn, QueryManager};
