//! On-disk artifact cache.
//!
//! A typed facade around `cacache` for integrity-checked artifact blobs,
//! the eviction planner, and the background sweeper that enforces the
//! [`CacheBudget`].

pub mod artifact_store;
pub mod eviction;
pub mod sweeper;

pub use artifact_store::*;
pub use eviction::{CacheBudget, EvictionReason};
pub use sweeper::*;
