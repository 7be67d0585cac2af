//! # Folio Core
//!
//! Render cache and bounded-concurrency generation pipeline for folio
//! documents (invoices assembled from a booking and its exhibition).
//!
//! ## Overview
//!
//! A request for a rendered invoice flows through:
//!
//! - [`fingerprint`]: derive the cache key from the invoice's relationship
//!   chain and the scalar fields that affect the output
//! - [`infra::cache`]: the `cacache`-backed artifact store, its eviction
//!   planner and the periodic sweeper
//! - [`freshness`]: decide whether a stored artifact still matches the
//!   current records
//! - [`queue`]: FIFO admission to a fixed number of render slots
//! - [`render`]: recompute totals, inline assets, fill the template and
//!   call the external renderer
//! - [`render_cache`]: the single entry point tying the above together,
//!   including the stale-artifact fallback when rendering fails
//!
//! Configuration is read from the environment by [`config`].
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod freshness;
pub mod infra;
pub mod queue;
pub mod render;
pub mod render_cache;

pub use config::{ConfigError, RenderCacheConfig};
pub use error::{BackendError, FingerprintError, RenderError, StoreError};
pub use fingerprint::{
    EntityRole, Fingerprint, FingerprintFields, FingerprintGenerator,
    ScalarField, VersionSnapshot, VersionStamp,
};
pub use freshness::{Freshness, FreshnessValidator, StaleReason};
pub use infra::cache::{
    ArtifactEntry, ArtifactStore, ArtifactSweeper, CacheBudget, SweepReport,
    SweeperHandle,
};
pub use queue::{
    JobPriority, JobState, RenderJob, RenderQueue, RenderQueueStats,
};
pub use render::{
    CommandRenderBackend, PageConfig, RenderBackend, RenderPipeline,
    TemplateStore,
};
pub use render_cache::{
    ArtifactOrigin, CacheStats, RenderCache, RenderedArtifact,
};
