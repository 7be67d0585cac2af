//! The single entry point for rendered documents.
//!
//! Policy: a fresh artifact is served as-is; otherwise the document is
//! rendered through the queue and stored. When rendering fails, any stored
//! artifact for the document (however stale) is served instead, and the
//! error only reaches the caller when there is nothing to serve.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use folio_model::{Invoice, InvoiceId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RenderCacheConfig;
use crate::error::{RenderError, StoreError};
use crate::fingerprint::{Fingerprint, FingerprintGenerator, VersionSnapshot};
use crate::freshness::{Freshness, FreshnessValidator};
use crate::infra::cache::{
    ArtifactCacheRoot, ArtifactEntry, ArtifactStore, ArtifactSweeper,
    CacheBudget, SweeperHandle,
};
use crate::queue::{JobPriority, RenderJob, RenderQueue};
use crate::render::{CommandRenderBackend, RenderPipeline, TemplateStore};

/// Where the bytes of a [`RenderedArtifact`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOrigin {
    CacheHit,
    Rendered,
    /// Rendering failed and a previously stored artifact was served.
    StaleFallback,
}

#[derive(Debug, Clone)]
pub struct RenderedArtifact {
    pub fingerprint: Fingerprint,
    pub bytes: Vec<u8>,
    pub origin: ArtifactOrigin,
}

impl RenderedArtifact {
    fn from_entry(entry: ArtifactEntry, origin: ArtifactOrigin) -> Self {
        Self {
            fingerprint: entry.fingerprint,
            bytes: entry.bytes,
            origin,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub renders: u64,
    pub render_failures: u64,
    pub fallbacks: u64,
    pub store_errors: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    renders: AtomicU64,
    render_failures: AtomicU64,
    fallbacks: AtomicU64,
    store_errors: AtomicU64,
}

impl CacheCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            renders: self.renders.load(Ordering::Relaxed),
            render_failures: self.render_failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct RenderCache {
    generator: FingerprintGenerator,
    store: Arc<ArtifactStore>,
    validator: FreshnessValidator,
    queue: Arc<RenderQueue>,
    pipeline: Arc<RenderPipeline>,
    /// Fingerprint most recently stored or served per document.
    last_known: DashMap<InvoiceId, Fingerprint>,
    counters: CacheCounters,
}

impl RenderCache {
    pub fn new(
        generator: FingerprintGenerator,
        store: Arc<ArtifactStore>,
        validator: FreshnessValidator,
        queue: Arc<RenderQueue>,
        pipeline: Arc<RenderPipeline>,
    ) -> Self {
        Self {
            generator,
            store,
            validator,
            queue,
            pipeline,
            last_known: DashMap::new(),
            counters: CacheCounters::default(),
        }
    }

    /// Wire up the store, queue and command backend described by `config`.
    pub async fn from_config(config: &RenderCacheConfig) -> Result<Self, RenderError> {
        let store = ArtifactStore::open(ArtifactCacheRoot::new(config.cache_dir.clone())).await?;
        let backend = CommandRenderBackend::new(
            config.renderer_program.clone(),
            config.renderer_args.clone(),
        );
        let pipeline = RenderPipeline::new(
            TemplateStore::new(config.template_dir.clone()),
            Arc::new(backend),
            config.render_timeout,
        );

        info!(
            cache_dir = %config.cache_dir.display(),
            max_concurrent = config.max_concurrent_renders,
            max_age = %humantime::format_duration(config.max_artifact_age),
            "render cache ready"
        );

        Ok(Self::new(
            FingerprintGenerator::new(config.fingerprint_fields.clone()),
            Arc::new(store),
            FreshnessValidator::new(config.max_artifact_age),
            Arc::new(RenderQueue::new(
                config.max_concurrent_renders,
                config.queue_timeout,
            )),
            Arc::new(pipeline),
        ))
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<RenderQueue> {
        &self.queue
    }

    pub fn generator(&self) -> &FingerprintGenerator {
        &self.generator
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Start the background sweep over this cache's store.
    pub fn spawn_sweeper(
        &self,
        budget: CacheBudget,
        interval: Duration,
    ) -> SweeperHandle {
        ArtifactSweeper::new(self.store.clone(), budget, interval).start()
    }

    pub async fn get_or_render(
        &self,
        invoice: &Invoice,
        force_regenerate: bool,
    ) -> Result<RenderedArtifact, RenderError> {
        self.get_or_render_as(invoice, force_regenerate, JobPriority::Normal)
            .await
    }

    pub async fn get_or_render_as(
        &self,
        invoice: &Invoice,
        force_regenerate: bool,
        priority: JobPriority,
    ) -> Result<RenderedArtifact, RenderError> {
        let fingerprint = self.generator.generate_or_fallback(invoice);
        let snapshot = VersionSnapshot::capture(invoice);

        if !force_regenerate
            && let Some(entry) =
                self.lookup_fresh(invoice, &fingerprint, &snapshot).await
        {
            self.remember(invoice.id, &fingerprint);
            return Ok(RenderedArtifact::from_entry(entry, ArtifactOrigin::CacheHit));
        }

        let job = RenderJob::new(invoice.id, force_regenerate).with_priority(priority);
        let rendered = self
            .queue
            .submit(job, || self.pipeline.render(invoice))
            .await;

        match rendered {
            Ok(bytes) => {
                CacheCounters::bump(&self.counters.renders);
                self.persist(invoice.id, &fingerprint, &bytes, &snapshot).await;
                Ok(RenderedArtifact {
                    fingerprint,
                    bytes,
                    origin: ArtifactOrigin::Rendered,
                })
            }
            Err(err) => {
                CacheCounters::bump(&self.counters.render_failures);
                match self.fallback(invoice.id, &fingerprint).await {
                    Some(entry) => {
                        CacheCounters::bump(&self.counters.fallbacks);
                        warn!(
                            document_id = %invoice.id,
                            fingerprint = %entry.fingerprint,
                            age = %humantime::format_duration(artifact_age(&entry)),
                            kind = err.kind(),
                            "render failed; serving stored artifact: {err}"
                        );
                        Ok(RenderedArtifact::from_entry(
                            entry,
                            ArtifactOrigin::StaleFallback,
                        ))
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Forget the document and delete its last stored artifact. Returns
    /// whether anything was deleted.
    pub async fn invalidate(&self, id: &InvoiceId) -> Result<bool, StoreError> {
        let Some((_, fingerprint)) = self.last_known.remove(id) else {
            return Ok(false);
        };
        let removed = self.store.delete(&fingerprint).await?;
        debug!(document_id = %id, fingerprint = %fingerprint, removed, "artifact invalidated");
        Ok(removed)
    }

    async fn lookup_fresh(
        &self,
        invoice: &Invoice,
        fingerprint: &Fingerprint,
        snapshot: &VersionSnapshot,
    ) -> Option<ArtifactEntry> {
        let entry = match self.store.get(fingerprint).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                CacheCounters::bump(&self.counters.misses);
                return None;
            }
            Err(err) => {
                CacheCounters::bump(&self.counters.store_errors);
                CacheCounters::bump(&self.counters.misses);
                warn!(document_id = %invoice.id, "artifact read failed; rendering instead: {err}");
                return None;
            }
        };

        match self.validator.check(&entry, snapshot) {
            Freshness::Fresh => {
                CacheCounters::bump(&self.counters.hits);
                debug!(document_id = %invoice.id, fingerprint = %fingerprint, "artifact cache hit");
                Some(entry)
            }
            verdict => {
                CacheCounters::bump(&self.counters.stale);
                debug!(document_id = %invoice.id, ?verdict, "stored artifact is not fresh");
                None
            }
        }
    }

    async fn persist(
        &self,
        id: InvoiceId,
        fingerprint: &Fingerprint,
        bytes: &[u8],
        snapshot: &VersionSnapshot,
    ) {
        if let Err(err) = self.store.put(fingerprint, bytes, snapshot).await {
            CacheCounters::bump(&self.counters.store_errors);
            warn!(document_id = %id, "rendered artifact could not be stored: {err}");
            return;
        }

        let Some(previous) = self.remember(id, fingerprint) else {
            return;
        };
        if &previous == fingerprint {
            return;
        }
        match self.store.delete(&previous).await {
            Ok(removed) => {
                debug!(document_id = %id, superseded = %previous, removed, "superseded artifact dropped")
            }
            Err(err) => {
                CacheCounters::bump(&self.counters.store_errors);
                warn!(document_id = %id, superseded = %previous, "superseded artifact not removed: {err}");
            }
        }
    }

    /// Serve anything stored for the document, ignoring freshness: the
    /// exact fingerprint first, then the last one known for the document.
    async fn fallback(
        &self,
        id: InvoiceId,
        fingerprint: &Fingerprint,
    ) -> Option<ArtifactEntry> {
        let mut candidates = vec![fingerprint.clone()];
        if let Some(known) = self.last_known.get(&id)
            && known.value() != fingerprint
        {
            candidates.push(known.value().clone());
        }

        for candidate in candidates {
            match self.store.get(&candidate).await {
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => {}
                Err(err) => {
                    CacheCounters::bump(&self.counters.store_errors);
                    warn!(document_id = %id, fingerprint = %candidate, "fallback read failed: {err}");
                }
            }
        }
        None
    }

    /// Returns the fingerprint previously recorded for the document.
    fn remember(&self, id: InvoiceId, fingerprint: &Fingerprint) -> Option<Fingerprint> {
        if id.is_nil() {
            return None;
        }
        self.last_known.insert(id, fingerprint.clone())
    }
}

fn artifact_age(entry: &ArtifactEntry) -> Duration {
    let age = SystemTime::now()
        .duration_since(entry.created_at)
        .unwrap_or_default();
    Duration::from_secs(age.as_secs())
}
