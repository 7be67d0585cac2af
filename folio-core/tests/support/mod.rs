#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use folio_core::error::BackendError;
use folio_core::infra::cache::ArtifactCacheRoot;
use folio_core::{
    ArtifactStore, Fingerprint, FingerprintGenerator, FreshnessValidator,
    PageConfig, RenderBackend, RenderCache, RenderPipeline, RenderQueue,
    TemplateStore,
};
use folio_model::rust_decimal::Decimal;
use folio_model::{
    Booking, BookingId, Discount, Exhibition, ExhibitionId, Invoice, InvoiceId,
    InvoiceStatus, StallId, StallLine,
};
use tempfile::TempDir;

pub const TEMPLATE: &str =
    "{{invoice_number}}|{{discount}}|{{after_discount}}|{{tax}}|{{total}}";

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Base 10,000 (one 10 x 20 stall at 50), 10% discount, 18% tax.
pub fn invoice() -> Invoice {
    let at = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap();
    Invoice {
        id: InvoiceId::new(),
        invoice_number: "INV-2026-0001".into(),
        status: InvoiceStatus::Issued,
        amount: dec("10620.00"),
        issued_on: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
        updated_at: at,
        booking: Some(Booking {
            id: BookingId::new(),
            customer_name: "Northwind Traders".into(),
            stalls: vec![StallLine {
                stall_id: StallId::new(),
                stall_number: "C-12".into(),
                width: dec("10"),
                height: dec("20"),
                rate: dec("50"),
            }],
            discount: Some(Discount::Percentage(dec("10"))),
            tax_percent: dec("18"),
            updated_at: at,
            exhibition: Some(Exhibition {
                id: ExhibitionId::new(),
                name: "Harvest Expo".into(),
                venue: "North Hall".into(),
                logo_path: None,
                updated_at: at,
            }),
        }),
    }
}

/// Echoes the markup back as the document, counting calls.
#[derive(Debug, Default)]
pub struct FakeBackend {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RenderBackend for FakeBackend {
    async fn render(
        &self,
        markup: &str,
        _page: &PageConfig,
    ) -> Result<Vec<u8>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::Exited {
                status: "exit status: 1".into(),
                stderr: "renderer crashed".into(),
            });
        }
        Ok(markup.as_bytes().to_vec())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub backend: Arc<FakeBackend>,
    pub store: Arc<ArtifactStore>,
    pub cache: RenderCache,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_max_age(Duration::from_secs(30 * 24 * 60 * 60)).await
    }

    pub async fn with_max_age(max_age: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(&dir).await);
        let backend = Arc::new(FakeBackend::default());
        let pipeline = RenderPipeline::new(
            TemplateStore::from_strings(TEMPLATE, ""),
            backend.clone(),
            Duration::from_secs(5),
        );
        let cache = RenderCache::new(
            FingerprintGenerator::default(),
            store.clone(),
            FreshnessValidator::new(max_age),
            Arc::new(RenderQueue::new(2, Duration::from_secs(5))),
            Arc::new(pipeline),
        );
        Self {
            dir,
            backend,
            store,
            cache,
        }
    }

    pub fn text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}

pub async fn open_store(dir: &TempDir) -> ArtifactStore {
    ArtifactStore::open(ArtifactCacheRoot::new(dir.path().join("artifacts")))
        .await
        .unwrap()
}

pub fn fresh_fingerprint() -> Fingerprint {
    Fingerprint::unique_fallback(InvoiceId::new(), SystemTime::now())
}

/// Poll `check` until it holds or `within` elapses.
pub async fn wait_until<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
