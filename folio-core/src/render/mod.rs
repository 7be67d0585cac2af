//! The render pipeline: totals, assets, markup, backend.

pub mod assets;
pub mod backend;
pub mod template;
pub mod totals;

pub use backend::{CommandRenderBackend, PageConfig, RenderBackend};
pub use template::{TemplateStore, TemplateValue};
pub use totals::{InvoiceTotals, LineTotal, compute_totals};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use folio_model::Invoice;
use tracing::debug;

use crate::error::{BackendError, RenderError};

pub struct RenderPipeline {
    templates: TemplateStore,
    backend: Arc<dyn RenderBackend>,
    page: PageConfig,
    render_timeout: Duration,
}

impl fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("templates", &self.templates)
            .field("backend", &std::any::type_name_of_val(&*self.backend))
            .field("page", &self.page)
            .field("render_timeout", &self.render_timeout)
            .finish()
    }
}

impl RenderPipeline {
    pub fn new(
        templates: TemplateStore,
        backend: Arc<dyn RenderBackend>,
        render_timeout: Duration,
    ) -> Self {
        Self {
            templates,
            backend,
            page: PageConfig::a4(),
            render_timeout,
        }
    }

    pub fn with_page(mut self, page: PageConfig) -> Self {
        self.page = page;
        self
    }

    pub fn page(&self) -> &PageConfig {
        &self.page
    }

    pub fn render_timeout(&self) -> Duration {
        self.render_timeout
    }

    /// Build the markup for `invoice` without invoking the backend.
    pub async fn markup(&self, invoice: &Invoice) -> Result<String, RenderError> {
        let booking = invoice.booking.as_ref().ok_or_else(|| {
            RenderError::SourceData(format!(
                "invoice {} has no booking",
                invoice.invoice_number
            ))
        })?;

        let totals = compute_totals(booking)?;

        let logo = match booking
            .exhibition
            .as_ref()
            .and_then(|e| e.logo_path.as_deref())
        {
            Some(path) => Some(assets::inline_asset(path).await?),
            None => None,
        };

        let context = template::invoice_context(
            invoice,
            booking,
            &totals,
            logo.as_deref(),
            &self.page,
        );
        self.templates.render(&context).await
    }

    /// Produce the document bytes for `invoice`. Never returns a partial
    /// or empty blob.
    pub async fn render(&self, invoice: &Invoice) -> Result<Vec<u8>, RenderError> {
        let markup = self.markup(invoice).await?;

        let started = Instant::now();
        let bytes = tokio::time::timeout(
            self.render_timeout,
            self.backend.render(&markup, &self.page),
        )
        .await
        .map_err(|_| BackendError::TimedOut(self.render_timeout))??;

        if bytes.is_empty() {
            return Err(BackendError::EmptyOutput.into());
        }

        debug!(
            document_id = %invoice.id,
            byte_len = bytes.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "document rendered"
        );
        Ok(bytes)
    }
}
