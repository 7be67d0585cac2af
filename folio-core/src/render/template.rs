//! Markup assembly from the invoice template and stylesheet.
//!
//! Templates use `{{name}}` placeholders. [`TemplateValue::Text`] values
//! are HTML-escaped; [`TemplateValue::Markup`] values are trusted fragments
//! built by this module. Unknown placeholders render empty.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use folio_model::{Booking, Invoice};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use tokio::sync::OnceCell;
use tracing::debug;

use super::backend::PageConfig;
use super::totals::InvoiceTotals;
use crate::error::RenderError;

pub const TEMPLATE_FILE: &str = "invoice.html";
pub const STYLESHEET_FILE: &str = "invoice.css";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("placeholder regex should compile")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    Text(String),
    Markup(String),
}

impl TemplateValue {
    fn render(&self) -> Cow<'_, str> {
        match self {
            TemplateValue::Text(s) => Cow::Owned(escape_html(s)),
            TemplateValue::Markup(s) => Cow::Borrowed(s),
        }
    }
}

pub type TemplateContext = BTreeMap<&'static str, TemplateValue>;

#[derive(Debug, Clone)]
pub struct InvoiceTemplate {
    pub html: String,
    pub css: String,
}

/// Loads the template pair once and keeps it for the life of the process.
#[derive(Debug)]
pub struct TemplateStore {
    dir: Option<PathBuf>,
    loaded: OnceCell<InvoiceTemplate>,
}

impl TemplateStore {
    /// Templates are read from `dir` on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            loaded: OnceCell::new(),
        }
    }

    pub fn from_strings(html: impl Into<String>, css: impl Into<String>) -> Self {
        Self {
            dir: None,
            loaded: OnceCell::new_with(Some(InvoiceTemplate {
                html: html.into(),
                css: css.into(),
            })),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub async fn template(&self) -> Result<&InvoiceTemplate, RenderError> {
        self.loaded
            .get_or_try_init(|| async {
                let Some(dir) = self.dir.as_deref() else {
                    return Err(RenderError::Configuration(
                        "no template directory configured".into(),
                    ));
                };
                let html = read_required(&dir.join(TEMPLATE_FILE)).await?;
                let css = read_required(&dir.join(STYLESHEET_FILE)).await?;
                debug!(dir = %dir.display(), "invoice template loaded");
                Ok(InvoiceTemplate { html, css })
            })
            .await
    }

    /// Fill the template. The stylesheet is itself substituted and then
    /// exposed to the markup as `{{styles}}`.
    pub async fn render(
        &self,
        context: &TemplateContext,
    ) -> Result<String, RenderError> {
        let template = self.template().await?;
        let css = substitute(&template.css, context, None);
        Ok(substitute(&template.html, context, Some(&css)))
    }
}

async fn read_required(path: &Path) -> Result<String, RenderError> {
    tokio::fs::read_to_string(path).await.map_err(|err| {
        RenderError::Configuration(format!(
            "template file {} unavailable: {err}",
            path.display()
        ))
    })
}

fn substitute(
    source: &str,
    context: &TemplateContext,
    styles: Option<&str>,
) -> String {
    PLACEHOLDER
        .replace_all(source, |caps: &Captures<'_>| {
            let name = &caps[1];
            if name == "styles" {
                if let Some(css) = styles {
                    return css.to_string();
                }
            }
            match context.get(name) {
                Some(value) => value.render().into_owned(),
                None => {
                    debug!(placeholder = name, "unknown template placeholder");
                    String::new()
                }
            }
        })
        .into_owned()
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn money(value: Decimal) -> String {
    format!("{value:.2}")
}

/// Everything the invoice template can reference.
pub fn invoice_context(
    invoice: &Invoice,
    booking: &Booking,
    totals: &InvoiceTotals,
    logo_uri: Option<&str>,
    page: &PageConfig,
) -> TemplateContext {
    use TemplateValue::{Markup, Text};

    let mut ctx = TemplateContext::new();
    ctx.insert("invoice_number", Text(invoice.invoice_number.clone()));
    ctx.insert("status", Text(invoice.status.to_string()));
    ctx.insert("issued_on", Text(invoice.issued_on.format("%d %b %Y").to_string()));
    ctx.insert("customer_name", Text(booking.customer_name.clone()));

    let exhibition = booking.exhibition.as_ref();
    ctx.insert(
        "exhibition_name",
        Text(exhibition.map(|e| e.name.clone()).unwrap_or_default()),
    );
    ctx.insert(
        "venue",
        Text(exhibition.map(|e| e.venue.clone()).unwrap_or_default()),
    );
    ctx.insert(
        "logo",
        Markup(match logo_uri {
            Some(uri) => format!(
                r#"<img class="logo" src="{}" alt="">"#,
                escape_html(uri)
            ),
            None => String::new(),
        }),
    );

    let rows: String = totals
        .lines
        .iter()
        .map(|line| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&line.stall_number),
                line.area.normalize(),
                money(line.rate),
                money(line.amount),
            )
        })
        .collect();
    ctx.insert("line_items", Markup(rows));

    ctx.insert("base", Text(money(totals.base)));
    ctx.insert(
        "discount_label",
        Text(match booking.discount {
            Some(folio_model::Discount::Percentage(p)) => {
                format!("Discount ({}%)", p.normalize())
            }
            Some(folio_model::Discount::Fixed(_)) => "Discount".to_string(),
            None => String::new(),
        }),
    );
    ctx.insert("discount", Text(money(totals.discount)));
    ctx.insert("after_discount", Text(money(totals.after_discount)));
    ctx.insert("tax_percent", Text(booking.tax_percent.normalize().to_string()));
    ctx.insert("tax", Text(money(totals.tax)));
    ctx.insert("total", Text(money(totals.total)));

    ctx.insert("page_width", Text(format!("{}mm", page.width_mm)));
    ctx.insert("page_height", Text(format!("{}mm", page.height_mm)));
    ctx.insert("page_margin", Text(format!("{}mm", page.margin_mm)));
    ctx
}
