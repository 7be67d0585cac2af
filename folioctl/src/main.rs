//! # folioctl
//!
//! Operator tooling for the folio render cache: render a single invoice
//! through the cache, run an eviction sweep, or keep the periodic sweeper
//! running in the foreground.
//!
//! Settings come from `FOLIO_*` environment variables (and `.env`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use folio_core::infra::cache::ArtifactCacheRoot;
use folio_core::{ArtifactStore, RenderCache, RenderCacheConfig};
use folio_model::Invoice;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "folioctl", version)]
#[command(about = "Render, sweep and watch the folio artifact cache")]
struct Cli {
    /// Artifact cache directory (overrides FOLIO_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render an invoice (JSON) through the cache and write the document
    Render {
        /// Invoice record as JSON, with its booking and exhibition embedded
        #[arg(long)]
        input: PathBuf,
        /// Where to write the rendered document
        #[arg(long)]
        output: PathBuf,
        /// Ignore any cached artifact and render again
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Run one eviction sweep and print what was removed
    Sweep,
    /// Run the periodic sweeper until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config =
        RenderCacheConfig::from_env().context("failed to load configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    match cli.command {
        Command::Render {
            input,
            output,
            force,
        } => render(&config, &input, &output, force).await,
        Command::Sweep => sweep(&config).await,
        Command::Watch => watch(&config).await,
    }
}

async fn render(
    config: &RenderCacheConfig,
    input: &Path,
    output: &Path,
    force: bool,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let invoice: Invoice = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a valid invoice", input.display()))?;

    let cache = RenderCache::from_config(config)
        .await
        .context("failed to open render cache")?;
    let artifact = cache
        .get_or_render(&invoice, force)
        .await
        .with_context(|| format!("failed to render invoice {}", invoice.invoice_number))?;

    tokio::fs::write(output, &artifact.bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "{} {:?} {} bytes -> {}",
        artifact.fingerprint,
        artifact.origin,
        artifact.bytes.len(),
        output.display()
    );
    Ok(())
}

async fn sweep(config: &RenderCacheConfig) -> anyhow::Result<()> {
    let store = ArtifactStore::open(ArtifactCacheRoot::new(config.cache_dir.clone()))
        .await
        .context("failed to open artifact store")?;
    let report = store
        .sweep(&config.budget())
        .await
        .context("artifact sweep failed")?;

    println!(
        "scanned={} removed_expired={} removed_over_budget={} failed={} bytes_before={} bytes_after={}",
        report.scanned,
        report.removed_expired,
        report.removed_over_budget,
        report.failed,
        report.bytes_before,
        report.bytes_after,
    );
    Ok(())
}

async fn watch(config: &RenderCacheConfig) -> anyhow::Result<()> {
    let store = Arc::new(
        ArtifactStore::open(ArtifactCacheRoot::new(config.cache_dir.clone()))
            .await
            .context("failed to open artifact store")?,
    );
    let handle = folio_core::ArtifactSweeper::new(
        store,
        config.budget(),
        config.sweep_interval,
    )
    .start();

    info!(
        interval = %humantime::format_duration(config.sweep_interval),
        "watching artifact cache; press ctrl-c to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    handle.shutdown().await;
    Ok(())
}
