use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Failure to produce a rendered document.
///
/// Only reaches callers of [`crate::RenderCache::get_or_render`] when no
/// artifact, fresh or stale, could be served instead.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source data error: {0}")]
    SourceData(String),

    #[error("render backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("render job {job_id} waited {waited:?} without getting a render slot")]
    QueueTimeout { job_id: Uuid, waited: Duration },

    #[error("render queue is closed")]
    QueueClosed,

    #[error("artifact store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl RenderError {
    /// Short, stable label for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::Configuration(_) => "configuration",
            RenderError::SourceData(_) => "source_data",
            RenderError::Backend(_) => "backend",
            RenderError::QueueTimeout { .. } => "queue_timeout",
            RenderError::QueueClosed => "queue_closed",
            RenderError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

/// Failures of the external render backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to launch renderer `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("renderer exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("renderer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("renderer produced no output")]
    EmptyOutput,

    #[error("renderer did not finish within {0:?}")]
    TimedOut(Duration),
}

/// Failures of the artifact store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cache I/O error: {0}")]
    Io(String),

    #[error("cache entry {key} failed integrity check: {detail}")]
    Integrity { key: String, detail: String },

    #[error("cache entry {key} has unreadable metadata: {source}")]
    Metadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache index scan failed: {0}")]
    Scan(String),
}

impl StoreError {
    pub(crate) fn from_cacache(key: &str, err: cacache::Error) -> Self {
        match err {
            cacache::Error::EntryNotFound(_, _) => {
                StoreError::Io(format!("cache entry not found: {key}"))
            }
            cacache::Error::IntegrityError(err) => StoreError::Integrity {
                key: key.to_string(),
                detail: err.to_string(),
            },
            cacache::Error::SizeMismatch(wanted, actual) => {
                StoreError::Integrity {
                    key: key.to_string(),
                    detail: format!("size mismatch: wanted={wanted}, actual={actual}"),
                }
            }
            cacache::Error::IoError(_, msg) => StoreError::Io(msg),
            cacache::Error::SerdeError(_, msg) => StoreError::Io(msg),
        }
    }
}

/// The document carries no identity to derive a fingerprint from.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("document has no identity; a fingerprint cannot be derived")]
pub struct FingerprintError;
