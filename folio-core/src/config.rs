use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::fingerprint::{FingerprintFields, ScalarField};
use crate::infra::cache::CacheBudget;
use crate::queue::RenderQueue;
use crate::render::CommandRenderBackend;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid duration '{value}': {source}")]
    InvalidDuration {
        var: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("{var}: invalid number '{value}'")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var}: unknown fingerprint field '{value}'")]
    UnknownField { var: &'static str, value: String },
    #[error("{var}: must not be empty")]
    Empty { var: &'static str },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

/// Runtime settings for a [`crate::RenderCache`], read from `FOLIO_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct RenderCacheConfig {
    pub cache_dir: PathBuf,
    pub template_dir: PathBuf,
    pub max_artifact_age: Duration,
    /// Zero disables the size bound.
    pub max_cache_bytes: u64,
    pub max_concurrent_renders: usize,
    pub queue_timeout: Duration,
    pub render_timeout: Duration,
    pub sweep_interval: Duration,
    pub renderer_program: String,
    pub renderer_args: Vec<String>,
    pub fingerprint_fields: FingerprintFields,
}

impl Default for RenderCacheConfig {
    fn default() -> Self {
        let budget = CacheBudget::default();
        Self {
            cache_dir: PathBuf::from("./cache/artifacts"),
            template_dir: PathBuf::from("./templates"),
            max_artifact_age: budget.max_age,
            max_cache_bytes: budget.max_total_bytes,
            max_concurrent_renders: RenderQueue::default_concurrency(),
            queue_timeout: Duration::from_secs(120),
            render_timeout: Duration::from_secs(45),
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            renderer_program: "chromium".to_string(),
            renderer_args: CommandRenderBackend::default_args(),
            fingerprint_fields: FingerprintFields::all(),
        }
    }
}

impl RenderCacheConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err.into()),
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut cfg = Self::default();

        if let Some(v) = get("FOLIO_CACHE_DIR") {
            cfg.cache_dir = v.into();
        }
        if let Some(v) = get("FOLIO_TEMPLATE_DIR") {
            cfg.template_dir = v.into();
        }
        if let Some(v) = get("FOLIO_MAX_ARTIFACT_AGE") {
            cfg.max_artifact_age = parse_duration("FOLIO_MAX_ARTIFACT_AGE", v)?;
        }
        if let Some(v) = get("FOLIO_MAX_CACHE_BYTES") {
            cfg.max_cache_bytes = parse_number("FOLIO_MAX_CACHE_BYTES", v)?;
        }
        if let Some(v) = get("FOLIO_MAX_CONCURRENT_RENDERS") {
            let n: usize = parse_number("FOLIO_MAX_CONCURRENT_RENDERS", v.clone())?;
            if n == 0 {
                return Err(ConfigError::InvalidNumber {
                    var: "FOLIO_MAX_CONCURRENT_RENDERS",
                    value: v,
                });
            }
            cfg.max_concurrent_renders = n;
        }
        if let Some(v) = get("FOLIO_QUEUE_TIMEOUT") {
            cfg.queue_timeout = parse_duration("FOLIO_QUEUE_TIMEOUT", v)?;
        }
        if let Some(v) = get("FOLIO_RENDER_TIMEOUT") {
            cfg.render_timeout = parse_duration("FOLIO_RENDER_TIMEOUT", v)?;
        }
        if let Some(v) = get("FOLIO_SWEEP_INTERVAL") {
            cfg.sweep_interval = parse_duration("FOLIO_SWEEP_INTERVAL", v)?;
        }
        if let Some(v) = get("FOLIO_RENDERER_PROGRAM") {
            cfg.renderer_program = v;
        }
        if let Some(v) = get("FOLIO_RENDERER_ARGS") {
            cfg.renderer_args = v.split_whitespace().map(String::from).collect();
        }
        if let Some(v) = get("FOLIO_FINGERPRINT_FIELDS") {
            cfg.fingerprint_fields = parse_fields("FOLIO_FINGERPRINT_FIELDS", &v)?;
        }

        Ok(cfg)
    }

    pub fn budget(&self) -> CacheBudget {
        CacheBudget::new(self.max_artifact_age, self.max_cache_bytes)
    }
}

fn parse_duration(var: &'static str, value: String) -> Result<Duration, ConfigError> {
    humantime::parse_duration(&value)
        .map_err(|source| ConfigError::InvalidDuration { var, value, source })
}

fn parse_number<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidNumber { var, value })
}

fn parse_fields(var: &'static str, value: &str) -> Result<FingerprintFields, ConfigError> {
    let fields = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            ScalarField::from_str(s).map_err(|_| ConfigError::UnknownField {
                var,
                value: s.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if fields.is_empty() {
        return Err(ConfigError::Empty { var });
    }
    Ok(FingerprintFields::only(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<RenderCacheConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RenderCacheConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.max_artifact_age, Duration::from_secs(30 * 86_400));
        assert_eq!(cfg.max_cache_bytes, 536_870_912);
        assert_eq!(cfg.queue_timeout, Duration::from_secs(120));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(86_400));
        assert!((1..=2).contains(&cfg.max_concurrent_renders));
        assert_eq!(cfg.fingerprint_fields, FingerprintFields::all());
        assert_eq!(cfg.renderer_program, "chromium");
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = load(&[
            ("FOLIO_MAX_ARTIFACT_AGE", "7days"),
            ("FOLIO_MAX_CACHE_BYTES", "1024"),
            ("FOLIO_MAX_CONCURRENT_RENDERS", "4"),
            ("FOLIO_RENDER_TIMEOUT", "30s"),
            ("FOLIO_RENDERER_ARGS", "--in {input}  --out {output}"),
            ("FOLIO_FINGERPRINT_FIELDS", "amount, discount_kind"),
        ])
        .unwrap();
        assert_eq!(cfg.max_artifact_age, Duration::from_secs(7 * 86_400));
        assert_eq!(cfg.budget().max_total_bytes, 1024);
        assert_eq!(cfg.max_concurrent_renders, 4);
        assert_eq!(cfg.render_timeout, Duration::from_secs(30));
        assert_eq!(cfg.renderer_args, ["--in", "{input}", "--out", "{output}"]);
        assert!(cfg.fingerprint_fields.contains(ScalarField::Amount));
        assert!(!cfg.fingerprint_fields.contains(ScalarField::TaxPercent));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = load(&[("FOLIO_QUEUE_TIMEOUT", "soon")]).unwrap_err();
        assert!(err.to_string().starts_with("FOLIO_QUEUE_TIMEOUT"));

        let err = load(&[("FOLIO_MAX_CONCURRENT_RENDERS", "0")]).unwrap_err();
        assert!(err.to_string().contains("FOLIO_MAX_CONCURRENT_RENDERS"));

        let err = load(&[("FOLIO_FINGERPRINT_FIELDS", "amount,colour")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField { ref value, .. } if value == "colour"));
    }

    #[test]
    fn blank_values_keep_defaults() {
        let cfg = load(&[("FOLIO_CACHE_DIR", "   ")]).unwrap();
        assert_eq!(cfg.cache_dir, PathBuf::from("./cache/artifacts"));
    }
}
