//! Service configuration.
//!
//! Every tunable of the cascade (model identifiers, timeouts, size limits,
//! chunking, retry policy) lives in `CascadeConfig`. Values come from
//! `MEDCASCADE_*` environment variables with defaults matching the
//! reference deployment; business logic never hard-codes them.

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

/// Application-level constants
pub const APP_NAME: &str = "Medcascade";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable prefix for every setting.
const ENV_PREFIX: &str = "MEDCASCADE_";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "medcascade=info,tower_http=warn"
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// What happens when an advisory stage (triage, extraction) fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryPolicy {
    /// Substitute an empty result and keep going.
    Tolerate,
    /// Abort the run; the gateway falls back.
    Strict,
}

impl FromStr for AdvisoryPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tolerate" => Ok(Self::Tolerate),
            "strict" => Ok(Self::Strict),
            other => Err(ConfigError::Invalid {
                key: "ADVISORY_POLICY",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for MEDCASCADE_{key}: '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Complete cascade configuration.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeConfig {
    /// Base URL of the Ollama-compatible inference backend.
    pub ollama_url: String,
    /// Model used for the `fast` tier.
    pub fast_model: String,
    /// Model used for the `accurate` tier.
    pub accurate_model: String,
    /// Hard timeout for a single inference call.
    pub stage_timeout_secs: u64,
    /// Bound on the whole cascade for one request.
    pub request_timeout_secs: u64,
    /// Upper bound on transcript length accepted by the gateway (chars).
    pub max_transcript_chars: usize,
    /// Transcripts longer than this are chunked (chars).
    pub chunk_threshold_chars: usize,
    /// Ceiling for a single chunk (chars).
    pub chunk_max_chars: usize,
    /// Character budget for one rendered prompt.
    pub max_prompt_chars: usize,
    /// Concurrent per-chunk cascade runs.
    pub max_concurrent_chunks: usize,
    /// Retries per stage (0 or 1).
    pub stage_retries: u8,
    pub advisory_policy: AdvisoryPolicy,
    /// Result cache entries; 0 disables caching.
    pub cache_capacity: usize,
    /// When set, the gateway forwards to an out-of-process orchestrator.
    pub remote_url: Option<String>,
    pub bind_addr: String,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".into(),
            fast_model: "medgemma:4b".into(),
            accurate_model: "medgemma:27b".into(),
            stage_timeout_secs: 60,
            request_timeout_secs: 150,
            max_transcript_chars: 50_000,
            chunk_threshold_chars: 12_000,
            chunk_max_chars: 10_000,
            max_prompt_chars: 16_000,
            max_concurrent_chunks: 3,
            stage_retries: 1,
            advisory_policy: AdvisoryPolicy::Tolerate,
            cache_capacity: 256,
            remote_url: None,
            bind_addr: "127.0.0.1:8787".into(),
        }
    }
}

impl CascadeConfig {
    /// Build from `MEDCASCADE_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Build from an arbitrary key lookup (keys without prefix).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("OLLAMA_URL") {
            cfg.ollama_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("FAST_MODEL") {
            cfg.fast_model = v;
        }
        if let Some(v) = lookup("ACCURATE_MODEL") {
            cfg.accurate_model = v;
        }
        if let Some(v) = lookup("REMOTE_URL") {
            if !v.trim().is_empty() {
                cfg.remote_url = Some(v.trim_end_matches('/').to_string());
            }
        }
        if let Some(v) = lookup("BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Some(v) = lookup("ADVISORY_POLICY") {
            cfg.advisory_policy = v.parse()?;
        }

        cfg.stage_timeout_secs = parse_or("STAGE_TIMEOUT_SECS", &lookup, cfg.stage_timeout_secs)?;
        cfg.request_timeout_secs =
            parse_or("REQUEST_TIMEOUT_SECS", &lookup, cfg.request_timeout_secs)?;
        cfg.max_transcript_chars =
            parse_or("MAX_TRANSCRIPT_CHARS", &lookup, cfg.max_transcript_chars)?;
        cfg.chunk_threshold_chars =
            parse_or("CHUNK_THRESHOLD_CHARS", &lookup, cfg.chunk_threshold_chars)?;
        cfg.chunk_max_chars = parse_or("CHUNK_MAX_CHARS", &lookup, cfg.chunk_max_chars)?;
        cfg.max_prompt_chars = parse_or("MAX_PROMPT_CHARS", &lookup, cfg.max_prompt_chars)?;
        cfg.max_concurrent_chunks =
            parse_or("MAX_CONCURRENT_CHUNKS", &lookup, cfg.max_concurrent_chunks)?;
        cfg.stage_retries = parse_or("STAGE_RETRIES", &lookup, cfg.stage_retries)?;
        cfg.cache_capacity = parse_or("CACHE_CAPACITY", &lookup, cfg.cache_capacity)?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stage_retries > 1 {
            return Err(ConfigError::Inconsistent(
                "stage_retries must be 0 or 1".into(),
            ));
        }
        if self.stage_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ConfigError::Inconsistent("timeouts must be non-zero".into()));
        }
        if self.max_concurrent_chunks == 0 {
            return Err(ConfigError::Inconsistent(
                "max_concurrent_chunks must be at least 1".into(),
            ));
        }
        if self.chunk_max_chars == 0 || self.chunk_max_chars > self.chunk_threshold_chars {
            return Err(ConfigError::Inconsistent(format!(
                "chunk_max_chars ({}) must be in 1..=chunk_threshold_chars ({})",
                self.chunk_max_chars, self.chunk_threshold_chars
            )));
        }
        if self.chunk_max_chars >= self.max_prompt_chars {
            return Err(ConfigError::Inconsistent(format!(
                "chunk_max_chars ({}) must leave room for the prompt template (max_prompt_chars {})",
                self.chunk_max_chars, self.max_prompt_chars
            )));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_or<T, F>(key: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_consistent() {
        let cfg = CascadeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.stage_timeout_secs, 60);
        assert_eq!(cfg.max_transcript_chars, 50_000);
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = CascadeConfig::from_lookup(lookup_from(&[
            ("OLLAMA_URL", "http://gpu-box:11434/"),
            ("FAST_MODEL", "llama3:8b"),
            ("STAGE_TIMEOUT_SECS", "15"),
            ("ADVISORY_POLICY", "strict"),
        ]))
        .unwrap();
        assert_eq!(cfg.ollama_url, "http://gpu-box:11434");
        assert_eq!(cfg.fast_model, "llama3:8b");
        assert_eq!(cfg.stage_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.advisory_policy, AdvisoryPolicy::Strict);
    }

    #[test]
    fn unparsable_number_is_rejected() {
        let err = CascadeConfig::from_lookup(lookup_from(&[("STAGE_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "STAGE_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn more_than_one_retry_is_rejected() {
        let err =
            CascadeConfig::from_lookup(lookup_from(&[("STAGE_RETRIES", "3")])).unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn chunk_ceiling_must_fit_prompt_budget() {
        let cfg = CascadeConfig {
            chunk_max_chars: 12_000,
            max_prompt_chars: 12_000,
            ..CascadeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn blank_remote_url_stays_disabled() {
        let cfg = CascadeConfig::from_lookup(lookup_from(&[("REMOTE_URL", "  ")])).unwrap();
        assert!(cfg.remote_url.is_none());
    }

    #[test]
    fn app_name_is_medcascade() {
        assert_eq!(APP_NAME, "Medcascade");
    }
}
