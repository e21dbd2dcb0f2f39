pub mod client;
pub mod json;
pub mod ollama;
#[cfg(test)]
pub mod scripted;

pub use client::*;
pub use ollama::*;
#[cfg(test)]
pub use scripted::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed failure of a single inference call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Inference call timed out after {0} ms")]
    Timeout(u64),

    #[error("Inference backend is not reachable at {0}")]
    Connection(String),

    #[error("Inference backend returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Inference quota or rate limit exceeded: {0}")]
    Quota(String),

    #[error("Inference backend rejected the credentials: {0}")]
    Permission(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),
}

impl InferenceError {
    /// Timeout, connection failure or non-2xx status.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::Status { .. } | Self::Http(_)
        )
    }

    /// Worth one more attempt at the stage level.
    ///
    /// Quota and permission failures will not change on an immediate retry.
    pub fn is_retryable(&self) -> bool {
        self.is_transport() || matches!(self, Self::MalformedOutput(_))
    }

    /// Classify an HTTP error status from the backend.
    pub fn from_status(status: u16, body: String) -> Self {
        let lower = body.to_lowercase();
        match status {
            429 => Self::Quota(body),
            401 | 403 => Self::Permission(body),
            _ if lower.contains("quota") || lower.contains("rate limit") => Self::Quota(body),
            _ => Self::Status { status, body },
        }
    }
}

/// Generation parameters for Ollama `/api/generate`.
///
/// Medical prompts need low temperature for deterministic output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Sampling temperature (0.0-1.0). Lower = more deterministic.
    pub temperature: f32,
    /// Top-p (nucleus) sampling threshold.
    pub top_p: f32,
    /// Top-k sampling: number of top tokens to consider.
    pub top_k: u32,
    /// Maximum tokens in the generated response.
    /// None = model default (typically 2048).
    pub num_predict: Option<i32>,
    /// Context window size. None = model default.
    pub num_ctx: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.9,
            top_k: 40,
            num_predict: None,
            num_ctx: None,
        }
    }
}

/// The external LLM backend. Treated as untrusted: its text is validated
/// by `InferenceClient`, never by the backend itself.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        options: &GenerationOptions,
    ) -> Result<String, InferenceError>;

    /// Short label for logs.
    fn name(&self) -> &str;
}
