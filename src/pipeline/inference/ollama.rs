use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationOptions, InferenceError, LlmBackend};

/// Connect timeout only; the per-call deadline is owned by `InferenceClient`.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Ollama HTTP backend (`/api/generate`, non-streaming, JSON mode).
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: &str) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| InferenceError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
    options: &'a GenerationOptions,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        options: &GenerationOptions,
    ) -> Result<String, InferenceError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model,
            prompt,
            system,
            stream: false,
            format: "json",
            options,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    InferenceError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    InferenceError::Timeout(CONNECT_TIMEOUT_SECS * 1000)
                } else {
                    InferenceError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::from_status(status.as_u16(), body));
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedOutput(format!("Ollama envelope: {e}")))?;

        Ok(parsed.response)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_trims_trailing_slash() {
        let backend = OllamaBackend::new("http://localhost:11434/").unwrap();
        assert_eq!(backend.base_url(), "http://localhost:11434");
        assert_eq!(backend.name(), "ollama");
    }

    #[test]
    fn request_body_shape() {
        let options = GenerationOptions {
            num_predict: Some(256),
            ..Default::default()
        };
        let body = OllamaGenerateRequest {
            model: "medgemma:4b",
            prompt: "p",
            system: "s",
            stream: false,
            format: "json",
            options: &options,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["format"], "json");
        assert_eq!(json["options"]["num_predict"], 256);
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        // Port 9 (discard) is closed on test machines.
        let backend = OllamaBackend::new("http://127.0.0.1:9").unwrap();
        let err = backend
            .generate("m", "p", "s", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transport(), "expected transport error, got {err:?}");
    }
}
