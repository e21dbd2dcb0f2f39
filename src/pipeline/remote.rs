use std::time::Duration;

use async_trait::async_trait;

use super::cascade::{CascadeOutcome, CascadeRunner};
use super::inference::InferenceError;
use super::AnalysisError;
use crate::models::{AnalysisRequest, AnalysisResponse, AnalyzeBody};

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Forwards requests to an out-of-process orchestrator's `/analyze`.
///
/// The remote envelope is trusted only for its shape: a `success:false`
/// answer is turned back into an `AnalysisError` so the local fallback runs.
pub struct RemoteCascade {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteCascade {
    pub fn new(base_url: &str) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AnalysisError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

/// Map a remote `error` label back onto a local error kind.
fn error_from_label(label: &str, message: String) -> AnalysisError {
    match label {
        "quota" => AnalysisError::Quota(message),
        "permission" => AnalysisError::Permission(message),
        "malformed_output" => AnalysisError::MalformedOutput(message),
        _ => AnalysisError::Transport(format!("remote {label}: {message}")),
    }
}

#[async_trait]
impl CascadeRunner for RemoteCascade {
    async fn run(&self, request: &AnalysisRequest) -> Result<CascadeOutcome, AnalysisError> {
        let url = format!("{}/analyze", self.base_url);
        let body = AnalyzeBody {
            transcription: request.transcript.clone(),
            specialty: request.specialty.as_str().to_string(),
            session_type: request.session_type.as_str().to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(format!("remote orchestrator: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InferenceError::from_status(status.as_u16(), text).into());
        }

        let envelope: AnalysisResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::MalformedOutput(format!("remote envelope: {e}")))?;

        match envelope {
            AnalysisResponse {
                success: true,
                analysis: Some(analysis),
                metadata,
                ..
            } if !analysis.is_fallback() => Ok(CascadeOutcome {
                analysis,
                metadata: metadata.unwrap_or_default(),
            }),
            AnalysisResponse { error, message, .. } => Err(error_from_label(
                error.as_deref().unwrap_or("unknown"),
                message.unwrap_or_default(),
            )),
        }
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CascadeMetadata, ClinicalAnalysis, SessionType, Specialty};
    use axum::{routing::post, Json, Router};

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            transcript: "dolor leve en el hombro derecho".into(),
            specialty: Specialty::Physiotherapy,
            session_type: SessionType::FollowUp,
        }
    }

    async fn serve(response: AnalysisResponse) -> String {
        let app = Router::new().route(
            "/analyze",
            post(move |Json(body): Json<AnalyzeBody>| {
                let response = response.clone();
                async move {
                    assert_eq!(body.session_type, "follow_up");
                    Json(response)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn remote_success_is_passed_through() {
        let mut analysis = ClinicalAnalysis::minimal("x");
        analysis.fallback = None;
        analysis.summary = "remoto".into();
        let url = serve(AnalysisResponse::succeeded(
            analysis,
            CascadeMetadata {
                stages_completed: 3,
                ..Default::default()
            },
        ))
        .await;

        let outcome = RemoteCascade::new(&url).unwrap().run(&request()).await.unwrap();
        assert_eq!(outcome.analysis.summary, "remoto");
        assert_eq!(outcome.metadata.stages_completed, 3);
    }

    #[tokio::test]
    async fn remote_failure_envelope_becomes_error() {
        let url = serve(AnalysisResponse::exhausted("quota")).await;
        let err = RemoteCascade::new(&url).unwrap().run(&request()).await.unwrap_err();
        assert_eq!(err.kind(), "quota");
    }

    #[tokio::test]
    async fn unreachable_remote_is_transport() {
        let err = RemoteCascade::new("http://127.0.0.1:9/")
            .unwrap()
            .run(&request())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn labels_map_to_kinds() {
        assert_eq!(error_from_label("permission", String::new()).kind(), "permission");
        assert_eq!(error_from_label("stage_failure", String::new()).kind(), "transport");
    }
}
