//! Entry point for one `/analyze` request.
//!
//! Validation errors are returned to the caller as-is. Every other failure
//! ends in a structured `AnalysisResponse`: the keyword fallback when it
//! works, the generic "unavailable" envelope when even that fails.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::cache::AnalysisCache;
use crate::config::CascadeConfig;
use crate::models::{
    AnalysisRequest, AnalysisResponse, AnalyzeBody, CascadeMetadata,
};
use crate::pipeline::cascade::CascadeRunner;
use crate::pipeline::fallback::{FallbackAnalyzer, OfflineAnalyzer};
use crate::pipeline::AnalysisError;
use crate::telemetry::{CascadeEvent, EventKind, EventSink};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatewaySettings {
    pub max_transcript_chars: usize,
    pub request_timeout: Duration,
    pub cache_capacity: usize,
}

impl GatewaySettings {
    pub fn from_config(config: &CascadeConfig) -> Self {
        Self {
            max_transcript_chars: config.max_transcript_chars,
            request_timeout: config.request_timeout(),
            cache_capacity: config.cache_capacity,
        }
    }
}

pub struct ResponseGateway {
    runner: Arc<dyn CascadeRunner>,
    fallback: Arc<dyn OfflineAnalyzer>,
    cache: AnalysisCache,
    events: Arc<dyn EventSink>,
    settings: GatewaySettings,
}

impl ResponseGateway {
    pub fn new(
        runner: Arc<dyn CascadeRunner>,
        events: Arc<dyn EventSink>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            runner,
            fallback: Arc::new(FallbackAnalyzer::new()),
            cache: AnalysisCache::new(settings.cache_capacity),
            events,
            settings,
        }
    }

    /// Replace the local analyzer used after model failures.
    pub fn with_fallback(mut self, fallback: Arc<dyn OfflineAnalyzer>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn runner_name(&self) -> &str {
        self.runner.name()
    }

    /// Validate `body` and analyse it. Only `AnalysisError::Validation`
    /// is ever returned as `Err`.
    pub async fn handle(&self, body: AnalyzeBody) -> Result<AnalysisResponse, AnalysisError> {
        let request = match body.validate(self.settings.max_transcript_chars) {
            Ok(request) => request,
            Err(violation) => {
                self.events.emit(
                    CascadeEvent::new(EventKind::RequestRejected)
                        .with("reason", violation.to_string()),
                );
                return Err(AnalysisError::Validation(violation));
            }
        };
        Ok(self.analyze(&request).await)
    }

    /// Analyse an already validated request. Never fails.
    pub async fn analyze(&self, request: &AnalysisRequest) -> AnalysisResponse {
        let request_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        self.events.emit(
            CascadeEvent::new(EventKind::RequestStarted)
                .with("requestId", request_id.as_str())
                .with("transcriptChars", request.transcript.chars().count())
                .with("specialty", request.specialty.as_str())
                .with("sessionType", request.session_type.as_str())
                .with("runner", self.runner.name()),
        );

        let key = request.cache_key();
        if let Some(mut outcome) = self.cache.get(&key) {
            outcome.metadata.cached = true;
            self.events
                .emit(CascadeEvent::new(EventKind::CacheHit).with("requestId", request_id.as_str()));
            self.emit_completed(&request_id, start, true);
            return AnalysisResponse::succeeded(outcome.analysis, outcome.metadata);
        }

        let timeout = self.settings.request_timeout;
        let result = match tokio::time::timeout(timeout, self.runner.run(request)).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Transport(format!(
                "analysis did not finish within {} ms",
                timeout.as_millis()
            ))),
        };

        match result {
            Ok(outcome) => {
                self.cache.insert(key, outcome.clone());
                self.emit_completed(&request_id, start, true);
                AnalysisResponse::succeeded(outcome.analysis, outcome.metadata)
            }
            Err(err) => {
                let response = self.fall_back(request, &err, &request_id, start);
                self.emit_completed(&request_id, start, false);
                response
            }
        }
    }

    fn fall_back(
        &self,
        request: &AnalysisRequest,
        err: &AnalysisError,
        request_id: &str,
        start: Instant,
    ) -> AnalysisResponse {
        tracing::warn!(
            request_id,
            kind = err.kind(),
            error = %err,
            "Cascade failed; running keyword fallback"
        );
        self.events.emit(
            CascadeEvent::new(EventKind::FallbackTriggered)
                .with("requestId", request_id)
                .with("error", err.kind()),
        );

        let fallback = Arc::clone(&self.fallback);
        let analyzed = catch_unwind(AssertUnwindSafe(|| fallback.analyze(request, err.kind())));

        match analyzed {
            Ok(analysis) => {
                let metadata = CascadeMetadata {
                    total_latency_ms: start.elapsed().as_millis() as u64,
                    fallback_triggered: true,
                    ..Default::default()
                };
                AnalysisResponse::fell_back(analysis, metadata, err.kind(), err.user_message())
            }
            Err(_) => {
                tracing::error!(request_id, "Keyword fallback panicked");
                AnalysisResponse::exhausted(err.kind())
            }
        }
    }

    fn emit_completed(&self, request_id: &str, start: Instant, success: bool) {
        self.events.emit(
            CascadeEvent::new(EventKind::RequestCompleted)
                .with("requestId", request_id)
                .with("success", success)
                .with("latencyMs", start.elapsed().as_millis() as u64),
        );
    }
}
