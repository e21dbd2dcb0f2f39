use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use super::json::{parse_object, ParsePhase};
use super::{GenerationOptions, InferenceError, LlmBackend};
use crate::models::ModelTier;
use crate::pipeline::prompt::PromptBundle;

/// Model identifier per tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierModels {
    pub fast: String,
    pub accurate: String,
}

impl TierModels {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Accurate => &self.accurate,
        }
    }
}

/// Parsed JSON object from one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct RawModelOutput {
    pub value: Map<String, Value>,
    pub model: String,
    pub latency_ms: u64,
    /// True when the strict parse failed and balanced-brace repair was used.
    pub repaired: bool,
}

/// Timed, typed wrapper around an `LlmBackend`.
pub struct InferenceClient {
    backend: Arc<dyn LlmBackend>,
    models: TierModels,
    timeout: Duration,
}

impl InferenceClient {
    pub fn new(backend: Arc<dyn LlmBackend>, models: TierModels, timeout: Duration) -> Self {
        Self {
            backend,
            models,
            timeout,
        }
    }

    pub fn models(&self) -> &TierModels {
        &self.models
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// One call, bounded by the stage timeout. Dropping the returned future
    /// cancels the in-flight backend request.
    pub async fn invoke(
        &self,
        bundle: &PromptBundle,
        tier: ModelTier,
    ) -> Result<RawModelOutput, InferenceError> {
        let model = self.models.model_for(tier);
        let options = GenerationOptions {
            temperature: bundle.temperature,
            num_predict: Some(bundle.max_output_tokens),
            ..Default::default()
        };

        let start = Instant::now();
        let raw = tokio::time::timeout(
            self.timeout,
            self.backend.generate(model, &bundle.text, bundle.system, &options),
        )
        .await
        .map_err(|_| InferenceError::Timeout(self.timeout.as_millis() as u64))??;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (value, phase) = parse_object(&raw).ok_or_else(|| {
            InferenceError::MalformedOutput(format!(
                "no JSON object in {} chars of {} output",
                raw.chars().count(),
                bundle.stage
            ))
        })?;

        if phase == ParsePhase::Repaired {
            tracing::debug!(stage = %bundle.stage, model, "Model output needed JSON repair");
        }

        Ok(RawModelOutput {
            value,
            model: model.to_string(),
            latency_ms,
            repaired: phase == ParsePhase::Repaired,
        })
    }
}
