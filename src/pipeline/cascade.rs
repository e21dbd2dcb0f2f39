//! Three-stage analysis cascade: triage ∥ extract → synthesize.
//!
//! Triage and extraction are advisory. Under the tolerant policy a failed
//! advisory stage is recorded in `degraded_stages` and synthesis continues
//! with an explicit "not available" context; under the strict policy it
//! aborts the run. Synthesis failure always aborts.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::chunking::ChunkingCoordinator;
use super::inference::{InferenceClient, LlmBackend, TierModels};
use super::knowledge::SpecialtyKnowledge;
use super::prompt::{PromptBuilder, PromptInput, SynthesisContext};
use super::risk::{RiskAssessment, RiskClassifier};
use super::{AnalysisError, StageError, StageFault};
use crate::config::{AdvisoryPolicy, CascadeConfig};
use crate::models::{
    AnalysisRequest, CascadeMetadata, ClinicalAnalysis, ClinicalFactSet, Demographics,
    ModelTier, Severity, SoapNote, SoapQuality, Stage, Suggestion, TriageFinding, Warning,
};
use crate::telemetry::{CascadeEvent, EventKind, EventSink};

// ═══════════════════════════════════════════════════════════
// Runner seam
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeOutcome {
    pub analysis: ClinicalAnalysis,
    pub metadata: CascadeMetadata,
}

/// Anything that can turn a validated request into an analysis: the
/// in-process orchestrator or a remote one.
#[async_trait]
pub trait CascadeRunner: Send + Sync {
    async fn run(&self, request: &AnalysisRequest) -> Result<CascadeOutcome, AnalysisError>;

    fn name(&self) -> &str;
}

// ═══════════════════════════════════════════════════════════
// State machine
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    Start,
    Triage,
    Extract,
    Synthesize,
    Done,
    Aborted,
}

impl CascadeState {
    /// Legal transitions. `Aborted` is reachable from the advisory join
    /// point only under the strict policy.
    pub fn can_advance(self, next: CascadeState, policy: AdvisoryPolicy) -> bool {
        use CascadeState::*;
        matches!(
            (self, next),
            (Start, Triage) | (Triage, Extract) | (Extract, Synthesize) | (Synthesize, Done)
                | (Synthesize, Aborted)
        ) || (policy == AdvisoryPolicy::Strict && self == Extract && next == Aborted)
    }
}

/// Per-run state tracker; transitions are logged at trace level.
struct RunState {
    state: CascadeState,
    policy: AdvisoryPolicy,
}

impl RunState {
    fn new(policy: AdvisoryPolicy) -> Self {
        Self {
            state: CascadeState::Start,
            policy,
        }
    }

    fn advance(&mut self, next: CascadeState) {
        debug_assert!(
            self.state.can_advance(next, self.policy),
            "illegal cascade transition {:?} -> {next:?}",
            self.state
        );
        tracing::trace!(from = ?self.state, to = ?next, "Cascade transition");
        self.state = next;
    }
}

// ═══════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeSettings {
    pub stage_retries: u8,
    pub advisory_policy: AdvisoryPolicy,
    pub max_concurrent_chunks: usize,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            stage_retries: 1,
            advisory_policy: AdvisoryPolicy::Tolerate,
            max_concurrent_chunks: 3,
        }
    }
}

/// Result of one Triage → Extract → Synthesize pass over one text.
struct PassResult {
    analysis: ClinicalAnalysis,
    stages_completed: u8,
    per_stage_model: Vec<String>,
    degraded: Vec<Stage>,
}

pub struct CascadeOrchestrator {
    client: InferenceClient,
    prompts: PromptBuilder,
    risk: RiskClassifier,
    chunking: ChunkingCoordinator,
    events: Arc<dyn EventSink>,
    settings: CascadeSettings,
}

impl CascadeOrchestrator {
    pub fn new(
        client: InferenceClient,
        prompts: PromptBuilder,
        chunking: ChunkingCoordinator,
        events: Arc<dyn EventSink>,
        settings: CascadeSettings,
    ) -> Self {
        Self {
            client,
            prompts,
            risk: RiskClassifier::new(),
            chunking,
            events,
            settings,
        }
    }

    pub fn from_config(
        config: &CascadeConfig,
        backend: Arc<dyn LlmBackend>,
        knowledge: Arc<dyn SpecialtyKnowledge>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let models = TierModels {
            fast: config.fast_model.clone(),
            accurate: config.accurate_model.clone(),
        };
        Self::new(
            InferenceClient::new(backend, models, config.stage_timeout()),
            PromptBuilder::new(knowledge, config.max_prompt_chars),
            ChunkingCoordinator::new(config.chunk_threshold_chars, config.chunk_max_chars),
            events,
            CascadeSettings {
                stage_retries: config.stage_retries,
                advisory_policy: config.advisory_policy,
                max_concurrent_chunks: config.max_concurrent_chunks,
            },
        )
    }

    /// One stage with at most `stage_retries` extra attempts for retryable faults.
    async fn run_stage<T>(
        &self,
        stage: Stage,
        input: &PromptInput<'_>,
        tier: ModelTier,
        parse: fn(&Map<String, Value>) -> Result<T, StageFault>,
    ) -> Result<T, StageError> {
        let bundle = self.prompts.build(stage, input);
        let attempts = 1 + u32::from(self.settings.stage_retries.min(1));

        let mut attempt = 1;
        loop {
            let result = self
                .client
                .invoke(&bundle, tier)
                .await
                .map_err(StageFault::from)
                .and_then(|out| parse(&out.value).map(|value| (value, out)));

            match result {
                Ok((value, out)) => {
                    self.events.emit(
                        CascadeEvent::new(EventKind::StageCompleted)
                            .with("stage", stage.as_str())
                            .with("model", out.model)
                            .with("latencyMs", out.latency_ms)
                            .with("repaired", out.repaired)
                            .with("attempt", attempt),
                    );
                    return Ok(value);
                }
                Err(fault) => {
                    let err = StageError::new(stage, fault);
                    if err.is_retryable() && attempt < attempts {
                        self.events.emit(
                            CascadeEvent::new(EventKind::StageRetried)
                                .with("stage", stage.as_str())
                                .with("error", err.to_string()),
                        );
                        attempt += 1;
                        continue;
                    }
                    self.events.emit(
                        CascadeEvent::new(EventKind::StageFailed)
                            .with("stage", stage.as_str())
                            .with("error", err.to_string())
                            .with("attempts", attempt),
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn run_pass(
        &self,
        text: &str,
        request: &AnalysisRequest,
        risk: &RiskAssessment,
    ) -> Result<PassResult, AnalysisError> {
        let policy = self.settings.advisory_policy;
        let mut state = RunState::new(policy);
        let input = PromptInput::new(text, request.specialty, request.session_type);

        state.advance(CascadeState::Triage);
        let (triage, facts) = tokio::join!(
            self.run_stage(Stage::Triage, &input, ModelTier::Fast, parse_triage),
            self.run_stage(Stage::Extract, &input, ModelTier::Fast, parse_facts),
        );
        state.advance(CascadeState::Extract);

        let mut degraded = Vec::new();
        for (stage, err) in [
            (Stage::Triage, triage.as_ref().err()),
            (Stage::Extract, facts.as_ref().err()),
        ] {
            let Some(err) = err else { continue };
            if policy == AdvisoryPolicy::Strict {
                state.advance(CascadeState::Aborted);
                self.emit_aborted(stage, err);
                return Err(err.clone().into());
            }
            tracing::warn!(stage = %stage, error = %err, "Advisory stage skipped");
            degraded.push(stage);
        }

        let context = SynthesisContext {
            triage: triage.as_ref().ok(),
            facts: facts.as_ref().ok(),
        };
        let synthesis_input = input.with_risk(risk).with_context(context);

        state.advance(CascadeState::Synthesize);
        let analysis = match self
            .run_stage(
                Stage::Synthesize,
                &synthesis_input,
                risk.recommended_tier,
                parse_analysis,
            )
            .await
        {
            Ok(analysis) => analysis,
            Err(err) => {
                state.advance(CascadeState::Aborted);
                self.emit_aborted(Stage::Synthesize, &err);
                return Err(err.into());
            }
        };
        state.advance(CascadeState::Done);

        let models = self.client.models();
        Ok(PassResult {
            analysis,
            stages_completed: 3 - degraded.len() as u8,
            per_stage_model: vec![
                models.model_for(ModelTier::Fast).to_string(),
                models.model_for(ModelTier::Fast).to_string(),
                models.model_for(risk.recommended_tier).to_string(),
            ],
            degraded,
        })
    }

    fn emit_aborted(&self, stage: Stage, err: &StageError) {
        self.events.emit(
            CascadeEvent::new(EventKind::CascadeAborted)
                .with("stage", stage.as_str())
                .with("error", err.to_string()),
        );
    }
}

#[async_trait]
impl CascadeRunner for CascadeOrchestrator {
    async fn run(&self, request: &AnalysisRequest) -> Result<CascadeOutcome, AnalysisError> {
        let start = Instant::now();
        let risk = self.risk.classify(&request.transcript);
        tracing::debug!(
            tier = %risk.recommended_tier,
            critical = risk.critical_matches,
            high = risk.high_matches,
            "Risk classified"
        );

        let (analysis, passes, chunk_count) = if self.chunking.should_chunk(&request.transcript) {
            let chunks = self.chunking.split(&request.transcript);
            self.events.emit(
                CascadeEvent::new(EventKind::ChunkingApplied)
                    .with("chunkCount", chunks.len())
                    .with("transcriptChars", request.transcript.chars().count()),
            );

            let passes: Vec<_> = chunks
                .iter()
                .map(|chunk| self.run_pass(&chunk.text, request, &risk))
                .collect();
            let results: Vec<Result<PassResult, AnalysisError>> = stream::iter(passes)
                .buffered(self.settings.max_concurrent_chunks.max(1))
                .collect()
                .await;

            let mut passes = Vec::new();
            let mut analyses = Vec::with_capacity(results.len());
            for result in results {
                match result {
                    Ok(pass) => {
                        analyses.push(Ok(pass.analysis.clone()));
                        passes.push(pass);
                    }
                    Err(e) => analyses.push(Err(e)),
                }
            }
            (self.chunking.merge(analyses)?, passes, chunks.len())
        } else {
            let pass = self.run_pass(&request.transcript, request, &risk).await?;
            (pass.analysis.clone(), vec![pass], 1)
        };

        let mut degraded: Vec<String> = Vec::new();
        for stage in passes.iter().flat_map(|p| p.degraded.iter()) {
            if !degraded.iter().any(|d| d == stage.as_str()) {
                degraded.push(stage.as_str().to_string());
            }
        }

        let metadata = CascadeMetadata {
            stages_completed: passes.iter().map(|p| p.stages_completed).min().unwrap_or(0),
            per_stage_model: passes
                .first()
                .map(|p| p.per_stage_model.clone())
                .unwrap_or_default(),
            total_latency_ms: start.elapsed().as_millis() as u64,
            fallback_triggered: false,
            chunk_count,
            degraded_stages: degraded,
            risk_tier: Some(risk.recommended_tier),
            cached: false,
        };

        Ok(CascadeOutcome { analysis, metadata })
    }

    fn name(&self) -> &str {
        "local"
    }
}

// ═══════════════════════════════════════════════════════════
// Stage output parsers
// ═══════════════════════════════════════════════════════════

fn field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k)).filter(|v| !v.is_null())
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        Value::String(s) if !s.trim().is_empty() => Some(vec![s.trim().to_string()]),
        _ => None,
    }
}

fn string_value(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn score(value: Option<&Value>) -> f32 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) as f32,
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn parse_triage(map: &Map<String, Value>) -> Result<TriageFinding, StageFault> {
    let flags = field(map, &["red_flags", "redFlags", "flags"])
        .ok_or_else(|| StageFault::Schema("triage output has no red_flags".into()))?;
    let Value::Array(items) = flags else {
        return Err(StageFault::Schema("triage red_flags is not a list".into()));
    };
    if !items.is_empty() && !items.iter().any(Value::is_string) {
        return Err(StageFault::Schema(
            "triage red_flags has no string items".into(),
        ));
    }
    Ok(TriageFinding::from_flags(
        items.iter().filter_map(Value::as_str),
    ))
}

const FACT_KEYS: &[&str] = &[
    "symptoms",
    "history",
    "medications",
    "functionalStatus",
    "functional_status",
    "examFindings",
    "exam_findings",
    "demographics",
];

fn parse_facts(map: &Map<String, Value>) -> Result<ClinicalFactSet, StageFault> {
    if !FACT_KEYS.iter().any(|k| map.contains_key(*k)) {
        return Err(StageFault::Schema(
            "extraction output has no fact fields".into(),
        ));
    }

    let demographics = match field(map, &["demographics"]) {
        Some(Value::Object(d)) => Some(Demographics {
            age: match d.get("age") {
                Some(Value::Number(n)) => n.as_u64().and_then(|a| u32::try_from(a).ok()),
                Some(Value::String(s)) => s.trim().parse().ok(),
                _ => None,
            },
            sex: string_value(d.get("sex")),
            occupation: string_value(d.get("occupation")),
        }),
        _ => None,
    };

    Ok(ClinicalFactSet {
        symptoms: string_list(field(map, &["symptoms"])),
        history: string_list(field(map, &["history"])),
        medications: string_list(field(map, &["medications"])),
        functional_status: string_value(field(map, &["functionalStatus", "functional_status"])),
        exam_findings: string_list(field(map, &["examFindings", "exam_findings"])),
        demographics,
    })
}

/// Model-shaped warning; converted leniently into `Warning`.
#[derive(Deserialize)]
struct RawWarning {
    #[serde(default)]
    category: Option<String>,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    evidence: Option<Value>,
}

#[derive(Deserialize)]
struct RawSuggestion {
    #[serde(default)]
    category: Option<String>,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

/// Parse an array leniently, skipping items that fail to deserialize.
fn parse_array_lenient<T: for<'de> Deserialize<'de>>(items: Option<&Value>) -> Vec<T> {
    match items {
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect(),
        _ => vec![],
    }
}

/// A list field may be absent, but when present it must be a list.
fn list_field<'a>(
    map: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Value>, StageFault> {
    match field(map, &[key]) {
        None => Ok(None),
        Some(v @ Value::Array(_)) => Ok(Some(v)),
        Some(_) => Err(StageFault::Schema(format!(
            "synthesis {key} is not a list"
        ))),
    }
}

fn category_or_general(category: Option<String>) -> String {
    category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "general".into())
}

fn parse_analysis(map: &Map<String, Value>) -> Result<ClinicalAnalysis, StageFault> {
    let soap = match field(map, &["soap", "soapQuality", "soap_quality"]) {
        Some(Value::Object(s)) => SoapQuality::new(
            score(s.get("subjective")),
            score(s.get("objective")),
            score(s.get("assessment")),
            score(s.get("plan")),
        ),
        _ => {
            return Err(StageFault::Schema(
                "synthesis output has no soap scores".into(),
            ))
        }
    };

    let warnings = parse_array_lenient::<RawWarning>(list_field(map, "warnings")?)
        .into_iter()
        .filter(|w| !w.title.trim().is_empty())
        .map(|w| Warning {
            category: category_or_general(w.category),
            title: w.title.trim().to_string(),
            description: w.description.unwrap_or_default(),
            severity: w
                .severity
                .as_deref()
                .map(Severity::parse_lenient)
                .unwrap_or_default(),
            evidence: string_list(w.evidence.as_ref()).unwrap_or_default(),
        })
        .collect();

    let suggestions = parse_array_lenient::<RawSuggestion>(list_field(map, "suggestions")?)
        .into_iter()
        .filter(|s| !s.title.trim().is_empty())
        .map(|s| Suggestion {
            category: category_or_general(s.category),
            title: s.title.trim().to_string(),
            description: s.description.unwrap_or_default(),
            priority: s
                .priority
                .as_deref()
                .map(Severity::parse_lenient)
                .unwrap_or_default(),
        })
        .collect();

    let soap_note = match field(map, &["soapNote", "soap_note"]) {
        Some(Value::Object(n)) => SoapNote {
            subjective: string_value(n.get("subjective")),
            objective: string_value(n.get("objective")),
            assessment: string_value(n.get("assessment")),
            plan: string_value(n.get("plan")),
        },
        _ => SoapNote::default(),
    };

    Ok(ClinicalAnalysis {
        warnings,
        suggestions,
        soap,
        soap_note,
        summary: string_value(field(map, &["summary"])).unwrap_or_default(),
        fallback: None,
    })
}
