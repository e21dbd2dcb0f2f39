pub mod cascade;
pub mod chunking;
pub mod fallback;
pub mod inference;
pub mod knowledge;
pub mod prompt;
pub mod remote;
pub mod risk;

use thiserror::Error;

use crate::models::{RequestViolation, Stage};
use inference::InferenceError;

/// Failure of one analysis run, as seen by the gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Invalid request: {0}")]
    Validation(#[from] RequestViolation),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Quota exceeded: {0}")]
    Quota(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Stage {stage} failed: {reason}")]
    StageFailure { stage: Stage, reason: String },
}

impl AnalysisError {
    /// Stable snake_case label used as the response `error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transport(_) => "transport",
            Self::MalformedOutput(_) => "malformed_output",
            Self::Quota(_) => "quota",
            Self::Permission(_) => "permission",
            Self::StageFailure { .. } => "stage_failure",
        }
    }

    /// Human-readable message for the response body. Never echoes model text.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(v) => v.to_string(),
            Self::Transport(_) => {
                "The analysis model could not be reached in time; a local keyword analysis was used instead.".into()
            }
            Self::MalformedOutput(_) => {
                "The analysis model returned an unreadable answer; a local keyword analysis was used instead.".into()
            }
            Self::Quota(_) => {
                "The analysis model quota is exhausted; a local keyword analysis was used instead.".into()
            }
            Self::Permission(_) => {
                "The analysis model rejected the service credentials; a local keyword analysis was used instead.".into()
            }
            Self::StageFailure { stage, .. } => format!(
                "The {stage} stage could not complete; a local keyword analysis was used instead."
            ),
        }
    }
}

impl From<InferenceError> for AnalysisError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::Timeout(_)
            | InferenceError::Connection(_)
            | InferenceError::Status { .. }
            | InferenceError::Http(_) => Self::Transport(err.to_string()),
            InferenceError::Quota(msg) => Self::Quota(msg),
            InferenceError::Permission(msg) => Self::Permission(msg),
            InferenceError::MalformedOutput(msg) => Self::MalformedOutput(msg),
        }
    }
}

/// What went wrong inside one stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageFault {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// Valid JSON that does not have the stage's required shape.
    #[error("Unexpected output shape: {0}")]
    Schema(String),
}

impl StageFault {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Inference(e) => e.is_retryable(),
            Self::Schema(_) => true,
        }
    }
}

/// A stage that was skipped because it failed, kept distinct from a stage
/// that ran and found nothing.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    pub source: StageFault,
}

impl StageError {
    pub fn new(stage: Stage, source: impl Into<StageFault>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

impl From<StageError> for AnalysisError {
    fn from(err: StageError) -> Self {
        match err.source {
            StageFault::Inference(e) => e.into(),
            StageFault::Schema(reason) => Self::StageFailure {
                stage: err.stage,
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(AnalysisError::Transport("x".into()).kind(), "transport");
        assert_eq!(AnalysisError::Quota("x".into()).kind(), "quota");
        assert_eq!(
            AnalysisError::StageFailure {
                stage: Stage::Synthesize,
                reason: "no soap".into()
            }
            .kind(),
            "stage_failure"
        );
        let v = RequestViolation::TooShort { chars: 4, min: 10 };
        assert_eq!(AnalysisError::from(v).kind(), "validation");
    }

    #[test]
    fn inference_errors_map_to_kinds() {
        let cases = [
            (InferenceError::Timeout(5), "transport"),
            (InferenceError::Connection("h".into()), "transport"),
            (InferenceError::from_status(503, "busy".into()), "transport"),
            (InferenceError::Quota("q".into()), "quota"),
            (InferenceError::Permission("p".into()), "permission"),
            (InferenceError::MalformedOutput("m".into()), "malformed_output"),
        ];
        for (err, kind) in cases {
            assert_eq!(AnalysisError::from(err).kind(), kind);
        }
    }

    #[test]
    fn schema_fault_becomes_stage_failure() {
        let err = StageError::new(Stage::Synthesize, StageFault::Schema("missing soap".into()));
        assert!(matches!(
            AnalysisError::from(err),
            AnalysisError::StageFailure {
                stage: Stage::Synthesize,
                ..
            }
        ));
    }

    #[test]
    fn quota_stage_errors_are_not_retried() {
        let err = StageError::new(Stage::Triage, InferenceError::Quota("q".into()));
        assert!(!err.is_retryable());
        let err = StageError::new(Stage::Triage, InferenceError::Timeout(1));
        assert!(err.is_retryable());
    }

    #[test]
    fn user_message_never_empty() {
        let err = AnalysisError::StageFailure {
            stage: Stage::Synthesize,
            reason: "x".into(),
        };
        assert!(err.user_message().contains("synthesize"));
    }
}
