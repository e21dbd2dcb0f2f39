//! Terminal artifact of an analysis and the response envelope around it.

use serde::{Deserialize, Serialize};

use super::enums::{ModelTier, Severity};

/// A clinical red flag surfaced to the clinician.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    /// Transcript excerpts supporting the warning, in transcript order.
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// A treatment or workflow suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub category: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Severity,
}

/// Quality of the consultation record per SOAP section, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SoapQuality {
    pub subjective: f32,
    pub objective: f32,
    pub assessment: f32,
    pub plan: f32,
}

impl SoapQuality {
    pub fn new(subjective: f32, objective: f32, assessment: f32, plan: f32) -> Self {
        Self {
            subjective,
            objective,
            assessment,
            plan,
        }
        .clamped()
    }

    /// Force every sub-score into `[0, 100]`; NaN becomes 0.
    pub fn clamped(self) -> Self {
        fn clamp(v: f32) -> f32 {
            if v.is_nan() {
                0.0
            } else {
                v.clamp(0.0, 100.0)
            }
        }
        Self {
            subjective: clamp(self.subjective),
            objective: clamp(self.objective),
            assessment: clamp(self.assessment),
            plan: clamp(self.plan),
        }
    }

    pub fn overall(&self) -> f32 {
        (self.subjective + self.objective + self.assessment + self.plan) / 4.0
    }

    pub fn in_range(&self) -> bool {
        [self.subjective, self.objective, self.assessment, self.plan]
            .iter()
            .all(|v| (0.0..=100.0).contains(v))
    }
}

/// SOAP-formatted note text. Sections the model could not write stay null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SoapNote {
    pub subjective: Option<String>,
    pub objective: Option<String>,
    pub assessment: Option<String>,
    pub plan: Option<String>,
}

/// Marker attached when the analysis came from the local keyword analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRecord {
    /// Error kind that forced the fallback (`transport`, `quota`, ...).
    pub reason: String,
    pub analyzer: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalAnalysis {
    pub warnings: Vec<Warning>,
    pub suggestions: Vec<Suggestion>,
    pub soap: SoapQuality,
    pub soap_note: SoapNote,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackRecord>,
}

impl ClinicalAnalysis {
    /// Smallest structurally valid analysis: empty lists, zero scores.
    pub fn minimal(reason: &str) -> Self {
        Self {
            warnings: Vec::new(),
            suggestions: Vec::new(),
            soap: SoapQuality::default(),
            soap_note: SoapNote::default(),
            summary: "Automatic analysis unavailable; review the transcript manually.".into(),
            fallback: Some(FallbackRecord {
                reason: reason.to_string(),
                analyzer: "minimal".into(),
                confidence: 0.1,
            }),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Observability data about one cascade run. Never used for decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CascadeMetadata {
    pub stages_completed: u8,
    /// Model identifier per stage, in `triage, extract, synthesize` order.
    pub per_stage_model: Vec<String>,
    pub total_latency_ms: u64,
    pub fallback_triggered: bool,
    pub chunk_count: usize,
    /// Stages skipped because they failed (distinct from "found nothing").
    pub degraded_stages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tier: Option<ModelTier>,
    #[serde(default)]
    pub cached: bool,
}

/// The one envelope shape every `/analyze` outcome uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ClinicalAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CascadeMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AnalysisResponse {
    pub fn succeeded(analysis: ClinicalAnalysis, metadata: CascadeMetadata) -> Self {
        Self {
            success: true,
            analysis: Some(analysis),
            metadata: Some(metadata),
            error: None,
            message: None,
        }
    }

    /// Remote path failed; the local analyzer produced `analysis`.
    pub fn fell_back(
        analysis: ClinicalAnalysis,
        metadata: CascadeMetadata,
        error: &str,
        message: String,
    ) -> Self {
        Self {
            success: false,
            analysis: Some(analysis),
            metadata: Some(metadata),
            error: Some(error.to_string()),
            message: Some(message),
        }
    }

    /// Both the remote path and the fallback failed.
    pub fn exhausted(error: &str) -> Self {
        Self {
            success: false,
            analysis: None,
            metadata: None,
            error: Some(error.to_string()),
            message: Some(
                "The analysis service is temporarily unavailable. Please try again later.".into(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soap_scores_are_clamped() {
        let q = SoapQuality::new(-5.0, 140.0, f32::NAN, 50.0);
        assert_eq!(q.subjective, 0.0);
        assert_eq!(q.objective, 100.0);
        assert_eq!(q.assessment, 0.0);
        assert!(q.in_range());
    }

    #[test]
    fn overall_is_mean_of_sections() {
        let q = SoapQuality::new(80.0, 60.0, 40.0, 20.0);
        assert!((q.overall() - 50.0).abs() < f32::EPSILON);
    }

    #[test]
    fn minimal_analysis_is_structurally_complete() {
        let a = ClinicalAnalysis::minimal("transport");
        let json = serde_json::to_value(&a).unwrap();
        assert!(json["warnings"].as_array().unwrap().is_empty());
        assert!(json["suggestions"].as_array().unwrap().is_empty());
        assert_eq!(json["soap"]["plan"], 0.0);
        assert!(json["soapNote"]["subjective"].is_null());
        assert_eq!(json["fallback"]["reason"], "transport");
    }

    #[test]
    fn exhausted_envelope_omits_analysis() {
        let json = serde_json::to_value(AnalysisResponse::exhausted("internal")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "internal");
        assert!(json.get("analysis").is_none());
        assert!(json["message"].as_str().unwrap().len() > 10);
    }

    #[test]
    fn metadata_uses_camel_case() {
        let meta = CascadeMetadata {
            stages_completed: 3,
            fallback_triggered: true,
            ..Default::default()
        };
        let json = serde_json::to_value(meta).unwrap();
        assert_eq!(json["stagesCompleted"], 3);
        assert_eq!(json["fallbackTriggered"], true);
        assert!(json["perStageModel"].is_array());
    }

    #[test]
    fn warning_deserializes_with_missing_optional_fields() {
        let w: Warning =
            serde_json::from_str(r#"{"category":"cardio","title":"Chest pain"}"#).unwrap();
        assert_eq!(w.severity, Severity::Medium);
        assert!(w.evidence.is_empty());
    }
}
