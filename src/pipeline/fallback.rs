//! Network-free keyword analysis used when the model path fails.
//!
//! Output is deliberately conservative: warnings come only from the risk
//! patterns, and every result carries a `fallback` marker with confidence
//! at most `FALLBACK_CONFIDENCE`.

use thiserror::Error;

use super::risk::{RiskClassifier, RiskMatch};
use crate::models::{
    AnalysisRequest, ClinicalAnalysis, FallbackRecord, SessionType, Severity, SoapNote,
    SoapQuality, Specialty, Suggestion, Warning,
};

pub const FALLBACK_CONFIDENCE: f32 = 0.5;
/// Confidence when the transcript had no recognisable signal at all.
pub const WEAK_FALLBACK_CONFIDENCE: f32 = 0.3;

const ANALYZER_NAME: &str = "keyword";

/// Score added per distinct section keyword found.
const SECTION_KEYWORD_POINTS: f32 = 25.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FallbackError {
    #[error("Transcript has no analysable text")]
    EmptyTranscript,
}

const SUBJECTIVE_SIGNALS: &[&str] = &[
    "refiere", "dolor", "siente", "desde hace", "molestia", "reports", "pain", "feels", "complains",
];
const OBJECTIVE_SIGNALS: &[&str] = &[
    "exploración", "examen", "rango de movimiento", "movilidad", "presión arterial",
    "frecuencia cardiaca", "temperatura", "palpación", "exam", "range of motion",
    "blood pressure", "heart rate", "palpation",
];
const ASSESSMENT_SIGNALS: &[&str] = &[
    "diagnóstico", "impresión", "compatible con", "sospecha", "probable", "valoración",
    "diagnosis", "impression", "consistent with", "suspected",
];
const PLAN_SIGNALS: &[&str] = &[
    "plan", "tratamiento", "indicaciones", "ejercicios", "control", "derivar", "seguimiento",
    "treatment", "exercises", "follow-up", "refer",
];

fn specialty_suggestions(specialty: Specialty) -> &'static [(&'static str, &'static str)] {
    match specialty {
        Specialty::Physiotherapy => &[
            ("documentation", "Record range of motion and pain scale (VAS) for each affected joint"),
            ("treatment", "Define measurable functional goals for the exercise program"),
        ],
        Specialty::Cardiology => &[
            ("documentation", "Record blood pressure, heart rate and ECG findings"),
        ],
        Specialty::Neurology => &[
            ("documentation", "Record a focused neurological exam (strength, sensation, reflexes)"),
        ],
        Specialty::Oncology => &[
            ("documentation", "Record performance status (ECOG) and current treatment cycle"),
        ],
        Specialty::Pulmonology => &[
            ("documentation", "Record oxygen saturation and respiratory rate"),
        ],
        Specialty::Psychology => &[
            ("safety", "Document a risk assessment for self-harm"),
        ],
        Specialty::Pediatrics => &[
            ("documentation", "Record weight, height and developmental milestones"),
        ],
        Specialty::General => &[
            ("documentation", "Record vital signs and current medications"),
        ],
    }
}

fn session_suggestion(session_type: SessionType) -> (&'static str, &'static str) {
    match session_type {
        SessionType::Initial => ("documentation", "Complete the anamnesis and baseline measurements"),
        SessionType::FollowUp => ("follow_up", "Compare progress against the previous session"),
        SessionType::Evaluation => ("documentation", "Record standardised outcome measures"),
        SessionType::Discharge => ("treatment", "Provide a written home program and return criteria"),
        SessionType::Consultation => ("follow_up", "Agree on a follow-up date and plan"),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackAnalyzer {
    risk: RiskClassifier,
}

impl FallbackAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyword analysis. `reason` is the error kind that forced the fallback.
    pub fn try_analyze(
        &self,
        transcript: &str,
        specialty: Specialty,
        session_type: SessionType,
        reason: &str,
    ) -> Result<ClinicalAnalysis, FallbackError> {
        if transcript.trim().is_empty() {
            return Err(FallbackError::EmptyTranscript);
        }

        let risk = self.risk.classify(transcript);
        let mut warnings: Vec<Warning> = risk
            .critical
            .iter()
            .map(|m| warning_from(m, Severity::Critical))
            .collect();
        warnings.extend(risk.high.iter().map(|m| warning_from(m, Severity::High)));

        let mut suggestions = Vec::new();
        if risk.critical_matches > 0 {
            suggestions.push(Suggestion {
                category: "referral".into(),
                title: "Urgent medical referral".into(),
                description: "A critical red-flag pattern was detected; confirm clinically before continuing.".into(),
                priority: Severity::Critical,
            });
        }
        suggestions.extend(specialty_suggestions(specialty).iter().map(|(category, title)| {
            Suggestion {
                category: (*category).into(),
                title: (*title).into(),
                description: String::new(),
                priority: Severity::Medium,
            }
        }));
        let (category, title) = session_suggestion(session_type);
        suggestions.push(Suggestion {
            category: category.into(),
            title: title.into(),
            description: String::new(),
            priority: Severity::Low,
        });

        let lower = transcript.to_lowercase();
        let soap = SoapQuality::new(
            section_score(&lower, SUBJECTIVE_SIGNALS),
            section_score(&lower, OBJECTIVE_SIGNALS),
            section_score(&lower, ASSESSMENT_SIGNALS),
            section_score(&lower, PLAN_SIGNALS),
        );

        let has_signal = !warnings.is_empty() || soap.overall() > 0.0;
        let confidence = if has_signal {
            FALLBACK_CONFIDENCE
        } else {
            WEAK_FALLBACK_CONFIDENCE
        };

        Ok(ClinicalAnalysis {
            summary: format!(
                "Keyword analysis of a {specialty} {session_type} session: {} critical and {} high-risk findings. Model analysis was unavailable; review manually.",
                risk.critical_matches, risk.high_matches,
            ),
            warnings,
            suggestions,
            soap,
            soap_note: SoapNote::default(),
            fallback: Some(FallbackRecord {
                reason: reason.to_string(),
                analyzer: ANALYZER_NAME.into(),
                confidence,
            }),
        })
    }

    /// Like `try_analyze`, but degrades any failure to the minimal analysis.
    pub fn analyze(
        &self,
        transcript: &str,
        specialty: Specialty,
        session_type: SessionType,
        reason: &str,
    ) -> ClinicalAnalysis {
        self.try_analyze(transcript, specialty, session_type, reason)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Keyword analysis failed; using minimal analysis");
                ClinicalAnalysis::minimal(reason)
            })
    }
}

/// Local analysis the gateway runs after the model path failed.
pub trait OfflineAnalyzer: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest, reason: &str) -> ClinicalAnalysis;
}

impl OfflineAnalyzer for FallbackAnalyzer {
    fn analyze(&self, request: &AnalysisRequest, reason: &str) -> ClinicalAnalysis {
        FallbackAnalyzer::analyze(
            self,
            &request.transcript,
            request.specialty,
            request.session_type,
            reason,
        )
    }
}

fn warning_from(m: &RiskMatch, severity: Severity) -> Warning {
    Warning {
        category: m.domain.as_str().into(),
        title: m.label.clone(),
        description: "Detected by keyword screening; confirm clinically.".into(),
        severity,
        evidence: vec![m.excerpt.clone()],
    }
}

fn section_score(lower: &str, signals: &[&str]) -> f32 {
    let hits = signals.iter().filter(|s| lower.contains(*s)).count();
    hits as f32 * SECTION_KEYWORD_POINTS
}
