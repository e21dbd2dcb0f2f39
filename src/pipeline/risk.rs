//! Offline risk scoring that picks the inference tier before any call.
//!
//! Two ordered pattern families over Spanish and English phrasing:
//! - critical: red-flag phrase *combinations* (cardiovascular, neurological,
//!   oncological, respiratory)
//! - high: single-symptom red flags
//!
//! Decision rule, first match wins:
//! 1. any critical match -> accurate (0.95)
//! 2. two or more high matches -> accurate (0.85)
//! 3. otherwise -> fast (0.90)
//!
//! Borderline input leans toward the accurate tier.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::ModelTier;

pub const CRITICAL_CONFIDENCE: f32 = 0.95;
pub const HIGH_CONFIDENCE: f32 = 0.85;
pub const ROUTINE_CONFIDENCE: f32 = 0.90;

/// High matches needed to escalate without a critical match.
pub const HIGH_ESCALATION_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDomain {
    Cardiovascular,
    Neurological,
    Oncological,
    Respiratory,
    General,
}

impl RiskDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cardiovascular => "cardiovascular",
            Self::Neurological => "neurological",
            Self::Oncological => "oncological",
            Self::Respiratory => "respiratory",
            Self::General => "general",
        }
    }
}

/// A compiled pattern with its metadata.
pub struct RiskPattern {
    regex: Regex,
    pub domain: RiskDomain,
    pub label: &'static str,
}

impl RiskPattern {
    pub fn find<'t>(&self, text: &'t str) -> Option<regex::Match<'t>> {
        self.regex.find(text)
    }
}

fn pattern(regex_str: &str, domain: RiskDomain, label: &'static str) -> RiskPattern {
    RiskPattern {
        regex: Regex::new(regex_str).expect("Invalid risk regex pattern"),
        domain,
        label,
    }
}

static CRITICAL_PATTERNS: LazyLock<Vec<RiskPattern>> = LazyLock::new(|| {
    vec![
        pattern(
            r"(?i)dolor\s+(?:tor[aá]cico|en\s+el\s+pecho|precordial|opresivo)[^.]{0,80}(?:irradiad[oa]|brazo\s+izquierdo|mand[ií]bula|sudoraci[oó]n|diaforesis|disnea)",
            RiskDomain::Cardiovascular,
            "Chest pain with radiation or autonomic signs",
        ),
        pattern(
            r"(?i)chest\s+(?:pain|pressure|tightness)[^.]{0,80}(?:radiat\w*|left\s+arm|jaw|sweat\w*|diaphores\w*|short(?:ness)?\s+of\s+breath)",
            RiskDomain::Cardiovascular,
            "Chest pain with radiation or autonomic signs",
        ),
        pattern(
            r"(?i)(?:p[eé]rdida\s+(?:s[uú]bita\s+)?de\s+(?:fuerza|sensibilidad|conciencia|visi[oó]n)|debilidad\s+s[uú]bita|hemiparesia|hemiplej[ií]a|dificultad\s+para\s+hablar|boca\s+desviada)",
            RiskDomain::Neurological,
            "Acute focal neurological deficit",
        ),
        pattern(
            r"(?i)(?:sudden\s+(?:weakness|numbness|loss\s+of\s+(?:strength|vision|consciousness))|facial\s+droop|slurred\s+speech|hemiparesis)",
            RiskDomain::Neurological,
            "Acute focal neurological deficit",
        ),
        pattern(
            r"(?i)(?:anestesia\s+en\s+silla\s+de\s+montar|saddle\s+an(?:a)?esthesia|(?:incontinencia|retenci[oó]n)\s+(?:urinaria|fecal)[^.]{0,60}(?:lumbar|ci[aá]tica|espalda)|(?:urinary|bowel)\s+(?:incontinence|retention)[^.]{0,60}(?:back|sciatica))",
            RiskDomain::Neurological,
            "Cauda equina signs",
        ),
        pattern(
            r"(?i)(?:cefalea|dolor\s+de\s+cabeza)[^.]{0,60}(?:s[uú]bit[oa]|en\s+trueno|peor\s+de\s+su\s+vida|con\s+rigidez\s+de\s+nuca)|(?:worst|thunderclap)\s+headache",
            RiskDomain::Neurological,
            "Thunderclap headache",
        ),
        pattern(
            r"(?i)(?:p[eé]rdida\s+de\s+peso[^.]{0,60}(?:inexplicad[oa]|involuntari[oa]|sin\s+causa|no\s+intencionad[oa])|unexplained\s+weight\s+loss)",
            RiskDomain::Oncological,
            "Unexplained weight loss",
        ),
        pattern(
            r"(?i)(?:antecedentes?\s+(?:personal(?:es)?\s+)?de\s+(?:c[aá]ncer|neoplasia|tumor)|history\s+of\s+(?:cancer|malignancy))[^.]{0,80}(?:dolor|pain|bulto|lump|masa|mass)",
            RiskDomain::Oncological,
            "Cancer history with new pain or mass",
        ),
        pattern(
            r"(?i)(?:dolor\s+nocturno[^.]{0,60}(?:no\s+cede|constante|en\s+reposo|no\s+mejora)|night\s+pain[^.]{0,60}(?:constant|unrelenting|at\s+rest))",
            RiskDomain::Oncological,
            "Unremitting night pain",
        ),
        pattern(
            r"(?i)(?:disnea|dificultad\s+(?:para|al)\s+respirar|falta\s+de\s+aire)[^.]{0,60}(?:s[uú]bita|en\s+reposo|severa|intensa|dolor\s+pleur)",
            RiskDomain::Respiratory,
            "Acute or resting dyspnoea",
        ),
        pattern(
            r"(?i)(?:hemoptisis|tos\s+con\s+sangre|coughing\s+(?:up\s+)?blood|haemoptysis|hemoptysis|shortness\s+of\s+breath\s+at\s+rest)",
            RiskDomain::Respiratory,
            "Haemoptysis or dyspnoea at rest",
        ),
    ]
});

static HIGH_PATTERNS: LazyLock<Vec<RiskPattern>> = LazyLock::new(|| {
    vec![
        pattern(r"(?i)\b(?:fiebre|febril|fever|febrile)\b", RiskDomain::General, "Fever"),
        pattern(
            r"(?i)\b(?:mareos?|v[eé]rtigo|dizziness|dizzy|vertigo)\b",
            RiskDomain::Neurological,
            "Dizziness or vertigo",
        ),
        pattern(
            r"(?i)\b(?:hormigueo|parestesias?|adormecimiento|entumecimiento|numbness|tingling|paresthesia)\b",
            RiskDomain::Neurological,
            "Paraesthesia",
        ),
        pattern(
            r"(?i)(?:p[eé]rdida\s+de\s+peso|weight\s+loss)",
            RiskDomain::Oncological,
            "Weight loss",
        ),
        pattern(
            r"(?i)(?:dolor\s+nocturno|night\s+pain|pain\s+at\s+night)",
            RiskDomain::Oncological,
            "Night pain",
        ),
        pattern(
            r"(?i)\b(?:s[ií]ncope|desmayos?|fainting|syncope|passed\s+out)\b",
            RiskDomain::Cardiovascular,
            "Syncope",
        ),
        pattern(
            r"(?i)\b(?:palpitaciones|palpitations)\b",
            RiskDomain::Cardiovascular,
            "Palpitations",
        ),
        pattern(
            r"(?i)\b(?:traumatismo|ca[ií]da\s+desde|accidente|trauma|fell\s+from|car\s+accident)\b",
            RiskDomain::General,
            "Significant trauma",
        ),
        pattern(
            r"(?i)\b(?:debilidad|weakness)\b",
            RiskDomain::Neurological,
            "Weakness",
        ),
        pattern(
            r"(?i)(?:visi[oó]n\s+(?:borrosa|doble)|blurred\s+vision|double\s+vision)",
            RiskDomain::Neurological,
            "Visual disturbance",
        ),
        pattern(
            r"(?i)\b(?:edema|hinchaz[oó]n\s+(?:en\s+)?(?:la\s+)?pierna|leg\s+swelling|swollen\s+(?:leg|calf))\b",
            RiskDomain::Cardiovascular,
            "Limb swelling",
        ),
        pattern(
            r"(?i)\b(?:disnea|dyspn(?:o)?ea|short(?:ness)?\s+of\s+breath)\b",
            RiskDomain::Respiratory,
            "Dyspnoea",
        ),
    ]
});

/// One matched pattern, with the first matching excerpt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMatch {
    pub domain: RiskDomain,
    pub label: String,
    pub excerpt: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub critical_matches: usize,
    pub high_matches: usize,
    pub recommended_tier: ModelTier,
    pub reasoning: String,
    pub confidence: f32,
    /// Matched critical patterns, in transcript order.
    pub critical: Vec<RiskMatch>,
    /// Matched high patterns, in transcript order.
    pub high: Vec<RiskMatch>,
}

impl RiskAssessment {
    pub fn is_escalated(&self) -> bool {
        self.recommended_tier == ModelTier::Accurate
    }
}

/// Pure pattern scorer. Stateless; cheap to copy around.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskClassifier;

impl RiskClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, transcript: &str) -> RiskAssessment {
        let critical = scan(&CRITICAL_PATTERNS, transcript);
        let high = scan(&HIGH_PATTERNS, transcript);

        let (tier, confidence) = if !critical.is_empty() {
            (ModelTier::Accurate, CRITICAL_CONFIDENCE)
        } else if high.len() >= HIGH_ESCALATION_THRESHOLD {
            (ModelTier::Accurate, HIGH_CONFIDENCE)
        } else {
            (ModelTier::Fast, ROUTINE_CONFIDENCE)
        };

        RiskAssessment {
            critical_matches: critical.len(),
            high_matches: high.len(),
            recommended_tier: tier,
            reasoning: explain(&critical, &high),
            confidence,
            critical,
            high,
        }
    }
}

fn scan(patterns: &[RiskPattern], text: &str) -> Vec<RiskMatch> {
    let mut matches: Vec<RiskMatch> = patterns
        .iter()
        .filter_map(|p| {
            p.find(text).map(|m| RiskMatch {
                domain: p.domain,
                label: p.label.to_string(),
                excerpt: m.as_str().trim().to_string(),
                offset: m.start(),
            })
        })
        .collect();
    matches.sort_by_key(|m| m.offset);
    matches
}

fn explain(critical: &[RiskMatch], high: &[RiskMatch]) -> String {
    if !critical.is_empty() {
        let mut domains: Vec<&str> = critical.iter().map(|m| m.domain.as_str()).collect();
        domains.dedup();
        return format!(
            "{} critical red-flag pattern(s) matched ({}); routing to the accurate tier",
            critical.len(),
            domains.join(", ")
        );
    }
    if high.len() >= HIGH_ESCALATION_THRESHOLD {
        let labels: Vec<&str> = high.iter().map(|m| m.label.as_str()).collect();
        return format!(
            "{} high-risk findings ({}); routing to the accurate tier",
            high.len(),
            labels.join(", ")
        );
    }
    match high.first() {
        Some(m) => format!("Single high-risk finding ({}); fast tier is sufficient", m.label),
        None => "No red-flag patterns detected; fast tier is sufficient".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> RiskAssessment {
        RiskClassifier::new().classify(text)
    }

    #[test]
    fn radiating_chest_pain_is_critical() {
        let r = classify(
            "Paciente refiere dolor torácico irradiado al brazo izquierdo con sudoración",
        );
        assert_eq!(r.recommended_tier, ModelTier::Accurate);
        assert!(r.critical_matches >= 1);
        assert!((r.confidence - CRITICAL_CONFIDENCE).abs() < f32::EPSILON);
        assert_eq!(r.critical[0].domain, RiskDomain::Cardiovascular);
    }

    #[test]
    fn mild_shoulder_pain_is_routine() {
        let r = classify("El paciente refiere dolor leve en el hombro derecho sin banderas rojas");
        assert_eq!(r.recommended_tier, ModelTier::Fast);
        assert_eq!(r.critical_matches, 0);
        assert!(r.high_matches < HIGH_ESCALATION_THRESHOLD);
        assert!((r.confidence - ROUTINE_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn two_high_flags_escalate() {
        let r = classify("Refiere fiebre desde ayer y mareos al levantarse de la cama");
        assert_eq!(r.critical_matches, 0);
        assert_eq!(r.high_matches, 2);
        assert_eq!(r.recommended_tier, ModelTier::Accurate);
        assert!((r.confidence - HIGH_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn single_high_flag_stays_fast() {
        let r = classify("Patient reports a mild fever after the vaccine yesterday");
        assert_eq!(r.high_matches, 1);
        assert_eq!(r.recommended_tier, ModelTier::Fast);
        assert!(r.reasoning.contains("Fever"));
    }

    #[test]
    fn critical_wins_over_high_count() {
        let r = classify("Sudden weakness in the right arm, fever and dizziness since morning");
        assert!(r.critical_matches >= 1);
        assert!((r.confidence - CRITICAL_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn english_cardiac_combination() {
        let r = classify("He describes chest pain radiating to the jaw while climbing stairs");
        assert_eq!(r.recommended_tier, ModelTier::Accurate);
    }

    #[test]
    fn cauda_equina_is_critical() {
        let r = classify(
            "Dolor lumbar con ciática bilateral y anestesia en silla de montar desde anoche",
        );
        assert!(r.critical.iter().any(|m| m.label == "Cauda equina signs"));
    }

    #[test]
    fn classification_is_pure() {
        let text = "Refiere hemoptisis y pérdida de peso inexplicada en los últimos meses";
        let a = classify(text);
        let b = classify(text);
        assert_eq!(a, b);
    }

    #[test]
    fn each_pattern_counts_once() {
        let r = classify("fiebre, fiebre, fiebre y más fiebre durante la semana");
        assert_eq!(r.high_matches, 1);
    }

    #[test]
    fn matches_are_in_transcript_order() {
        let r = classify("Presenta palpitaciones; antes tuvo fiebre y luego mareos");
        let offsets: Vec<usize> = r.high.iter().map(|m| m.offset).collect();
        let mut sorted = offsets.clone();
        sorted.sort();
        assert_eq!(offsets, sorted);
    }
}
