//! Specialty knowledge lookup injected into prompts.

use serde::Serialize;

use crate::models::Specialty;

/// Per-specialty hints for the model: what to screen for, what to avoid,
/// and vocabulary the clinician is likely to use.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub red_flags: Vec<String>,
    pub contraindications: Vec<String>,
    pub terminology: Vec<String>,
}

impl KnowledgeEntry {
    fn from_static(
        red_flags: &[&str],
        contraindications: &[&str],
        terminology: &[&str],
    ) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            red_flags: owned(red_flags),
            contraindications: owned(contraindications),
            terminology: owned(terminology),
        }
    }
}

/// Read-only knowledge source. A `None` means "no specialty-specific entry".
pub trait SpecialtyKnowledge: Send + Sync {
    fn get(&self, specialty: Specialty) -> Option<KnowledgeEntry>;
}

/// Entry used whenever a specialty has no dedicated table.
pub fn generic_entry() -> KnowledgeEntry {
    KnowledgeEntry::from_static(
        &[
            "chest pain with radiation or sweating",
            "sudden neurological deficit",
            "unexplained weight loss",
            "fever with systemic signs",
            "syncope",
        ],
        &["prescribing without reviewing current medications and allergies"],
        &["anamnesis", "vital signs", "differential diagnosis"],
    )
}

/// Entry for `specialty`, or the generic table when the source has none.
pub fn resolve(knowledge: &dyn SpecialtyKnowledge, specialty: Specialty) -> KnowledgeEntry {
    knowledge.get(specialty).unwrap_or_else(generic_entry)
}

/// Compiled-in tables for the specialties the service is tuned for.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinKnowledge;

impl SpecialtyKnowledge for BuiltinKnowledge {
    fn get(&self, specialty: Specialty) -> Option<KnowledgeEntry> {
        let entry = match specialty {
            Specialty::Physiotherapy => KnowledgeEntry::from_static(
                &[
                    "night pain that does not ease with rest",
                    "saddle anaesthesia or bladder/bowel change (cauda equina)",
                    "progressive limb weakness",
                    "history of cancer with new back pain",
                    "trauma with suspected fracture",
                ],
                &[
                    "manipulation with unexplained neurological signs",
                    "heat or massage over suspected deep vein thrombosis",
                    "loading exercise over an unstable fracture",
                ],
                &["ROM", "EVA/VAS", "Lasègue", "Daniels scale", "propioception"],
            ),
            Specialty::Cardiology => KnowledgeEntry::from_static(
                &[
                    "oppressive chest pain radiating to arm or jaw",
                    "syncope on exertion",
                    "dyspnoea at rest or orthopnoea",
                    "new palpitations with dizziness",
                    "bilateral leg oedema",
                ],
                &[
                    "strenuous exercise testing with unstable angina",
                    "NSAIDs in heart failure",
                ],
                &["NYHA", "ECG", "troponin", "ejection fraction", "angina"],
            ),
            Specialty::Neurology => KnowledgeEntry::from_static(
                &[
                    "sudden unilateral weakness or facial droop",
                    "thunderclap headache",
                    "new seizure",
                    "rapidly progressive sensory loss",
                ],
                &["delaying imaging in suspected stroke"],
                &["Glasgow", "NIHSS", "paresthesia", "ataxia", "reflexes"],
            ),
            Specialty::Oncology => KnowledgeEntry::from_static(
                &[
                    "unexplained weight loss",
                    "new bone pain in a known cancer patient",
                    "spinal cord compression signs",
                    "neutropenic fever",
                ],
                &["live vaccines during chemotherapy"],
                &["ECOG", "staging", "metastasis", "chemotherapy cycle"],
            ),
            Specialty::Pulmonology => KnowledgeEntry::from_static(
                &[
                    "haemoptysis",
                    "sudden dyspnoea with pleuritic pain",
                    "oxygen saturation below 92%",
                ],
                &["sedatives in hypercapnic patients"],
                &["FEV1", "spirometry", "SpO2", "wheezing", "crackles"],
            ),
            Specialty::General
            | Specialty::Psychology
            | Specialty::Pediatrics => return None,
        };
        Some(entry)
    }
}
