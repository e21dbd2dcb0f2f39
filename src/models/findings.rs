//! Intermediate results of the advisory stages (triage and extraction).

use serde::{Deserialize, Serialize};

/// Maximum red flags kept from one triage pass.
pub const MAX_TRIAGE_FLAGS: usize = 10;

/// Maximum characters per red-flag string.
pub const MAX_FLAG_CHARS: usize = 160;

/// Ordered, de-duplicated set of short red-flag strings.
///
/// Empty means triage ran and found nothing; a failed triage is carried as
/// an error by the cascade, never as an empty finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct TriageFinding {
    flags: Vec<String>,
}

impl TriageFinding {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from raw strings: trims, truncates, drops blanks and
    /// duplicates under Unicode lowercasing, keeps the first `MAX_TRIAGE_FLAGS`.
    pub fn from_flags<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flags: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for item in raw {
            if flags.len() == MAX_TRIAGE_FLAGS {
                break;
            }
            let trimmed = item.as_ref().trim();
            if trimmed.is_empty() {
                continue;
            }
            let flag: String = trimmed.chars().take(MAX_FLAG_CHARS).collect();
            let key = flag.to_lowercase();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            flags.push(flag);
        }
        Self { flags }
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Demographics {
    pub age: Option<u32>,
    pub sex: Option<String>,
    pub occupation: Option<String>,
}

/// Structured facts pulled from the transcript.
///
/// Every field is explicitly nullable and always serialized, so synthesis
/// can tell "unknown" (null) from "absent" (empty list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalFactSet {
    #[serde(default)]
    pub symptoms: Option<Vec<String>>,
    #[serde(default)]
    pub history: Option<Vec<String>>,
    #[serde(default)]
    pub medications: Option<Vec<String>>,
    #[serde(default)]
    pub functional_status: Option<String>,
    #[serde(default)]
    pub exam_findings: Option<Vec<String>>,
    #[serde(default)]
    pub demographics: Option<Demographics>,
}

impl ClinicalFactSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no field carries information.
    pub fn is_unknown(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triage_dedups_and_caps() {
        let raw: Vec<String> = (0..15).map(|i| format!("flag {i}")).collect();
        let mut with_dupes = vec!["Flag 0".to_string(), "  ".to_string()];
        with_dupes.extend(raw);
        let finding = TriageFinding::from_flags(with_dupes);
        assert_eq!(finding.len(), MAX_TRIAGE_FLAGS);
        assert_eq!(finding.flags()[0], "Flag 0");
        assert_eq!(finding.flags()[1], "flag 1");
    }

    #[test]
    fn triage_dedup_folds_accented_case() {
        let finding = TriageFinding::from_flags(["Dolor TORÁCICO", "dolor torácico", "Disnea"]);
        assert_eq!(finding.flags(), &["Dolor TORÁCICO", "Disnea"]);
    }

    #[test]
    fn triage_truncates_long_flags() {
        let long = "x".repeat(500);
        let finding = TriageFinding::from_flags([long]);
        assert_eq!(finding.flags()[0].chars().count(), MAX_FLAG_CHARS);
    }

    #[test]
    fn fact_set_serializes_nulls_not_omissions() {
        let json = serde_json::to_value(ClinicalFactSet::empty()).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "symptoms",
            "history",
            "medications",
            "functionalStatus",
            "examFindings",
            "demographics",
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
            assert!(obj[key].is_null());
        }
    }

    #[test]
    fn fact_set_distinguishes_absent_from_unknown() {
        let facts: ClinicalFactSet =
            serde_json::from_str(r#"{"medications": [], "symptoms": null}"#).unwrap();
        assert_eq!(facts.medications, Some(vec![]));
        assert_eq!(facts.symptoms, None);
        assert!(!facts.is_unknown());
    }
}
