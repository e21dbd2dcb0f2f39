use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + lenient parse.
///
/// Unknown or differently-cased input degrades to `$fallback` instead of
/// failing: request fields are free text from the caller.
macro_rules! str_enum {
    ($name:ident (fallback $fallback:ident) { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }

            /// Strict parse of the canonical snake_case label.
            pub fn from_label(s: &str) -> Option<Self> {
                match s {
                    $($s => Some(Self::$variant)),+,
                    _ => None,
                }
            }

            /// Lenient parse: trims, lowercases, accepts `-`/space for `_`.
            pub fn parse_lenient(s: &str) -> Self {
                let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
                Self::from_label(&normalized).unwrap_or(Self::$fallback)
            }

            pub fn all() -> &'static [$name] {
                &[$(Self::$variant),+]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Specialty (fallback General) {
    General => "general",
    Physiotherapy => "physiotherapy",
    Cardiology => "cardiology",
    Neurology => "neurology",
    Oncology => "oncology",
    Pulmonology => "pulmonology",
    Psychology => "psychology",
    Pediatrics => "pediatrics",
});

str_enum!(SessionType (fallback Consultation) {
    Initial => "initial",
    FollowUp => "follow_up",
    Evaluation => "evaluation",
    Discharge => "discharge",
    Consultation => "consultation",
});

str_enum!(ModelTier (fallback Accurate) {
    Fast => "fast",
    Accurate => "accurate",
});

str_enum!(Stage (fallback Synthesize) {
    Triage => "triage",
    Extract => "extract",
    Synthesize => "synthesize",
});

/// Ordered severity used for warnings and suggestion priority.
///
/// Declaration order is rank order: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Model output uses many spellings (`"urgent"`, `"alta"`, `"HIGH"`).
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" | "baja" | "minor" | "info" => Self::Low,
            "high" | "alta" | "severe" | "major" => Self::High,
            "critical" | "critica" | "crítica" | "urgent" | "urgente" | "emergency" => {
                Self::Critical
            }
            _ => Self::Medium,
        }
    }
}
