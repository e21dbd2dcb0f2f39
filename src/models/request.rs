use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::enums::{SessionType, Specialty};

/// Minimum transcript length (characters).
pub const MIN_TRANSCRIPT_CHARS: usize = 10;

/// Minimum number of whitespace-delimited tokens.
pub const MIN_TRANSCRIPT_TOKENS: usize = 3;

/// Inbound body of `POST /analyze`, exactly as the caller sends it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeBody {
    pub transcription: String,
    pub specialty: String,
    pub session_type: String,
}

/// A request the core can work with. Built only through `validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub transcript: String,
    pub specialty: Specialty,
    pub session_type: SessionType,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestViolation {
    #[error("Transcript too short ({chars} characters, minimum {min})")]
    TooShort { chars: usize, min: usize },

    #[error("Transcript too long ({chars} characters, maximum {max})")]
    TooLong { chars: usize, max: usize },

    #[error("Transcript needs at least {min} words (found {tokens})")]
    TooFewTokens { tokens: usize, min: usize },
}

impl AnalyzeBody {
    /// Enforce the transcript invariants and resolve enum fields.
    ///
    /// Stateless and I/O-free. Specialty and session type never fail:
    /// unknown labels degrade to `general` / `consultation`.
    pub fn validate(self, max_chars: usize) -> Result<AnalysisRequest, RequestViolation> {
        let chars = self.transcription.chars().count();
        if chars < MIN_TRANSCRIPT_CHARS {
            return Err(RequestViolation::TooShort {
                chars,
                min: MIN_TRANSCRIPT_CHARS,
            });
        }
        if chars > max_chars {
            return Err(RequestViolation::TooLong {
                chars,
                max: max_chars,
            });
        }
        let tokens = self.transcription.split_whitespace().count();
        if tokens < MIN_TRANSCRIPT_TOKENS {
            return Err(RequestViolation::TooFewTokens {
                tokens,
                min: MIN_TRANSCRIPT_TOKENS,
            });
        }

        Ok(AnalysisRequest {
            transcript: self.transcription,
            specialty: Specialty::parse_lenient(&self.specialty),
            session_type: SessionType::parse_lenient(&self.session_type),
        })
    }
}

impl AnalysisRequest {
    /// Content hash over `(transcript, specialty, session_type)`.
    ///
    /// Fields are separated by a NUL byte so distinct triples never collide
    /// by concatenation.
    pub fn cache_key(&self) -> String {
        use base64::Engine;

        let mut hasher = Sha256::new();
        hasher.update(self.transcript.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.specialty.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.session_type.as_str().as_bytes());
        base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
    }
}
