//! Split oversized transcripts and merge per-chunk analyses.
//!
//! Chunks are contiguous and non-overlapping: concatenating every chunk's
//! text gives back the transcript. Cut points snap to the best boundary in
//! the back half of the window: paragraph break, then sentence end, then any
//! whitespace, then a hard cut on a char boundary.

use serde::Serialize;

use super::AnalysisError;
use crate::models::{ClinicalAnalysis, SoapNote, SoapQuality, Stage, Suggestion, Warning};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptChunk {
    pub index: usize,
    pub text: String,
    /// Offset of the first char of this chunk in the transcript, in chars.
    pub char_offset: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingCoordinator {
    threshold_chars: usize,
    max_chars: usize,
}

impl ChunkingCoordinator {
    pub fn new(threshold_chars: usize, max_chars: usize) -> Self {
        Self {
            threshold_chars,
            max_chars: max_chars.max(1),
        }
    }

    pub fn should_chunk(&self, transcript: &str) -> bool {
        transcript.chars().count() > self.threshold_chars
    }

    pub fn split(&self, transcript: &str) -> Vec<TranscriptChunk> {
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut char_offset = 0usize;

        while start < transcript.len() {
            let rest = &transcript[start..];
            let cut = match rest.char_indices().nth(self.max_chars) {
                None => rest.len(),
                Some((window_end, _)) => snap_cut(&rest[..window_end]),
            };
            let text = &rest[..cut];
            chunks.push(TranscriptChunk {
                index: chunks.len(),
                text: text.to_string(),
                char_offset,
            });
            char_offset += text.chars().count();
            start += cut;
        }
        chunks
    }

    /// Merge per-chunk results in chunk order. Failed chunks contribute
    /// nothing; when every chunk failed the first error is returned.
    pub fn merge(
        &self,
        results: Vec<Result<ClinicalAnalysis, AnalysisError>>,
    ) -> Result<ClinicalAnalysis, AnalysisError> {
        let mut first_error = None;
        let mut analyses = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(a) => analyses.push(a),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if analyses.is_empty() {
            return Err(first_error.unwrap_or_else(|| AnalysisError::StageFailure {
                stage: Stage::Synthesize,
                reason: "no chunk produced a result".into(),
            }));
        }

        let mut warnings: Vec<Warning> = Vec::new();
        let mut suggestions: Vec<Suggestion> = Vec::new();
        for a in &analyses {
            for w in &a.warnings {
                merge_warning(&mut warnings, w);
            }
            for s in &a.suggestions {
                merge_suggestion(&mut suggestions, s);
            }
        }

        let n = analyses.len() as f32;
        let sum = analyses.iter().fold([0.0f32; 4], |acc, a| {
            [
                acc[0] + a.soap.subjective,
                acc[1] + a.soap.objective,
                acc[2] + a.soap.assessment,
                acc[3] + a.soap.plan,
            ]
        });
        let soap = SoapQuality::new(sum[0] / n, sum[1] / n, sum[2] / n, sum[3] / n);

        let soap_note = SoapNote {
            subjective: join_unique(analyses.iter().map(|a| a.soap_note.subjective.as_deref())),
            objective: join_unique(analyses.iter().map(|a| a.soap_note.objective.as_deref())),
            assessment: join_unique(analyses.iter().map(|a| a.soap_note.assessment.as_deref())),
            plan: join_unique(analyses.iter().map(|a| a.soap_note.plan.as_deref())),
        };
        let summary =
            join_unique(analyses.iter().map(|a| Some(a.summary.as_str()))).unwrap_or_default();
        let fallback = analyses.iter().find_map(|a| a.fallback.clone());

        Ok(ClinicalAnalysis {
            warnings,
            suggestions,
            soap,
            soap_note,
            summary,
            fallback,
        })
    }
}

/// Byte index to cut `window` at. Always in `1..=window.len()`.
fn snap_cut(window: &str) -> usize {
    let floor = window.len() / 2;

    if let Some(pos) = window.rfind("\n\n").filter(|&p| p >= floor) {
        return pos + 2;
    }

    let sentence_end = window
        .char_indices()
        .zip(window.chars().skip(1))
        .filter(|((_, c), next)| matches!(c, '.' | '?' | '!') && next.is_whitespace())
        .map(|((i, _), next)| i + 1 + next.len_utf8())
        .filter(|&p| p >= floor)
        .last();
    if let Some(pos) = sentence_end {
        return pos;
    }

    if let Some((pos, ch)) = window
        .char_indices()
        .filter(|(i, c)| c.is_whitespace() && *i >= floor.max(1))
        .last()
    {
        return pos + ch.len_utf8();
    }

    window.len().max(1)
}

fn dedup_key(category: &str, title: &str) -> (String, String) {
    (category.trim().to_lowercase(), title.trim().to_lowercase())
}

fn merge_warning(merged: &mut Vec<Warning>, incoming: &Warning) {
    let key = dedup_key(&incoming.category, &incoming.title);
    match merged
        .iter_mut()
        .find(|w| dedup_key(&w.category, &w.title) == key)
    {
        Some(existing) => {
            if incoming.severity > existing.severity {
                existing.severity = incoming.severity;
                existing.description = incoming.description.clone();
            }
            for e in &incoming.evidence {
                if !existing.evidence.contains(e) {
                    existing.evidence.push(e.clone());
                }
            }
        }
        None => merged.push(incoming.clone()),
    }
}

fn merge_suggestion(merged: &mut Vec<Suggestion>, incoming: &Suggestion) {
    let key = dedup_key(&incoming.category, &incoming.title);
    match merged
        .iter_mut()
        .find(|s| dedup_key(&s.category, &s.title) == key)
    {
        Some(existing) => {
            if incoming.priority > existing.priority {
                existing.priority = incoming.priority;
                existing.description = incoming.description.clone();
            }
        }
        None => merged.push(incoming.clone()),
    }
}

fn join_unique<'a>(parts: impl Iterator<Item = Option<&'a str>>) -> Option<String> {
    let mut seen: Vec<&str> = Vec::new();
    for part in parts.flatten().map(str::trim).filter(|p| !p.is_empty()) {
        if !seen.contains(&part) {
            seen.push(part);
        }
    }
    if seen.is_empty() {
        None
    } else {
        Some(seen.join("\n"))
    }
}
