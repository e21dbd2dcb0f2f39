//! Two-phase parser for model output: `strict_parse`, then `repair_parse`.
//!
//! Model output is not guaranteed to be clean JSON. The strict phase accepts
//! a response that *is* a JSON object once reasoning tokens and code fences
//! are removed. The repair phase implements the **largest balanced-brace**
//! strategy: every `{...}` span whose braces balance (ignoring braces inside
//! string literals) is a candidate; candidates are tried longest first and
//! the first that parses as an object wins.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Upper bound on `{` start positions examined by the repair phase.
const MAX_REPAIR_CANDIDATES: usize = 256;

static UNUSED_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<unused\d+>").expect("valid regex"));

/// Which phase produced the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    Strict,
    Repaired,
}

/// Remove reasoning blocks, special tokens and Markdown code fences.
pub fn strip_reasoning(raw: &str) -> String {
    let mut text = raw.to_string();

    // MedGemma thinking prefix: <unusedN>thought\n...
    if let Some(idx) = text.find("<unused") {
        if let Some(thought_offset) = text[idx..].find("thought\n") {
            text = text[idx + thought_offset + "thought\n".len()..].to_string();
        }
    }
    text = UNUSED_TOKEN_RE.replace_all(&text, "").to_string();

    while let Some(start) = text.find("<think>") {
        if let Some(end) = text[start..].find("</think>") {
            let end_pos = start + end + "</think>".len();
            text = format!("{}{}", &text[..start], &text[end_pos..]);
        } else {
            // Unclosed: keep whichever side holds JSON
            let after = text[start + "<think>".len()..].to_string();
            let before = text[..start].to_string();
            text = if after.contains('{') { after } else { before };
            break;
        }
    }

    strip_code_fences(&text).trim().to_string()
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let after_open = match trimmed.find('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed.trim_start_matches('`').trim_start_matches("json").trim_start(),
    };
    match after_open.rfind("```") {
        Some(close) => after_open[..close].trim().to_string(),
        None => after_open.trim().to_string(),
    }
}

/// Phase 1: the cleaned text must be exactly one JSON object.
pub fn strict_parse(raw: &str) -> Option<Map<String, Value>> {
    let cleaned = strip_reasoning(raw);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Phase 2: largest balanced-brace substring that parses as an object.
pub fn repair_parse(raw: &str) -> Option<Map<String, Value>> {
    let cleaned = strip_reasoning(raw);
    let mut spans = balanced_spans(&cleaned);
    spans.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)).then(a.0.cmp(&b.0)));

    spans.into_iter().find_map(|(start, end)| {
        match serde_json::from_str::<Value>(&cleaned[start..end]) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    })
}

/// Strict first, repair second.
pub fn parse_object(raw: &str) -> Option<(Map<String, Value>, ParsePhase)> {
    if let Some(map) = strict_parse(raw) {
        return Some((map, ParsePhase::Strict));
    }
    repair_parse(raw).map(|map| (map, ParsePhase::Repaired))
}

/// Byte ranges `[start, end)` of every balanced `{...}` span.
fn balanced_spans(text: &str) -> Vec<(usize, usize)> {
    let starts: Vec<usize> = text
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .map(|(i, _)| i)
        .take(MAX_REPAIR_CANDIDATES)
        .collect();

    starts
        .into_iter()
        .filter_map(|start| matching_close(text, start).map(|end| (start, end)))
        .collect()
}

/// End (exclusive) of the object opened at `start`, string/escape aware.
fn matching_close(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_accepts_clean_object() {
        let map = strict_parse(r#"{"red_flags": ["chest pain"]}"#).unwrap();
        assert!(map.contains_key("red_flags"));
    }

    #[test]
    fn strict_rejects_arrays_and_prose() {
        assert!(strict_parse("[1, 2, 3]").is_none());
        assert!(strict_parse("Here you go: {\"a\": 1}").is_none());
    }

    #[test]
    fn strict_accepts_fenced_json() {
        let map = strict_parse("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(map["a"], 1);
    }

    #[test]
    fn think_tags_are_removed() {
        let raw = "<think>the patient {maybe}</think>{\"a\": true}";
        assert_eq!(strict_parse(raw).unwrap()["a"], true);
    }

    #[test]
    fn medgemma_thought_prefix_is_removed() {
        let raw = "<unused94>thought\nLet me reason...\n";
        assert_eq!(strip_reasoning(raw), "Let me reason...");
    }

    #[test]
    fn repair_extracts_object_from_prose() {
        let raw = "Sure! Here is the analysis:\n{\"summary\": \"ok\"}\nHope it helps.";
        assert!(strict_parse(raw).is_none());
        let map = repair_parse(raw).unwrap();
        assert_eq!(map["summary"], "ok");
    }

    #[test]
    fn repair_prefers_largest_balanced_span() {
        let raw = r#"note {"x": 1} then {"warnings": [], "soap": {"plan": 50}} end"#;
        let map = repair_parse(raw).unwrap();
        assert!(map.contains_key("warnings"));
        assert!(map.contains_key("soap"));
    }

    #[test]
    fn repair_ignores_braces_inside_strings() {
        let raw = r#"prefix {"summary": "uses } and { inside", "ok": true} suffix"#;
        let map = repair_parse(raw).unwrap();
        assert_eq!(map["ok"], true);
    }

    #[test]
    fn repair_skips_unparsable_largest_span() {
        // Largest span is balanced but not JSON; the inner one is.
        let raw = r#"{ broken: {"a": 1} }"#;
        let map = repair_parse(raw).unwrap();
        assert_eq!(map["a"], 1);
    }

    #[test]
    fn unbalanced_output_is_unrepairable() {
        assert!(parse_object(r#"{"warnings": [ {"title": "x""#).is_none());
        assert!(parse_object("no json at all").is_none());
    }

    #[test]
    fn parse_object_reports_phase() {
        assert_eq!(parse_object(r#"{"a":1}"#).unwrap().1, ParsePhase::Strict);
        assert_eq!(parse_object(r#"ok: {"a":1}"#).unwrap().1, ParsePhase::Repaired);
    }

    #[test]
    fn multibyte_text_around_json_is_safe() {
        let raw = "Análisis clínico → {\"resumen\": \"dolor torácico\"} ✓";
        assert_eq!(repair_parse(raw).unwrap()["resumen"], "dolor torácico");
    }
}
