//! Tolerant parsing of LLM responses into typed records.
//!
//! Models return free text. Extraction tries, in order: a fenced ```json
//! block, the first balanced `{...}` substring, then the whole response.
//! Before decoding, raw control characters inside string literals are
//! escaped (models frequently emit unescaped newlines in string values).
//! Total failure yields a safe default and logs the raw response.

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::types::enums::{EvidenceStrength, ImpactLevel, Urgency, VerdictDecision};
use crate::types::{SupervisorAction, SupervisorDecision, Verdict};

/// Escape unescaped `\n`, `\r`, `\t` inside JSON string literals.
///
/// Tracks string boundaries with a small state machine: `in_string` toggles
/// on unescaped `"`; inside a string, raw control characters are replaced
/// with their escape sequences.
pub fn sanitize_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape_next = false;

    for c in input.chars() {
        if escape_next {
            out.push(c);
            escape_next = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            _ => out.push(c),
        }
    }

    out
}

/// First balanced `{...}` substring, respecting strings and escapes.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape_next {
            escape_next = false;
            continue;
        }
        match b {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Fenced ```json ... ``` block contents, if present.
fn fenced_json_block(text: &str) -> Option<&str> {
    let open = text.find("```json")?;
    let rest = &text[open + "```json".len()..];
    let close = rest.find("```")?;
    Some(rest[..close].trim())
}

/// Extract a JSON object from free text.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(block) = fenced_json_block(text) {
        match serde_json::from_str(&sanitize_json(block)) {
            Ok(v) => {
                debug!("Parsed JSON from fenced block");
                return Some(v);
            }
            Err(e) => warn!(error = %e, "JSON decode failed on fenced block"),
        }
    }

    if let Some(candidate) = balanced_object(text) {
        match serde_json::from_str(&sanitize_json(candidate)) {
            Ok(v) => {
                debug!("Parsed JSON from balanced object");
                return Some(v);
            }
            Err(e) => warn!(error = %e, "JSON decode failed on balanced object"),
        }
    }

    match serde_json::from_str(&sanitize_json(text)) {
        Ok(v) => {
            debug!("Parsed JSON from full response");
            Some(v)
        }
        Err(e) => {
            warn!(error = %e, "JSON decode failed on full response");
            None
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(1000).collect()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn f64_field(value: &Value, key: &str, default: f64) -> f64 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        // Models occasionally quote numbers.
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Normalise a field that should be a list of strings; models sometimes
/// return a bare string instead.
fn string_list(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Parse the supervisor's decision. On unparseable output, falls back to
/// ENRICH (the safest action) and scans the raw text for an action keyword.
pub fn parse_supervisor_decision(response: &str) -> SupervisorDecision {
    if let Some(value) = extract_json(response) {
        let action = str_field(&value, "next_action")
            .as_deref()
            .and_then(SupervisorAction::parse)
            .unwrap_or(SupervisorAction::Enrich);
        return SupervisorDecision {
            next_action: action,
            action_reasoning: str_field(&value, "action_reasoning")
                .unwrap_or_else(|| "No reasoning provided".to_string()),
            tp_confidence: f64_field(&value, "tp_confidence", 0.5).clamp(0.0, 1.0),
            confidence_reasoning: str_field(&value, "confidence_reasoning")
                .unwrap_or_else(|| "No reasoning provided".to_string()),
            specific_instructions: str_field(&value, "specific_instructions")
                .filter(|s| !s.trim().is_empty()),
        };
    }

    error!(
        response_length = response.len(),
        response = %preview(response),
        "Supervisor response unparseable"
    );

    // Keyword scan as the last resort before the safe default.
    let upper = response.to_uppercase();
    let action = ["VERDICT", "CLOSE", "INVESTIGATE", "CONTEXTUALIZE", "ENRICH"]
        .iter()
        .find(|a| upper.contains(**a))
        .and_then(|a| SupervisorAction::parse(a))
        .unwrap_or(SupervisorAction::Enrich);

    SupervisorDecision {
        next_action: action,
        action_reasoning: "Failed to parse LLM response".to_string(),
        tp_confidence: 0.5,
        confidence_reasoning: "Unable to determine".to_string(),
        specific_instructions: None,
    }
}

/// Parse the reasoning model's verdict with enum-safe fallbacks. On
/// unparseable output, defaults to needs_more_info.
pub fn parse_verdict(response: &str, reasoning_model: &str) -> Verdict {
    let Some(value) = extract_json(response) else {
        error!(
            response_length = response.len(),
            response = %preview(response),
            "Verdict response unparseable"
        );

        let lower = response.to_lowercase();
        let decision = if lower.contains("escalate") {
            VerdictDecision::Escalate
        } else if lower.contains("close") && lower.contains("false positive") {
            VerdictDecision::Close
        } else {
            VerdictDecision::NeedsMoreInfo
        };

        return Verdict {
            decision,
            confidence: 0.5,
            threat_assessment: "Unable to parse verdict response".to_string(),
            evidence_strength: EvidenceStrength::Weak,
            potential_impact: ImpactLevel::Medium,
            urgency: Urgency::Routine,
            key_evidence: Vec::new(),
            gaps_in_evidence: vec!["Failed to parse LLM response".to_string()],
            assumptions_made: Vec::new(),
            alternative_explanations: Vec::new(),
            recommendation: "Manual review required - verdict parsing failed".to_string(),
            additional_investigation_needed: None,
            reasoning_model: reasoning_model.to_string(),
            timestamp: chrono::Utc::now(),
        };
    };

    let additional = string_list(&value, "additional_investigation_needed");

    Verdict {
        decision: str_field(&value, "decision")
            .as_deref()
            .and_then(VerdictDecision::parse)
            .unwrap_or(VerdictDecision::NeedsMoreInfo),
        confidence: f64_field(&value, "confidence", 0.5).clamp(0.0, 1.0),
        threat_assessment: str_field(&value, "threat_assessment")
            .unwrap_or_else(|| "No assessment provided".to_string()),
        evidence_strength: str_field(&value, "evidence_strength")
            .as_deref()
            .and_then(EvidenceStrength::parse)
            .unwrap_or(EvidenceStrength::Weak),
        potential_impact: str_field(&value, "potential_impact")
            .as_deref()
            .and_then(ImpactLevel::parse)
            .unwrap_or(ImpactLevel::Medium),
        urgency: str_field(&value, "urgency")
            .as_deref()
            .and_then(Urgency::parse)
            .unwrap_or(Urgency::Routine),
        key_evidence: string_list(&value, "key_evidence"),
        gaps_in_evidence: string_list(&value, "gaps_in_evidence"),
        assumptions_made: string_list(&value, "assumptions_made"),
        alternative_explanations: string_list(&value, "alternative_explanations"),
        recommendation: str_field(&value, "recommendation")
            .unwrap_or_else(|| "No recommendation provided".to_string()),
        additional_investigation_needed: if additional.is_empty() {
            None
        } else {
            Some(additional)
        },
        reasoning_model: reasoning_model.to_string(),
        timestamp: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_escapes_control_chars_in_strings() {
        let raw = "{\"a\": \"line1\nline2\tend\"}";
        let cleaned = sanitize_json(raw);
        assert_eq!(cleaned, "{\"a\": \"line1\\nline2\\tend\"}");
        let v: Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(v["a"], "line1\nline2\tend");
    }

    #[test]
    fn test_sanitize_leaves_structure_alone() {
        let raw = "{\n  \"a\": 1,\n  \"b\": 2\n}";
        let cleaned = sanitize_json(raw);
        // Newlines outside strings are untouched.
        assert_eq!(cleaned, raw);
    }

    #[test]
    fn test_sanitize_respects_escaped_quotes() {
        let raw = r#"{"a": "he said \"hi\"\nbye"}"#;
        let cleaned = sanitize_json(&raw.replace("\\n", "\n"));
        let v: Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(v["a"], "he said \"hi\"\nbye");
    }

    #[test]
    fn test_extract_fenced_block() {
        let text = "Here is my answer:\n```json\n{\"next_action\": \"VERDICT\"}\n```\nDone.";
        let v = extract_json(text).unwrap();
        assert_eq!(v["next_action"], "VERDICT");
    }

    #[test]
    fn test_extract_balanced_object_with_nesting() {
        let text = "prefix {\"outer\": {\"inner\": 1}, \"x\": 2} suffix";
        let v = extract_json(text).unwrap();
        assert_eq!(v["outer"]["inner"], 1);
        assert_eq!(v["x"], 2);
    }

    #[test]
    fn test_extract_braces_inside_strings() {
        let text = r#"{"note": "braces } inside { strings", "n": 3}"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["n"], 3);
    }

    #[test]
    fn test_supervisor_decision_happy_path() {
        let response = r#"```json
{"next_action": "VERDICT", "action_reasoning": "enough evidence", "tp_confidence": 0.9, "confidence_reasoning": "two malicious IOCs"}
```"#;
        let decision = parse_supervisor_decision(response);
        assert_eq!(decision.next_action, SupervisorAction::Verdict);
        assert_eq!(decision.tp_confidence, 0.9);
    }

    #[test]
    fn test_supervisor_decision_fallback_keyword_scan() {
        let decision = parse_supervisor_decision("I think we should CONTEXTUALIZE these IOCs.");
        assert_eq!(decision.next_action, SupervisorAction::Contextualize);
        assert_eq!(decision.action_reasoning, "Failed to parse LLM response");
    }

    #[test]
    fn test_supervisor_decision_total_garbage_defaults_to_enrich() {
        let decision = parse_supervisor_decision("no action words here at all");
        assert_eq!(decision.next_action, SupervisorAction::Enrich);
    }

    #[test]
    fn test_supervisor_confidence_clamped() {
        let decision =
            parse_supervisor_decision(r#"{"next_action": "ENRICH", "tp_confidence": 7.5}"#);
        assert_eq!(decision.tp_confidence, 1.0);
    }

    #[test]
    fn test_verdict_happy_path() {
        let response = r#"{
            "decision": "escalate",
            "confidence": 0.85,
            "threat_assessment": "Active intrusion",
            "evidence_strength": "strong",
            "potential_impact": "high",
            "urgency": "urgent",
            "key_evidence": ["malicious hash", "C2 beacon"],
            "recommendation": "Escalate to IR"
        }"#;
        let verdict = parse_verdict(response, "test-model");
        assert_eq!(verdict.decision, VerdictDecision::Escalate);
        assert_eq!(verdict.evidence_strength, EvidenceStrength::Strong);
        assert_eq!(verdict.key_evidence.len(), 2);
        assert_eq!(verdict.reasoning_model, "test-model");
    }

    #[test]
    fn test_verdict_string_instead_of_list() {
        let response = r#"{
            "decision": "close",
            "confidence": 0.9,
            "threat_assessment": "FP",
            "evidence_strength": "strong",
            "potential_impact": "low",
            "urgency": "routine",
            "key_evidence": "single piece of evidence",
            "recommendation": "close it"
        }"#;
        let verdict = parse_verdict(response, "m");
        assert_eq!(verdict.key_evidence, vec!["single piece of evidence"]);
    }

    #[test]
    fn test_verdict_bad_enums_fall_back() {
        let response = r#"{
            "decision": "obliterate",
            "confidence": "high",
            "evidence_strength": "overwhelming",
            "potential_impact": "apocalyptic",
            "urgency": "yesterday",
            "threat_assessment": "x",
            "recommendation": "y"
        }"#;
        let verdict = parse_verdict(response, "m");
        assert_eq!(verdict.decision, VerdictDecision::NeedsMoreInfo);
        assert_eq!(verdict.evidence_strength, EvidenceStrength::Weak);
        assert_eq!(verdict.potential_impact, ImpactLevel::Medium);
        assert_eq!(verdict.urgency, Urgency::Routine);
        assert_eq!(verdict.confidence, 0.5);
    }

    #[test]
    fn test_verdict_unparseable_keyword_fallback() {
        let verdict = parse_verdict("definitely escalate this one", "m");
        assert_eq!(verdict.decision, VerdictDecision::Escalate);

        let verdict = parse_verdict("close it, clearly a false positive", "m");
        assert_eq!(verdict.decision, VerdictDecision::Close);

        let verdict = parse_verdict("hmm", "m");
        assert_eq!(verdict.decision, VerdictDecision::NeedsMoreInfo);
    }

    #[test]
    fn test_unescaped_newline_in_llm_string() {
        let response = "{\"next_action\": \"CLOSE\", \"action_reasoning\": \"benign\nactivity\"}";
        let decision = parse_supervisor_decision(response);
        assert_eq!(decision.next_action, SupervisorAction::Close);
        assert_eq!(decision.action_reasoning, "benign\nactivity");
    }
}
