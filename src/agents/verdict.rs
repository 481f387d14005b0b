//! Verdict node: the reasoning LLM's final decision gate.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::graph::engine::RunConfig;
use crate::llm::parsing::parse_verdict;
use crate::types::{EnrichmentVerdict, Phase, Verdict, VerdictDecision, WorkflowState};

use super::prompts::VERDICT_SYSTEM_PROMPT;

/// Verdict node. Critically evaluates the accumulated evidence and decides
/// escalate / close / needs_more_info.
pub async fn verdict_node(mut state: WorkflowState, cfg: &RunConfig) -> WorkflowState {
    info!("Verdict node started");

    let context = build_verdict_context(&state);

    let verdict = match cfg
        .reasoning_llm
        .complete(VERDICT_SYSTEM_PROMPT, &context)
        .await
    {
        Ok(response) => parse_verdict(&response, cfg.reasoning_llm.model_name()),
        Err(e) => {
            error!(error = %e, "Verdict LLM call failed");
            state.record_error(e.to_string());
            Verdict::error_fallback(&e.to_string(), cfg.reasoning_llm.model_name())
        }
    };

    if verdict.decision == VerdictDecision::NeedsMoreInfo {
        state.verdict_retry_count += 1;
        info!(
            retry_count = state.verdict_retry_count,
            "Verdict needs more info"
        );
    }

    info!(
        decision = %verdict.decision,
        confidence = verdict.confidence,
        impact = verdict.potential_impact.as_str(),
        "Verdict rendered"
    );

    if let Some(emitter) = &cfg.emitter {
        if let Err(e) = emitter
            .emit_verdict_rendered(
                state.investigation.id,
                verdict.decision.as_str(),
                verdict.confidence,
                &verdict.recommendation,
                None,
            )
            .await
        {
            warn!(error = %e, "Event emission failed");
        }
    }

    state.verdict = Some(verdict);
    state.current_phase = Phase::Verdict;
    state.touch();
    state
}

/// Full-context prompt for the reasoning model.
pub fn build_verdict_context(state: &WorkflowState) -> String {
    let inv = &state.investigation;

    let mut alerts_detail = Vec::new();
    for alert in &inv.alerts {
        alerts_detail.push(format!(
            "### [{}] Level {}",
            alert.severity.as_str().to_uppercase(),
            alert.level
        ));
        alerts_detail.push(format!("**Description:** {}", alert.rule_description));
        alerts_detail.push(format!("**Agent:** {}", alert.source.agent_name));
        alerts_detail.push(format!("**Time:** {}", alert.timestamp.to_rfc3339()));
        alerts_detail.push(String::new());
    }

    let mut malicious_count = 0;
    let mut suspicious_count = 0;
    let mut enrichments_detail = Vec::new();
    for e in &inv.enrichments {
        let marker = match e.verdict() {
            EnrichmentVerdict::Malicious => {
                malicious_count += 1;
                "[MALICIOUS]"
            }
            EnrichmentVerdict::Suspicious => {
                suspicious_count += 1;
                "[SUSPICIOUS]"
            }
            EnrichmentVerdict::Benign => "[BENIGN]",
            EnrichmentVerdict::Unknown => "[UNKNOWN]",
        };
        enrichments_detail.push(format!(
            "{marker} **{}:** {}\n   Analyzer: {} | Verdict: {} | Confidence: {:.0}%",
            e.observable_type(),
            e.observable_value(),
            e.analyzer(),
            e.verdict(),
            e.confidence() * 100.0
        ));
    }
    enrichments_detail.insert(
        0,
        format!("**Summary:** {malicious_count} malicious, {suspicious_count} suspicious\n"),
    );

    let mut findings_detail = Vec::new();
    for f in &inv.findings {
        findings_detail.push(format!(
            "### [{}] {}",
            f.severity.as_str().to_uppercase(),
            f.description
        ));
        if !f.evidence.is_empty() {
            findings_detail.push("Evidence:".to_string());
            for e in f.evidence.iter().take(3) {
                findings_detail.push(format!("  - {e}"));
            }
        }
        findings_detail.push(String::new());
    }

    let duration = format!(
        "{} seconds",
        (Utc::now() - state.started_at).num_seconds().max(0)
    );

    let (sup_action, sup_confidence, sup_reasoning) = match &state.supervisor_decision {
        Some(d) => (
            d.next_action.as_str(),
            d.tp_confidence,
            d.confidence_reasoning.as_str(),
        ),
        None => ("unknown", 0.5, "No reasoning"),
    };

    format!(
        r#"## Investigation Summary

**Investigation ID:** {id}
**Duration:** {duration}
**Supervisor Iterations:** {iterations}

## Alerts ({alert_count})

{alerts}

## Threat Intelligence Results ({enrichment_count})

{enrichments}

## Findings ({finding_count})

{findings}

## Supervisor's Assessment

**Last Action:** {sup_action}
**TP Confidence:** {sup_confidence:.0}%
**Reasoning:** {sup_reasoning}

---

Provide your final verdict as JSON.
"#,
        id = inv.id,
        iterations = state.iteration_count,
        alert_count = inv.alerts.len(),
        alerts = if alerts_detail.is_empty() {
            "No alerts".to_string()
        } else {
            alerts_detail.join("\n")
        },
        enrichment_count = inv.enrichments.len(),
        enrichments = enrichments_detail.join("\n"),
        finding_count = inv.findings.len(),
        findings = if findings_detail.is_empty() {
            "No findings".to_string()
        } else {
            findings_detail.join("\n")
        },
        sup_confidence = sup_confidence * 100.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::test_support::test_config;
    use crate::llm::testing::ScriptedChatModel;
    use crate::types::Investigation;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_verdict_escalate() {
        let cfg = test_config(Arc::new(ScriptedChatModel::new(&[r#"{
            "decision": "escalate", "confidence": 0.9,
            "threat_assessment": "real", "evidence_strength": "strong",
            "potential_impact": "high", "urgency": "urgent",
            "recommendation": "escalate now"
        }"#])));
        let state = verdict_node(WorkflowState::initial(Investigation::new()), &cfg).await;
        let verdict = state.verdict.unwrap();
        assert_eq!(verdict.decision, VerdictDecision::Escalate);
        assert_eq!(state.verdict_retry_count, 0);
        assert_eq!(state.current_phase, Phase::Verdict);
    }

    #[tokio::test]
    async fn test_needs_more_info_increments_retry_count() {
        let cfg = test_config(Arc::new(ScriptedChatModel::new(&[r#"{
            "decision": "needs_more_info", "confidence": 0.4,
            "threat_assessment": "unclear", "evidence_strength": "weak",
            "potential_impact": "medium", "urgency": "routine",
            "recommendation": "dig deeper"
        }"#])));
        let mut state = WorkflowState::initial(Investigation::new());
        state.verdict_retry_count = 1;
        let state = verdict_node(state, &cfg).await;
        assert_eq!(state.verdict_retry_count, 2);
    }

    #[test]
    fn test_context_includes_summary_counts() {
        let state = WorkflowState::initial(Investigation::new());
        let context = build_verdict_context(&state);
        assert!(context.contains("## Alerts (0)"));
        assert!(context.contains("0 malicious, 0 suspicious"));
    }
}
