//! Supervisor node: fast-LLM orchestration of the investigation.

use tracing::{error, info, warn};

use crate::graph::engine::RunConfig;
use crate::llm::parsing::parse_supervisor_decision;
use crate::types::{Phase, SupervisorAction, SupervisorDecision, WorkflowState};

use super::prompts::{
    SUPERVISOR_SYSTEM_PROMPT, SUPERVISOR_USER_PROMPT_FOOTER, SUPERVISOR_USER_PROMPT_HEADER,
};

/// Iteration cap: once reached, the supervisor forces a verdict instead of
/// looping further.
pub const MAX_ITERATIONS: u32 = 10;

/// Supervisor node. Analyzes the investigation state, assesses TP
/// confidence, and decides the next action.
pub async fn supervisor_node(mut state: WorkflowState, cfg: &RunConfig) -> WorkflowState {
    info!(iteration = state.iteration_count, "Supervisor started");

    state.iteration_count += 1;
    let iteration = state.iteration_count;

    if iteration >= MAX_ITERATIONS {
        warn!(iteration, "Max iterations reached, forcing verdict");
        state.supervisor_decision = Some(SupervisorDecision {
            next_action: SupervisorAction::Verdict,
            action_reasoning: "Maximum iterations reached - forcing verdict".to_string(),
            tp_confidence: 0.5,
            confidence_reasoning: "Unable to reach conclusion within iteration limit".to_string(),
            specific_instructions: None,
        });
        state.current_phase = Phase::Verdict;
        state.touch();
        return state;
    }

    let context_summary = build_context_summary(&state);
    let user_prompt = format!(
        "{SUPERVISOR_USER_PROMPT_HEADER}\n\n{context_summary}\n\n{SUPERVISOR_USER_PROMPT_FOOTER}"
    );

    match cfg
        .fast_llm
        .complete(SUPERVISOR_SYSTEM_PROMPT, &user_prompt)
        .await
    {
        Ok(response) => {
            let decision = parse_supervisor_decision(&response);

            state.current_phase = match decision.next_action {
                SupervisorAction::Verdict => Phase::Verdict,
                SupervisorAction::Close => Phase::Closed,
                SupervisorAction::Enrich | SupervisorAction::Contextualize => Phase::Enrichment,
                SupervisorAction::Investigate => Phase::Analysis,
            };

            info!(
                action = %decision.next_action,
                confidence = decision.tp_confidence,
                "Supervisor decision"
            );

            if let Some(emitter) = &cfg.emitter {
                if let Err(e) = emitter
                    .emit_supervisor_decision(
                        state.investigation.id,
                        decision.next_action.as_str(),
                        &decision.action_reasoning,
                        decision.tp_confidence,
                        iteration,
                    )
                    .await
                {
                    warn!(error = %e, "Event emission failed");
                }
            }

            state.supervisor_decision = Some(decision);
        }
        Err(e) => {
            error!(error = %e, "Supervisor LLM call failed");
            // Fall back to enrichment while work remains, else push to
            // verdict so the investigation still terminates.
            let decision = if state.pending_observables.is_empty() {
                state.current_phase = Phase::Verdict;
                SupervisorDecision {
                    next_action: SupervisorAction::Verdict,
                    action_reasoning: format!(
                        "Error in decision making, proceeding to verdict: {e}"
                    ),
                    tp_confidence: 0.5,
                    confidence_reasoning: "Unable to assess due to error".to_string(),
                    specific_instructions: None,
                }
            } else {
                SupervisorDecision {
                    next_action: SupervisorAction::Enrich,
                    action_reasoning: format!(
                        "Error in decision making, defaulting to enrichment: {e}"
                    ),
                    tp_confidence: 0.5,
                    confidence_reasoning: "Unable to assess due to error".to_string(),
                    specific_instructions: None,
                }
            };
            state.supervisor_decision = Some(decision);
            state.record_error(e.to_string());
        }
    }

    state.touch();
    state
}

/// Compact investigation summary for the supervisor prompt.
pub fn build_context_summary(state: &WorkflowState) -> String {
    let inv = &state.investigation;
    let mut lines = vec![
        format!("**Iteration:** {}", state.iteration_count),
        format!("**Phase:** {}", state.current_phase),
        String::new(),
        format!("### Alerts ({})", inv.alerts.len()),
    ];

    for alert in inv.alerts.iter().take(5) {
        let desc: String = alert.rule_description.chars().take(60).collect();
        lines.push(format!(
            "- [{}] {} (agent: {})",
            alert.severity, desc, alert.source.agent_name
        ));
    }
    if inv.alerts.len() > 5 {
        lines.push(format!("- ... and {} more alerts", inv.alerts.len() - 5));
    }

    let enriched = inv.enrichments.len();
    let pending = state.pending_observables.len();
    lines.push(String::new());
    lines.push(format!(
        "### Observables ({enriched}/{} enriched, {pending} pending)",
        inv.observables.len()
    ));

    let mut malicious = Vec::new();
    let mut suspicious = Vec::new();
    let mut clean = 0usize;
    for e in &inv.enrichments {
        let value: String = e.observable_value().chars().take(30).collect();
        let entry = format!("{}: {value} ({})", e.observable_type(), e.analyzer());
        match e.verdict() {
            crate::types::EnrichmentVerdict::Malicious => malicious.push(entry),
            crate::types::EnrichmentVerdict::Suspicious => suspicious.push(entry),
            crate::types::EnrichmentVerdict::Benign => clean += 1,
            crate::types::EnrichmentVerdict::Unknown => {}
        }
    }

    if !malicious.is_empty() {
        lines.push(format!("**Malicious ({}):**", malicious.len()));
        for m in malicious.iter().take(3) {
            lines.push(format!("  - {m}"));
        }
        if malicious.len() > 3 {
            lines.push(format!("  - ... and {} more", malicious.len() - 3));
        }
    }
    if !suspicious.is_empty() {
        lines.push(format!("**Suspicious ({}):**", suspicious.len()));
        for s in suspicious.iter().take(3) {
            lines.push(format!("  - {s}"));
        }
    }
    if clean > 0 {
        lines.push(format!("**Clean:** {clean} observables"));
    }

    if pending > 0 {
        lines.push(String::new());
        lines.push(format!("**Pending enrichment ({pending}):**"));
        for p in state.pending_observables.iter().take(5) {
            let value: String = p.value.chars().take(30).collect();
            lines.push(format!("  - {}: {value}", p.observable_type));
        }
    }

    if !inv.findings.is_empty() {
        lines.push(String::new());
        lines.push(format!("### Findings ({})", inv.findings.len()));
        for f in inv.findings.iter().take(3) {
            let desc: String = f.description.chars().take(60).collect();
            lines.push(format!("- [{}] {desc}", f.severity));
        }
    }

    match &inv.misp_context {
        Some(misp) => {
            lines.push(String::new());
            lines.push("### MISP Threat Intelligence".to_string());
            lines.push(format!(
                "**IOCs checked:** {}, **Matches:** {}",
                misp.checked_iocs.len(),
                misp.matches.len()
            ));
            if !misp.matches.is_empty() {
                lines.push(format!("**MISP IOC Matches ({}):**", misp.matches.len()));
                for m in misp.matches.iter().take(3) {
                    let ids = if m.to_ids { "IDS" } else { "" };
                    let events = m
                        .event_ids
                        .iter()
                        .take(2)
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .join(", ");
                    let value: String = m.value.chars().take(30).collect();
                    lines.push(format!(
                        "  - {value} ({}) {ids} [Events: {events}]",
                        m.observable_type
                    ));
                }
            }
            if !misp.threat_actors.is_empty() {
                let actors = misp
                    .threat_actors
                    .iter()
                    .take(3)
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!("**Threat Actors:** {actors}"));
            }
            if !misp.campaigns.is_empty() {
                let campaigns = misp
                    .campaigns
                    .iter()
                    .take(3)
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!("**Campaigns:** {campaigns}"));
            }
            if !misp.warninglist_hits.is_empty() {
                lines.push(format!(
                    "**Warninglist hits (potential FPs):** {}",
                    misp.warninglist_hits.len()
                ));
            }
        }
        None if !inv.observables.is_empty() => {
            lines.push(String::new());
            lines.push("### MISP Threat Intelligence".to_string());
            lines.push(
                "**Not yet checked** - consider CONTEXTUALIZE action for threat attribution"
                    .to_string(),
            );
        }
        None => {}
    }

    if let Some(prev) = &state.supervisor_decision {
        lines.push(String::new());
        lines.push("### Previous Decision".to_string());
        lines.push(format!("Action: {}", prev.next_action));
        lines.push(format!("TP Confidence: {:.0}%", prev.tp_confidence * 100.0));
    }

    if let Some(error) = &state.last_error {
        lines.push(String::new());
        lines.push("### Last Error".to_string());
        let preview: String = error.chars().take(200).collect();
        lines.push(preview);
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::test_support::test_config;
    use crate::llm::testing::ScriptedChatModel;
    use crate::types::{Alert, Investigation};
    use std::sync::Arc;

    fn state_with_alert() -> WorkflowState {
        let mut inv = Investigation::new();
        inv.add_alert(
            Alert::from_summary_block(
                "Alert ID: 1\nTime: 2026-01-15T10:00:00Z\nAgent: web-01\nLevel: 10\nDescription: SSH brute force from 203.0.113.7",
            )
            .unwrap(),
        );
        WorkflowState::initial(inv)
    }

    #[tokio::test]
    async fn test_supervisor_parses_decision() {
        let cfg = test_config(Arc::new(ScriptedChatModel::new(&[
            r#"{"next_action": "VERDICT", "action_reasoning": "done", "tp_confidence": 0.8, "confidence_reasoning": "clear"}"#,
        ])));
        let state = supervisor_node(state_with_alert(), &cfg).await;
        let decision = state.supervisor_decision.unwrap();
        assert_eq!(decision.next_action, SupervisorAction::Verdict);
        assert_eq!(state.current_phase, Phase::Verdict);
        assert_eq!(state.iteration_count, 1);
    }

    #[tokio::test]
    async fn test_supervisor_iteration_cap_forces_verdict() {
        let cfg = test_config(Arc::new(ScriptedChatModel::new(&[r#"{"next_action": "ENRICH"}"#])));
        let mut state = state_with_alert();
        state.iteration_count = MAX_ITERATIONS - 1;
        let state = supervisor_node(state, &cfg).await;
        let decision = state.supervisor_decision.unwrap();
        assert_eq!(decision.next_action, SupervisorAction::Verdict);
        assert!(decision.action_reasoning.contains("Maximum iterations"));
    }

    #[test]
    fn test_context_summary_mentions_pending_misp() {
        let state = state_with_alert();
        let summary = build_context_summary(&state);
        assert!(summary.contains("### Alerts (1)"));
        assert!(summary.contains("Not yet checked"));
        assert!(summary.contains("1 pending"));
    }
}
