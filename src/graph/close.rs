//! Close node: finalizes the investigation with status and closure reason.

use chrono::Utc;
use tracing::{info, warn};

use crate::types::{
    HumanDecision, InvestigationStatus, Phase, SupervisorAction, SupervisorDecision, Verdict,
    VerdictDecision, WorkflowState,
};

use super::engine::RunConfig;

/// Close node. Derives the closure reason (human decision > verdict >
/// supervisor decision > default), stamps the investigation, and emits
/// INVESTIGATION_CLOSED.
pub async fn close_investigation_node(mut state: WorkflowState, cfg: &RunConfig) -> WorkflowState {
    info!("Closing investigation");

    let closure_reason = determine_closure_reason(
        state.verdict.as_ref(),
        state.human_decision,
        state.human_feedback.as_deref(),
        state.supervisor_decision.as_ref(),
    );

    state.investigation.status = InvestigationStatus::Closed;
    state.investigation.closed_at = Some(Utc::now());
    state.investigation.closure_reason = Some(closure_reason.clone());
    state.current_phase = Phase::Closed;

    let reason_preview: String = closure_reason.chars().take(100).collect();
    info!(
        investigation_id = %state.investigation.id,
        closure_reason = %reason_preview,
        human_decision = ?state.human_decision,
        verdict_decision = ?state.verdict.as_ref().map(|v| v.decision),
        "Investigation closed"
    );

    if let Some(emitter) = &cfg.emitter {
        let duration_seconds = (Utc::now() - state.started_at).num_seconds().max(0);
        let resolution: String = closure_reason.chars().take(200).collect();
        if let Err(e) = emitter
            .emit_investigation_closed(
                state.investigation.id,
                InvestigationStatus::Closed.as_str(),
                &resolution,
                state.verdict.as_ref().map(|v| v.decision.as_str()),
                state.investigation.thehive_case_id.as_deref(),
                duration_seconds,
            )
            .await
        {
            warn!(error = %e, "Event emission failed");
        }
    }

    state.touch();
    state
}

/// Closure-reason precedence: human decision, then verdict, then supervisor
/// decision, then a default. The exact wordings here are load-bearing: the
/// projector derives the final read-model status from substrings of the
/// resolution text.
pub fn determine_closure_reason(
    verdict: Option<&Verdict>,
    human_decision: Option<HumanDecision>,
    human_feedback: Option<&str>,
    supervisor_decision: Option<&SupervisorDecision>,
) -> String {
    let mut reasons: Vec<String> = Vec::new();

    if let Some(decision) = human_decision {
        match decision {
            HumanDecision::Reject => {
                reasons.push("Rejected by analyst during human review".to_string());
                if let Some(feedback) = human_feedback {
                    reasons.push(format!("Analyst feedback: {feedback}"));
                }
            }
            HumanDecision::Approve => {
                reasons.push("Approved by analyst - incident created".to_string());
            }
            HumanDecision::MoreInfo => {
                reasons.push(
                    "Analyst requested more information but investigation closed".to_string(),
                );
                if let Some(feedback) = human_feedback {
                    reasons.push(format!("Analyst feedback: {feedback}"));
                }
            }
        }
    } else if let Some(verdict) = verdict {
        match verdict.decision {
            VerdictDecision::Close => {
                reasons.push("Closed by AI verdict - likely false positive".to_string());
                if !verdict.recommendation.is_empty() {
                    let recommendation: String =
                        verdict.recommendation.chars().take(200).collect();
                    reasons.push(format!("AI recommendation: {recommendation}"));
                }
            }
            VerdictDecision::Escalate => {
                reasons.push("Escalation process completed".to_string());
            }
            VerdictDecision::NeedsMoreInfo => {}
        }
    } else if let Some(decision) = supervisor_decision {
        if decision.next_action == SupervisorAction::Close {
            reasons.push("Closed by supervisor - insufficient evidence of threat".to_string());
            reasons.push(format!(
                "True positive confidence: {:.0}%",
                decision.tp_confidence * 100.0
            ));
            if !decision.confidence_reasoning.is_empty() {
                let reasoning: String =
                    decision.confidence_reasoning.chars().take(200).collect();
                reasons.push(format!("Reasoning: {reasoning}"));
            }
        }
    }

    if reasons.is_empty() {
        reasons.push("Investigation completed - no action required".to_string());
    }

    reasons.join(" | ")
}

/// Operator-facing closure report for the process log.
pub fn generate_closure_report(state: &WorkflowState) -> String {
    let inv = &state.investigation;
    let mut lines = vec![
        "=".repeat(60),
        "INVESTIGATION CLOSURE REPORT".to_string(),
        "=".repeat(60),
        String::new(),
        format!("Investigation ID: {}", inv.id),
        format!("Title: {}", inv.title),
        format!("Status: {}", inv.status),
        format!(
            "Closed At: {}",
            inv.closed_at.map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339())
        ),
        String::new(),
        "CLOSURE REASON:".to_string(),
        inv.closure_reason
            .clone()
            .unwrap_or_else(|| "No reason provided".to_string()),
        String::new(),
    ];

    if !inv.alerts.is_empty() {
        lines.push(format!("ALERTS ANALYZED: {}", inv.alerts.len()));
        for alert in inv.alerts.iter().take(5) {
            let desc: String = alert.rule_description.chars().take(50).collect();
            lines.push(format!("  - [{}] {desc}", alert.severity));
        }
        if inv.alerts.len() > 5 {
            lines.push(format!("  ... and {} more", inv.alerts.len() - 5));
        }
        lines.push(String::new());
    }

    if !inv.enrichments.is_empty() {
        let malicious = inv.malicious_indicators().len();
        let suspicious = inv
            .enrichments
            .iter()
            .filter(|e| e.verdict() == crate::types::EnrichmentVerdict::Suspicious)
            .count();
        let clean = inv
            .enrichments
            .iter()
            .filter(|e| e.verdict() == crate::types::EnrichmentVerdict::Benign)
            .count();
        lines.push(format!(
            "THREAT INTELLIGENCE: {} observables enriched",
            inv.enrichments.len()
        ));
        lines.push(format!("  Malicious: {malicious}"));
        lines.push(format!("  Suspicious: {suspicious}"));
        lines.push(format!("  Clean: {clean}"));
        lines.push(String::new());
    }

    if let Some(verdict) = &state.verdict {
        lines.push("AI VERDICT:".to_string());
        lines.push(format!("  Decision: {}", verdict.decision));
        lines.push(format!("  Confidence: {:.0}%", verdict.confidence * 100.0));
        lines.push(format!("  Impact: {}", verdict.potential_impact.as_str()));
        let recommendation: String = verdict.recommendation.chars().take(100).collect();
        lines.push(format!("  Recommendation: {recommendation}"));
        lines.push(String::new());
    }

    if let Some(decision) = state.human_decision {
        lines.push(format!("HUMAN DECISION: {decision}"));
        if let Some(feedback) = &state.human_feedback {
            lines.push(format!("  Feedback: {feedback}"));
        }
        lines.push(String::new());
    }

    if let Some(case_id) = &inv.thehive_case_id {
        lines.push(format!("THEHIVE CASE CREATED: {case_id}"));
        lines.push(String::new());
    }

    lines.push("=".repeat(60));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(decision: VerdictDecision) -> Verdict {
        let mut v = Verdict::error_fallback("n/a", "test");
        v.decision = decision;
        v.recommendation = "tune the detection rule".to_string();
        v
    }

    #[test]
    fn test_human_reject_takes_precedence() {
        let reason = determine_closure_reason(
            Some(&verdict(VerdictDecision::Close)),
            Some(HumanDecision::Reject),
            Some("clearly benign"),
            None,
        );
        assert!(reason.starts_with("Rejected by analyst during human review"));
        assert!(reason.contains("clearly benign"));
    }

    #[test]
    fn test_ai_close_wording_is_pinned() {
        // The projector matches "closed by ai verdict" (case-insensitive)
        // to derive auto_closed; this wording must not drift.
        let reason =
            determine_closure_reason(Some(&verdict(VerdictDecision::Close)), None, None, None);
        assert!(reason
            .to_lowercase()
            .contains("closed by ai verdict"));
        assert!(reason.contains("AI recommendation: tune the detection rule"));
    }

    #[test]
    fn test_supervisor_close_reason() {
        let decision = SupervisorDecision {
            next_action: SupervisorAction::Close,
            action_reasoning: String::new(),
            tp_confidence: 0.1,
            confidence_reasoning: "all enrichments clean".to_string(),
            specific_instructions: None,
        };
        let reason = determine_closure_reason(None, None, None, Some(&decision));
        assert!(reason.contains("Closed by supervisor"));
        assert!(reason.contains("True positive confidence: 10%"));
    }

    #[test]
    fn test_default_reason() {
        let reason = determine_closure_reason(None, None, None, None);
        assert_eq!(reason, "Investigation completed - no action required");
    }

    #[test]
    fn test_approve_reason() {
        let reason =
            determine_closure_reason(None, Some(HumanDecision::Approve), None, None);
        assert_eq!(reason, "Approved by analyst - incident created");
    }
}
