//! Human-review node: suspension point for analyst approval.

use tracing::{info, warn};

use crate::hil::{DecisionSource, HilRequest};
use crate::persistence::Interrupt;
use crate::types::{Phase, WorkflowState};

use super::engine::{NodeOutcome, RunConfig};

/// Human-review node.
///
/// Emits HUMAN_REVIEW_REQUESTED (committed immediately so the dashboard can
/// see the pending review), then either awaits the configured chat backend
/// through the HIL service, or suspends with a typed interrupt for the
/// dashboard/resume path.
pub async fn human_review_node(mut state: WorkflowState, cfg: &RunConfig) -> NodeOutcome {
    info!("Human review started");

    state.awaiting_human_approval = true;
    state.current_phase = Phase::HumanReview;

    let request = HilRequest::from_state(&state);

    if !state.review_requested_emitted {
        if let Some(emitter) = &cfg.emitter {
            let (verdict_decision, verdict_confidence) = state
                .verdict
                .as_ref()
                .map(|v| (v.decision.as_str(), v.confidence))
                .unwrap_or(("unknown", 0.0));
            match emitter
                .emit_human_review_requested(
                    state.investigation.id,
                    "Verdict requires human approval before escalation",
                    verdict_decision,
                    verdict_confidence,
                    request.review_snapshot(),
                )
                .await
            {
                Ok(()) => state.review_requested_emitted = true,
                Err(e) => warn!(error = %e, "Event emission failed"),
            }
        }
    }

    if let Some(hil) = cfg.hil.as_ref().filter(|h| h.is_connected()) {
        let response = hil.request_approval(&state).await;

        state.human_decision = Some(response.decision);
        state.human_feedback = response.feedback.clone();
        state.human_reviewer = response.reviewer.clone();
        state.human_decision_source = Some(match response.source {
            DecisionSource::Chat => "chat".to_string(),
            DecisionSource::Dashboard => "dashboard".to_string(),
        });
        state.awaiting_human_approval = false;
        state.touch();

        info!(
            decision = %response.decision,
            source = ?response.source,
            "Human decision received"
        );

        // Dashboard decisions were already persisted by the REST handler;
        // emitting again would double-count the decision.
        if response.source == DecisionSource::Chat {
            if let Some(emitter) = &cfg.emitter {
                if let Err(e) = emitter
                    .emit_human_decision_received(
                        state.investigation.id,
                        response.decision.as_str(),
                        response.feedback.as_deref(),
                        response.reviewer.as_deref(),
                    )
                    .await
                {
                    warn!(error = %e, "Event emission failed");
                }
            }
        }

        return NodeOutcome::Continue(Box::new(state));
    }

    // No interactive backend: suspend and wait for the dashboard decision.
    if cfg.hil_backend != "dashboard" {
        warn!(
            hil_backend = %cfg.hil_backend,
            "HIL backend unavailable, falling back to dashboard interrupt"
        );
    }

    let interrupt = Interrupt {
        kind: "human_review".to_string(),
        investigation_id: state.investigation.id,
        title: state.investigation.title.clone(),
        verdict: state.verdict.clone(),
    };
    state.touch();

    NodeOutcome::Interrupt(Box::new(state), interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::test_support::test_config;
    use crate::llm::testing::ScriptedChatModel;
    use crate::types::Investigation;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_interrupts_without_hil_service() {
        let cfg = test_config(Arc::new(ScriptedChatModel::new(&["{}"])));
        let inv = Investigation::new();
        let inv_id = inv.id;

        match human_review_node(WorkflowState::initial(inv), &cfg).await {
            NodeOutcome::Interrupt(state, interrupt) => {
                assert!(state.awaiting_human_approval);
                assert_eq!(state.current_phase, Phase::HumanReview);
                assert_eq!(interrupt.kind, "human_review");
                assert_eq!(interrupt.investigation_id, inv_id);
            }
            NodeOutcome::Continue(_) => panic!("expected an interrupt"),
        }
    }
}
