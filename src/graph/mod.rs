//! Investigation workflow graph: nodes, routing, and the durable engine.
//!
//! ```text
//! START -> supervisor
//! supervisor -> {wazuh_worker | cortex_worker | misp_worker | verdict | close}
//! {wazuh,cortex,misp}_worker -> supervisor
//! verdict -> {human_review | close | supervisor}
//! human_review -> {thehive_worker | close | supervisor}
//! thehive_worker -> close
//! close -> END
//! ```

pub mod close;
pub mod engine;
pub mod hil;

pub use engine::{ResumePayload, RunConfig, RunOutcome, WorkflowEngine};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{HumanDecision, SupervisorAction, VerdictDecision, WorkflowState};

/// Nodes of the investigation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Supervisor,
    WazuhWorker,
    CortexWorker,
    MispWorker,
    Verdict,
    HumanReview,
    TheHiveWorker,
    Close,
}

impl Node {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::WazuhWorker => "wazuh_worker",
            Self::CortexWorker => "cortex_worker",
            Self::MispWorker => "misp_worker",
            Self::Verdict => "verdict",
            Self::HumanReview => "human_review",
            Self::TheHiveWorker => "thehive_worker",
            Self::Close => "close",
        }
    }
}

/// Route from the supervisor based on its decision. Unknown or missing
/// decisions default to enrichment.
pub fn route_from_supervisor(state: &WorkflowState) -> Node {
    let action = state
        .supervisor_decision
        .as_ref()
        .map(|d| d.next_action)
        .unwrap_or(SupervisorAction::Enrich);

    debug!(action = %action, "Routing from supervisor");

    match action {
        SupervisorAction::Investigate => Node::WazuhWorker,
        SupervisorAction::Enrich => Node::CortexWorker,
        SupervisorAction::Contextualize => Node::MispWorker,
        SupervisorAction::Verdict => Node::Verdict,
        SupervisorAction::Close => Node::Close,
    }
}

/// Route from the verdict node. `needs_more_info` loops back to the
/// supervisor, but after two retries the investigation is forced to human
/// review instead of spinning.
pub fn route_from_verdict(state: &WorkflowState) -> Node {
    let decision = state
        .verdict
        .as_ref()
        .map(|v| v.decision)
        .unwrap_or(VerdictDecision::NeedsMoreInfo);

    debug!(decision = %decision, "Routing from verdict");

    match decision {
        VerdictDecision::Escalate => Node::HumanReview,
        VerdictDecision::Close => Node::Close,
        VerdictDecision::NeedsMoreInfo => {
            if state.verdict_retry_count >= 2 {
                warn!(
                    retries = state.verdict_retry_count,
                    "Verdict retry cap reached, forcing human review"
                );
                Node::HumanReview
            } else {
                Node::Supervisor
            }
        }
    }
}

/// Route from human review based on the analyst's decision. Anything
/// unexpected closes the investigation.
pub fn route_from_human_review(state: &WorkflowState) -> Node {
    debug!(decision = ?state.human_decision, "Routing from human review");

    match state.human_decision {
        Some(HumanDecision::Approve) => Node::TheHiveWorker,
        Some(HumanDecision::Reject) => Node::Close,
        Some(HumanDecision::MoreInfo) => Node::Supervisor,
        None => Node::Close,
    }
}

/// Successor of `current` given the post-node state; `None` means END.
pub fn next_node(current: Node, state: &WorkflowState) -> Option<Node> {
    match current {
        Node::Supervisor => Some(route_from_supervisor(state)),
        Node::WazuhWorker | Node::CortexWorker | Node::MispWorker => Some(Node::Supervisor),
        Node::Verdict => Some(route_from_verdict(state)),
        Node::HumanReview => Some(route_from_human_review(state)),
        Node::TheHiveWorker => Some(Node::Close),
        Node::Close => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Investigation, SupervisorDecision, Verdict};

    fn state() -> WorkflowState {
        WorkflowState::initial(Investigation::new())
    }

    fn decision(action: SupervisorAction) -> SupervisorDecision {
        SupervisorDecision {
            next_action: action,
            action_reasoning: String::new(),
            tp_confidence: 0.5,
            confidence_reasoning: String::new(),
            specific_instructions: None,
        }
    }

    fn verdict(decision: VerdictDecision) -> Verdict {
        let mut v = Verdict::error_fallback("n/a", "test");
        v.decision = decision;
        v
    }

    #[test]
    fn test_route_from_supervisor() {
        let mut s = state();
        s.supervisor_decision = Some(decision(SupervisorAction::Investigate));
        assert_eq!(route_from_supervisor(&s), Node::WazuhWorker);
        s.supervisor_decision = Some(decision(SupervisorAction::Enrich));
        assert_eq!(route_from_supervisor(&s), Node::CortexWorker);
        s.supervisor_decision = Some(decision(SupervisorAction::Contextualize));
        assert_eq!(route_from_supervisor(&s), Node::MispWorker);
        s.supervisor_decision = Some(decision(SupervisorAction::Verdict));
        assert_eq!(route_from_supervisor(&s), Node::Verdict);
        s.supervisor_decision = Some(decision(SupervisorAction::Close));
        assert_eq!(route_from_supervisor(&s), Node::Close);
    }

    #[test]
    fn test_route_from_supervisor_defaults_to_enrich() {
        assert_eq!(route_from_supervisor(&state()), Node::CortexWorker);
    }

    #[test]
    fn test_route_from_verdict() {
        let mut s = state();
        s.verdict = Some(verdict(VerdictDecision::Escalate));
        assert_eq!(route_from_verdict(&s), Node::HumanReview);
        s.verdict = Some(verdict(VerdictDecision::Close));
        assert_eq!(route_from_verdict(&s), Node::Close);
        s.verdict = Some(verdict(VerdictDecision::NeedsMoreInfo));
        assert_eq!(route_from_verdict(&s), Node::Supervisor);
    }

    #[test]
    fn test_route_from_verdict_retry_cap_forces_human_review() {
        let mut s = state();
        s.verdict = Some(verdict(VerdictDecision::NeedsMoreInfo));
        s.verdict_retry_count = 1;
        assert_eq!(route_from_verdict(&s), Node::Supervisor);
        s.verdict_retry_count = 2;
        assert_eq!(route_from_verdict(&s), Node::HumanReview);
        s.verdict_retry_count = 5;
        assert_eq!(route_from_verdict(&s), Node::HumanReview);
    }

    #[test]
    fn test_route_from_human_review() {
        let mut s = state();
        s.human_decision = Some(HumanDecision::Approve);
        assert_eq!(route_from_human_review(&s), Node::TheHiveWorker);
        s.human_decision = Some(HumanDecision::Reject);
        assert_eq!(route_from_human_review(&s), Node::Close);
        s.human_decision = Some(HumanDecision::MoreInfo);
        assert_eq!(route_from_human_review(&s), Node::Supervisor);
        s.human_decision = None;
        assert_eq!(route_from_human_review(&s), Node::Close);
    }

    #[test]
    fn test_workers_return_to_supervisor() {
        let s = state();
        assert_eq!(next_node(Node::WazuhWorker, &s), Some(Node::Supervisor));
        assert_eq!(next_node(Node::CortexWorker, &s), Some(Node::Supervisor));
        assert_eq!(next_node(Node::MispWorker, &s), Some(Node::Supervisor));
        assert_eq!(next_node(Node::TheHiveWorker, &s), Some(Node::Close));
        assert_eq!(next_node(Node::Close, &s), None);
    }
}
