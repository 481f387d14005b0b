//! Workflow state passed between graph nodes and persisted by the
//! checkpointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::enums::{HumanDecision, Phase};
use super::investigation::Investigation;
use super::observables::Observable;
use super::verdict::Verdict;

/// Action chosen by the supervisor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorAction {
    Investigate,
    Enrich,
    Contextualize,
    Verdict,
    Close,
}

impl SupervisorAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Investigate => "INVESTIGATE",
            Self::Enrich => "ENRICH",
            Self::Contextualize => "CONTEXTUALIZE",
            Self::Verdict => "VERDICT",
            Self::Close => "CLOSE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INVESTIGATE" => Some(Self::Investigate),
            "ENRICH" => Some(Self::Enrich),
            "CONTEXTUALIZE" => Some(Self::Contextualize),
            "VERDICT" => Some(Self::Verdict),
            "CLOSE" => Some(Self::Close),
            _ => None,
        }
    }
}

impl fmt::Display for SupervisorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision output from the supervisor node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorDecision {
    pub next_action: SupervisorAction,
    pub action_reasoning: String,
    /// Current confidence this is a true positive (0-1).
    pub tp_confidence: f64,
    #[serde(default)]
    pub confidence_reasoning: String,
    #[serde(default)]
    pub specific_instructions: Option<String>,
}

/// Full workflow state, serialised into checkpoint snapshots.
///
/// Runtime collaborators (emitter, HIL service, LLM and tool clients) live
/// in the per-run configuration, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub investigation: Investigation,
    pub current_phase: Phase,
    #[serde(default)]
    pub supervisor_decision: Option<SupervisorDecision>,
    #[serde(default)]
    pub pending_observables: Vec<Observable>,
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub awaiting_human_approval: bool,
    #[serde(default)]
    pub human_decision: Option<HumanDecision>,
    #[serde(default)]
    pub human_feedback: Option<String>,
    #[serde(default)]
    pub human_reviewer: Option<String>,
    /// Set when the decision arrived via the dashboard; the HIL node uses
    /// it to suppress double emission of HUMAN_DECISION_RECEIVED.
    #[serde(default)]
    pub human_decision_source: Option<String>,
    #[serde(default)]
    pub review_requested_emitted: bool,
    #[serde(default)]
    pub verdict_retry_count: u32,
    #[serde(default)]
    pub iteration_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub error_count: u32,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl WorkflowState {
    /// Initial state for a freshly correlated investigation.
    pub fn initial(investigation: Investigation) -> Self {
        let now = Utc::now();
        let pending = investigation.observables.clone();
        Self {
            investigation,
            current_phase: Phase::Triage,
            supervisor_decision: None,
            pending_observables: pending,
            verdict: None,
            awaiting_human_approval: false,
            human_decision: None,
            human_feedback: None,
            human_reviewer: None,
            human_decision_source: None,
            review_requested_emitted: false,
            verdict_retry_count: 0,
            iteration_count: 0,
            last_error: None,
            error_count: 0,
            started_at: now,
            last_updated: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.error_count += 1;
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_action_parse() {
        assert_eq!(
            SupervisorAction::parse("verdict"),
            Some(SupervisorAction::Verdict)
        );
        assert_eq!(
            SupervisorAction::parse(" ENRICH "),
            Some(SupervisorAction::Enrich)
        );
        assert_eq!(SupervisorAction::parse("bogus"), None);
    }

    #[test]
    fn test_initial_state_copies_observables() {
        let mut inv = Investigation::new();
        inv.add_alert(
            crate::types::alerts::Alert::from_summary_block(
                "Alert ID: 1\nTime: x\nAgent: a\nLevel: 5\nDescription: traffic to 8.8.8.8",
            )
            .unwrap(),
        );
        let state = WorkflowState::initial(inv);
        assert_eq!(state.pending_observables.len(), 1);
        assert_eq!(state.current_phase, Phase::Triage);
        assert_eq!(state.iteration_count, 0);
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let state = WorkflowState::initial(Investigation::new());
        let json = serde_json::to_value(&state).unwrap();
        let back: WorkflowState = serde_json::from_value(json).unwrap();
        assert_eq!(back.current_phase, Phase::Triage);
        assert!(back.supervisor_decision.is_none());
    }
}
