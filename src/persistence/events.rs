//! Business event vocabulary for the event store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable event type strings. These are persisted; renaming a variant's
/// string is a breaking schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Investigation lifecycle
    InvestigationCreated,
    InvestigationStarted,
    InvestigationClosed,
    InvestigationPaused,
    InvestigationResumed,
    InvestigationCancelled,
    InvestigationEscalated,
    InvestigationAutoClosed,

    // Alert management
    AlertAdded,
    AlertCorrelated,

    // Observable extraction and enrichment
    ObservableExtracted,
    EnrichmentRequested,
    EnrichmentCompleted,
    EnrichmentFailed,

    // Supervisor decisions
    SupervisorDecision,
    PhaseChanged,

    // Verdict
    VerdictRendered,

    // Human-in-the-loop
    HumanReviewRequested,
    HumanDecisionReceived,

    // Incident response integration
    TheHiveCaseCreated,
    TheHiveAlertPromoted,

    // Threat intelligence integration
    MispIocMatched,
    MispContextRetrieved,

    // Analyzers
    AnalyzerInvoked,
    AnalyzerCompleted,

    // Errors
    ErrorOccurred,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvestigationCreated => "investigation.created",
            Self::InvestigationStarted => "investigation.started",
            Self::InvestigationClosed => "investigation.closed",
            Self::InvestigationPaused => "investigation.paused",
            Self::InvestigationResumed => "investigation.resumed",
            Self::InvestigationCancelled => "investigation.cancelled",
            Self::InvestigationEscalated => "investigation.escalated",
            Self::InvestigationAutoClosed => "investigation.auto_closed",
            Self::AlertAdded => "alert.added",
            Self::AlertCorrelated => "alert.correlated",
            Self::ObservableExtracted => "observable.extracted",
            Self::EnrichmentRequested => "enrichment.requested",
            Self::EnrichmentCompleted => "enrichment.completed",
            Self::EnrichmentFailed => "enrichment.failed",
            Self::SupervisorDecision => "supervisor.decision",
            Self::PhaseChanged => "phase.changed",
            Self::VerdictRendered => "verdict.rendered",
            Self::HumanReviewRequested => "human.review_requested",
            Self::HumanDecisionReceived => "human.decision_received",
            Self::TheHiveCaseCreated => "thehive.case_created",
            Self::TheHiveAlertPromoted => "thehive.alert_promoted",
            Self::MispIocMatched => "misp.ioc_matched",
            Self::MispContextRetrieved => "misp.context_retrieved",
            Self::AnalyzerInvoked => "analyzer.invoked",
            Self::AnalyzerCompleted => "analyzer.completed",
            Self::ErrorOccurred => "error.occurred",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "investigation.created" => Self::InvestigationCreated,
            "investigation.started" => Self::InvestigationStarted,
            "investigation.closed" => Self::InvestigationClosed,
            "investigation.paused" => Self::InvestigationPaused,
            "investigation.resumed" => Self::InvestigationResumed,
            "investigation.cancelled" => Self::InvestigationCancelled,
            "investigation.escalated" => Self::InvestigationEscalated,
            "investigation.auto_closed" => Self::InvestigationAutoClosed,
            "alert.added" => Self::AlertAdded,
            "alert.correlated" => Self::AlertCorrelated,
            "observable.extracted" => Self::ObservableExtracted,
            "enrichment.requested" => Self::EnrichmentRequested,
            "enrichment.completed" => Self::EnrichmentCompleted,
            "enrichment.failed" => Self::EnrichmentFailed,
            "supervisor.decision" => Self::SupervisorDecision,
            "phase.changed" => Self::PhaseChanged,
            "verdict.rendered" => Self::VerdictRendered,
            "human.review_requested" => Self::HumanReviewRequested,
            "human.decision_received" => Self::HumanDecisionReceived,
            "thehive.case_created" => Self::TheHiveCaseCreated,
            "thehive.alert_promoted" => Self::TheHiveAlertPromoted,
            "misp.ioc_matched" => Self::MispIocMatched,
            "misp.context_retrieved" => Self::MispContextRetrieved,
            "analyzer.invoked" => Self::AnalyzerInvoked,
            "analyzer.completed" => Self::AnalyzerCompleted,
            "error.occurred" => Self::ErrorOccurred,
            _ => return None,
        })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_types() {
        let all = [
            EventType::InvestigationCreated,
            EventType::InvestigationStarted,
            EventType::InvestigationClosed,
            EventType::InvestigationPaused,
            EventType::InvestigationResumed,
            EventType::InvestigationCancelled,
            EventType::InvestigationEscalated,
            EventType::InvestigationAutoClosed,
            EventType::AlertAdded,
            EventType::AlertCorrelated,
            EventType::ObservableExtracted,
            EventType::EnrichmentRequested,
            EventType::EnrichmentCompleted,
            EventType::EnrichmentFailed,
            EventType::SupervisorDecision,
            EventType::PhaseChanged,
            EventType::VerdictRendered,
            EventType::HumanReviewRequested,
            EventType::HumanDecisionReceived,
            EventType::TheHiveCaseCreated,
            EventType::TheHiveAlertPromoted,
            EventType::MispIocMatched,
            EventType::MispContextRetrieved,
            EventType::AnalyzerInvoked,
            EventType::AnalyzerCompleted,
            EventType::ErrorOccurred,
        ];
        for t in all {
            assert_eq!(EventType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EventType::parse("nonsense"), None);
    }
}
