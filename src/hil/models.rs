//! Data models for human-in-the-loop interactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::types::{
    EnrichmentVerdict, HumanDecision, ImpactLevel, Severity, Urgency, VerdictDecision,
    WorkflowState,
};

/// Which channel answered a pending review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Chat,
    Dashboard,
}

/// Summary of an enrichment result for display to the reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub observable_value: String,
    pub observable_type: String,
    pub analyzer: String,
    pub verdict: String,
    pub confidence: f64,
}

/// Summary of the MISP context for display to the reviewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MispContextSummary {
    pub iocs_checked: usize,
    pub iocs_matched: usize,
    pub threat_actors: Vec<String>,
    pub campaigns: Vec<String>,
    pub warninglist_hits: usize,
    pub matched_events: Vec<String>,
}

/// Request for human review of an investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HilRequest {
    pub investigation_id: Uuid,
    pub title: String,
    pub description: String,
    pub max_severity: Severity,
    pub alert_count: usize,
    pub created_at: DateTime<Utc>,

    pub malicious_count: usize,
    pub suspicious_count: usize,
    pub clean_count: usize,

    pub findings: Vec<String>,
    pub enrichments: Vec<EnrichmentSummary>,
    pub misp_context: Option<MispContextSummary>,

    pub ai_decision: Option<VerdictDecision>,
    pub ai_confidence: Option<f64>,
    pub ai_impact: Option<ImpactLevel>,
    pub ai_urgency: Option<Urgency>,
    pub ai_assessment: Option<String>,
    pub ai_recommendation: Option<String>,
    pub ai_evidence: Vec<String>,
}

impl HilRequest {
    /// Build a review request from the workflow state.
    pub fn from_state(state: &WorkflowState) -> Self {
        let inv = &state.investigation;

        let mut malicious_count = 0;
        let mut suspicious_count = 0;
        let mut clean_count = 0;
        let mut enrichments = Vec::new();
        for e in &inv.enrichments {
            match e.verdict() {
                EnrichmentVerdict::Malicious => malicious_count += 1,
                EnrichmentVerdict::Suspicious => suspicious_count += 1,
                EnrichmentVerdict::Benign => clean_count += 1,
                EnrichmentVerdict::Unknown => {}
            }
            enrichments.push(EnrichmentSummary {
                observable_value: e.observable_value().to_string(),
                observable_type: e.observable_type().to_string(),
                analyzer: e.analyzer().to_string(),
                verdict: e.verdict().to_string(),
                confidence: e.confidence(),
            });
        }

        let findings = inv
            .findings
            .iter()
            .map(|f| {
                format!(
                    "[{}] {}",
                    f.severity.as_str().to_uppercase(),
                    f.description
                )
            })
            .collect();

        let misp_context = inv.misp_context.as_ref().map(|misp| {
            let mut matched_events: Vec<String> = misp
                .matches
                .iter()
                .flat_map(|m| m.event_ids.iter().cloned())
                .collect();
            matched_events.sort();
            matched_events.dedup();
            matched_events.truncate(10);
            MispContextSummary {
                iocs_checked: misp.checked_iocs.len(),
                iocs_matched: misp.matches.len(),
                threat_actors: misp.threat_actors.clone(),
                campaigns: misp.campaigns.clone(),
                warninglist_hits: misp.warninglist_hits.len(),
                matched_events,
            }
        });

        let verdict = state.verdict.as_ref();

        Self {
            investigation_id: inv.id,
            title: inv.title.clone(),
            description: inv.description.clone().unwrap_or_default(),
            max_severity: inv.max_severity(),
            alert_count: inv.alerts.len(),
            created_at: inv.created_at,
            malicious_count,
            suspicious_count,
            clean_count,
            findings,
            enrichments,
            misp_context,
            ai_decision: verdict.map(|v| v.decision),
            ai_confidence: verdict.map(|v| v.confidence),
            ai_impact: verdict.map(|v| v.potential_impact),
            ai_urgency: verdict.map(|v| v.urgency),
            ai_assessment: verdict.map(|v| v.threat_assessment.clone()),
            ai_recommendation: verdict.map(|v| v.recommendation.clone()),
            ai_evidence: verdict.map(|v| v.key_evidence.clone()).unwrap_or_default(),
        }
    }

    /// Snapshot carried in the HUMAN_REVIEW_REQUESTED event payload so the
    /// projector can populate the pending-review row.
    pub fn review_snapshot(&self) -> serde_json::Value {
        json!({
            "findings": self.findings,
            "enrichments": { "items": self.enrichments },
            "misp_context": self.misp_context,
            "ai_assessment": self.ai_assessment,
            "ai_recommendation": self.ai_recommendation,
        })
    }
}

/// Response from human review, from either channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HilResponse {
    pub investigation_id: Uuid,
    pub decision: HumanDecision,
    pub reviewer: Option<String>,
    pub feedback: Option<String>,
    pub responded_at: DateTime<Utc>,
    pub source: DecisionSource,
    pub backend: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alert, Enrichment, Investigation, ObservableType};

    #[test]
    fn test_request_counts_verdicts() {
        let mut inv = Investigation::new();
        inv.add_alert(
            Alert::from_summary_block(
                "Alert ID: 1\nTime: x\nAgent: a\nLevel: 13\nDescription: beacon to 203.0.113.9",
            )
            .unwrap(),
        );
        for (value, verdict) in [
            ("203.0.113.9", EnrichmentVerdict::Malicious),
            ("203.0.113.10", EnrichmentVerdict::Suspicious),
            ("203.0.113.11", EnrichmentVerdict::Benign),
        ] {
            inv.add_enrichment(Enrichment::Result {
                observable_value: value.into(),
                observable_type: ObservableType::Ip,
                analyzer: "AbuseIPDB".into(),
                verdict,
                confidence: 0.9,
                details: json!({}),
                enriched_at: Utc::now(),
            });
        }

        let request = HilRequest::from_state(&WorkflowState::initial(inv));
        assert_eq!(request.malicious_count, 1);
        assert_eq!(request.suspicious_count, 1);
        assert_eq!(request.clean_count, 1);
        assert_eq!(request.enrichments.len(), 3);
        assert_eq!(request.max_severity, Severity::Critical);
    }

    #[test]
    fn test_review_snapshot_shape() {
        let request = HilRequest::from_state(&WorkflowState::initial(Investigation::new()));
        let snapshot = request.review_snapshot();
        assert!(snapshot["findings"].is_array());
        assert!(snapshot["enrichments"]["items"].is_array());
    }
}
