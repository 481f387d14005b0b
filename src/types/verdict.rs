//! Structured verdict from the reasoning LLM.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{EvidenceStrength, ImpactLevel, Urgency, VerdictDecision};

/// The final AI decision gate before human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: VerdictDecision,
    /// Confidence in the decision (0-1).
    pub confidence: f64,
    pub threat_assessment: String,
    pub evidence_strength: EvidenceStrength,
    pub potential_impact: ImpactLevel,
    pub urgency: Urgency,
    #[serde(default)]
    pub key_evidence: Vec<String>,
    #[serde(default)]
    pub gaps_in_evidence: Vec<String>,
    #[serde(default)]
    pub assumptions_made: Vec<String>,
    #[serde(default)]
    pub alternative_explanations: Vec<String>,
    pub recommendation: String,
    #[serde(default)]
    pub additional_investigation_needed: Option<Vec<String>>,
    pub reasoning_model: String,
    pub timestamp: DateTime<Utc>,
}

impl Verdict {
    /// Fallback verdict when the reasoning call fails entirely.
    pub fn error_fallback(error: &str, reasoning_model: &str) -> Self {
        Self {
            decision: VerdictDecision::NeedsMoreInfo,
            confidence: 0.5,
            threat_assessment: "Unable to complete assessment due to error".to_string(),
            evidence_strength: EvidenceStrength::Weak,
            potential_impact: ImpactLevel::Medium,
            urgency: Urgency::Routine,
            key_evidence: Vec::new(),
            gaps_in_evidence: vec!["Verdict assessment failed".to_string()],
            assumptions_made: Vec::new(),
            alternative_explanations: Vec::new(),
            recommendation: format!("Error during verdict: {error}. Manual review required."),
            additional_investigation_needed: Some(vec![
                "Manual review required due to system error".to_string(),
            ]),
            reasoning_model: reasoning_model.to_string(),
            timestamp: Utc::now(),
        }
    }
}
