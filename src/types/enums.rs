//! Enumeration types shared across the investigation domain.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert/finding severity. Variant order defines priority: `Low < Medium <
/// High < Critical`, so `Ord` comparisons and `max()` do the right thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a SIEM alert level (0-15) to a severity bucket.
    pub fn from_siem_level(level: u8) -> Self {
        match level {
            12.. => Self::Critical,
            8..=11 => Self::High,
            4..=7 => Self::Medium,
            _ => Self::Low,
        }
    }

    /// Queue priority: lower value = processed first.
    pub fn priority(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Numeric rank used by the projector (`critical=4 > ... > low=1`).
    pub fn rank(self) -> i32 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of security observables/IOCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservableType {
    Ip,
    Domain,
    Url,
    HashMd5,
    HashSha1,
    HashSha256,
    Email,
    Filename,
    Fqdn,
    User,
    Process,
    RegistryKey,
    Unknown,
}

impl ObservableType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Domain => "domain",
            Self::Url => "url",
            Self::HashMd5 => "hash_md5",
            Self::HashSha1 => "hash_sha1",
            Self::HashSha256 => "hash_sha256",
            Self::Email => "email",
            Self::Filename => "filename",
            Self::Fqdn => "fqdn",
            Self::User => "user",
            Self::Process => "process",
            Self::RegistryKey => "registry_key",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_hash(self) -> bool {
        matches!(self, Self::HashMd5 | Self::HashSha1 | Self::HashSha256)
    }
}

impl fmt::Display for ObservableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threat-intelligence verdict for a single observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentVerdict {
    Benign,
    Suspicious,
    Malicious,
    Unknown,
}

impl EnrichmentVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Benign => "benign",
            Self::Suspicious => "suspicious",
            Self::Malicious => "malicious",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EnrichmentVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength of evidence supporting the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceStrength {
    Weak,
    Moderate,
    Strong,
    Conclusive,
}

impl EvidenceStrength {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "weak" => Some(Self::Weak),
            "moderate" => Some(Self::Moderate),
            "strong" => Some(Self::Strong),
            "conclusive" => Some(Self::Conclusive),
            _ => None,
        }
    }
}

/// Potential impact if the incident is a true positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Urgency level for response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Routine,
    Elevated,
    Urgent,
    Immediate,
}

impl Urgency {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "routine" => Some(Self::Routine),
            "elevated" => Some(Self::Elevated),
            "urgent" => Some(Self::Urgent),
            "immediate" => Some(Self::Immediate),
            _ => None,
        }
    }
}

/// Lifecycle status of an investigation as exposed by the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Pending,
    InProgress,
    Paused,
    Escalated,
    Closed,
    AutoClosed,
    Rejected,
    Cancelled,
}

impl InvestigationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
            Self::AutoClosed => "auto_closed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Escalated | Self::Closed | Self::AutoClosed | Self::Rejected | Self::Cancelled
        )
    }
}

impl fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Investigation phase as driven by the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Triage,
    Enrichment,
    Analysis,
    Verdict,
    HumanReview,
    Escalation,
    Closed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::Enrichment => "enrichment",
            Self::Analysis => "analysis",
            Self::Verdict => "verdict",
            Self::HumanReview => "human_review",
            Self::Escalation => "escalation",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision from the verdict node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictDecision {
    Escalate,
    Close,
    NeedsMoreInfo,
}

impl VerdictDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Escalate => "escalate",
            Self::Close => "close",
            Self::NeedsMoreInfo => "needs_more_info",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "escalate" => Some(Self::Escalate),
            "close" => Some(Self::Close),
            "needs_more_info" => Some(Self::NeedsMoreInfo),
            _ => None,
        }
    }
}

impl fmt::Display for VerdictDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision from human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanDecision {
    Approve,
    Reject,
    MoreInfo,
}

impl HumanDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::MoreInfo => "more_info",
        }
    }

    /// Lenient coercion from free-form input; anything unrecognised maps to
    /// `MoreInfo` so a malformed payload never auto-approves an escalation.
    pub fn coerce(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Self::Approve,
            "reject" => Self::Reject,
            _ => Self::MoreInfo,
        }
    }
}

impl fmt::Display for HumanDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::Low.max(Severity::High), Severity::High);
    }

    #[test]
    fn test_severity_from_siem_level() {
        assert_eq!(Severity::from_siem_level(0), Severity::Low);
        assert_eq!(Severity::from_siem_level(4), Severity::Medium);
        assert_eq!(Severity::from_siem_level(8), Severity::High);
        assert_eq!(Severity::from_siem_level(12), Severity::Critical);
        assert_eq!(Severity::from_siem_level(15), Severity::Critical);
    }

    #[test]
    fn test_severity_serde_roundtrip() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let back: Severity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Severity::Critical);
    }

    #[test]
    fn test_human_decision_coercion() {
        assert_eq!(HumanDecision::coerce("APPROVE"), HumanDecision::Approve);
        assert_eq!(HumanDecision::coerce(" reject "), HumanDecision::Reject);
        assert_eq!(HumanDecision::coerce("whatever"), HumanDecision::MoreInfo);
    }

    #[test]
    fn test_status_terminality() {
        assert!(InvestigationStatus::AutoClosed.is_terminal());
        assert!(InvestigationStatus::Escalated.is_terminal());
        assert!(!InvestigationStatus::InProgress.is_terminal());
        assert!(!InvestigationStatus::Paused.is_terminal());
    }
}
