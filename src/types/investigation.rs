//! Investigations, findings, and MISP context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::alerts::Alert;
use super::enums::{InvestigationStatus, Severity};
use super::observables::{Enrichment, Observable};

/// A finding or conclusion produced during analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Which worker produced this finding (e.g. "misp", "wazuh").
    #[serde(default)]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Finding {
    pub fn new(description: impl Into<String>, severity: Severity) -> Self {
        Self {
            description: description.into(),
            severity,
            evidence: Vec::new(),
            recommendations: Vec::new(),
            source: None,
            created_at: Utc::now(),
        }
    }
}

/// A single IOC match in the threat-intelligence platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MispMatch {
    pub value: String,
    #[serde(rename = "type")]
    pub observable_type: String,
    #[serde(default)]
    pub event_ids: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub to_ids: bool,
}

/// Context fetched for one TIP event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MispEventContext {
    pub event_id: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub threat_level: String,
    #[serde(default)]
    pub threat_actors: Vec<String>,
    #[serde(default)]
    pub campaigns: Vec<String>,
    #[serde(default)]
    pub mitre_techniques: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attribute_count: u64,
}

/// Warninglist hit (likely false-positive indicator).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarninglistHit {
    pub value: String,
    #[serde(rename = "type")]
    pub observable_type: String,
    #[serde(default)]
    pub warninglists: Vec<String>,
}

/// Accumulated threat-intelligence context for an investigation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MispContext {
    #[serde(default)]
    pub checked_iocs: Vec<String>,
    #[serde(default)]
    pub matches: Vec<MispMatch>,
    #[serde(default)]
    pub events: BTreeMap<String, MispEventContext>,
    #[serde(default)]
    pub threat_actors: Vec<String>,
    #[serde(default)]
    pub campaigns: Vec<String>,
    #[serde(default)]
    pub warninglist_hits: Vec<WarninglistHit>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

/// A security investigation: correlated alerts, their observables, and the
/// analysis built on top of them.
///
/// Ownership is tree-shaped: the investigation owns alerts, alerts own their
/// observables (a merged copy lives in `observables`), and enrichments refer
/// to observables by composite key only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub observables: Vec<Observable>,
    #[serde(default)]
    pub enrichments: Vec<Enrichment>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub status: InvestigationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closure_reason: Option<String>,
    #[serde(default)]
    pub thehive_case_id: Option<String>,
    #[serde(default)]
    pub misp_context: Option<MispContext>,
    /// Worker scratch space (agent context, manager logs).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Default for Investigation {
    fn default() -> Self {
        Self::new()
    }
}

impl Investigation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: "Untitled Investigation".to_string(),
            description: None,
            alerts: Vec::new(),
            observables: Vec::new(),
            enrichments: Vec::new(),
            findings: Vec::new(),
            status: InvestigationStatus::Pending,
            created_at: now,
            updated_at: now,
            closed_at: None,
            closure_reason: None,
            thehive_case_id: None,
            misp_context: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Maximum severity across all correlated alerts (`Low` when empty).
    pub fn max_severity(&self) -> Severity {
        self.alerts
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(Severity::Low)
    }

    /// Add an alert, merging its observables without duplicating IOCs.
    pub fn add_alert(&mut self, alert: Alert) {
        for obs in &alert.observables {
            if !self.observables.iter().any(|o| o.same_ioc(obs)) {
                self.observables.push(obs.clone());
            }
        }
        self.alerts.push(alert);
        self.updated_at = Utc::now();
    }

    pub fn add_enrichment(&mut self, enrichment: Enrichment) {
        self.enrichments.push(enrichment);
        self.updated_at = Utc::now();
    }

    pub fn add_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
        self.updated_at = Utc::now();
    }

    /// Observables not yet covered by an enrichment result.
    pub fn pending_observables(&self) -> Vec<Observable> {
        self.observables
            .iter()
            .filter(|o| {
                !self.enrichments.iter().any(|e| {
                    e.observable_value() == o.value && e.observable_type() == o.observable_type
                })
            })
            .cloned()
            .collect()
    }

    pub fn malicious_indicators(&self) -> Vec<&Enrichment> {
        self.enrichments
            .iter()
            .filter(|e| e.is_malicious())
            .collect()
    }

    pub fn suspicious_indicators(&self) -> Vec<&Enrichment> {
        self.enrichments
            .iter()
            .filter(|e| e.is_suspicious())
            .collect()
    }

    /// Build a descriptive title from the first non-generic alert
    /// description, with a related-alerts suffix when more than one alert
    /// was correlated.
    pub fn generate_title(&self) -> String {
        if self.alerts.is_empty() {
            return "Empty Investigation".to_string();
        }

        let best = self
            .alerts
            .iter()
            .map(|a| a.rule_description.trim())
            .find(|d| {
                !d.is_empty()
                    && !d.eq_ignore_ascii_case("no description available")
                    && !d.eq_ignore_ascii_case("no description")
            })
            .unwrap_or_else(|| {
                let first = self.alerts[0].rule_description.trim();
                if first.is_empty() {
                    "Security Alert"
                } else {
                    first
                }
            });

        let base: String = best.chars().take(50).collect();
        if self.alerts.len() > 1 {
            format!("{} (+{} related alerts)", base, self.alerts.len() - 1)
        } else {
            base
        }
    }

    /// Tags attached to the incident-response case.
    pub fn case_tags(&self) -> Vec<String> {
        let mut tags = vec![
            "soctalk".to_string(),
            format!("severity:{}", self.max_severity()),
        ];

        let mut seen_types: Vec<&str> = Vec::new();
        for obs in &self.observables {
            let t = obs.observable_type.as_str();
            if !seen_types.contains(&t) {
                seen_types.push(t);
                tags.push(format!("ioc:{t}"));
            }
        }

        if !self.malicious_indicators().is_empty() {
            tags.push("verdict:malicious".to_string());
        } else if !self.suspicious_indicators().is_empty() {
            tags.push("verdict:suspicious".to_string());
        }

        if let Some(misp) = &self.misp_context {
            if !misp.matches.is_empty() {
                tags.push("misp:ioc-match".to_string());
            }
            for actor in misp.threat_actors.iter().take(3) {
                let slug: String = actor
                    .to_lowercase()
                    .replace(' ', "-")
                    .chars()
                    .take(30)
                    .collect();
                tags.push(format!("ta:{slug}"));
            }
            for campaign in misp.campaigns.iter().take(3) {
                let slug: String = campaign
                    .to_lowercase()
                    .replace(' ', "-")
                    .chars()
                    .take(30)
                    .collect();
                tags.push(format!("campaign:{slug}"));
            }
            if !misp.warninglist_hits.is_empty() {
                tags.push("misp:warninglist".to_string());
            }
        }

        tags
    }

    /// Markdown case description for the incident-response system.
    pub fn case_description(&self) -> String {
        let mut lines = vec![
            "## Investigation Summary".to_string(),
            String::new(),
            format!("**Investigation ID:** {}", self.id),
            format!("**Created:** {}", self.created_at.to_rfc3339()),
            String::new(),
            "## Alerts".to_string(),
            String::new(),
        ];

        for alert in &self.alerts {
            lines.push(format!("- **{}**", alert.rule_description));
            lines.push(format!("  - Alert ID: {}", alert.id));
            lines.push(format!("  - Severity: {}", alert.severity));
            lines.push(format!("  - Agent: {}", alert.source.agent_name));
            lines.push(String::new());
        }

        if !self.findings.is_empty() {
            lines.push("## Findings".to_string());
            lines.push(String::new());
            for finding in &self.findings {
                lines.push(format!("### {}", finding.description));
                lines.push(format!("Severity: {}", finding.severity));
                if !finding.evidence.is_empty() {
                    lines.push("Evidence:".to_string());
                    for e in &finding.evidence {
                        lines.push(format!("- {e}"));
                    }
                }
                lines.push(String::new());
            }
        }

        if !self.enrichments.is_empty() {
            lines.push("## Threat Intelligence".to_string());
            lines.push(String::new());
            for e in &self.enrichments {
                lines.push(format!(
                    "- **{}** ({}): {} via {}",
                    e.observable_value(),
                    e.observable_type(),
                    e.verdict(),
                    e.analyzer()
                ));
            }
            lines.push(String::new());
        }

        if let Some(misp) = &self.misp_context {
            lines.push("## MISP Context".to_string());
            lines.push(String::new());
            lines.push(format!("**IOCs checked:** {}", misp.checked_iocs.len()));
            lines.push(format!("**IOC matches:** {}", misp.matches.len()));
            lines.push(String::new());

            if !misp.threat_actors.is_empty() {
                lines.push("### Threat Actors".to_string());
                for ta in misp.threat_actors.iter().take(5) {
                    lines.push(format!("- {ta}"));
                }
                lines.push(String::new());
            }
            if !misp.campaigns.is_empty() {
                lines.push("### Campaigns".to_string());
                for c in misp.campaigns.iter().take(5) {
                    lines.push(format!("- {c}"));
                }
                lines.push(String::new());
            }
            if !misp.matches.is_empty() {
                lines.push("### IOC Matches".to_string());
                for m in misp.matches.iter().take(10) {
                    let ids_marker = if m.to_ids { " (IDS)" } else { "" };
                    lines.push(format!(
                        "- **{}** ({}){ids_marker}",
                        m.value, m.observable_type
                    ));
                    if !m.event_ids.is_empty() {
                        let events: Vec<&str> =
                            m.event_ids.iter().take(3).map(String::as_str).collect();
                        lines.push(format!("  - Events: {}", events.join(", ")));
                    }
                }
                lines.push(String::new());
            }
            if !misp.warninglist_hits.is_empty() {
                lines.push("### Warninglist Hits (Potential False Positives)".to_string());
                for hit in misp.warninglist_hits.iter().take(5) {
                    lines.push(format!("- {}: {}", hit.value, hit.warninglists.join(", ")));
                }
                lines.push(String::new());
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::enums::{EnrichmentVerdict, ObservableType};

    fn alert(id: &str, level: u8, description: &str) -> Alert {
        Alert::from_summary_block(&format!(
            "Alert ID: {id}\nTime: 2026-01-15T10:00:00Z\nAgent: web-01\nLevel: {level}\nDescription: {description}"
        ))
        .unwrap()
    }

    #[test]
    fn test_max_severity() {
        let mut inv = Investigation::new();
        assert_eq!(inv.max_severity(), Severity::Low);
        inv.add_alert(alert("1", 5, "medium alert"));
        inv.add_alert(alert("2", 13, "critical alert"));
        assert_eq!(inv.max_severity(), Severity::Critical);
    }

    #[test]
    fn test_add_alert_merges_observables() {
        let mut inv = Investigation::new();
        inv.add_alert(alert("1", 5, "traffic to 8.8.8.8"));
        inv.add_alert(alert("2", 5, "more traffic to 8.8.8.8"));
        let count = inv
            .observables
            .iter()
            .filter(|o| o.value == "8.8.8.8" && o.observable_type == ObservableType::Ip)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_pending_observables_shrink_with_enrichment() {
        let mut inv = Investigation::new();
        inv.add_alert(alert("1", 5, "traffic to 8.8.8.8"));
        assert_eq!(inv.pending_observables().len(), 1);

        inv.add_enrichment(Enrichment::Result {
            observable_value: "8.8.8.8".into(),
            observable_type: ObservableType::Ip,
            analyzer: "AbuseIPDB".into(),
            verdict: EnrichmentVerdict::Benign,
            confidence: 0.8,
            details: serde_json::json!({}),
            enriched_at: Utc::now(),
        });
        assert!(inv.pending_observables().is_empty());
    }

    #[test]
    fn test_generate_title_related_suffix() {
        let mut inv = Investigation::new();
        inv.add_alert(alert("1", 5, "SSH brute force attempt"));
        inv.add_alert(alert("2", 5, "SSH brute force attempt"));
        inv.add_alert(alert("3", 5, "SSH brute force attempt"));
        let title = inv.generate_title();
        assert!(title.starts_with("SSH brute force attempt"));
        assert!(title.ends_with("(+2 related alerts)"));
    }

    #[test]
    fn test_generate_title_skips_generic() {
        let mut inv = Investigation::new();
        inv.add_alert(alert("1", 5, "No description available"));
        inv.add_alert(alert("2", 5, "Rootkit signature detected"));
        assert!(inv
            .generate_title()
            .starts_with("Rootkit signature detected"));
    }

    #[test]
    fn test_case_tags() {
        let mut inv = Investigation::new();
        inv.add_alert(alert("1", 13, "traffic to 8.8.8.8"));
        let tags = inv.case_tags();
        assert!(tags.contains(&"soctalk".to_string()));
        assert!(tags.contains(&"severity:critical".to_string()));
        assert!(tags.contains(&"ioc:ip".to_string()));
    }
}
