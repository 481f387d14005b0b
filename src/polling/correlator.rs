//! Alert correlator: groups related alerts into investigations.

use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{Alert, Investigation, ObservableType};

/// Closed list of rule groups inferred from rule descriptions.
const RULE_GROUP_PATTERNS: &[(&str, &str)] = &[
    ("sysmon", "sysmon"),
    ("authentication", "auth"),
    ("brute", "bruteforce"),
    ("malware", "malware"),
    ("rootkit", "rootkit"),
    ("web", "web_attack"),
    ("sql", "sql_injection"),
    ("file integrity", "fim"),
    ("vulnerability", "vuln"),
];

/// Correlates alerts into investigations by shared keys within a time
/// window.
///
/// Keys are computed in priority order (agent, then IP/hash/domain
/// observables, then inferred rule group) and each alert lands in the bucket
/// of its strongest key; keyless alerts become standalone investigations.
#[derive(Clone)]
pub struct AlertCorrelator {
    window: Duration,
}

impl AlertCorrelator {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Group a batch of alerts into investigations, sorted by severity
    /// (critical first, stable).
    pub fn correlate(&self, alerts: Vec<Alert>) -> Vec<Investigation> {
        if alerts.is_empty() {
            return Vec::new();
        }
        debug!(count = alerts.len(), "Correlating alerts");
        let input_count = alerts.len();

        // Bucket by strongest key, preserving arrival order of buckets.
        let mut bucket_order: Vec<String> = Vec::new();
        let mut buckets: Vec<Vec<Alert>> = Vec::new();
        for alert in alerts {
            let key = correlation_keys(&alert)
                .into_iter()
                .next()
                .unwrap_or_else(|| format!("standalone:{}", alert.id));
            match bucket_order.iter().position(|k| *k == key) {
                Some(i) => buckets[i].push(alert),
                None => {
                    bucket_order.push(key);
                    buckets.push(vec![alert]);
                }
            }
        }

        // Deduplicate alerts across buckets by ID, then split each bucket
        // into time-window generations: alerts older than the window from
        // the bucket's most recent alert become their own investigation
        // rather than being silently dropped.
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut investigations = Vec::new();
        for bucket in buckets {
            let unique: Vec<Alert> = bucket
                .into_iter()
                .filter(|a| seen_ids.insert(a.id.clone()))
                .collect();

            for generation in self.split_by_time_window(unique) {
                let mut investigation = Investigation::new();
                for alert in generation {
                    investigation.add_alert(alert);
                }
                investigation.title = investigation.generate_title();
                debug!(
                    id = %investigation.id,
                    alert_count = investigation.alerts.len(),
                    title = %investigation.title,
                    "Investigation created"
                );
                investigations.push(investigation);
            }
        }

        // Critical first; stable within equal severity.
        investigations.sort_by_key(|inv| inv.max_severity().priority());

        info!(
            input_alerts = input_count,
            investigations = investigations.len(),
            "Alerts correlated"
        );
        investigations
    }

    /// Partition a bucket into generations: each pass keeps the alerts
    /// within `window` of the remaining bucket's most recent alert, and the
    /// rest seed the next generation.
    fn split_by_time_window(&self, mut alerts: Vec<Alert>) -> Vec<Vec<Alert>> {
        let window = chrono::Duration::from_std(self.window)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let mut generations = Vec::new();

        while !alerts.is_empty() {
            let Some(most_recent) = alerts.iter().map(|a| a.timestamp).max() else {
                break;
            };
            let cutoff = most_recent - window;
            let (kept, stale): (Vec<Alert>, Vec<Alert>) =
                alerts.into_iter().partition(|a| a.timestamp >= cutoff);
            generations.push(kept);
            alerts = stale;
        }

        generations
    }
}

/// Correlation keys for an alert, strongest first.
pub fn correlation_keys(alert: &Alert) -> Vec<String> {
    let mut keys = Vec::new();

    if !alert.source.agent_name.is_empty() && alert.source.agent_name != "unknown" {
        keys.push(format!("agent:{}", alert.source.agent_name));
    }

    for obs in &alert.observables {
        match obs.observable_type {
            ObservableType::Ip => keys.push(format!("ip:{}", obs.value)),
            t if t.is_hash() => keys.push(format!("hash:{}", obs.value)),
            ObservableType::Domain => keys.push(format!("domain:{}", obs.value)),
            _ => {}
        }
    }

    for group in extract_rule_groups(alert) {
        keys.push(format!("rulegroup:{group}"));
    }

    keys
}

/// Rule groups inferred by substring match against the closed pattern list.
pub fn extract_rule_groups(alert: &Alert) -> Vec<String> {
    let desc = alert.rule_description.to_lowercase();
    RULE_GROUP_PATTERNS
        .iter()
        .filter(|(pattern, _)| desc.contains(pattern))
        .map(|(_, group)| (*group).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn alert_at(id: &str, agent: &str, level: u8, description: &str, ts: &str) -> Alert {
        let mut alert = Alert::from_summary_block(&format!(
            "Alert ID: {id}\nTime: {ts}\nAgent: {agent}\nLevel: {level}\nDescription: {description}"
        ))
        .unwrap();
        alert.timestamp = DateTime::parse_from_rfc3339(ts)
            .unwrap()
            .with_timezone(&Utc);
        alert
    }

    fn correlator() -> AlertCorrelator {
        AlertCorrelator::new(Duration::from_secs(15 * 60))
    }

    #[test]
    fn test_same_agent_correlates() {
        let alerts = vec![
            alert_at("1", "web-01", 5, "Login failure", "2026-01-15T10:00:00Z"),
            alert_at("2", "web-01", 5, "Login failure", "2026-01-15T10:05:00Z"),
        ];
        let investigations = correlator().correlate(alerts);
        assert_eq!(investigations.len(), 1);
        assert_eq!(investigations[0].alerts.len(), 2);
    }

    #[test]
    fn test_window_cutoff_splits() {
        // Two alerts 20 minutes apart on the same agent fall into separate
        // correlation generations: two investigations, one alert each.
        let alerts = vec![
            alert_at("1", "web-01", 5, "Login failure", "2026-01-15T10:00:00Z"),
            alert_at("2", "web-01", 5, "Login failure", "2026-01-15T10:20:00Z"),
        ];
        let investigations = correlator().correlate(alerts);
        assert_eq!(investigations.len(), 2);
        assert!(investigations.iter().all(|inv| inv.alerts.len() == 1));
    }

    #[test]
    fn test_alerts_inside_window_stay_together() {
        let alerts = vec![
            alert_at("1", "web-01", 5, "Login failure", "2026-01-15T10:00:00Z"),
            alert_at("2", "web-01", 5, "Login failure", "2026-01-15T10:10:00Z"),
        ];
        let investigations = correlator().correlate(alerts);
        assert_eq!(investigations.len(), 1);
        assert_eq!(investigations[0].alerts.len(), 2);
    }

    #[test]
    fn test_standalone_bucket_for_keyless_alert() {
        let alerts = vec![alert_at(
            "1",
            "unknown",
            5,
            "Something odd",
            "2026-01-15T10:00:00Z",
        )];
        let investigations = correlator().correlate(alerts);
        assert_eq!(investigations.len(), 1);
        assert_eq!(investigations[0].alerts.len(), 1);
    }

    #[test]
    fn test_severity_ordering_of_output() {
        let alerts = vec![
            alert_at("1", "web-01", 2, "Low noise", "2026-01-15T10:00:00Z"),
            alert_at("2", "db-01", 13, "Rootkit detected", "2026-01-15T10:00:00Z"),
        ];
        let investigations = correlator().correlate(alerts);
        assert_eq!(investigations.len(), 2);
        assert_eq!(
            investigations[0].max_severity(),
            crate::types::Severity::Critical
        );
    }

    #[test]
    fn test_correlation_keys_priority() {
        let alert = alert_at(
            "1",
            "web-01",
            5,
            "Brute force from 203.0.113.9",
            "2026-01-15T10:00:00Z",
        );
        let keys = correlation_keys(&alert);
        assert_eq!(keys[0], "agent:web-01");
        assert!(keys.contains(&"ip:203.0.113.9".to_string()));
        assert!(keys.contains(&"rulegroup:bruteforce".to_string()));
    }

    #[test]
    fn test_rule_groups_closed_list() {
        let alert = alert_at(
            "1",
            "web-01",
            5,
            "SQL injection via web form",
            "2026-01-15T10:00:00Z",
        );
        let groups = extract_rule_groups(&alert);
        assert!(groups.contains(&"web_attack".to_string()));
        assert!(groups.contains(&"sql_injection".to_string()));
    }
}
