//! SIEM alert model and observable extraction.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

use super::enums::{ObservableType, Severity};
use super::observables::Observable;

/// Source agent information for an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSource {
    pub agent_id: String,
    pub agent_name: String,
    #[serde(default)]
    pub agent_ip: Option<String>,
}

/// A security alert from the SIEM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// Raw SIEM alert level (0-15).
    pub level: u8,
    #[serde(default)]
    pub rule_id: Option<String>,
    pub rule_description: String,
    pub source: AlertSource,
    #[serde(default)]
    pub raw_data: Value,
    #[serde(default)]
    pub observables: Vec<Observable>,
}

fn ip_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap())
}

fn md5_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-fA-F0-9]{32}\b").unwrap())
}

fn sha256_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-fA-F0-9]{64}\b").unwrap())
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"'{}|\\^`\[\]]+"#).unwrap())
}

fn domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:[a-zA-Z0-9-]+\.)+(?:com|net|org|io|edu|gov|mil|co|uk|de|ru|cn)\b")
            .unwrap()
    })
}

impl Alert {
    /// Parse a single alert block from the SIEM tool's text summary.
    ///
    /// Expected shape (one field per line): `Alert ID: ...`, `Time: ...`,
    /// `Agent: ...`, `Level: ...`, `Description: ...`. Returns `None` when
    /// the block has no alert ID.
    pub fn from_summary_block(block: &str) -> Option<Self> {
        let mut fields: Vec<(&str, &str)> = Vec::new();
        for line in block.lines() {
            if let Some((key, value)) = line.split_once(':') {
                fields.push((key.trim(), value.trim()));
            }
        }
        let get = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| *v)
        };

        let id = get("Alert ID")?.to_string();
        if id.is_empty() {
            return None;
        }

        let timestamp = get("Time")
            .and_then(|t| DateTime::parse_from_rfc3339(&t.replace('Z', "+00:00")).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let level: u8 = get("Level").and_then(|l| l.parse().ok()).unwrap_or(0);
        let description = get("Description").unwrap_or("").to_string();
        let rule_id = get("Rule ID").map(str::to_string);
        let agent_name = get("Agent").unwrap_or("unknown").to_string();

        let mut alert = Self {
            id,
            timestamp,
            severity: Severity::from_siem_level(level),
            level,
            rule_id,
            rule_description: description,
            source: AlertSource {
                agent_id: "unknown".to_string(),
                agent_name,
                agent_ip: None,
            },
            raw_data: Value::String(block.to_string()),
            observables: Vec::new(),
        };
        alert.observables = alert.extract_observables();
        Some(alert)
    }

    /// Split a full SIEM summary response into individual alerts.
    pub fn parse_summary(text: &str) -> Vec<Self> {
        let mut alerts = Vec::new();
        let mut current = String::new();
        for line in text.lines() {
            if line.trim_start().starts_with("Alert ID:") && !current.trim().is_empty() {
                if let Some(alert) = Self::from_summary_block(&current) {
                    alerts.push(alert);
                }
                current.clear();
            }
            current.push_str(line);
            current.push('\n');
        }
        if !current.trim().is_empty() {
            if let Some(alert) = Self::from_summary_block(&current) {
                alerts.push(alert);
            }
        }
        alerts
    }

    /// Extract observables from the rule description and raw payload.
    ///
    /// Deduplicates on the `(value, type)` composite key. Private IPs are
    /// kept (they matter for lateral-movement correlation) but tagged.
    pub fn extract_observables(&self) -> Vec<Observable> {
        let mut text = format!("{} {}", self.rule_description, self.raw_data);
        if let Some(extra) = self.raw_data.get("text").and_then(Value::as_str) {
            text.push(' ');
            text.push_str(extra);
        }

        let mut seen: HashSet<(String, ObservableType)> = HashSet::new();
        let mut observables = Vec::new();
        let source = format!("alert:{}", self.id);

        for m in ip_regex().find_iter(&text) {
            let value = m.as_str().to_string();
            if !seen.insert((value.clone(), ObservableType::Ip)) {
                continue;
            }
            let mut obs = Observable::new(value.clone(), ObservableType::Ip, source.clone());
            if is_private_ip(&value) {
                obs.tags = vec!["private_ip".to_string(), "internal".to_string()];
            }
            observables.push(obs);
        }

        for m in sha256_regex().find_iter(&text) {
            let value = m.as_str().to_lowercase();
            if seen.insert((value.clone(), ObservableType::HashSha256)) {
                observables.push(Observable::new(
                    value,
                    ObservableType::HashSha256,
                    source.clone(),
                ));
            }
        }

        for m in md5_regex().find_iter(&text) {
            let value = m.as_str().to_lowercase();
            // A SHA-256 contains 32-hex-char substrings; skip those.
            if seen
                .iter()
                .any(|(v, t)| *t == ObservableType::HashSha256 && v.contains(&value))
            {
                continue;
            }
            if seen.insert((value.clone(), ObservableType::HashMd5)) {
                observables.push(Observable::new(
                    value,
                    ObservableType::HashMd5,
                    source.clone(),
                ));
            }
        }

        for m in url_regex().find_iter(&text) {
            let value = m.as_str().to_string();
            if seen.insert((value.clone(), ObservableType::Url)) {
                observables.push(Observable::new(value, ObservableType::Url, source.clone()));
            }
        }

        for m in domain_regex().find_iter(&text) {
            let value = m.as_str().to_lowercase();
            if seen.insert((value.clone(), ObservableType::Domain)) {
                observables.push(Observable::new(
                    value,
                    ObservableType::Domain,
                    source.clone(),
                ));
            }
        }

        observables
    }
}

/// RFC 1918 / loopback / zero-net check for dotted-quad strings.
pub fn is_private_ip(ip: &str) -> bool {
    let octets: Vec<u16> = ip
        .split('.')
        .filter_map(|p| p.parse::<u16>().ok())
        .collect();
    if octets.len() != 4 || octets.iter().any(|&o| o > 255) {
        return true;
    }
    match octets[0] {
        10 | 127 | 0 => true,
        172 => (16..=31).contains(&octets[1]),
        192 => octets[1] == 168,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> &'static str {
        "Alert ID: 1234-5678\n\
         Time: 2026-01-15T10:30:00Z\n\
         Agent: web-01\n\
         Level: 10\n\
         Description: Possible SSH brute force from 203.0.113.7"
    }

    #[test]
    fn test_parse_summary_block() {
        let alert = Alert::from_summary_block(sample_block()).unwrap();
        assert_eq!(alert.id, "1234-5678");
        assert_eq!(alert.level, 10);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.source.agent_name, "web-01");
        assert!(alert.rule_description.contains("brute force"));
    }

    #[test]
    fn test_parse_summary_splits_blocks() {
        let text = format!(
            "{}\n\nAlert ID: 9\nTime: bad\nAgent: db-01\nLevel: 3\nDescription: Login\n",
            sample_block()
        );
        let alerts = Alert::parse_summary(&text);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[1].id, "9");
        assert_eq!(alerts[1].severity, Severity::Low);
    }

    #[test]
    fn test_observable_extraction() {
        let alert = Alert::from_summary_block(sample_block()).unwrap();
        assert!(alert
            .observables
            .iter()
            .any(|o| o.value == "203.0.113.7" && o.observable_type == ObservableType::Ip));
    }

    #[test]
    fn test_observable_extraction_dedup() {
        let alert = Alert::from_summary_block(
            "Alert ID: 1\nTime: x\nAgent: a\nLevel: 5\nDescription: traffic 8.8.8.8 to 8.8.8.8",
        )
        .unwrap();
        let count = alert
            .observables
            .iter()
            .filter(|o| o.value == "8.8.8.8")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_private_ip_tagging() {
        let alert = Alert::from_summary_block(
            "Alert ID: 1\nTime: x\nAgent: a\nLevel: 5\nDescription: scan from 192.168.1.50",
        )
        .unwrap();
        let obs = alert
            .observables
            .iter()
            .find(|o| o.value == "192.168.1.50")
            .unwrap();
        assert!(obs.tags.contains(&"private_ip".to_string()));
    }

    #[test]
    fn test_is_private_ip() {
        assert!(is_private_ip("10.0.0.1"));
        assert!(is_private_ip("172.20.1.1"));
        assert!(is_private_ip("192.168.0.1"));
        assert!(is_private_ip("127.0.0.1"));
        assert!(!is_private_ip("8.8.8.8"));
        assert!(!is_private_ip("172.32.0.1"));
    }
}
