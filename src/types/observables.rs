//! Observables (IOCs) and enrichment results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::{EnrichmentVerdict, ObservableType};

/// A security observable extracted from alerts or investigation data.
///
/// Identity is the `(value, type)` composite key; two observables with the
/// same value and type are the same IOC regardless of source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observable {
    pub value: String,
    #[serde(rename = "type")]
    pub observable_type: ObservableType,
    /// Where this observable was extracted from (e.g. `alert:<id>`).
    pub source: String,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Observable {
    pub fn new(
        value: impl Into<String>,
        observable_type: ObservableType,
        source: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            observable_type,
            source: source.into(),
            first_seen: Utc::now(),
            context: None,
            tags: Vec::new(),
        }
    }

    pub fn same_ioc(&self, other: &Self) -> bool {
        self.value == other.value && self.observable_type == other.observable_type
    }

    /// Best-effort type detection from a bare value.
    pub fn detect_type(value: &str) -> ObservableType {
        let value = value.trim();

        if is_ipv4(value) {
            return ObservableType::Ip;
        }
        if value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return ObservableType::HashMd5;
        }
        if value.len() == 40 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return ObservableType::HashSha1;
        }
        if value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return ObservableType::HashSha256;
        }
        if value.starts_with("http://") || value.starts_with("https://") {
            return ObservableType::Url;
        }
        if value.contains('@') && value.split('@').count() == 2 {
            let domain = value.rsplit('@').next().unwrap_or("");
            if domain.contains('.') {
                return ObservableType::Email;
            }
        }
        if value.contains('.')
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
            && !value.starts_with('.')
            && !value.ends_with('.')
        {
            return ObservableType::Domain;
        }

        ObservableType::Unknown
    }
}

fn is_ipv4(value: &str) -> bool {
    let octets: Vec<&str> = value.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|o| {
            !o.is_empty() && o.len() <= 3 && o.parse::<u16>().map(|n| n <= 255).unwrap_or(false)
        })
}

/// Outcome of querying an analyzer about an observable.
///
/// A tagged sum rather than a result-with-optional-error struct: callers
/// match on the variant instead of probing for field presence. Both variants
/// reference the observable by its composite key, never by back-pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Enrichment {
    Result {
        observable_value: String,
        observable_type: ObservableType,
        analyzer: String,
        verdict: EnrichmentVerdict,
        confidence: f64,
        #[serde(default)]
        details: Value,
        enriched_at: DateTime<Utc>,
    },
    Failed {
        observable_value: String,
        observable_type: ObservableType,
        analyzer: String,
        error: String,
        enriched_at: DateTime<Utc>,
    },
}

impl Enrichment {
    pub fn observable_value(&self) -> &str {
        match self {
            Self::Result {
                observable_value, ..
            }
            | Self::Failed {
                observable_value, ..
            } => observable_value,
        }
    }

    pub fn observable_type(&self) -> ObservableType {
        match self {
            Self::Result {
                observable_type, ..
            }
            | Self::Failed {
                observable_type, ..
            } => *observable_type,
        }
    }

    pub fn analyzer(&self) -> &str {
        match self {
            Self::Result { analyzer, .. } | Self::Failed { analyzer, .. } => analyzer,
        }
    }

    /// Verdict of a successful enrichment; failures read as `Unknown`.
    pub fn verdict(&self) -> EnrichmentVerdict {
        match self {
            Self::Result { verdict, .. } => *verdict,
            Self::Failed { .. } => EnrichmentVerdict::Unknown,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::Result { confidence, .. } => *confidence,
            Self::Failed { .. } => 0.0,
        }
    }

    pub fn is_malicious(&self) -> bool {
        self.verdict() == EnrichmentVerdict::Malicious
    }

    pub fn is_suspicious(&self) -> bool {
        matches!(
            self.verdict(),
            EnrichmentVerdict::Suspicious | EnrichmentVerdict::Malicious
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_type() {
        assert_eq!(Observable::detect_type("8.8.8.8"), ObservableType::Ip);
        assert_eq!(
            Observable::detect_type("d41d8cd98f00b204e9800998ecf8427e"),
            ObservableType::HashMd5
        );
        assert_eq!(
            Observable::detect_type(
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            ),
            ObservableType::HashSha256
        );
        assert_eq!(
            Observable::detect_type("https://evil.example.com/payload"),
            ObservableType::Url
        );
        assert_eq!(
            Observable::detect_type("admin@example.com"),
            ObservableType::Email
        );
        assert_eq!(
            Observable::detect_type("malware-c2.example.net"),
            ObservableType::Domain
        );
        assert_eq!(Observable::detect_type("???"), ObservableType::Unknown);
    }

    #[test]
    fn test_detect_type_rejects_bad_ipv4() {
        assert_ne!(Observable::detect_type("300.1.1.1"), ObservableType::Ip);
        assert_ne!(Observable::detect_type("1.2.3"), ObservableType::Ip);
    }

    #[test]
    fn test_enrichment_variants() {
        let ok = Enrichment::Result {
            observable_value: "8.8.8.8".into(),
            observable_type: ObservableType::Ip,
            analyzer: "AbuseIPDB".into(),
            verdict: EnrichmentVerdict::Benign,
            confidence: 0.8,
            details: serde_json::json!({}),
            enriched_at: Utc::now(),
        };
        assert!(!ok.is_malicious());
        assert_eq!(ok.verdict(), EnrichmentVerdict::Benign);

        let failed = Enrichment::Failed {
            observable_value: "8.8.8.8".into(),
            observable_type: ObservableType::Ip,
            analyzer: "AbuseIPDB".into(),
            error: "timeout".into(),
            enriched_at: Utc::now(),
        };
        assert_eq!(failed.verdict(), EnrichmentVerdict::Unknown);
        assert_eq!(failed.confidence(), 0.0);
    }

    #[test]
    fn test_enrichment_serde_tag() {
        let failed = Enrichment::Failed {
            observable_value: "x".into(),
            observable_type: ObservableType::Domain,
            analyzer: "VirusTotal".into(),
            error: "503".into(),
            enriched_at: Utc::now(),
        };
        let v = serde_json::to_value(&failed).unwrap();
        assert_eq!(v["kind"], "failed");
        let back: Enrichment = serde_json::from_value(v).unwrap();
        assert_eq!(back.analyzer(), "VirusTotal");
    }
}
