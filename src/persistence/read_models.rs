//! Row types for the event store and CQRS read models.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// A stored event. Immutable once appended.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub metadata: Value,
    pub idempotency_key: Option<String>,
}

/// Projection of an investigation's event stream.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InvestigationRow {
    pub id: Uuid,
    pub title: Option<String>,
    pub status: String,
    pub phase: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub time_to_triage_seconds: Option<i64>,
    pub time_to_verdict_seconds: Option<i64>,
    pub alert_count: i64,
    pub observable_count: i64,
    pub malicious_count: i64,
    pub suspicious_count: i64,
    pub clean_count: i64,
    pub max_severity: Option<String>,
    pub verdict_decision: Option<String>,
    pub verdict_confidence: Option<f64>,
    pub verdict_reasoning: Option<String>,
    pub thehive_case_id: Option<String>,
    pub threat_actor: Option<String>,
    pub tags: Vec<String>,
}

/// One outstanding (or resolved) human review request.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PendingReviewRow {
    pub id: Uuid,
    pub investigation_id: Uuid,
    pub status: String,
    pub title: String,
    pub description: String,
    pub max_severity: String,
    pub alert_count: i64,
    pub malicious_count: i64,
    pub suspicious_count: i64,
    pub clean_count: i64,
    pub findings: Vec<String>,
    pub enrichments: Value,
    pub misp_context: Option<Value>,
    pub ai_decision: Option<String>,
    pub ai_confidence: Option<f64>,
    pub ai_assessment: Option<String>,
    pub ai_recommendation: Option<String>,
    pub timeout_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub reviewer: Option<String>,
    pub feedback: Option<String>,
    pub workflow_resumed_at: Option<DateTime<Utc>>,
}

/// Hourly aggregated metrics bucket.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MetricsHourlyRow {
    pub hour: DateTime<Utc>,
    pub investigations_created: i64,
    pub investigations_closed: i64,
    pub escalations: i64,
    pub auto_closed: i64,
    pub avg_time_to_verdict_seconds: Option<i64>,
    pub total_alerts: i64,
    pub total_observables: i64,
    pub malicious_observables: i64,
}

/// Per-IOC sighting statistics.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct IocStatsRow {
    pub id: Uuid,
    pub value: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub ioc_type: String,
    pub times_seen: i64,
    pub last_seen: DateTime<Utc>,
    pub malicious_count: i64,
    pub benign_count: i64,
    pub threat_actors: Vec<String>,
}

/// Per-detection-rule statistics.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RuleStatsRow {
    pub rule_id: String,
    pub times_triggered: i64,
    pub escalation_count: i64,
    pub auto_close_count: i64,
    pub precision_rate: Option<f64>,
}

/// Per-analyzer invocation statistics.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AnalyzerStatsRow {
    pub analyzer: String,
    pub invocations: i64,
    pub successes: i64,
    pub failures: i64,
    pub avg_response_time_ms: Option<f64>,
}

/// Non-secret user preferences (integrations + LLM tuning).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserSettingsRow {
    pub id: String,
    pub wazuh_enabled: bool,
    pub wazuh_url: Option<String>,
    pub cortex_enabled: bool,
    pub cortex_url: Option<String>,
    pub thehive_enabled: bool,
    pub thehive_url: Option<String>,
    pub misp_enabled: bool,
    pub misp_url: Option<String>,
    pub slack_enabled: bool,
    pub slack_channel: Option<String>,
    pub slack_notify_on_escalation: bool,
    pub slack_notify_on_verdict: bool,
    pub llm_provider: String,
    pub llm_fast_model: String,
    pub llm_reasoning_model: String,
    pub llm_temperature: f64,
    pub llm_max_tokens: i64,
    pub updated_at: DateTime<Utc>,
}
