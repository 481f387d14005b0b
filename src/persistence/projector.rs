//! CQRS projector: applies each event to the read models inside the same
//! transaction as the append.
//!
//! Projection is idempotent under full ordered replay: rebuilding a read
//! model row from `get_events(aggregate_id)` applied from a blank state
//! produces the same row as the online path.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::Severity;

use super::events::EventType;
use super::read_models::{EventRecord, InvestigationRow};
use super::store::{self, AppendOptions, StoreError};

/// Route one event to its projection handlers.
pub async fn project(conn: &mut PgConnection, event: &EventRecord) -> Result<(), sqlx::Error> {
    let Some(event_type) = EventType::parse(&event.event_type) else {
        debug!(event_type = %event.event_type, "Unknown event type, skipping projection");
        return Ok(());
    };

    match event_type {
        EventType::InvestigationCreated => project_investigation_created(conn, event).await?,
        EventType::InvestigationStarted => project_investigation_started(conn, event).await?,
        EventType::InvestigationPaused => {
            project_status_update(conn, event, "paused").await?;
        }
        EventType::InvestigationResumed => {
            project_status_update(conn, event, "in_progress").await?;
        }
        EventType::InvestigationCancelled => project_investigation_cancelled(conn, event).await?,
        EventType::AlertCorrelated => project_alert_correlated(conn, event).await?,
        EventType::ObservableExtracted => project_observable_extracted(conn, event).await?,
        EventType::EnrichmentCompleted => project_enrichment_completed(conn, event).await?,
        EventType::VerdictRendered => project_verdict_rendered(conn, event).await?,
        EventType::InvestigationEscalated => project_investigation_escalated(conn, event).await?,
        EventType::InvestigationAutoClosed => {
            project_investigation_auto_closed(conn, event).await?;
        }
        EventType::InvestigationClosed => project_investigation_closed(conn, event).await?,
        EventType::TheHiveCaseCreated => project_thehive_case_created(conn, event).await?,
        EventType::AnalyzerInvoked => project_analyzer_invoked(conn, event).await?,
        EventType::AnalyzerCompleted => project_analyzer_completed(conn, event).await?,
        EventType::PhaseChanged => project_phase_changed(conn, event).await?,
        EventType::HumanReviewRequested => project_human_review_requested(conn, event).await?,
        EventType::HumanDecisionReceived => project_human_decision_received(conn, event).await?,
        _ => {}
    }

    debug!(event_id = %event.id, event_type = %event.event_type, "Event projected");
    Ok(())
}

/// Append an event and project it in one step on the same connection.
pub async fn append_projected(
    conn: &mut PgConnection,
    aggregate_id: Uuid,
    event_type: EventType,
    data: Value,
    options: AppendOptions,
) -> Result<EventRecord, StoreError> {
    let event = store::append(conn, aggregate_id, event_type, data, options).await?;
    project(conn, &event).await?;
    Ok(event)
}

/// Append a batch atomically, projecting every event.
pub async fn append_batch_projected(
    conn: &mut PgConnection,
    aggregate_id: Uuid,
    events: Vec<(EventType, Value, Option<Value>)>,
    expected_version: Option<i64>,
) -> Result<Vec<EventRecord>, StoreError> {
    let created = store::append_batch(conn, aggregate_id, events, None, expected_version).await?;
    for event in &created {
        project(conn, event).await?;
    }
    Ok(created)
}

// ---------------------------------------------------------------------------
// Pure derivation helpers (unit-tested; keep in sync with the close node)
// ---------------------------------------------------------------------------

/// Final status derivation for INVESTIGATION_CLOSED.
pub fn derive_closed_status(
    thehive_case_id: Option<&str>,
    resolution: &str,
    verdict_decision: &str,
) -> &'static str {
    let resolution = resolution.to_lowercase();
    let verdict_decision = verdict_decision.to_lowercase();
    if thehive_case_id.is_some_and(|c| !c.is_empty()) {
        "escalated"
    } else if resolution.contains("rejected") {
        "rejected"
    } else if verdict_decision == "close" && resolution.contains("closed by ai verdict") {
        "auto_closed"
    } else {
        "closed"
    }
}

/// Severity rank for string values stored in event payloads; unknown = 0.
pub fn severity_rank(value: &str) -> i32 {
    Severity::parse(value).map_or(0, Severity::rank)
}

fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::hours(1)).unwrap_or(ts)
}

fn data_str<'a>(event: &'a EventRecord, key: &str) -> Option<&'a str> {
    event.data.get(key).and_then(Value::as_str)
}

// ---------------------------------------------------------------------------
// Investigation lifecycle
// ---------------------------------------------------------------------------

async fn ensure_investigation(
    conn: &mut PgConnection,
    id: Uuid,
    ts: DateTime<Utc>,
) -> Result<InvestigationRow, sqlx::Error> {
    sqlx::query(
        "INSERT INTO investigations (id, created_at, updated_at) VALUES ($1, $2, $2)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(id)
    .bind(ts)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as(
        r#"SELECT id, title, status, phase, created_at, updated_at, closed_at,
                  time_to_triage_seconds, time_to_verdict_seconds, alert_count,
                  observable_count, malicious_count, suspicious_count, clean_count,
                  max_severity, verdict_decision, verdict_confidence,
                  verdict_reasoning, thehive_case_id, threat_actor, tags
           FROM investigations WHERE id = $1"#,
    )
    .bind(id)
    .fetch_one(conn)
    .await
}

async fn bump_hourly(
    conn: &mut PgConnection,
    ts: DateTime<Utc>,
    column: &str,
) -> Result<(), sqlx::Error> {
    // Column names come from a fixed in-crate set, never from input.
    let sql = format!(
        "INSERT INTO metrics_hourly (hour, {column}) VALUES ($1, 1)
         ON CONFLICT (hour) DO UPDATE SET {column} = metrics_hourly.{column} + 1"
    );
    sqlx::query(&sql).bind(hour_bucket(ts)).execute(conn).await?;
    Ok(())
}

async fn project_investigation_created(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;

    sqlx::query(
        r#"UPDATE investigations
           SET created_at = $2,
               updated_at = $2,
               status = 'pending',
               phase = 'triage',
               title = COALESCE($3, title),
               max_severity = COALESCE($4, max_severity)
           WHERE id = $1"#,
    )
    .bind(event.aggregate_id)
    .bind(event.timestamp)
    .bind(data_str(event, "title"))
    .bind(data_str(event, "max_severity"))
    .execute(&mut *conn)
    .await?;

    bump_hourly(conn, event.timestamp, "investigations_created").await
}

async fn project_investigation_started(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;
    sqlx::query(
        r#"UPDATE investigations
           SET status = 'in_progress',
               updated_at = $2,
               title = COALESCE($3, title)
           WHERE id = $1"#,
    )
    .bind(event.aggregate_id)
    .bind(event.timestamp)
    .bind(data_str(event, "title"))
    .execute(conn)
    .await?;
    Ok(())
}

async fn project_status_update(
    conn: &mut PgConnection,
    event: &EventRecord,
    status: &str,
) -> Result<(), sqlx::Error> {
    ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;
    sqlx::query("UPDATE investigations SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(event.aggregate_id)
        .bind(status)
        .bind(event.timestamp)
        .execute(conn)
        .await?;
    Ok(())
}

async fn project_investigation_cancelled(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    let row = ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;

    let time_to_triage = row
        .time_to_triage_seconds
        .or_else(|| Some((event.timestamp - row.created_at).num_seconds()));

    sqlx::query(
        r#"UPDATE investigations
           SET status = 'cancelled',
               phase = 'closed',
               closed_at = $2,
               updated_at = $2,
               time_to_triage_seconds = $3
           WHERE id = $1"#,
    )
    .bind(event.aggregate_id)
    .bind(event.timestamp)
    .bind(time_to_triage)
    .execute(&mut *conn)
    .await?;

    bump_hourly(conn, event.timestamp, "investigations_closed").await
}

async fn project_alert_correlated(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    let row = ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;

    // max_severity is monotone: only upgrade, never downgrade.
    let new_severity = match data_str(event, "severity") {
        Some(severity) => match row.max_severity.as_deref() {
            Some(current) if severity_rank(severity) <= severity_rank(current) => {
                row.max_severity.clone()
            }
            _ => Some(severity.to_string()),
        },
        None => row.max_severity.clone(),
    };

    sqlx::query(
        r#"UPDATE investigations
           SET alert_count = alert_count + 1,
               max_severity = $2,
               updated_at = $3
           WHERE id = $1"#,
    )
    .bind(event.aggregate_id)
    .bind(new_severity)
    .bind(event.timestamp)
    .execute(&mut *conn)
    .await?;

    bump_hourly(conn, event.timestamp, "total_alerts").await?;

    if let Some(rule_id) = data_str(event, "rule_id") {
        sqlx::query(
            "INSERT INTO rule_stats (rule_id, times_triggered) VALUES ($1, 1)
             ON CONFLICT (rule_id) DO UPDATE SET times_triggered = rule_stats.times_triggered + 1",
        )
        .bind(rule_id)
        .execute(conn)
        .await?;
    }
    Ok(())
}

async fn project_observable_extracted(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;
    sqlx::query(
        "UPDATE investigations SET observable_count = observable_count + 1, updated_at = $2
         WHERE id = $1",
    )
    .bind(event.aggregate_id)
    .bind(event.timestamp)
    .execute(&mut *conn)
    .await?;

    bump_hourly(conn, event.timestamp, "total_observables").await?;

    let obs_type = data_str(event, "type").unwrap_or("unknown");
    if let Some(value) = data_str(event, "value").filter(|v| !v.is_empty()) {
        let updated = sqlx::query(
            "UPDATE ioc_stats SET times_seen = times_seen + 1, last_seen = $3
             WHERE value = $1 AND type = $2",
        )
        .bind(value)
        .bind(obs_type)
        .bind(event.timestamp)
        .execute(&mut *conn)
        .await?;
        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO ioc_stats (id, value, type, times_seen, last_seen)
                 VALUES ($1, $2, $3, 1, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(value)
            .bind(obs_type)
            .bind(event.timestamp)
            .execute(conn)
            .await?;
        }
    }
    Ok(())
}

async fn project_enrichment_completed(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;
    sqlx::query("UPDATE investigations SET updated_at = $2 WHERE id = $1")
        .bind(event.aggregate_id)
        .bind(event.timestamp)
        .execute(&mut *conn)
        .await?;

    let is_malicious = event
        .data
        .get("is_malicious")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| data_str(event, "verdict") == Some("malicious"));
    let obs_type = data_str(event, "observable_type").unwrap_or("unknown");
    let obs_value = data_str(event, "observable_value").unwrap_or("");

    if is_malicious {
        sqlx::query(
            "UPDATE investigations SET malicious_count = malicious_count + 1 WHERE id = $1",
        )
        .bind(event.aggregate_id)
        .execute(&mut *conn)
        .await?;

        if !obs_value.is_empty() {
            let updated = sqlx::query(
                "UPDATE ioc_stats SET malicious_count = malicious_count + 1
                 WHERE value = $1 AND type = $2",
            )
            .bind(obs_value)
            .bind(obs_type)
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                sqlx::query(
                    "INSERT INTO ioc_stats (id, value, type, malicious_count, last_seen)
                     VALUES ($1, $2, $3, 1, $4)",
                )
                .bind(Uuid::new_v4())
                .bind(obs_value)
                .bind(obs_type)
                .bind(event.timestamp)
                .execute(&mut *conn)
                .await?;
            }

            if let Some(actor) = data_str(event, "threat_actor").filter(|a| !a.is_empty()) {
                sqlx::query(
                    "UPDATE ioc_stats SET threat_actors = array_append(threat_actors, $3)
                     WHERE value = $1 AND type = $2 AND NOT ($3 = ANY(threat_actors))",
                )
                .bind(obs_value)
                .bind(obs_type)
                .bind(actor)
                .execute(&mut *conn)
                .await?;
            }
        }

        bump_hourly(conn, event.timestamp, "malicious_observables").await?;
    } else if !obs_value.is_empty() {
        let updated = sqlx::query(
            "UPDATE ioc_stats SET benign_count = benign_count + 1 WHERE value = $1 AND type = $2",
        )
        .bind(obs_value)
        .bind(obs_type)
        .execute(&mut *conn)
        .await?;
        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO ioc_stats (id, value, type, benign_count, last_seen)
                 VALUES ($1, $2, $3, 1, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(obs_value)
            .bind(obs_type)
            .bind(event.timestamp)
            .execute(conn)
            .await?;
        }
    }
    Ok(())
}

async fn project_verdict_rendered(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    let row = ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;

    let time_to_verdict = (event.timestamp - row.created_at).num_seconds();

    sqlx::query(
        r#"UPDATE investigations
           SET phase = 'verdict',
               verdict_decision = $2,
               verdict_confidence = $3,
               verdict_reasoning = COALESCE($4, verdict_reasoning),
               threat_actor = COALESCE($5, threat_actor),
               time_to_verdict_seconds = $6,
               updated_at = $7
           WHERE id = $1"#,
    )
    .bind(event.aggregate_id)
    .bind(data_str(event, "decision"))
    .bind(event.data.get("confidence").and_then(Value::as_f64))
    .bind(data_str(event, "reasoning"))
    .bind(data_str(event, "threat_actor"))
    .bind(time_to_verdict)
    .bind(event.timestamp)
    .execute(&mut *conn)
    .await?;

    // Incremental mean over closed-so-far count, matching the online path.
    let hour = hour_bucket(event.timestamp);
    let metrics: Option<(Option<i64>, i64)> = sqlx::query_as(
        "SELECT avg_time_to_verdict_seconds, investigations_closed FROM metrics_hourly WHERE hour = $1",
    )
    .bind(hour)
    .fetch_optional(&mut *conn)
    .await?;

    let new_avg = match metrics {
        Some((Some(avg), closed)) => (avg * closed + time_to_verdict) / (closed + 1),
        _ => time_to_verdict,
    };
    sqlx::query(
        "INSERT INTO metrics_hourly (hour, avg_time_to_verdict_seconds) VALUES ($1, $2)
         ON CONFLICT (hour) DO UPDATE SET avg_time_to_verdict_seconds = $2",
    )
    .bind(hour)
    .bind(new_avg)
    .execute(conn)
    .await?;
    Ok(())
}

async fn project_investigation_escalated(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;
    sqlx::query(
        "UPDATE investigations SET status = 'escalated', phase = 'escalation', updated_at = $2
         WHERE id = $1",
    )
    .bind(event.aggregate_id)
    .bind(event.timestamp)
    .execute(&mut *conn)
    .await?;

    bump_hourly(conn, event.timestamp, "escalations").await?;

    if let Some(rule_id) = data_str(event, "trigger_rule_id") {
        sqlx::query(
            "INSERT INTO rule_stats (rule_id, escalation_count) VALUES ($1, 1)
             ON CONFLICT (rule_id) DO UPDATE SET escalation_count = rule_stats.escalation_count + 1",
        )
        .bind(rule_id)
        .execute(conn)
        .await?;
    }
    Ok(())
}

async fn project_investigation_auto_closed(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;
    sqlx::query(
        r#"UPDATE investigations
           SET status = 'auto_closed', phase = 'closed', closed_at = $2, updated_at = $2
           WHERE id = $1"#,
    )
    .bind(event.aggregate_id)
    .bind(event.timestamp)
    .execute(&mut *conn)
    .await?;

    bump_hourly(conn, event.timestamp, "auto_closed").await?;
    bump_hourly(conn, event.timestamp, "investigations_closed").await?;

    if let Some(rule_id) = data_str(event, "trigger_rule_id") {
        sqlx::query(
            "INSERT INTO rule_stats (rule_id, auto_close_count) VALUES ($1, 1)
             ON CONFLICT (rule_id) DO UPDATE SET auto_close_count = rule_stats.auto_close_count + 1",
        )
        .bind(rule_id)
        .execute(conn)
        .await?;
    }
    Ok(())
}

async fn project_investigation_closed(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    let row = ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;

    let resolution = data_str(event, "resolution").unwrap_or("");
    let verdict_decision = data_str(event, "verdict_decision").unwrap_or("");
    let case_id = data_str(event, "thehive_case_id")
        .map(str::to_string)
        .or(row.thehive_case_id.clone());

    let status = derive_closed_status(case_id.as_deref(), resolution, verdict_decision);

    let time_to_triage = row
        .time_to_triage_seconds
        .or_else(|| Some((event.timestamp - row.created_at).num_seconds()));

    sqlx::query(
        r#"UPDATE investigations
           SET status = $2,
               phase = 'closed',
               closed_at = $3,
               updated_at = $3,
               thehive_case_id = $4,
               verdict_decision = COALESCE(NULLIF($5, ''), verdict_decision),
               time_to_triage_seconds = $6
           WHERE id = $1"#,
    )
    .bind(event.aggregate_id)
    .bind(status)
    .bind(event.timestamp)
    .bind(case_id)
    .bind(verdict_decision.to_lowercase())
    .bind(time_to_triage)
    .execute(&mut *conn)
    .await?;

    if status != "escalated" {
        bump_hourly(conn, event.timestamp, "investigations_closed").await?;
        if status == "auto_closed" {
            bump_hourly(conn, event.timestamp, "auto_closed").await?;
        }
    }
    Ok(())
}

async fn project_thehive_case_created(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;
    sqlx::query(
        r#"UPDATE investigations
           SET thehive_case_id = $2, status = 'escalated', phase = 'escalation', updated_at = $3
           WHERE id = $1"#,
    )
    .bind(event.aggregate_id)
    .bind(data_str(event, "case_id"))
    .bind(event.timestamp)
    .execute(&mut *conn)
    .await?;

    bump_hourly(conn, event.timestamp, "escalations").await
}

async fn project_phase_changed(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    let row = ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;

    let new_phase = data_str(event, "new_phase")
        .or_else(|| data_str(event, "to_phase"))
        .or_else(|| data_str(event, "phase"));

    // Entering the verdict phase pins time-to-triage if not already set.
    let time_to_triage = if new_phase == Some("verdict") && row.time_to_triage_seconds.is_none() {
        Some((event.timestamp - row.created_at).num_seconds())
    } else {
        row.time_to_triage_seconds
    };

    sqlx::query(
        r#"UPDATE investigations
           SET phase = COALESCE($2, phase),
               time_to_triage_seconds = $3,
               updated_at = $4
           WHERE id = $1"#,
    )
    .bind(event.aggregate_id)
    .bind(new_phase)
    .bind(time_to_triage)
    .bind(event.timestamp)
    .execute(conn)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Analyzer statistics
// ---------------------------------------------------------------------------

async fn project_analyzer_invoked(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    if let Some(analyzer) = data_str(event, "analyzer") {
        sqlx::query(
            "INSERT INTO analyzer_stats (analyzer, invocations) VALUES ($1, 1)
             ON CONFLICT (analyzer) DO UPDATE SET invocations = analyzer_stats.invocations + 1",
        )
        .bind(analyzer)
        .execute(conn)
        .await?;
    }
    Ok(())
}

async fn project_analyzer_completed(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    let Some(analyzer) = data_str(event, "analyzer") else {
        return Ok(());
    };
    let success = event
        .data
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    if success {
        sqlx::query(
            "INSERT INTO analyzer_stats (analyzer, successes) VALUES ($1, 1)
             ON CONFLICT (analyzer) DO UPDATE SET successes = analyzer_stats.successes + 1",
        )
        .bind(analyzer)
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query(
            "INSERT INTO analyzer_stats (analyzer, failures) VALUES ($1, 1)
             ON CONFLICT (analyzer) DO UPDATE SET failures = analyzer_stats.failures + 1",
        )
        .bind(analyzer)
        .execute(&mut *conn)
        .await?;
    }

    if let Some(response_time_ms) = event.data.get("response_time_ms").and_then(Value::as_f64) {
        let stats: Option<(Option<f64>, i64, i64)> = sqlx::query_as(
            "SELECT avg_response_time_ms, successes, failures FROM analyzer_stats WHERE analyzer = $1",
        )
        .bind(analyzer)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some((avg, successes, failures)) = stats {
            let total_calls = (successes + failures).max(1) as f64;
            let new_avg = match avg {
                Some(avg) => (avg * (total_calls - 1.0) + response_time_ms) / total_calls,
                None => response_time_ms,
            };
            sqlx::query("UPDATE analyzer_stats SET avg_response_time_ms = $2 WHERE analyzer = $1")
                .bind(analyzer)
                .bind(new_avg)
                .execute(conn)
                .await?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Human review
// ---------------------------------------------------------------------------

async fn project_human_review_requested(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    let row = ensure_investigation(conn, event.aggregate_id, event.timestamp).await?;

    let status = if row.status == "pending" {
        "in_progress"
    } else {
        row.status.as_str()
    };
    sqlx::query(
        "UPDATE investigations SET phase = 'human_review', status = $2, updated_at = $3
         WHERE id = $1",
    )
    .bind(event.aggregate_id)
    .bind(status)
    .bind(event.timestamp)
    .execute(&mut *conn)
    .await?;

    // At most one pending review per investigation.
    let existing: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM pending_reviews WHERE investigation_id = $1 AND status = 'pending'",
    )
    .bind(event.aggregate_id)
    .fetch_optional(&mut *conn)
    .await?;
    if existing.is_some() {
        return Ok(());
    }

    let findings: Vec<String> = event
        .data
        .get("findings")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    sqlx::query(
        r#"INSERT INTO pending_reviews
           (id, investigation_id, status, title, description, max_severity,
            alert_count, malicious_count, suspicious_count, clean_count,
            findings, enrichments, misp_context,
            ai_decision, ai_confidence, ai_assessment, ai_recommendation,
            created_at, expires_at)
           VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                   $13, $14, $15, $16, $17, NULL)"#,
    )
    .bind(Uuid::new_v4())
    .bind(event.aggregate_id)
    .bind(row.title.as_deref().unwrap_or("Untitled Investigation"))
    .bind(data_str(event, "reason").unwrap_or("Requires human review"))
    .bind(row.max_severity.as_deref().unwrap_or("medium"))
    .bind(row.alert_count)
    .bind(row.malicious_count)
    .bind(row.suspicious_count)
    .bind(row.clean_count)
    .bind(&findings)
    .bind(
        event
            .data
            .get("enrichments")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
    )
    .bind(event.data.get("misp_context").cloned())
    .bind(data_str(event, "verdict_decision"))
    .bind(event.data.get("verdict_confidence").and_then(Value::as_f64))
    .bind(data_str(event, "ai_assessment"))
    .bind(data_str(event, "ai_recommendation"))
    .bind(event.timestamp)
    .execute(&mut *conn)
    .await?;

    info!(
        investigation_id = %event.aggregate_id,
        title = row.title.as_deref().unwrap_or(""),
        "Pending review created"
    );
    Ok(())
}

async fn project_human_decision_received(
    conn: &mut PgConnection,
    event: &EventRecord,
) -> Result<(), sqlx::Error> {
    let decision = data_str(event, "decision").unwrap_or("unknown");
    let status = match decision {
        "approve" => "approved",
        "reject" => "rejected",
        "more_info" => "info_requested",
        other => other,
    };

    let updated = sqlx::query(
        r#"UPDATE pending_reviews
           SET status = $2,
               responded_at = $3,
               reviewer = COALESCE($4, reviewer),
               feedback = COALESCE($5, feedback)
           WHERE investigation_id = $1 AND status = 'pending'"#,
    )
    .bind(event.aggregate_id)
    .bind(status)
    .bind(event.timestamp)
    .bind(data_str(event, "reviewer"))
    .bind(data_str(event, "feedback"))
    .execute(conn)
    .await?;

    if updated.rows_affected() > 0 {
        info!(
            investigation_id = %event.aggregate_id,
            status = status,
            "Pending review updated"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_closed_status_escalated_wins() {
        assert_eq!(
            derive_closed_status(Some("~123"), "anything", "close"),
            "escalated"
        );
    }

    #[test]
    fn test_derive_closed_status_rejected() {
        assert_eq!(
            derive_closed_status(None, "Rejected by analyst during human review", ""),
            "rejected"
        );
    }

    #[test]
    fn test_derive_closed_status_auto_closed() {
        // Wording pinned to the close node's resolution string.
        assert_eq!(
            derive_closed_status(
                None,
                "Closed by AI verdict - likely false positive | AI recommendation: tune rule",
                "close"
            ),
            "auto_closed"
        );
    }

    #[test]
    fn test_derive_closed_status_needs_matching_verdict() {
        // The resolution alone is not enough without verdict_decision=close.
        assert_eq!(
            derive_closed_status(None, "Closed by AI verdict - likely false positive", "escalate"),
            "closed"
        );
    }

    #[test]
    fn test_derive_closed_status_default() {
        assert_eq!(
            derive_closed_status(None, "Investigation completed - no action required", ""),
            "closed"
        );
    }

    #[test]
    fn test_severity_rank_ordering() {
        assert!(severity_rank("critical") > severity_rank("high"));
        assert!(severity_rank("high") > severity_rank("medium"));
        assert!(severity_rank("medium") > severity_rank("low"));
        assert_eq!(severity_rank("bogus"), 0);
    }

    #[test]
    fn test_hour_bucket_truncates() {
        let ts = DateTime::parse_from_rfc3339("2026-03-01T17:42:13.123Z")
            .unwrap()
            .with_timezone(&Utc);
        let bucket = hour_bucket(ts);
        assert_eq!(bucket.to_rfc3339(), "2026-03-01T17:00:00+00:00");
    }
}
