//! Audit endpoints: raw event browsing over the append-only log.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::api::auth::RequireAuth;
use crate::api::{ApiError, ApiState};

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    pub event_type: Option<String>,
    pub aggregate_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct AuditEventList {
    pub items: Vec<AuditEvent>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub has_more: bool,
}

type AuditRow = (Uuid, Uuid, String, String, i64, DateTime<Utc>, Value);

fn to_audit_event(row: AuditRow) -> AuditEvent {
    let (id, aggregate_id, aggregate_type, event_type, version, timestamp, data) = row;
    AuditEvent {
        id,
        aggregate_id,
        aggregate_type,
        event_type,
        version,
        timestamp,
        data,
    }
}

/// GET /api/audit
pub async fn list_events(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
    Query(params): Query<AuditParams>,
) -> Result<Json<AuditEventList>, ApiError> {
    let page = params.page.max(1);
    let page_size = params.page_size.clamp(1, 200);
    let offset = (page - 1) * page_size;

    let filters = "($1::TEXT IS NULL OR event_type = $1)
         AND ($2::UUID IS NULL OR aggregate_id = $2)
         AND ($3::TIMESTAMPTZ IS NULL OR timestamp >= $3)
         AND ($4::TIMESTAMPTZ IS NULL OR timestamp <= $4)";

    let (total,): (i64,) =
        sqlx::query_as(&format!("SELECT COUNT(*) FROM events WHERE {filters}"))
            .bind(&params.event_type)
            .bind(params.aggregate_id)
            .bind(params.since)
            .bind(params.until)
            .fetch_one(&state.pool)
            .await?;

    let rows: Vec<AuditRow> = sqlx::query_as(&format!(
        "SELECT id, aggregate_id, aggregate_type, event_type, version, timestamp, data
         FROM events WHERE {filters}
         ORDER BY timestamp DESC OFFSET $5 LIMIT $6"
    ))
    .bind(&params.event_type)
    .bind(params.aggregate_id)
    .bind(params.since)
    .bind(params.until)
    .bind(offset)
    .bind(page_size)
    .fetch_all(&state.pool)
    .await?;

    let items: Vec<AuditEvent> = rows.into_iter().map(to_audit_event).collect();
    let has_more = offset + (items.len() as i64) < total;
    Ok(Json(AuditEventList {
        items,
        total,
        page,
        page_size,
        has_more,
    }))
}

#[derive(Debug, Serialize)]
pub struct InvestigationAudit {
    pub investigation_id: Uuid,
    pub event_count: i64,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub events: Vec<AuditEvent>,
}

/// GET /api/audit/investigation/{id}
pub async fn investigation_audit(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<InvestigationAudit>, ApiError> {
    let rows: Vec<AuditRow> = sqlx::query_as(
        "SELECT id, aggregate_id, aggregate_type, event_type, version, timestamp, data
         FROM events WHERE aggregate_id = $1 ORDER BY version",
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await?;

    if rows.is_empty() {
        return Err(ApiError::not_found("Investigation not found"));
    }

    let events: Vec<AuditEvent> = rows.into_iter().map(to_audit_event).collect();
    Ok(Json(InvestigationAudit {
        investigation_id: id,
        event_count: events.len() as i64,
        first_event_at: events.first().map(|e| e.timestamp),
        last_event_at: events.last().map(|e| e.timestamp),
        events,
    }))
}

#[derive(Debug, Serialize)]
pub struct AuditStats {
    pub total_events: i64,
    pub events_last_24h: i64,
    pub aggregates: i64,
    pub by_type: Vec<TypeCount>,
}

#[derive(Debug, Serialize)]
pub struct TypeCount {
    pub event_type: String,
    pub count: i64,
}

/// GET /api/audit/stats
pub async fn stats(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Json<AuditStats>, ApiError> {
    let (total_events,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
        .fetch_one(&state.pool)
        .await?;
    let (events_last_24h,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM events WHERE timestamp > NOW() - INTERVAL '24 hours'",
    )
    .fetch_one(&state.pool)
    .await?;
    let (aggregates,): (i64,) =
        sqlx::query_as("SELECT COUNT(DISTINCT aggregate_id) FROM events")
            .fetch_one(&state.pool)
            .await?;
    let by_type: Vec<(String, i64)> = sqlx::query_as(
        "SELECT event_type, COUNT(*) FROM events GROUP BY event_type ORDER BY COUNT(*) DESC",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(AuditStats {
        total_events,
        events_last_24h,
        aggregates,
        by_type: by_type
            .into_iter()
            .map(|(event_type, count)| TypeCount { event_type, count })
            .collect(),
    }))
}

/// GET /api/audit/event-types
pub async fn event_types(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Json<Vec<String>>, ApiError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT event_type FROM events ORDER BY event_type")
            .fetch_all(&state.pool)
            .await?;
    Ok(Json(rows.into_iter().map(|(t,)| t).collect()))
}
