//! Investigation list, detail, timeline, and control endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::api::auth::{RequireAnalyst, RequireAuth};
use crate::api::{ApiError, ApiState};
use crate::persistence::projector::append_projected;
use crate::persistence::{AppendOptions, EventType, InvestigationRow};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    pub status: Option<String>,
    pub phase: Option<String>,
    pub severity: Option<String>,
    pub verdict: Option<String>,
    pub has_case: Option<bool>,
}

fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct InvestigationList {
    pub items: Vec<InvestigationRow>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct EventItem {
    pub id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct EventTimeline {
    pub investigation_id: Uuid,
    pub events: Vec<EventItem>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    pub investigation_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

const ROW_COLUMNS: &str = "id, title, status, phase, created_at, updated_at, closed_at, \
     time_to_triage_seconds, time_to_verdict_seconds, alert_count, observable_count, \
     malicious_count, suspicious_count, clean_count, max_severity, verdict_decision, \
     verdict_confidence, verdict_reasoning, thehive_case_id, threat_actor, tags";

/// GET /api/investigations
pub async fn list(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
    Query(params): Query<ListParams>,
) -> Result<Json<InvestigationList>, ApiError> {
    let page = params.page.max(1);
    let page_size = params.page_size.clamp(1, 100);
    let offset = (page - 1) * page_size;

    let filters = "($1::TEXT IS NULL OR status = $1)
         AND ($2::TEXT IS NULL OR phase = $2)
         AND ($3::TEXT IS NULL OR max_severity = $3)
         AND ($4::TEXT IS NULL OR verdict_decision = $4)
         AND ($5::BOOL IS NULL OR (thehive_case_id IS NOT NULL) = $5)";

    let (total,): (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM investigations WHERE {filters}"
    ))
    .bind(&params.status)
    .bind(&params.phase)
    .bind(&params.severity)
    .bind(&params.verdict)
    .bind(params.has_case)
    .fetch_one(&state.pool)
    .await?;

    let items: Vec<InvestigationRow> = sqlx::query_as(&format!(
        "SELECT {ROW_COLUMNS} FROM investigations WHERE {filters}
         ORDER BY created_at DESC OFFSET $6 LIMIT $7"
    ))
    .bind(&params.status)
    .bind(&params.phase)
    .bind(&params.severity)
    .bind(&params.verdict)
    .bind(params.has_case)
    .bind(offset)
    .bind(page_size)
    .fetch_all(&state.pool)
    .await?;

    let has_more = offset + (items.len() as i64) < total;
    Ok(Json(InvestigationList {
        items,
        total,
        page,
        page_size,
        has_more,
    }))
}

async fn fetch_investigation(
    state: &ApiState,
    id: Uuid,
) -> Result<InvestigationRow, ApiError> {
    let row: Option<InvestigationRow> = sqlx::query_as(&format!(
        "SELECT {ROW_COLUMNS} FROM investigations WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;
    row.ok_or_else(|| ApiError::not_found("Investigation not found"))
}

/// GET /api/investigations/{id}
pub async fn detail(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<InvestigationRow>, ApiError> {
    Ok(Json(fetch_investigation(&state, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct TimelineParams {
    #[serde(default = "default_timeline_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_timeline_limit() -> i64 {
    100
}

/// GET /api/investigations/{id}/events
pub async fn events(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
    Path(id): Path<Uuid>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<EventTimeline>, ApiError> {
    fetch_investigation(&state, id).await?;

    let (total,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM events WHERE aggregate_id = $1")
            .bind(id)
            .fetch_one(&state.pool)
            .await?;

    let rows: Vec<(Uuid, String, DateTime<Utc>, Value)> = sqlx::query_as(
        "SELECT id, event_type, timestamp, data FROM events
         WHERE aggregate_id = $1 ORDER BY timestamp OFFSET $2 LIMIT $3",
    )
    .bind(id)
    .bind(params.offset.max(0))
    .bind(params.limit.clamp(1, 500))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(EventTimeline {
        investigation_id: id,
        events: rows
            .into_iter()
            .map(|(id, event_type, timestamp, data)| EventItem {
                id,
                event_type,
                timestamp,
                data,
            })
            .collect(),
        total,
    }))
}

/// POST /api/investigations/{id}/pause
pub async fn pause(
    State(state): State<ApiState>,
    RequireAnalyst(_user): RequireAnalyst,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResponse>, ApiError> {
    let row = fetch_investigation(&state, id).await?;
    if !matches!(row.status.as_str(), "pending" | "in_progress") {
        return Err(ApiError::bad_request(format!(
            "Cannot pause investigation with status: {}",
            row.status
        )));
    }

    let mut tx = state.pool.begin().await?;
    append_projected(
        &mut *tx,
        id,
        EventType::InvestigationPaused,
        json!({}),
        AppendOptions::default(),
    )
    .await?;
    tx.commit().await?;

    info!(investigation_id = %id, "Investigation paused");
    Ok(Json(ActionResponse {
        success: true,
        message: "Investigation paused successfully".to_string(),
        investigation_id: id,
    }))
}

/// POST /api/investigations/{id}/resume
pub async fn resume(
    State(state): State<ApiState>,
    RequireAnalyst(_user): RequireAnalyst,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResponse>, ApiError> {
    let row = fetch_investigation(&state, id).await?;
    if row.status != "paused" {
        return Err(ApiError::bad_request(format!(
            "Cannot resume investigation with status: {}",
            row.status
        )));
    }

    let mut tx = state.pool.begin().await?;
    append_projected(
        &mut *tx,
        id,
        EventType::InvestigationResumed,
        json!({}),
        AppendOptions::default(),
    )
    .await?;
    tx.commit().await?;

    info!(investigation_id = %id, "Investigation resumed");
    Ok(Json(ActionResponse {
        success: true,
        message: "Investigation resumed successfully".to_string(),
        investigation_id: id,
    }))
}

/// POST /api/investigations/{id}/cancel
pub async fn cancel(
    State(state): State<ApiState>,
    RequireAnalyst(_user): RequireAnalyst,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelRequest>>,
) -> Result<Json<ActionResponse>, ApiError> {
    let row = fetch_investigation(&state, id).await?;
    if matches!(
        row.status.as_str(),
        "cancelled" | "closed" | "auto_closed" | "escalated" | "rejected"
    ) {
        return Err(ApiError::bad_request(format!(
            "Cannot cancel investigation with status: {}",
            row.status
        )));
    }

    let mut data = json!({});
    if let Some(Json(CancelRequest {
        reason: Some(reason),
    })) = payload
    {
        data["reason"] = json!(reason);
    }

    let mut tx = state.pool.begin().await?;
    append_projected(
        &mut *tx,
        id,
        EventType::InvestigationCancelled,
        data,
        AppendOptions::default(),
    )
    .await?;
    tx.commit().await?;

    info!(investigation_id = %id, "Investigation cancelled");
    Ok(Json(ActionResponse {
        success: true,
        message: "Investigation cancelled successfully".to_string(),
        investigation_id: id,
    }))
}
