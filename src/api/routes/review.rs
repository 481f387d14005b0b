//! Human-review endpoints: the dashboard channel of the HIL resolver.
//!
//! Decision endpoints lock the pending-review row with `SELECT ... FOR
//! UPDATE` so concurrent dashboard calls serialise; a row that is no longer
//! `pending` means another channel won the race and the caller gets a 409.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::api::auth::{RequireAnalyst, RequireAuth};
use crate::api::{ApiError, ApiState};
use crate::persistence::projector::{append_batch_projected, append_projected};
use crate::persistence::{AppendOptions, EventType, PendingReviewRow};

const REVIEW_COLUMNS: &str = "id, investigation_id, status, title, description, max_severity, \
     alert_count, malicious_count, suspicious_count, clean_count, findings, enrichments, \
     misp_context, ai_decision, ai_confidence, ai_assessment, ai_recommendation, \
     timeout_seconds, created_at, expires_at, responded_at, reviewer, feedback, \
     workflow_resumed_at";

#[derive(Debug, Deserialize)]
pub struct PendingParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    pub severity: Option<String>,
    #[serde(default)]
    pub include_expired: bool,
}

fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct ReviewList {
    pub items: Vec<PendingReviewRow>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub has_more: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionRequest {
    pub reviewer: Option<String>,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    pub reviewer: Option<String>,
    pub questions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ReviewActionResponse {
    pub success: bool,
    pub message: String,
    pub review_id: Uuid,
    pub investigation_id: Uuid,
    pub decision: String,
}

/// GET /api/review/pending
pub async fn list_pending(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
    Query(params): Query<PendingParams>,
) -> Result<Json<ReviewList>, ApiError> {
    let page = params.page.max(1);
    let page_size = params.page_size.clamp(1, 100);
    let offset = (page - 1) * page_size;

    let filters = "status = 'pending'
         AND ($1::TEXT IS NULL OR max_severity = $1)
         AND ($2::BOOL OR expires_at IS NULL OR expires_at > NOW())";

    let (total,): (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM pending_reviews WHERE {filters}"
    ))
    .bind(&params.severity)
    .bind(params.include_expired)
    .fetch_one(&state.pool)
    .await?;

    let items: Vec<PendingReviewRow> = sqlx::query_as(&format!(
        "SELECT {REVIEW_COLUMNS} FROM pending_reviews WHERE {filters}
         ORDER BY created_at DESC OFFSET $3 LIMIT $4"
    ))
    .bind(&params.severity)
    .bind(params.include_expired)
    .bind(offset)
    .bind(page_size)
    .fetch_all(&state.pool)
    .await?;

    let has_more = offset + (items.len() as i64) < total;
    Ok(Json(ReviewList {
        items,
        total,
        page,
        page_size,
        has_more,
    }))
}

/// GET /api/review/{id}
pub async fn detail(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
    Path(review_id): Path<Uuid>,
) -> Result<Json<PendingReviewRow>, ApiError> {
    let row: Option<PendingReviewRow> = sqlx::query_as(&format!(
        "SELECT {REVIEW_COLUMNS} FROM pending_reviews WHERE id = $1"
    ))
    .bind(review_id)
    .fetch_optional(&state.pool)
    .await?;
    row.map(Json)
        .ok_or_else(|| ApiError::not_found("Review not found"))
}

/// Lock the review row and bail with 409 unless it is still pending.
async fn lock_pending_review(
    tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
    review_id: Uuid,
) -> Result<PendingReviewRow, ApiError> {
    let row: Option<PendingReviewRow> = sqlx::query_as(&format!(
        "SELECT {REVIEW_COLUMNS} FROM pending_reviews WHERE id = $1 FOR UPDATE"
    ))
    .bind(review_id)
    .fetch_optional(&mut **tx)
    .await?;

    let review = row.ok_or_else(|| ApiError::not_found("Review not found"))?;
    if review.status != "pending" {
        return Err(ApiError::conflict(format!(
            "Review already decided via another channel (status: {})",
            review.status
        )));
    }
    Ok(review)
}

/// POST /api/review/{id}/approve
pub async fn approve(
    State(state): State<ApiState>,
    RequireAnalyst(user): RequireAnalyst,
    Path(review_id): Path<Uuid>,
    payload: Option<Json<DecisionRequest>>,
) -> Result<Json<ReviewActionResponse>, ApiError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let reviewer = request
        .reviewer
        .or_else(|| user.map(|u| u.username));

    let mut tx = state.pool.begin().await?;
    let review = lock_pending_review(&mut tx, review_id).await?;

    append_projected(
        &mut *tx,
        review.investigation_id,
        EventType::HumanDecisionReceived,
        json!({
            "decision": "approve",
            "feedback": request.feedback,
            "reviewer": reviewer.as_deref(),
            "source": "dashboard",
        }),
        AppendOptions::default(),
    )
    .await?;

    // Reflect the approval on the read model immediately; the workflow will
    // drive the escalation when it resumes.
    sqlx::query(
        "UPDATE investigations
         SET status = 'in_progress', phase = 'escalation',
             verdict_decision = 'escalate', updated_at = NOW()
         WHERE id = $1",
    )
    .bind(review.investigation_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        review_id = %review_id,
        investigation_id = %review.investigation_id,
        reviewer = reviewer.as_deref().unwrap_or(""),
        "Review approved"
    );

    Ok(Json(ReviewActionResponse {
        success: true,
        message: "Review approved - investigation will be escalated".to_string(),
        review_id,
        investigation_id: review.investigation_id,
        decision: "approved".to_string(),
    }))
}

/// POST /api/review/{id}/reject
pub async fn reject(
    State(state): State<ApiState>,
    RequireAnalyst(user): RequireAnalyst,
    Path(review_id): Path<Uuid>,
    payload: Option<Json<DecisionRequest>>,
) -> Result<Json<ReviewActionResponse>, ApiError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let reviewer = request
        .reviewer
        .or_else(|| user.map(|u| u.username));

    let mut tx = state.pool.begin().await?;
    let review = lock_pending_review(&mut tx, review_id).await?;

    let duration_seconds: Option<(i64,)> = sqlx::query_as(
        "SELECT EXTRACT(EPOCH FROM (NOW() - created_at))::BIGINT
         FROM investigations WHERE id = $1",
    )
    .bind(review.investigation_id)
    .fetch_optional(&mut *tx)
    .await?;

    append_batch_projected(
        &mut *tx,
        review.investigation_id,
        vec![
            (
                EventType::HumanDecisionReceived,
                json!({
                    "decision": "reject",
                    "feedback": request.feedback,
                    "reviewer": reviewer.as_deref(),
                    "source": "dashboard",
                }),
                None,
            ),
            (
                EventType::InvestigationClosed,
                json!({
                    "status": "closed",
                    "resolution": "closed by human review",
                    "verdict_decision": "close",
                    "thehive_case_id": null,
                    "duration_seconds": duration_seconds.map(|(s,)| s).unwrap_or(0),
                }),
                None,
            ),
        ],
        None,
    )
    .await?;

    tx.commit().await?;

    info!(
        review_id = %review_id,
        investigation_id = %review.investigation_id,
        reviewer = reviewer.as_deref().unwrap_or(""),
        "Review rejected"
    );

    Ok(Json(ReviewActionResponse {
        success: true,
        message: "Review rejected - investigation will be closed".to_string(),
        review_id,
        investigation_id: review.investigation_id,
        decision: "rejected".to_string(),
    }))
}

/// POST /api/review/{id}/request-info
pub async fn request_info(
    State(state): State<ApiState>,
    RequireAnalyst(user): RequireAnalyst,
    Path(review_id): Path<Uuid>,
    Json(request): Json<InfoRequest>,
) -> Result<Json<ReviewActionResponse>, ApiError> {
    if request.questions.is_empty() {
        return Err(ApiError::bad_request("questions must not be empty"));
    }
    let reviewer = request
        .reviewer
        .or_else(|| user.map(|u| u.username));

    let feedback = format!(
        "Additional information requested:\n{}",
        request
            .questions
            .iter()
            .map(|q| format!("- {q}"))
            .collect::<Vec<_>>()
            .join("\n")
    );

    let mut tx = state.pool.begin().await?;
    let review = lock_pending_review(&mut tx, review_id).await?;

    append_projected(
        &mut *tx,
        review.investigation_id,
        EventType::HumanDecisionReceived,
        json!({
            "decision": "more_info",
            "feedback": feedback,
            "reviewer": reviewer.as_deref(),
            "source": "dashboard",
        }),
        AppendOptions::default(),
    )
    .await?;

    tx.commit().await?;

    info!(
        review_id = %review_id,
        investigation_id = %review.investigation_id,
        reviewer = reviewer.as_deref().unwrap_or(""),
        "Review info requested"
    );

    Ok(Json(ReviewActionResponse {
        success: true,
        message: "Additional information requested".to_string(),
        review_id,
        investigation_id: review.investigation_id,
        decision: "info_requested".to_string(),
    }))
}
