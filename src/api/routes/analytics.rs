//! Aggregate analytics over investigation outcomes and AI behaviour.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::auth::RequireAuth;
use crate::api::{ApiError, ApiState};

#[derive(Debug, Serialize)]
pub struct AnalyticsSummary {
    pub total_investigations: i64,
    pub closed_total: i64,
    pub auto_close_rate: Option<f64>,
    pub escalation_rate: Option<f64>,
    pub rejection_rate: Option<f64>,
    pub avg_alerts_per_investigation: Option<f64>,
    pub avg_observables_per_investigation: Option<f64>,
}

/// GET /api/analytics/summary
pub async fn summary(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Json<AnalyticsSummary>, ApiError> {
    let (total, escalated, auto_closed, rejected, terminal): (i64, i64, i64, i64, i64) =
        sqlx::query_as(
            "SELECT COUNT(*),
                    COUNT(*) FILTER (WHERE status = 'escalated'),
                    COUNT(*) FILTER (WHERE status = 'auto_closed'),
                    COUNT(*) FILTER (WHERE status = 'rejected'),
                    COUNT(*) FILTER (WHERE status IN
                        ('escalated', 'closed', 'auto_closed', 'rejected', 'cancelled'))
             FROM investigations",
        )
        .fetch_one(&state.pool)
        .await?;

    let (avg_alerts, avg_observables): (Option<f64>, Option<f64>) = sqlx::query_as(
        "SELECT AVG(alert_count)::FLOAT8, AVG(observable_count)::FLOAT8 FROM investigations",
    )
    .fetch_one(&state.pool)
    .await?;

    let rate = |n: i64| {
        (terminal > 0).then(|| n as f64 / terminal as f64)
    };

    Ok(Json(AnalyticsSummary {
        total_investigations: total,
        closed_total: terminal,
        auto_close_rate: rate(auto_closed),
        escalation_rate: rate(escalated),
        rejection_rate: rate(rejected),
        avg_alerts_per_investigation: avg_alerts,
        avg_observables_per_investigation: avg_observables,
    }))
}

#[derive(Debug, Serialize)]
pub struct AnalyticsKpis {
    pub mean_time_to_triage_seconds: Option<f64>,
    pub mean_time_to_verdict_seconds: Option<f64>,
    pub human_review_total: i64,
    pub human_approved: i64,
    pub human_rejected: i64,
    pub human_info_requested: i64,
    pub avg_review_response_seconds: Option<f64>,
    pub avg_verdict_confidence: Option<f64>,
}

/// GET /api/analytics/kpis
pub async fn kpis(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Json<AnalyticsKpis>, ApiError> {
    let (mean_triage, mean_verdict, avg_confidence): (Option<f64>, Option<f64>, Option<f64>) =
        sqlx::query_as(
            "SELECT AVG(time_to_triage_seconds)::FLOAT8,
                    AVG(time_to_verdict_seconds)::FLOAT8,
                    AVG(verdict_confidence)::FLOAT8
             FROM investigations",
        )
        .fetch_one(&state.pool)
        .await?;

    let (review_total, approved, rejected, info_requested, avg_response): (
        i64,
        i64,
        i64,
        i64,
        Option<f64>,
    ) = sqlx::query_as(
        "SELECT COUNT(*),
                COUNT(*) FILTER (WHERE status = 'approved'),
                COUNT(*) FILTER (WHERE status = 'rejected'),
                COUNT(*) FILTER (WHERE status = 'info_requested'),
                AVG(EXTRACT(EPOCH FROM (responded_at - created_at)))::FLOAT8
         FROM pending_reviews",
    )
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(AnalyticsKpis {
        mean_time_to_triage_seconds: mean_triage,
        mean_time_to_verdict_seconds: mean_verdict,
        human_review_total: review_total,
        human_approved: approved,
        human_rejected: rejected,
        human_info_requested: info_requested,
        avg_review_response_seconds: avg_response,
        avg_verdict_confidence: avg_confidence,
    }))
}

#[derive(Debug, Serialize)]
pub struct DecisionCount {
    pub decision: String,
    pub count: i64,
    pub avg_confidence: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AiBehavior {
    pub verdicts: Vec<DecisionCount>,
    pub supervisor_iterations_avg: Option<f64>,
    pub enrichment_failures: i64,
    pub llm_parse_fallbacks: i64,
}

/// GET /api/analytics/ai-behavior
pub async fn ai_behavior(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Json<AiBehavior>, ApiError> {
    let verdicts: Vec<(String, i64, Option<f64>)> = sqlx::query_as(
        "SELECT verdict_decision, COUNT(*), AVG(verdict_confidence)::FLOAT8
         FROM investigations WHERE verdict_decision IS NOT NULL
         GROUP BY verdict_decision ORDER BY COUNT(*) DESC",
    )
    .fetch_all(&state.pool)
    .await?;

    let (iterations_avg,): (Option<f64>,) = sqlx::query_as(
        "SELECT AVG((data->>'iteration')::FLOAT8)
         FROM events WHERE event_type = 'supervisor.decision'",
    )
    .fetch_one(&state.pool)
    .await?;

    let (enrichment_failures,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM events WHERE event_type = 'enrichment.failed'")
            .fetch_one(&state.pool)
            .await?;

    let (parse_fallbacks,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM events
         WHERE event_type = 'supervisor.decision'
           AND data->>'reasoning' = 'Failed to parse LLM response'",
    )
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(AiBehavior {
        verdicts: verdicts
            .into_iter()
            .map(|(decision, count, avg_confidence)| DecisionCount {
                decision,
                count,
                avg_confidence,
            })
            .collect(),
        supervisor_iterations_avg: iterations_avg,
        enrichment_failures,
        llm_parse_fallbacks: parse_fallbacks,
    }))
}

#[derive(Debug, Serialize)]
pub struct HumanReviewAnalytics {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub info_requested: i64,
    pub approval_rate: Option<f64>,
    pub avg_response_seconds: Option<f64>,
    pub by_severity: Vec<SeverityCount>,
}

#[derive(Debug, Serialize)]
pub struct SeverityCount {
    pub severity: String,
    pub count: i64,
}

/// GET /api/analytics/human-review
pub async fn human_review(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Json<HumanReviewAnalytics>, ApiError> {
    let (total, pending, approved, rejected, info_requested, avg_response): (
        i64,
        i64,
        i64,
        i64,
        i64,
        Option<f64>,
    ) = sqlx::query_as(
        "SELECT COUNT(*),
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'approved'),
                COUNT(*) FILTER (WHERE status = 'rejected'),
                COUNT(*) FILTER (WHERE status = 'info_requested'),
                AVG(EXTRACT(EPOCH FROM (responded_at - created_at)))::FLOAT8
         FROM pending_reviews",
    )
    .fetch_one(&state.pool)
    .await?;

    let by_severity: Vec<(String, i64)> = sqlx::query_as(
        "SELECT max_severity, COUNT(*) FROM pending_reviews
         GROUP BY max_severity ORDER BY COUNT(*) DESC",
    )
    .fetch_all(&state.pool)
    .await?;

    let decided = approved + rejected;
    Ok(Json(HumanReviewAnalytics {
        total,
        pending,
        approved,
        rejected,
        info_requested,
        approval_rate: (decided > 0).then(|| approved as f64 / decided as f64),
        avg_response_seconds: avg_response,
        by_severity: by_severity
            .into_iter()
            .map(|(severity, count)| SeverityCount { severity, count })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct OutcomeBucket {
    pub status: String,
    pub count: i64,
    pub avg_duration_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct OutcomesAnalytics {
    pub outcomes: Vec<OutcomeBucket>,
    pub escalations_with_case: i64,
}

/// GET /api/analytics/outcomes
pub async fn outcomes(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Json<OutcomesAnalytics>, ApiError> {
    let outcomes: Vec<(String, i64, Option<f64>)> = sqlx::query_as(
        "SELECT status, COUNT(*),
                AVG(EXTRACT(EPOCH FROM (closed_at - created_at)))::FLOAT8
         FROM investigations
         WHERE status IN ('escalated', 'closed', 'auto_closed', 'rejected', 'cancelled')
         GROUP BY status ORDER BY COUNT(*) DESC",
    )
    .fetch_all(&state.pool)
    .await?;

    let (escalations_with_case,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM investigations WHERE thehive_case_id IS NOT NULL",
    )
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(OutcomesAnalytics {
        outcomes: outcomes
            .into_iter()
            .map(|(status, count, avg_duration_seconds)| OutcomeBucket {
                status,
                count,
                avg_duration_seconds,
            })
            .collect(),
        escalations_with_case,
    }))
}
