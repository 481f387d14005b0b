//! Metrics and statistics endpoints backed by the projected read models.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::auth::RequireAuth;
use crate::api::{ApiError, ApiState};
use crate::persistence::{AnalyzerStatsRow, IocStatsRow, MetricsHourlyRow, RuleStatsRow};

#[derive(Debug, Serialize)]
pub struct MetricsOverview {
    pub total_investigations: i64,
    pub active_investigations: i64,
    pub escalated: i64,
    pub auto_closed: i64,
    pub closed: i64,
    pub rejected: i64,
    pub cancelled: i64,
    pub pending_reviews: i64,
    pub avg_time_to_verdict_seconds: Option<f64>,
    pub avg_time_to_triage_seconds: Option<f64>,
    pub total_alerts: i64,
    pub total_observables: i64,
    pub malicious_observables: i64,
}

/// GET /api/metrics/overview
pub async fn overview(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Json<MetricsOverview>, ApiError> {
    let status_counts: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM investigations GROUP BY status")
            .fetch_all(&state.pool)
            .await?;

    let count_of = |status: &str| {
        status_counts
            .iter()
            .find(|(s, _)| s == status)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    };
    let total: i64 = status_counts.iter().map(|(_, c)| c).sum();
    let active = count_of("pending") + count_of("in_progress") + count_of("paused");

    let (pending_reviews,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pending_reviews WHERE status = 'pending'")
            .fetch_one(&state.pool)
            .await?;

    let (avg_verdict, avg_triage): (Option<f64>, Option<f64>) = sqlx::query_as(
        "SELECT AVG(time_to_verdict_seconds)::FLOAT8, AVG(time_to_triage_seconds)::FLOAT8
         FROM investigations",
    )
    .fetch_one(&state.pool)
    .await?;

    let (total_alerts, total_observables, malicious_observables): (
        Option<i64>,
        Option<i64>,
        Option<i64>,
    ) = sqlx::query_as(
        "SELECT SUM(total_alerts), SUM(total_observables), SUM(malicious_observables)
         FROM metrics_hourly",
    )
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(MetricsOverview {
        total_investigations: total,
        active_investigations: active,
        escalated: count_of("escalated"),
        auto_closed: count_of("auto_closed"),
        closed: count_of("closed"),
        rejected: count_of("rejected"),
        cancelled: count_of("cancelled"),
        pending_reviews,
        avg_time_to_verdict_seconds: avg_verdict,
        avg_time_to_triage_seconds: avg_triage,
        total_alerts: total_alerts.unwrap_or(0),
        total_observables: total_observables.unwrap_or(0),
        malicious_observables: malicious_observables.unwrap_or(0),
    }))
}

#[derive(Debug, Deserialize)]
pub struct HourlyParams {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

#[derive(Debug, Serialize)]
pub struct HourlyMetricsResponse {
    pub hours: i64,
    pub buckets: Vec<MetricsHourlyRow>,
}

/// GET /api/metrics/hourly
pub async fn hourly(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
    Query(params): Query<HourlyParams>,
) -> Result<Json<HourlyMetricsResponse>, ApiError> {
    let hours = params.hours.clamp(1, 24 * 14);
    let buckets: Vec<MetricsHourlyRow> = sqlx::query_as(
        "SELECT hour, investigations_created, investigations_closed, escalations,
                auto_closed, avg_time_to_verdict_seconds, total_alerts,
                total_observables, malicious_observables
         FROM metrics_hourly
         WHERE hour > NOW() - ($1 || ' hours')::INTERVAL
         ORDER BY hour",
    )
    .bind(hours.to_string())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(HourlyMetricsResponse { hours, buckets }))
}

#[derive(Debug, Deserialize)]
pub struct IocParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(rename = "type")]
    pub ioc_type: Option<String>,
    #[serde(default)]
    pub malicious_only: bool,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/stats/iocs
pub async fn ioc_stats(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
    Query(params): Query<IocParams>,
) -> Result<Json<Vec<IocStatsRow>>, ApiError> {
    let rows: Vec<IocStatsRow> = sqlx::query_as(
        "SELECT id, value, type, times_seen, last_seen, malicious_count, benign_count,
                threat_actors
         FROM ioc_stats
         WHERE ($1::TEXT IS NULL OR type = $1)
           AND (NOT $2 OR malicious_count > 0)
         ORDER BY times_seen DESC, last_seen DESC
         LIMIT $3",
    )
    .bind(&params.ioc_type)
    .bind(params.malicious_only)
    .bind(params.limit.clamp(1, 500))
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

/// GET /api/stats/rules
pub async fn rule_stats(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<RuleStatsRow>>, ApiError> {
    let rows: Vec<RuleStatsRow> = sqlx::query_as(
        "SELECT rule_id, times_triggered, escalation_count, auto_close_count, precision_rate
         FROM rule_stats ORDER BY times_triggered DESC LIMIT $1",
    )
    .bind(params.limit.clamp(1, 500))
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}

/// GET /api/stats/analyzers
pub async fn analyzer_stats(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Json<Vec<AnalyzerStatsRow>>, ApiError> {
    let rows: Vec<AnalyzerStatsRow> = sqlx::query_as(
        "SELECT analyzer, invocations, successes, failures, avg_response_time_ms
         FROM analyzer_stats ORDER BY invocations DESC",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(rows))
}
