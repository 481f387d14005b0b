//! REST/SSE control-plane API.

pub mod auth;
pub mod event_bus;
pub mod routes;
pub mod tailer;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::auth::AuthConfig;
use crate::api::event_bus::EventBus;

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
    pub bus: Arc<EventBus>,
    pub auth: Arc<AuthConfig>,
    pub settings_readonly: bool,
}

/// Uniform error payload.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler-level error with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.into(),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "Database error in API handler");
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "database error".to_string(),
        }
    }
}

impl From<crate::persistence::StoreError> for ApiError {
    fn from(e: crate::persistence::StoreError) -> Self {
        use crate::persistence::StoreError;
        match e {
            StoreError::Concurrency { .. } => Self::conflict(e.to_string()),
            StoreError::Idempotency { .. } => Self::conflict(e.to_string()),
            StoreError::Database(db) => db.into(),
        }
    }
}

/// Build the API router with all routes mounted under `/api`.
pub fn create_app(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request());

    let api = Router::new()
        // Investigations
        .route("/investigations", get(routes::investigations::list))
        .route("/investigations/:id", get(routes::investigations::detail))
        .route(
            "/investigations/:id/events",
            get(routes::investigations::events),
        )
        .route(
            "/investigations/:id/pause",
            post(routes::investigations::pause),
        )
        .route(
            "/investigations/:id/resume",
            post(routes::investigations::resume),
        )
        .route(
            "/investigations/:id/cancel",
            post(routes::investigations::cancel),
        )
        // Human review
        .route("/review/pending", get(routes::review::list_pending))
        .route("/review/:id", get(routes::review::detail))
        .route("/review/:id/approve", post(routes::review::approve))
        .route("/review/:id/reject", post(routes::review::reject))
        .route("/review/:id/request-info", post(routes::review::request_info))
        // Audit
        .route("/audit", get(routes::audit::list_events))
        .route(
            "/audit/investigation/:id",
            get(routes::audit::investigation_audit),
        )
        .route("/audit/stats", get(routes::audit::stats))
        .route("/audit/event-types", get(routes::audit::event_types))
        // Metrics & stats
        .route("/metrics/overview", get(routes::metrics::overview))
        .route("/metrics/hourly", get(routes::metrics::hourly))
        .route("/stats/iocs", get(routes::metrics::ioc_stats))
        .route("/stats/rules", get(routes::metrics::rule_stats))
        .route("/stats/analyzers", get(routes::metrics::analyzer_stats))
        // Analytics
        .route("/analytics/summary", get(routes::analytics::summary))
        .route("/analytics/kpis", get(routes::analytics::kpis))
        .route("/analytics/ai-behavior", get(routes::analytics::ai_behavior))
        .route(
            "/analytics/human-review",
            get(routes::analytics::human_review),
        )
        .route("/analytics/outcomes", get(routes::analytics::outcomes))
        // Events (SSE)
        .route("/events/stream", get(routes::events::stream))
        .route("/events/health", get(routes::events::health))
        // Settings
        .route(
            "/settings",
            get(routes::settings::get_settings).put(routes::settings::update_settings),
        )
        .route("/settings/reset", post(routes::settings::reset_settings))
        // Auth
        .route("/auth/session", get(routes::auth::session))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/logout", post(routes::auth::logout));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Unauthenticated liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}
