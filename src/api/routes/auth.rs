//! Session endpoints for the opt-in auth layer.

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::auth::{
    create_session_token, current_user, verify_password, AuthMode, RequireAuth, UserIdentity,
    SESSION_COOKIE_NAME,
};
use crate::api::{ApiError, ApiState};

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub auth_enabled: bool,
    pub mode: &'static str,
    pub user: Option<UserIdentity>,
}

/// GET /api/auth/session
pub async fn session(
    State(state): State<ApiState>,
    parts: axum::http::request::Parts,
) -> Json<SessionStatus> {
    let mode = match state.auth.mode {
        AuthMode::None => "none",
        AuthMode::Static => "static",
        AuthMode::Proxy => "proxy",
    };
    Json(SessionStatus {
        auth_enabled: state.auth.enabled(),
        mode,
        user: current_user(&state.auth, &parts),
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: UserIdentity,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<ApiState>,
    Json(request): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<LoginResponse>), ApiError> {
    if state.auth.mode != AuthMode::Static {
        return Err(ApiError::bad_request(
            "Login is only available with AUTH_MODE=static",
        ));
    }

    let user = state
        .auth
        .users
        .get(&request.username)
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let valid = verify_password(&request.password, &user.password_hash).map_err(|e| {
        warn!(error = %e, "Password hash verification failed");
        ApiError::internal("password verification failed")
    })?;
    if !valid {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let identity = UserIdentity {
        username: user.username.clone(),
        roles: user.roles.clone(),
        source: "static",
    };
    let token = create_session_token(&state.auth, &identity);

    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        state.auth.session_ttl.as_secs()
    );
    if state.auth.cookie_secure {
        cookie.push_str("; Secure");
    }

    let mut headers = HeaderMap::new();
    if let Ok(value) = cookie.parse() {
        headers.insert(SET_COOKIE, value);
    }

    info!(username = %identity.username, "Login successful");
    Ok((
        headers,
        Json(LoginResponse {
            success: true,
            user: identity,
        }),
    ))
}

/// POST /api/auth/logout
pub async fn logout(
    State(_state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> (HeaderMap, Json<serde_json::Value>) {
    let mut headers = HeaderMap::new();
    let cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; Max-Age=0");
    if let Ok(value) = cookie.parse() {
        headers.insert(SET_COOKIE, value);
    }
    (headers, Json(serde_json::json!({ "success": true })))
}
