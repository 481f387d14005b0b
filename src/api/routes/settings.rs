//! DB-backed non-secret settings. Secrets stay env-only; when
//! `SETTINGS_READONLY` is set the API rejects writes and the environment is
//! authoritative.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::api::auth::{RequireAnalyst, RequireAuth};
use crate::api::{ApiError, ApiState};
use crate::persistence::UserSettingsRow;

const SETTINGS_COLUMNS: &str = "id, wazuh_enabled, wazuh_url, cortex_enabled, cortex_url, \
     thehive_enabled, thehive_url, misp_enabled, misp_url, slack_enabled, slack_channel, \
     slack_notify_on_escalation, slack_notify_on_verdict, llm_provider, llm_fast_model, \
     llm_reasoning_model, llm_temperature, llm_max_tokens, updated_at";

async fn fetch_or_create(state: &ApiState) -> Result<UserSettingsRow, ApiError> {
    sqlx::query("INSERT INTO user_settings (id) VALUES ('default') ON CONFLICT (id) DO NOTHING")
        .execute(&state.pool)
        .await?;
    let row: UserSettingsRow = sqlx::query_as(&format!(
        "SELECT {SETTINGS_COLUMNS} FROM user_settings WHERE id = 'default'"
    ))
    .fetch_one(&state.pool)
    .await?;
    Ok(row)
}

/// GET /api/settings
pub async fn get_settings(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Json<UserSettingsRow>, ApiError> {
    Ok(Json(fetch_or_create(&state).await?))
}

/// Partial update; omitted fields keep their current values.
#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub wazuh_enabled: Option<bool>,
    pub wazuh_url: Option<String>,
    pub cortex_enabled: Option<bool>,
    pub cortex_url: Option<String>,
    pub thehive_enabled: Option<bool>,
    pub thehive_url: Option<String>,
    pub misp_enabled: Option<bool>,
    pub misp_url: Option<String>,
    pub slack_enabled: Option<bool>,
    pub slack_channel: Option<String>,
    pub slack_notify_on_escalation: Option<bool>,
    pub slack_notify_on_verdict: Option<bool>,
    pub llm_provider: Option<String>,
    pub llm_fast_model: Option<String>,
    pub llm_reasoning_model: Option<String>,
    pub llm_temperature: Option<f64>,
    pub llm_max_tokens: Option<i64>,
}

/// PUT /api/settings
pub async fn update_settings(
    State(state): State<ApiState>,
    RequireAnalyst(_user): RequireAnalyst,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<UserSettingsRow>, ApiError> {
    if state.settings_readonly {
        return Err(ApiError::forbidden("Settings are read-only"));
    }

    if let Some(provider) = &update.llm_provider {
        if !matches!(provider.as_str(), "anthropic" | "openai") {
            return Err(ApiError::bad_request(format!(
                "unsupported llm_provider: {provider}"
            )));
        }
    }
    if let Some(temperature) = update.llm_temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ApiError::bad_request("llm_temperature must be in [0, 2]"));
        }
    }

    fetch_or_create(&state).await?;

    sqlx::query(
        "UPDATE user_settings SET
            wazuh_enabled = COALESCE($1, wazuh_enabled),
            wazuh_url = COALESCE($2, wazuh_url),
            cortex_enabled = COALESCE($3, cortex_enabled),
            cortex_url = COALESCE($4, cortex_url),
            thehive_enabled = COALESCE($5, thehive_enabled),
            thehive_url = COALESCE($6, thehive_url),
            misp_enabled = COALESCE($7, misp_enabled),
            misp_url = COALESCE($8, misp_url),
            slack_enabled = COALESCE($9, slack_enabled),
            slack_channel = COALESCE($10, slack_channel),
            slack_notify_on_escalation = COALESCE($11, slack_notify_on_escalation),
            slack_notify_on_verdict = COALESCE($12, slack_notify_on_verdict),
            llm_provider = COALESCE($13, llm_provider),
            llm_fast_model = COALESCE($14, llm_fast_model),
            llm_reasoning_model = COALESCE($15, llm_reasoning_model),
            llm_temperature = COALESCE($16, llm_temperature),
            llm_max_tokens = COALESCE($17, llm_max_tokens),
            updated_at = NOW()
         WHERE id = 'default'",
    )
    .bind(update.wazuh_enabled)
    .bind(&update.wazuh_url)
    .bind(update.cortex_enabled)
    .bind(&update.cortex_url)
    .bind(update.thehive_enabled)
    .bind(&update.thehive_url)
    .bind(update.misp_enabled)
    .bind(&update.misp_url)
    .bind(update.slack_enabled)
    .bind(&update.slack_channel)
    .bind(update.slack_notify_on_escalation)
    .bind(update.slack_notify_on_verdict)
    .bind(&update.llm_provider)
    .bind(&update.llm_fast_model)
    .bind(&update.llm_reasoning_model)
    .bind(update.llm_temperature)
    .bind(update.llm_max_tokens)
    .execute(&state.pool)
    .await?;

    info!("Settings updated");
    Ok(Json(fetch_or_create(&state).await?))
}

/// POST /api/settings/reset
pub async fn reset_settings(
    State(state): State<ApiState>,
    RequireAnalyst(_user): RequireAnalyst,
) -> Result<Json<UserSettingsRow>, ApiError> {
    if state.settings_readonly {
        return Err(ApiError::forbidden("Settings are read-only"));
    }

    sqlx::query("DELETE FROM user_settings WHERE id = 'default'")
        .execute(&state.pool)
        .await?;

    info!("Settings reset to defaults");
    Ok(Json(fetch_or_create(&state).await?))
}
