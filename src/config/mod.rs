//! Application configuration loaded from environment variables.
//!
//! Secrets (API keys, integration credentials) stay env-only; non-secret
//! preferences may be overridden from the `user_settings` table at startup.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Polling and correlation tunables.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub interval: Duration,
    pub max_alerts_per_poll: usize,
    pub batch_size: usize,
    pub correlation_window: Duration,
    pub seen_cache_capacity: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_alerts_per_poll: 100,
            batch_size: 5,
            correlation_window: Duration::from_secs(15 * 60),
            seen_cache_capacity: 10_000,
        }
    }
}

/// Verdict thresholds applied by the orchestration layer.
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub auto_close_threshold: f64,
    pub escalation_threshold: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            auto_close_threshold: 0.8,
            escalation_threshold: 0.7,
        }
    }
}

/// LLM provider selection and model choices.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub fast_model: String,
    pub reasoning_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub openai_base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            fast_model: "claude-sonnet-4-20250514".to_string(),
            reasoning_model: "claude-sonnet-4-20250514".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            anthropic_api_key: None,
            openai_api_key: None,
            anthropic_base_url: None,
            openai_base_url: None,
        }
    }
}

/// Human-in-the-loop backend selection.
#[derive(Debug, Clone)]
pub struct HilConfig {
    pub backend: String,
    /// Bound on the chat await; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for HilConfig {
    fn default() -> Self {
        Self {
            backend: "dashboard".to_string(),
            timeout: None,
        }
    }
}

/// Resume-scan loop tunables.
#[derive(Debug, Clone)]
pub struct ResumeConfig {
    pub batch_size: i64,
    pub busy_sleep: Duration,
    pub idle_sleep: Duration,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            busy_sleep: Duration::from_millis(500),
            idle_sleep: Duration::from_millis(1500),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub polling: PollingConfig,
    pub thresholds: ThresholdConfig,
    pub llm: LlmConfig,
    pub hil: HilConfig,
    pub resume: ResumeConfig,
    pub settings_readonly: bool,
    pub api_bind: String,
    pub cors_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            polling: PollingConfig::default(),
            thresholds: ThresholdConfig::default(),
            llm: LlmConfig::default(),
            hil: HilConfig::default(),
            resume: ResumeConfig::default(),
            settings_readonly: false,
            api_bind: "0.0.0.0:8000".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}")),
        None => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env_opt(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl AppConfig {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let provider = match env_opt("SOCTALK_LLM_PROVIDER").as_deref() {
            None | Some("anthropic") => LlmProvider::Anthropic,
            Some("openai") => LlmProvider::OpenAi,
            Some(other) => bail!("unsupported SOCTALK_LLM_PROVIDER: {other:?}"),
        };

        let anthropic_api_key = env_opt("ANTHROPIC_API_KEY");
        let openai_api_key = env_opt("OPENAI_API_KEY");
        match provider {
            LlmProvider::Anthropic if anthropic_api_key.is_none() => {
                tracing::warn!("ANTHROPIC_API_KEY is not set; LLM nodes will fail");
            }
            LlmProvider::OpenAi if openai_api_key.is_none() => {
                tracing::warn!("OPENAI_API_KEY is not set; LLM nodes will fail");
            }
            _ => {}
        }

        let llm_defaults = LlmConfig::default();
        let default_model = match provider {
            LlmProvider::Anthropic => llm_defaults.fast_model.clone(),
            LlmProvider::OpenAi => "gpt-4o".to_string(),
        };

        let hil_backend = env_opt("SOCTALK_HIL_BACKEND").unwrap_or_else(|| "dashboard".to_string());
        if !matches!(hil_backend.as_str(), "cli" | "dashboard" | "slack" | "discord") {
            bail!("unsupported SOCTALK_HIL_BACKEND: {hil_backend:?}");
        }

        Ok(Self {
            database_url: env_opt("DATABASE_URL"),
            polling: PollingConfig {
                interval: Duration::from_secs(env_parse(
                    "SOCTALK_POLLING_INTERVAL",
                    defaults.polling.interval.as_secs(),
                )?),
                max_alerts_per_poll: env_parse(
                    "SOCTALK_MAX_ALERTS_PER_POLL",
                    defaults.polling.max_alerts_per_poll,
                )?,
                batch_size: env_parse("SOCTALK_BATCH_SIZE", defaults.polling.batch_size)?,
                correlation_window: Duration::from_secs(
                    env_parse(
                        "SOCTALK_CORRELATION_WINDOW",
                        defaults.polling.correlation_window.as_secs() / 60,
                    )? * 60,
                ),
                seen_cache_capacity: env_parse(
                    "SOCTALK_SEEN_CACHE_CAPACITY",
                    defaults.polling.seen_cache_capacity,
                )?,
            },
            thresholds: ThresholdConfig {
                auto_close_threshold: env_parse(
                    "SOCTALK_AUTO_CLOSE_THRESHOLD",
                    defaults.thresholds.auto_close_threshold,
                )?,
                escalation_threshold: env_parse(
                    "SOCTALK_ESCALATION_THRESHOLD",
                    defaults.thresholds.escalation_threshold,
                )?,
            },
            llm: LlmConfig {
                provider,
                fast_model: env_opt("SOCTALK_LLM_FAST_MODEL").unwrap_or_else(|| default_model.clone()),
                reasoning_model: env_opt("SOCTALK_LLM_REASONING_MODEL")
                    .unwrap_or_else(|| default_model.clone()),
                temperature: env_parse("SOCTALK_LLM_TEMPERATURE", llm_defaults.temperature)?,
                max_tokens: env_parse("SOCTALK_LLM_MAX_TOKENS", llm_defaults.max_tokens)?,
                anthropic_api_key,
                openai_api_key,
                anthropic_base_url: env_opt("ANTHROPIC_BASE_URL"),
                openai_base_url: env_opt("OPENAI_BASE_URL"),
            },
            hil: HilConfig {
                backend: hil_backend,
                timeout: env_opt("SOCTALK_HIL_TIMEOUT")
                    .map(|v| {
                        v.parse::<u64>()
                            .map(Duration::from_secs)
                            .with_context(|| format!("invalid SOCTALK_HIL_TIMEOUT: {v:?}"))
                    })
                    .transpose()?,
            },
            resume: ResumeConfig {
                batch_size: env_parse("SOCTALK_RESUME_BATCH_SIZE", defaults.resume.batch_size)?,
                busy_sleep: Duration::from_millis(env_parse(
                    "SOCTALK_RESUME_BUSY_SLEEP_MS",
                    defaults.resume.busy_sleep.as_millis() as u64,
                )?),
                idle_sleep: Duration::from_millis(env_parse(
                    "SOCTALK_RESUME_IDLE_SLEEP_MS",
                    defaults.resume.idle_sleep.as_millis() as u64,
                )?),
            },
            settings_readonly: env_bool("SETTINGS_READONLY", false),
            api_bind: env_opt("SOCTALK_API_BIND").unwrap_or(defaults.api_bind),
            cors_origins: env_opt("CORS_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.polling.batch_size, 5);
        assert_eq!(config.polling.correlation_window, Duration::from_secs(900));
        assert_eq!(config.resume.batch_size, 10);
        assert_eq!(config.hil.backend, "dashboard");
    }

    #[test]
    fn test_env_bool_parsing() {
        assert!(!env_bool("SOCTALK_TEST_UNSET_FLAG", false));
        assert!(env_bool("SOCTALK_TEST_UNSET_FLAG", true));
    }
}
