//! LLM chat clients.
//!
//! The core treats the LLM as an opaque prompt-to-text contract behind the
//! [`ChatModel`] trait; all response interpretation lives in [`parsing`].
//! Two remote providers are supported, selected by configuration.

pub mod parsing;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::{LlmConfig, LlmProvider};

/// An opaque chat model: system + user prompt in, free text out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Build a chat model for the configured provider.
pub fn create_chat_model(
    config: &LlmConfig,
    model: &str,
    temperature: f64,
    max_tokens: u32,
) -> Result<Arc<dyn ChatModel>> {
    match config.provider {
        LlmProvider::Anthropic => {
            let api_key = config
                .anthropic_api_key
                .clone()
                .context("ANTHROPIC_API_KEY is required for the anthropic provider")?;
            Ok(Arc::new(AnthropicChat {
                client: reqwest::Client::new(),
                api_key,
                base_url: config
                    .anthropic_base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
                model: model.to_string(),
                temperature,
                max_tokens,
            }))
        }
        LlmProvider::OpenAi => {
            let api_key = config
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY is required for the openai provider")?;
            Ok(Arc::new(OpenAiChat {
                client: reqwest::Client::new(),
                api_key,
                base_url: config
                    .openai_base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com".to_string()),
                model: model.to_string(),
                temperature,
                max_tokens,
            }))
        }
    }
}

/// Anthropic Messages API client.
pub struct AnthropicChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

#[async_trait]
impl ChatModel for AnthropicChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .context("anthropic response was not JSON")?;
        if !status.is_success() {
            bail!("anthropic returned {status}: {payload}");
        }

        let text = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.is_empty() {
            bail!("anthropic returned an empty completion: {payload}");
        }
        Ok(text)
    }
}

/// OpenAI chat-completions client.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("openai request failed")?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .context("openai response was not JSON")?;
        if !status.is_success() {
            bail!("openai returned {status}: {payload}");
        }

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .with_context(|| format!("openai returned no completion: {payload}"))
    }
}

pub mod testing {
    //! Scripted chat model for tests.

    use super::*;
    use tokio::sync::Mutex;

    pub struct ScriptedChatModel {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedChatModel {
        /// Responses are consumed in order; the last one repeats.
        pub fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| (*s).to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChatModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                bail!("no scripted response left");
            }
            if responses.len() == 1 {
                Ok(responses[0].clone())
            } else {
                Ok(responses.remove(0))
            }
        }
    }
}
