//! Minimal interfaces over the external tool servers.
//!
//! The concrete SIEM/analyzer/IR/TIP adapters live outside this crate; the
//! core only depends on the tool-call surface below. Every adapter exposes
//! named tools that accept JSON arguments and return free text, which the
//! workers parse with tool-specific rules.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// One connected tool server (SIEM, analyzer hub, IR platform, TIP).
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Adapter name for logging and stats.
    fn name(&self) -> &str;

    /// Invoke a named tool. Adapters perform their own bounded retries; the
    /// returned text is the tool's human-readable response.
    async fn call_tool(&self, tool: &str, args: Value) -> anyhow::Result<String>;
}

/// The set of tool clients a workflow run may use. Any of them may be
/// absent; workers treat a missing client as "integration disabled".
#[derive(Clone, Default)]
pub struct ToolClients {
    pub siem: Option<Arc<dyn ToolClient>>,
    pub analyzers: Option<Arc<dyn ToolClient>>,
    pub case_management: Option<Arc<dyn ToolClient>>,
    pub threat_intel: Option<Arc<dyn ToolClient>>,
}

pub mod testing {
    //! Scripted tool client for unit and integration tests.

    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Returns canned responses per tool name and records invocations.
    pub struct ScriptedToolClient {
        name: String,
        responses: HashMap<String, Vec<String>>,
        pub calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedToolClient {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                responses: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Queue a response for a tool; responses are consumed in order, the
        /// last one repeating indefinitely.
        pub fn respond(mut self, tool: &str, response: &str) -> Self {
            self.responses
                .entry(tool.to_string())
                .or_default()
                .push(response.to_string());
            self
        }
    }

    #[async_trait]
    impl ToolClient for ScriptedToolClient {
        fn name(&self) -> &str {
            &self.name
        }

        async fn call_tool(&self, tool: &str, args: Value) -> anyhow::Result<String> {
            let mut calls = self.calls.lock().await;
            let call_index = calls.iter().filter(|(t, _)| t == tool).count();
            calls.push((tool.to_string(), args));
            drop(calls);

            match self.responses.get(tool) {
                Some(queue) if !queue.is_empty() => {
                    Ok(queue[call_index.min(queue.len() - 1)].clone())
                }
                _ => anyhow::bail!("no scripted response for tool {tool:?}"),
            }
        }
    }
}
