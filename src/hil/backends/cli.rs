//! CLI review backend: interactive stdin prompt for local operation.

use async_trait::async_trait;
use chrono::Utc;
use std::io::IsTerminal;
use tracing::info;

use crate::types::HumanDecision;

use super::super::models::{DecisionSource, HilRequest, HilResponse};
use super::super::service::{HilBackend, HilError};

/// Prompts the operator on the terminal. Only "connected" when stdin is a
/// TTY; headless runs fall back to the dashboard interrupt path.
pub struct CliBackend;

#[async_trait]
impl HilBackend for CliBackend {
    fn name(&self) -> &str {
        "cli"
    }

    fn is_connected(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    async fn request_approval(&self, request: &HilRequest) -> Result<HilResponse, HilError> {
        let prompt = render_prompt(request);
        let choice = tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(prompt.as_bytes());
            let _ = stdout.flush();

            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| HilError::Other(e.into()))?
        .map_err(|e| HilError::Connection(e.to_string()))?;

        let decision = match choice.trim().to_ascii_lowercase().as_str() {
            "a" | "approve" => HumanDecision::Approve,
            "r" | "reject" => HumanDecision::Reject,
            _ => HumanDecision::MoreInfo,
        };

        info!(decision = %decision, "CLI review decision");

        Ok(HilResponse {
            investigation_id: request.investigation_id,
            decision,
            reviewer: Some("cli-operator".to_string()),
            feedback: None,
            responded_at: Utc::now(),
            source: DecisionSource::Chat,
            backend: "cli".to_string(),
        })
    }
}

fn render_prompt(request: &HilRequest) -> String {
    let mut lines = vec![
        String::new(),
        format!(
            "Human review required for: {} ({})",
            request.title, request.investigation_id
        ),
        format!(
            "Severity: {} | Alerts: {} | Malicious: {} | Suspicious: {}",
            request.max_severity,
            request.alert_count,
            request.malicious_count,
            request.suspicious_count
        ),
    ];
    if let (Some(decision), Some(confidence)) = (request.ai_decision, request.ai_confidence) {
        lines.push(format!(
            "Verdict: {decision} (confidence {:.0}%)",
            confidence * 100.0
        ));
    }
    lines.push("Decision [a]pprove / [r]eject / [m]ore info (default: m): ".to_string());
    lines.join("\n")
}
