//! Conversational follow-up handler for the review thread.
//!
//! Analysts can ask questions under the review message before deciding;
//! answers are grounded in the full investigation context plus prior turns.

use tracing::{info, warn};

use crate::agents::verdict::build_verdict_context;
use crate::llm::ChatModel;
use crate::types::WorkflowState;

const INQUIRY_SYSTEM_PROMPT: &str = r#"You are a SOC analyst assistant answering questions about an ongoing security investigation that is awaiting human review.

Ground every answer strictly in the investigation context provided. If the
context does not contain the answer, say so plainly and suggest what
additional investigation would surface it. Keep answers short and factual;
the analyst is deciding whether to approve an escalation.
"#;

/// Answer one analyst question using the investigation context and the
/// conversation so far.
pub async fn handle_inquiry(
    model: &dyn ChatModel,
    state: &WorkflowState,
    inquiry: &str,
    history: &[(String, String)],
) -> String {
    let inquiry_preview: String = inquiry.chars().take(50).collect();
    info!(
        investigation_id = %state.investigation.id,
        inquiry = %inquiry_preview,
        "Handling review inquiry"
    );

    let mut prompt = build_verdict_context(state);
    if !history.is_empty() {
        prompt.push_str("\n## Previous Questions\n\n");
        for (question, answer) in history {
            prompt.push_str(&format!("**Q:** {question}\n**A:** {answer}\n\n"));
        }
    }
    prompt.push_str(&format!("\n## Analyst Question\n\n{inquiry}\n"));

    match model.complete(INQUIRY_SYSTEM_PROMPT, &prompt).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!(error = %e, "Inquiry LLM call failed");
            format!("Unable to answer right now ({e}). Please review the investigation details directly.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedChatModel;
    use crate::types::Investigation;

    #[tokio::test]
    async fn test_inquiry_returns_model_answer() {
        let model = ScriptedChatModel::new(&["The hash was flagged by 45 of 60 engines."]);
        let state = WorkflowState::initial(Investigation::new());
        let answer = handle_inquiry(&model, &state, "why is this malicious?", &[]).await;
        assert!(answer.contains("45 of 60"));
    }

    #[tokio::test]
    async fn test_inquiry_error_degrades_gracefully() {
        let model = ScriptedChatModel::new(&[]);
        let state = WorkflowState::initial(Investigation::new());
        let answer = handle_inquiry(&model, &state, "anything?", &[]).await;
        assert!(answer.contains("Unable to answer"));
    }
}
