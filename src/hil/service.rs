//! HIL service: backend lifecycle and race-free decision aggregation.
//!
//! Two channels can answer a pending review: the interactive chat backend
//! and the REST dashboard. While the chat backend awaits its button press,
//! this service polls the pending-review row every five seconds without a
//! row lock; if the row leaves `pending`, the dashboard won the race, the
//! chat message is updated, and the dashboard's decision is returned with
//! `source = dashboard` so the HIL node suppresses re-emission.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm::ChatModel;
use crate::types::{HumanDecision, WorkflowState};

use super::inquiry::handle_inquiry;
use super::models::{DecisionSource, HilRequest, HilResponse};

/// How often the chat await checks for a dashboard decision.
const DASHBOARD_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum HilError {
    #[error("review timed out")]
    Timeout,
    #[error("backend not connected: {0}")]
    Connection(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An interactive review backend (chat integration, CLI prompt).
#[async_trait]
pub trait HilBackend: Send + Sync {
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Present the review and await the human's button press.
    async fn request_approval(&self, request: &HilRequest) -> Result<HilResponse, HilError>;

    /// The review was decided elsewhere (dashboard); update the presented
    /// message accordingly. Default is a no-op.
    async fn mark_superseded(&self, investigation_id: Uuid, note: &str) {
        let _ = (investigation_id, note);
    }
}

/// Unified façade over the configured backend plus the dashboard channel.
pub struct HilService {
    backend: Arc<dyn HilBackend>,
    /// Used for the dashboard-race status poll; `None` disables the poll.
    pool: Option<PgPool>,
    /// Bound on the chat await; `None` waits indefinitely.
    timeout: Option<Duration>,
    /// Model for conversational follow-up questions in the review thread.
    inquiry_model: Option<Arc<dyn ChatModel>>,
}

impl HilService {
    pub fn new(
        backend: Arc<dyn HilBackend>,
        pool: Option<PgPool>,
        timeout: Option<Duration>,
        inquiry_model: Option<Arc<dyn ChatModel>>,
    ) -> Self {
        Self {
            backend,
            pool,
            timeout,
            inquiry_model,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    /// Request approval, racing the chat backend against the dashboard.
    /// Whichever answers first wins exactly once.
    pub async fn request_approval(&self, state: &WorkflowState) -> HilResponse {
        let request = HilRequest::from_state(state);
        let investigation_id = request.investigation_id;

        info!(
            investigation_id = %investigation_id,
            backend = self.backend.name(),
            "Requesting human approval"
        );

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let backend_fut = self.backend.request_approval(&request);
        tokio::pin!(backend_fut);

        let mut poll = tokio::time::interval(DASHBOARD_POLL_INTERVAL);

        loop {
            tokio::select! {
                result = &mut backend_fut => {
                    return self.finish_chat_result(investigation_id, result);
                }
                _ = poll.tick() => {
                    if let Some(response) = self.dashboard_decision(investigation_id).await {
                        info!(
                            investigation_id = %investigation_id,
                            decision = %response.decision,
                            "Review decided via dashboard, cancelling chat await"
                        );
                        self.backend
                            .mark_superseded(investigation_id, "decided via Dashboard")
                            .await;
                        return response;
                    }
                }
                () = sleep_until_deadline(deadline) => {
                    warn!(investigation_id = %investigation_id, "HIL review timed out");
                    return HilResponse {
                        investigation_id,
                        decision: HumanDecision::MoreInfo,
                        reviewer: None,
                        feedback: Some(
                            "HIL review timed out - please review manually".to_string(),
                        ),
                        responded_at: Utc::now(),
                        source: DecisionSource::Chat,
                        backend: self.backend.name().to_string(),
                    };
                }
            }
        }
    }

    fn finish_chat_result(
        &self,
        investigation_id: Uuid,
        result: Result<HilResponse, HilError>,
    ) -> HilResponse {
        match result {
            Ok(response) => {
                info!(
                    investigation_id = %investigation_id,
                    decision = %response.decision,
                    reviewer = response.reviewer.as_deref().unwrap_or(""),
                    "Chat review decision received"
                );
                response
            }
            Err(HilError::Timeout) => HilResponse {
                investigation_id,
                decision: HumanDecision::MoreInfo,
                reviewer: None,
                feedback: Some("HIL review timed out - please review manually".to_string()),
                responded_at: Utc::now(),
                source: DecisionSource::Chat,
                backend: self.backend.name().to_string(),
            },
            Err(e) => {
                warn!(investigation_id = %investigation_id, error = %e, "HIL backend error");
                HilResponse {
                    investigation_id,
                    decision: HumanDecision::MoreInfo,
                    reviewer: None,
                    feedback: Some(format!("HIL connection error: {e}")),
                    responded_at: Utc::now(),
                    source: DecisionSource::Chat,
                    backend: self.backend.name().to_string(),
                }
            }
        }
    }

    /// Check whether the dashboard has decided the pending review. Plain
    /// read, no row lock: the REST side serialises writers with
    /// `SELECT ... FOR UPDATE`, and the projection's status check makes a
    /// stale read harmless.
    async fn dashboard_decision(&self, investigation_id: Uuid) -> Option<HilResponse> {
        let pool = self.pool.as_ref()?;
        let row: (String, Option<String>, Option<String>) = sqlx::query_as(
            "SELECT status, reviewer, feedback FROM pending_reviews
             WHERE investigation_id = $1
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(investigation_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| warn!(error = %e, "Dashboard status poll failed"))
        .ok()??;

        let (status, reviewer, feedback) = row;
        let decision = match status.as_str() {
            "pending" => return None,
            "approved" => HumanDecision::Approve,
            "rejected" => HumanDecision::Reject,
            _ => HumanDecision::MoreInfo,
        };

        Some(HilResponse {
            investigation_id,
            decision,
            reviewer,
            feedback,
            responded_at: Utc::now(),
            source: DecisionSource::Dashboard,
            backend: "dashboard".to_string(),
        })
    }

    /// Answer a follow-up question in the review thread using the full
    /// investigation context plus prior turns.
    pub async fn answer_inquiry(
        &self,
        state: &WorkflowState,
        inquiry: &str,
        history: &[(String, String)],
    ) -> String {
        let Some(model) = &self.inquiry_model else {
            return "Follow-up questions are not available (no inquiry model configured)."
                .to_string();
        };
        handle_inquiry(model.as_ref(), state, inquiry, history).await
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Investigation;

    struct NeverAnswers;

    #[async_trait]
    impl HilBackend for NeverAnswers {
        fn name(&self) -> &str {
            "never"
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn request_approval(&self, _request: &HilRequest) -> Result<HilResponse, HilError> {
            std::future::pending().await
        }
    }

    struct InstantApprove;

    #[async_trait]
    impl HilBackend for InstantApprove {
        fn name(&self) -> &str {
            "instant"
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn request_approval(&self, request: &HilRequest) -> Result<HilResponse, HilError> {
            Ok(HilResponse {
                investigation_id: request.investigation_id,
                decision: HumanDecision::Approve,
                reviewer: Some("analyst".to_string()),
                feedback: None,
                responded_at: Utc::now(),
                source: DecisionSource::Chat,
                backend: "instant".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_chat_decision_wins_when_first() {
        let service = HilService::new(Arc::new(InstantApprove), None, None, None);
        let state = WorkflowState::initial(Investigation::new());
        let response = service.request_approval(&state).await;
        assert_eq!(response.decision, HumanDecision::Approve);
        assert_eq!(response.source, DecisionSource::Chat);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_more_info() {
        let service = HilService::new(
            Arc::new(NeverAnswers),
            None,
            Some(Duration::from_millis(30)),
            None,
        );
        let state = WorkflowState::initial(Investigation::new());
        let response = service.request_approval(&state).await;
        assert_eq!(response.decision, HumanDecision::MoreInfo);
        assert!(response
            .feedback
            .as_deref()
            .unwrap_or("")
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_backend_error_maps_to_more_info() {
        struct Broken;

        #[async_trait]
        impl HilBackend for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn is_connected(&self) -> bool {
                true
            }
            async fn request_approval(
                &self,
                _request: &HilRequest,
            ) -> Result<HilResponse, HilError> {
                Err(HilError::Connection("socket closed".to_string()))
            }
        }

        let service = HilService::new(Arc::new(Broken), None, None, None);
        let state = WorkflowState::initial(Investigation::new());
        let response = service.request_approval(&state).await;
        assert_eq!(response.decision, HumanDecision::MoreInfo);
        assert!(response
            .feedback
            .as_deref()
            .unwrap_or("")
            .contains("connection error"));
    }
}
