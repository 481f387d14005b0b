//! Durable workflow engine.
//!
//! The engine runs one node at a time, persists a snapshot through the
//! checkpointer after every step, and suspends when the human-review node
//! returns an interrupt. `resume` reloads the checkpoint, injects the
//! external decision, and continues from the human-review routing.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::{supervisor_node, verdict_node};
use crate::hil::HilService;
use crate::integrations::ToolClients;
use crate::llm::ChatModel;
use crate::persistence::{
    thread_id, Checkpointer, EventEmitter, Interrupt, WorkflowSnapshot,
};
use crate::types::{HumanDecision, WorkflowState};
use crate::workers::{cortex_worker_node, misp_worker_node, thehive_worker_node, wazuh_worker_node};

use super::close::close_investigation_node;
use super::hil::human_review_node;
use super::{next_node, route_from_human_review, Node};

/// Per-run collaborators. Threaded through every node invocation and never
/// serialised into checkpoints.
#[derive(Clone)]
pub struct RunConfig {
    pub emitter: Option<Arc<EventEmitter>>,
    /// Read-model access for cancellation checks and the HIL dashboard poll.
    pub pool: Option<PgPool>,
    pub hil: Option<Arc<HilService>>,
    pub hil_backend: String,
    pub fast_llm: Arc<dyn ChatModel>,
    pub reasoning_llm: Arc<dyn ChatModel>,
    pub clients: ToolClients,
}

/// Decision payload injected when a suspended workflow resumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub decision: String,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub reviewer: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Result of running one node.
pub enum NodeOutcome {
    Continue(Box<WorkflowState>),
    Interrupt(Box<WorkflowState>, Interrupt),
}

/// Result of driving a workflow.
pub enum RunOutcome {
    Completed(Box<WorkflowState>),
    Interrupted(Interrupt),
}

pub struct WorkflowEngine {
    checkpointer: Arc<dyn Checkpointer>,
}

impl WorkflowEngine {
    pub fn new(checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self { checkpointer }
    }

    /// Run a fresh investigation workflow from the supervisor node.
    pub async fn run(&self, state: WorkflowState, cfg: &RunConfig) -> Result<RunOutcome> {
        let tid = thread_id(state.investigation.id);
        self.drive(&tid, state, Node::Supervisor, cfg).await
    }

    /// Resume a suspended workflow with an external decision.
    ///
    /// Dashboard-sourced payloads are already persisted by the REST handler;
    /// only other sources get a HUMAN_DECISION_RECEIVED emission here.
    pub async fn resume(
        &self,
        thread_id: &str,
        payload: ResumePayload,
        cfg: &RunConfig,
    ) -> Result<RunOutcome> {
        let snapshot = self
            .checkpointer
            .load(thread_id)
            .await?
            .with_context(|| format!("no checkpoint for thread {thread_id}"))?;

        let Some(interrupt) = snapshot.interrupt else {
            bail!("thread {thread_id} has no pending interrupt");
        };
        if interrupt.kind != "human_review" {
            bail!(
                "thread {thread_id} is suspended on an unknown interrupt kind {:?}",
                interrupt.kind
            );
        }

        let mut state = snapshot.state;
        let decision = HumanDecision::coerce(&payload.decision);
        state.human_decision = Some(decision);
        state.human_feedback = payload.feedback.clone();
        state.human_reviewer = payload.reviewer.clone();
        state.human_decision_source = payload.source.clone();
        state.awaiting_human_approval = false;
        state.touch();

        info!(
            thread_id = thread_id,
            decision = %decision,
            source = payload.source.as_deref().unwrap_or("unknown"),
            "Resuming suspended workflow"
        );

        let dashboard_sourced =
            matches!(payload.source.as_deref(), Some("dashboard") | Some("ui"));
        if !dashboard_sourced {
            if let Some(emitter) = &cfg.emitter {
                if let Err(e) = emitter
                    .emit_human_decision_received(
                        state.investigation.id,
                        decision.as_str(),
                        payload.feedback.as_deref(),
                        payload.reviewer.as_deref(),
                    )
                    .await
                {
                    warn!(error = %e, "Event emission failed");
                }
            }
        }

        let next = route_from_human_review(&state);
        self.checkpointer
            .save(
                thread_id,
                &WorkflowSnapshot {
                    state: state.clone(),
                    next_node: Some(next),
                    interrupt: None,
                },
            )
            .await?;

        self.drive(thread_id, state, next, cfg).await
    }

    /// Pending interrupts for an investigation's workflow thread.
    pub async fn interrupts(&self, thread_id: &str) -> Result<Vec<Interrupt>> {
        Ok(self.checkpointer.interrupts(thread_id).await?)
    }

    async fn drive(
        &self,
        thread_id: &str,
        state: WorkflowState,
        start: Node,
        cfg: &RunConfig,
    ) -> Result<RunOutcome> {
        let mut state = state;
        let mut node = start;

        loop {
            // Cancellation is honoured between nodes, never mid-node.
            if node != Node::Close && is_cancelled(cfg, state.investigation.id).await {
                info!(
                    thread_id = thread_id,
                    "Investigation cancelled, routing to close"
                );
                node = Node::Close;
            }

            info!(thread_id = thread_id, node = node.as_str(), "Running node");
            let phase_before = state.current_phase;

            let outcome = match node {
                Node::Supervisor => {
                    NodeOutcome::Continue(Box::new(supervisor_node(state, cfg).await))
                }
                Node::WazuhWorker => {
                    NodeOutcome::Continue(Box::new(wazuh_worker_node(state, cfg).await))
                }
                Node::CortexWorker => {
                    NodeOutcome::Continue(Box::new(cortex_worker_node(state, cfg).await))
                }
                Node::MispWorker => {
                    NodeOutcome::Continue(Box::new(misp_worker_node(state, cfg).await))
                }
                Node::Verdict => NodeOutcome::Continue(Box::new(verdict_node(state, cfg).await)),
                Node::HumanReview => human_review_node(state, cfg).await,
                Node::TheHiveWorker => {
                    NodeOutcome::Continue(Box::new(thehive_worker_node(state, cfg).await))
                }
                Node::Close => {
                    NodeOutcome::Continue(Box::new(close_investigation_node(state, cfg).await))
                }
            };

            match outcome {
                NodeOutcome::Continue(next_state) => {
                    state = *next_state;

                    if state.current_phase != phase_before {
                        if let Some(emitter) = &cfg.emitter {
                            if let Err(e) = emitter
                                .emit_phase_changed(
                                    state.investigation.id,
                                    phase_before.as_str(),
                                    state.current_phase.as_str(),
                                )
                                .await
                            {
                                warn!(error = %e, "Event emission failed");
                            }
                        }
                    }

                    let next = next_node(node, &state);
                    self.checkpointer
                        .save(
                            thread_id,
                            &WorkflowSnapshot {
                                state: state.clone(),
                                next_node: next,
                                interrupt: None,
                            },
                        )
                        .await?;

                    match next {
                        Some(n) => node = n,
                        None => {
                            info!(thread_id = thread_id, "Workflow completed");
                            return Ok(RunOutcome::Completed(Box::new(state)));
                        }
                    }
                }
                NodeOutcome::Interrupt(next_state, interrupt) => {
                    // The checkpoint must land before control returns so a
                    // crash cannot lose the suspension point.
                    self.checkpointer
                        .save(
                            thread_id,
                            &WorkflowSnapshot {
                                state: *next_state,
                                next_node: Some(Node::HumanReview),
                                interrupt: Some(interrupt.clone()),
                            },
                        )
                        .await?;
                    info!(
                        thread_id = thread_id,
                        "Workflow suspended awaiting human review"
                    );
                    return Ok(RunOutcome::Interrupted(interrupt));
                }
            }
        }
    }
}

/// Whether the investigation's read model says it was cancelled. Without a
/// pool (database-less runs) this is always false.
async fn is_cancelled(cfg: &RunConfig, investigation_id: Uuid) -> bool {
    let Some(pool) = &cfg.pool else {
        return false;
    };
    let status: Option<(String,)> =
        sqlx::query_as("SELECT status FROM investigations WHERE id = $1")
            .bind(investigation_id)
            .fetch_optional(pool)
            .await
            .unwrap_or(None);
    matches!(status, Some((s,)) if s == "cancelled")
}

#[cfg(test)]
pub mod test_support {
    //! Shared builders for node and engine tests.

    use super::*;
    use crate::llm::testing::ScriptedChatModel;

    pub fn test_config(llm: Arc<ScriptedChatModel>) -> RunConfig {
        test_config_with_clients(llm, ToolClients::default())
    }

    pub fn test_config_with_clients(
        llm: Arc<ScriptedChatModel>,
        clients: ToolClients,
    ) -> RunConfig {
        RunConfig {
            emitter: None,
            pool: None,
            hil: None,
            hil_backend: "dashboard".to_string(),
            fast_llm: llm.clone(),
            reasoning_llm: llm,
            clients,
        }
    }

}
