//! Workflow checkpoint persistence.
//!
//! A snapshot is the serialised workflow state plus the next node pointer
//! and any pending interrupt. Snapshots are self-contained; runtime
//! collaborators are carried in the per-run configuration and never touch
//! this layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::graph::Node;
use crate::types::{Verdict, WorkflowState};

/// A pending suspension point awaiting an external decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interrupt {
    /// Interrupt discriminator; only "human_review" is produced today.
    pub kind: String,
    pub investigation_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub verdict: Option<Verdict>,
}

/// Snapshot persisted after every engine step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub state: WorkflowState,
    pub next_node: Option<Node>,
    #[serde(default)]
    pub interrupt: Option<Interrupt>,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable thread ID for an investigation, so the same investigation always
/// resumes the same workflow thread.
pub fn thread_id(investigation_id: Uuid) -> String {
    format!("investigation-{investigation_id}")
}

#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Atomically overwrite the snapshot for a thread.
    async fn save(&self, thread_id: &str, snapshot: &WorkflowSnapshot)
        -> Result<(), CheckpointError>;

    /// Latest snapshot for a thread, or `None`.
    async fn load(&self, thread_id: &str) -> Result<Option<WorkflowSnapshot>, CheckpointError>;

    /// Pending suspension points for a thread.
    async fn interrupts(&self, thread_id: &str) -> Result<Vec<Interrupt>, CheckpointError> {
        Ok(self
            .load(thread_id)
            .await?
            .and_then(|s| s.interrupt)
            .into_iter()
            .collect())
    }
}

/// PostgreSQL-backed checkpointer (table `workflow_checkpoints`).
pub struct PostgresCheckpointer {
    pool: PgPool,
}

impl PostgresCheckpointer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Checkpointer for PostgresCheckpointer {
    async fn save(
        &self,
        thread_id: &str,
        snapshot: &WorkflowSnapshot,
    ) -> Result<(), CheckpointError> {
        let payload = serde_json::to_value(snapshot)?;
        sqlx::query(
            "INSERT INTO workflow_checkpoints (thread_id, snapshot, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (thread_id) DO UPDATE SET snapshot = $2, updated_at = NOW()",
        )
        .bind(thread_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<WorkflowSnapshot>, CheckpointError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT snapshot FROM workflow_checkpoints WHERE thread_id = $1")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((payload,)) => Ok(Some(serde_json::from_value(payload)?)),
            None => Ok(None),
        }
    }
}

/// In-memory checkpointer for database-less runs and tests.
#[derive(Default)]
pub struct MemoryCheckpointer {
    snapshots: Mutex<HashMap<String, WorkflowSnapshot>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(
        &self,
        thread_id: &str,
        snapshot: &WorkflowSnapshot,
    ) -> Result<(), CheckpointError> {
        self.snapshots
            .lock()
            .await
            .insert(thread_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<WorkflowSnapshot>, CheckpointError> {
        Ok(self.snapshots.lock().await.get(thread_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Investigation;

    #[tokio::test]
    async fn test_memory_checkpointer_roundtrip() {
        let cp = MemoryCheckpointer::new();
        let inv = Investigation::new();
        let tid = thread_id(inv.id);
        let snapshot = WorkflowSnapshot {
            state: WorkflowState::initial(inv),
            next_node: Some(Node::Supervisor),
            interrupt: None,
        };

        assert!(cp.load(&tid).await.unwrap().is_none());
        cp.save(&tid, &snapshot).await.unwrap();
        let loaded = cp.load(&tid).await.unwrap().unwrap();
        assert_eq!(loaded.next_node, Some(Node::Supervisor));
        assert!(cp.interrupts(&tid).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupts_surface_pending_review() {
        let cp = MemoryCheckpointer::new();
        let inv = Investigation::new();
        let inv_id = inv.id;
        let tid = thread_id(inv_id);
        let snapshot = WorkflowSnapshot {
            state: WorkflowState::initial(inv),
            next_node: Some(Node::HumanReview),
            interrupt: Some(Interrupt {
                kind: "human_review".to_string(),
                investigation_id: inv_id,
                title: "t".to_string(),
                verdict: None,
            }),
        };
        cp.save(&tid, &snapshot).await.unwrap();
        let interrupts = cp.interrupts(&tid).await.unwrap();
        assert_eq!(interrupts.len(), 1);
        assert_eq!(interrupts[0].kind, "human_review");
    }
}
