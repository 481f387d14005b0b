//! Typed business-event facade over the projecting store.
//!
//! The emitter owns the current transaction: emissions accumulate into it
//! and become visible at `commit()`, which the orchestrator calls at run
//! boundaries. `emit_human_review_requested` commits immediately so the
//! dashboard can see the pending review while the workflow is suspended.

use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::events::EventType;
use super::projector::append_projected;
use super::store::{AppendOptions, StoreError};

pub struct EventEmitter {
    pool: PgPool,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl EventEmitter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx: Mutex::new(None),
        }
    }

    async fn append(
        &self,
        investigation_id: Uuid,
        event_type: EventType,
        data: Value,
        idempotency_key: Option<String>,
    ) -> Result<(), StoreError> {
        let mut guard = self.tx.lock().await;
        let mut tx = match guard.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };

        let result = append_projected(
            &mut *tx,
            investigation_id,
            event_type,
            data,
            AppendOptions {
                idempotency_key,
                ..AppendOptions::default()
            },
        )
        .await;

        match result {
            Ok(_) => {
                *guard = Some(tx);
                Ok(())
            }
            Err(e) => {
                // A failed append poisons the transaction; discard it so the
                // next emission starts fresh.
                tx.rollback().await.ok();
                Err(e)
            }
        }
    }

    /// Commit all emissions since the last boundary.
    pub async fn commit(&self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.commit().await?;
            debug!("Event emitter transaction committed");
        }
        Ok(())
    }

    /// Discard uncommitted emissions.
    pub async fn rollback(&self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    pub async fn emit_investigation_created(
        &self,
        investigation_id: Uuid,
        title: &str,
        alert_ids: &[String],
        max_severity: &str,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::InvestigationCreated,
            json!({
                "title": title,
                "alert_ids": alert_ids,
                "max_severity": max_severity,
            }),
            Some(format!("inv-created-{investigation_id}")),
        )
        .await
    }

    pub async fn emit_investigation_started(
        &self,
        investigation_id: Uuid,
        title: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut data = json!({});
        if let Some(title) = title {
            data["title"] = json!(title);
        }
        self.append(
            investigation_id,
            EventType::InvestigationStarted,
            data,
            Some(format!("inv-started-{investigation_id}")),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn emit_alert_correlated(
        &self,
        investigation_id: Uuid,
        alert_id: &str,
        rule_id: Option<&str>,
        rule_description: &str,
        severity: &str,
        observable_count: usize,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::AlertCorrelated,
            json!({
                "alert_id": alert_id,
                "rule_id": rule_id,
                "rule_description": rule_description,
                "severity": severity,
                "observable_count": observable_count,
            }),
            None,
        )
        .await
    }

    pub async fn emit_observable_extracted(
        &self,
        investigation_id: Uuid,
        observable_type: &str,
        observable_value: &str,
        source: &str,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::ObservableExtracted,
            json!({
                "type": observable_type,
                "value": observable_value,
                "source": source,
            }),
            None,
        )
        .await
    }

    pub async fn emit_phase_changed(
        &self,
        investigation_id: Uuid,
        from_phase: &str,
        to_phase: &str,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::PhaseChanged,
            json!({
                "from_phase": from_phase,
                "to_phase": to_phase,
            }),
            None,
        )
        .await
    }

    pub async fn emit_enrichment_requested(
        &self,
        investigation_id: Uuid,
        observable_type: &str,
        observable_value: &str,
        analyzer: &str,
    ) -> Result<(), StoreError> {
        let value_prefix: String = observable_value.chars().take(50).collect();
        self.append(
            investigation_id,
            EventType::EnrichmentRequested,
            json!({
                "observable_type": observable_type,
                "observable_value": observable_value,
                "analyzer": analyzer,
            }),
            Some(format!(
                "enrich-{investigation_id}-{observable_type}-{value_prefix}"
            )),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn emit_enrichment_completed(
        &self,
        investigation_id: Uuid,
        observable_type: &str,
        observable_value: &str,
        analyzer: &str,
        verdict: &str,
        score: Option<f64>,
        response_time_ms: i64,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::EnrichmentCompleted,
            json!({
                "observable_type": observable_type,
                "observable_value": observable_value,
                "analyzer": analyzer,
                "verdict": verdict,
                "is_malicious": verdict == "malicious",
                "score": score,
                "response_time_ms": response_time_ms,
            }),
            None,
        )
        .await
    }

    pub async fn emit_enrichment_failed(
        &self,
        investigation_id: Uuid,
        observable_type: &str,
        observable_value: &str,
        analyzer: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::EnrichmentFailed,
            json!({
                "observable_type": observable_type,
                "observable_value": observable_value,
                "analyzer": analyzer,
                "error": error,
            }),
            None,
        )
        .await
    }

    pub async fn emit_analyzer_invoked(
        &self,
        investigation_id: Uuid,
        analyzer: &str,
        observable_value: &str,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::AnalyzerInvoked,
            json!({
                "analyzer": analyzer,
                "observable_value": observable_value,
            }),
            None,
        )
        .await
    }

    pub async fn emit_analyzer_completed(
        &self,
        investigation_id: Uuid,
        analyzer: &str,
        success: bool,
        response_time_ms: i64,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::AnalyzerCompleted,
            json!({
                "analyzer": analyzer,
                "success": success,
                "response_time_ms": response_time_ms,
            }),
            None,
        )
        .await
    }

    pub async fn emit_supervisor_decision(
        &self,
        investigation_id: Uuid,
        action: &str,
        reasoning: &str,
        tp_confidence: f64,
        iteration: u32,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::SupervisorDecision,
            json!({
                "action": action,
                "reasoning": reasoning,
                "tp_confidence": tp_confidence,
                "iteration": iteration,
            }),
            None,
        )
        .await
    }

    pub async fn emit_verdict_rendered(
        &self,
        investigation_id: Uuid,
        decision: &str,
        confidence: f64,
        reasoning: &str,
        threat_actor: Option<&str>,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::VerdictRendered,
            json!({
                "decision": decision,
                "confidence": confidence,
                "reasoning": reasoning,
                "threat_actor": threat_actor,
            }),
            None,
        )
        .await
    }

    /// Emit HUMAN_REVIEW_REQUESTED and commit immediately so the pending
    /// review is visible to the dashboard while the workflow is suspended.
    pub async fn emit_human_review_requested(
        &self,
        investigation_id: Uuid,
        reason: &str,
        verdict_decision: &str,
        verdict_confidence: f64,
        review_snapshot: Value,
    ) -> Result<(), StoreError> {
        let mut data = json!({
            "reason": reason,
            "verdict_decision": verdict_decision,
            "verdict_confidence": verdict_confidence,
        });
        if let (Value::Object(target), Value::Object(extra)) = (&mut data, review_snapshot) {
            target.extend(extra);
        }
        self.append(investigation_id, EventType::HumanReviewRequested, data, None)
            .await?;
        self.commit().await
    }

    pub async fn emit_human_decision_received(
        &self,
        investigation_id: Uuid,
        decision: &str,
        feedback: Option<&str>,
        reviewer: Option<&str>,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::HumanDecisionReceived,
            json!({
                "decision": decision,
                "feedback": feedback,
                "reviewer": reviewer,
            }),
            None,
        )
        .await
    }

    pub async fn emit_thehive_case_created(
        &self,
        investigation_id: Uuid,
        case_id: &str,
        case_number: Option<&str>,
        title: &str,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::TheHiveCaseCreated,
            json!({
                "case_id": case_id,
                "case_number": case_number,
                "title": title,
            }),
            Some(format!("thehive-case-{investigation_id}-{case_id}")),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn emit_investigation_closed(
        &self,
        investigation_id: Uuid,
        status: &str,
        resolution: &str,
        verdict_decision: Option<&str>,
        thehive_case_id: Option<&str>,
        duration_seconds: i64,
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::InvestigationClosed,
            json!({
                "status": status,
                "resolution": resolution,
                "verdict_decision": verdict_decision,
                "thehive_case_id": thehive_case_id,
                "duration_seconds": duration_seconds,
            }),
            None,
        )
        .await
    }

    pub async fn emit_misp_context_retrieved(
        &self,
        investigation_id: Uuid,
        observable_type: &str,
        observable_value: &str,
        event_count: usize,
        threat_actors: &[String],
    ) -> Result<(), StoreError> {
        self.append(
            investigation_id,
            EventType::MispContextRetrieved,
            json!({
                "observable_type": observable_type,
                "observable_value": observable_value,
                "event_count": event_count,
                "threat_actors": threat_actors,
            }),
            None,
        )
        .await
    }
}
