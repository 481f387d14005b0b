//! Top-level orchestration: polling, correlation, queue consumption,
//! workflow execution, and the pending-review resume scan.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::graph::close::generate_closure_report;
use crate::graph::{ResumePayload, RunConfig, RunOutcome, WorkflowEngine};
use crate::hil::HilService;
use crate::integrations::ToolClients;
use crate::llm::ChatModel;
use crate::persistence::{thread_id, EventEmitter};
use crate::polling::{AlertCorrelator, AlertPoller, InvestigationQueue};
use crate::types::{Investigation, WorkflowState};

/// Coordinates the full pipeline:
/// poll -> correlate -> queue -> workflow -> events.
pub struct Orchestrator {
    config: Arc<AppConfig>,
    pool: Option<PgPool>,
    engine: Arc<WorkflowEngine>,
    queue: Arc<InvestigationQueue>,
    hil: Option<Arc<HilService>>,
    clients: ToolClients,
    fast_llm: Arc<dyn ChatModel>,
    reasoning_llm: Arc<dyn ChatModel>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AppConfig>,
        pool: Option<PgPool>,
        engine: Arc<WorkflowEngine>,
        queue: Arc<InvestigationQueue>,
        hil: Option<Arc<HilService>>,
        clients: ToolClients,
        fast_llm: Arc<dyn ChatModel>,
        reasoning_llm: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            config,
            pool,
            engine,
            queue,
            hil,
            clients,
            fast_llm,
            reasoning_llm,
        }
    }

    fn run_config(&self) -> RunConfig {
        RunConfig {
            emitter: self.pool.clone().map(|pool| Arc::new(EventEmitter::new(pool))),
            pool: self.pool.clone(),
            hil: self.hil.clone(),
            hil_backend: self.config.hil.backend.clone(),
            fast_llm: self.fast_llm.clone(),
            reasoning_llm: self.reasoning_llm.clone(),
            clients: self.clients.clone(),
        }
    }

    /// Run until cancellation: one poller task, one resume-scan task, and
    /// the queue consumer in this task.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        info!("Starting orchestrator");

        let mut tasks = Vec::new();

        if let Some(siem) = self.clients.siem.clone() {
            let poller_cancel = cancel.clone();
            let queue = self.queue.clone();
            let correlator = AlertCorrelator::new(self.config.polling.correlation_window);
            let mut poller = AlertPoller::new(siem, self.config.polling.clone());
            tasks.push(tokio::spawn(async move {
                poller
                    .run_continuous(poller_cancel, move |alerts| {
                        let queue = queue.clone();
                        let correlator = correlator.clone();
                        async move {
                            info!(count = alerts.len(), "Alerts received");
                            let investigations = correlator.correlate(alerts);
                            let added = queue.add_batch(investigations).await;
                            info!(queued = added, "Investigations queued");
                        }
                    })
                    .await;
            }));
        } else {
            warn!("SIEM integration disabled; no alerts will be polled");
        }

        if self.pool.is_some() {
            let resume_self = self.clone();
            let resume_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                resume_self.resume_loop(resume_cancel).await;
            }));
        }

        // Queue consumer: one investigation at a time.
        while !cancel.is_cancelled() {
            let investigation = tokio::select! {
                _ = cancel.cancelled() => break,
                inv = self.queue.get(Some(Duration::from_secs(5))) => inv,
            };

            if let Some(investigation) = investigation {
                self.process_investigation(investigation).await;
            }
        }

        for task in tasks {
            task.abort();
        }
        info!("Orchestrator stopped");
        Ok(())
    }

    async fn process_investigation(&self, investigation: Investigation) {
        let investigation_id = investigation.id;
        let title = investigation.title.clone();

        info!(
            investigation_id = %investigation_id,
            title = %title,
            alerts = investigation.alerts.len(),
            severity = %investigation.max_severity(),
            "Processing investigation"
        );

        let cfg = self.run_config();

        if let Some(emitter) = &cfg.emitter {
            if let Err(e) = self.emit_initial_events(emitter, &investigation).await {
                warn!(error = %e, "Initial event emission failed");
                emitter.rollback().await.ok();
            }
        }

        // Persistence hiccups (checkpointer writes) retry with exponential
        // backoff; events are at-least-once and idempotency keys absorb the
        // duplicates.
        let mut attempt = 0u32;
        let outcome = loop {
            let state = WorkflowState::initial(investigation.clone());
            match self.engine.run(state, &cfg).await {
                Ok(outcome) => break Ok(outcome),
                Err(e) if attempt < 3 => {
                    attempt += 1;
                    let backoff = Duration::from_secs(1 << attempt);
                    warn!(
                        investigation_id = %investigation_id,
                        attempt = attempt,
                        error = %e,
                        "Workflow run failed, retrying after backoff"
                    );
                    if let Some(emitter) = &cfg.emitter {
                        emitter.rollback().await.ok();
                    }
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(RunOutcome::Completed(final_state)) => {
                if let Some(emitter) = &cfg.emitter {
                    if let Err(e) = emitter.commit().await {
                        warn!(error = %e, "Final commit failed");
                    }
                }
                info!(
                    investigation_id = %investigation_id,
                    status = %final_state.investigation.status,
                    case_id = final_state.investigation.thehive_case_id.as_deref().unwrap_or(""),
                    "Investigation completed"
                );
                self.queue.mark_completed(investigation_id, &title);
                info!("\n{}", generate_closure_report(&final_state));
            }
            Ok(RunOutcome::Interrupted(_)) => {
                if let Some(emitter) = &cfg.emitter {
                    if let Err(e) = emitter.commit().await {
                        warn!(error = %e, "Commit after suspension failed");
                    }
                }
                info!(
                    investigation_id = %investigation_id,
                    "Investigation paused awaiting human review (decide via the dashboard)"
                );
            }
            Err(e) => {
                error!(
                    investigation_id = %investigation_id,
                    error = %e,
                    "Investigation failed"
                );
                if let Some(emitter) = &cfg.emitter {
                    emitter.rollback().await.ok();
                }
            }
        }
    }

    /// Emit the ingestion events for a freshly correlated investigation and
    /// commit them as one batch. OBSERVABLE_EXTRACTED fires once per
    /// `(type, value)` composite key so the projected `observable_count`
    /// stays accurate.
    async fn emit_initial_events(
        &self,
        emitter: &EventEmitter,
        investigation: &Investigation,
    ) -> Result<()> {
        let alert_ids: Vec<String> =
            investigation.alerts.iter().map(|a| a.id.clone()).collect();

        emitter
            .emit_investigation_created(
                investigation.id,
                &investigation.title,
                &alert_ids,
                investigation.max_severity().as_str(),
            )
            .await?;
        emitter
            .emit_investigation_started(investigation.id, Some(&investigation.title))
            .await?;

        for alert in &investigation.alerts {
            emitter
                .emit_alert_correlated(
                    investigation.id,
                    &alert.id,
                    alert.rule_id.as_deref(),
                    &alert.rule_description,
                    alert.severity.as_str(),
                    alert.observables.len(),
                )
                .await?;
        }

        let mut seen = std::collections::HashSet::new();
        for alert in &investigation.alerts {
            for obs in &alert.observables {
                if seen.insert((obs.observable_type, obs.value.clone())) {
                    let value: String = obs.value.chars().take(200).collect();
                    emitter
                        .emit_observable_extracted(
                            investigation.id,
                            obs.observable_type.as_str(),
                            &value,
                            &format!("alert:{}", alert.id),
                        )
                        .await?;
                }
            }
        }

        emitter.commit().await?;
        Ok(())
    }

    async fn resume_loop(&self, cancel: CancellationToken) {
        info!("Resume loop started");
        while !cancel.is_cancelled() {
            let resumed = match self.resume_decided_reviews_once().await {
                Ok(resumed) => resumed,
                Err(e) => {
                    warn!(error = %e, "Resume scan failed");
                    0
                }
            };

            let sleep = if resumed > 0 {
                self.config.resume.busy_sleep
            } else {
                self.config.resume.idle_sleep
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }
        info!("Resume loop stopped");
    }

    /// Resume a small batch of decided reviews whose workflows are still
    /// suspended. Never touches paused investigations; terminal ones are
    /// marked resumed without running the engine.
    async fn resume_decided_reviews_once(&self) -> Result<usize> {
        let Some(pool) = &self.pool else {
            return Ok(0);
        };

        let reviews: Vec<(Uuid, Uuid, String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT id, investigation_id, status, reviewer, feedback
             FROM pending_reviews
             WHERE status IN ('approved', 'rejected', 'info_requested')
               AND workflow_resumed_at IS NULL
             ORDER BY responded_at
             LIMIT $1",
        )
        .bind(self.config.resume.batch_size)
        .fetch_all(pool)
        .await?;

        if reviews.is_empty() {
            return Ok(0);
        }

        let mut resumed = 0usize;
        for (review_id, investigation_id, status, reviewer, feedback) in reviews {
            let inv_status: Option<(String,)> =
                sqlx::query_as("SELECT status FROM investigations WHERE id = $1")
                    .bind(investigation_id)
                    .fetch_optional(pool)
                    .await?;

            match inv_status.as_ref().map(|(s,)| s.as_str()) {
                Some("paused") => continue,
                Some("cancelled" | "closed" | "auto_closed") => {
                    self.mark_review_resumed(pool, review_id).await?;
                    continue;
                }
                _ => {}
            }

            let tid = thread_id(investigation_id);
            let interrupts = match self.engine.interrupts(&tid).await {
                Ok(interrupts) => interrupts,
                Err(e) => {
                    warn!(
                        investigation_id = %investigation_id,
                        error = %e,
                        "Resume checkpoint lookup failed"
                    );
                    continue;
                }
            };
            let Some(interrupt) = interrupts.first() else {
                // Nothing suspended; the decision was handled inline.
                self.mark_review_resumed(pool, review_id).await?;
                continue;
            };
            if interrupt.kind != "human_review" {
                info!(
                    investigation_id = %investigation_id,
                    interrupt_kind = %interrupt.kind,
                    "Resume skipped unknown interrupt"
                );
                continue;
            }

            let decision = match status.as_str() {
                "approved" => "approve",
                "rejected" => "reject",
                _ => "more_info",
            };
            let payload = ResumePayload {
                decision: decision.to_string(),
                feedback: feedback.clone(),
                reviewer: reviewer.clone(),
                source: Some("dashboard".to_string()),
            };

            let cfg = self.run_config();
            match self.engine.resume(&tid, payload, &cfg).await {
                Ok(outcome) => {
                    if let Some(emitter) = &cfg.emitter {
                        if let Err(e) = emitter.commit().await {
                            warn!(error = %e, "Commit after resume failed");
                        }
                    }
                    self.mark_review_resumed(pool, review_id).await?;
                    resumed += 1;
                    if let RunOutcome::Completed(final_state) = outcome {
                        info!(
                            investigation_id = %investigation_id,
                            status = %final_state.investigation.status,
                            "Resumed investigation completed"
                        );
                    }
                }
                Err(e) => {
                    error!(
                        review_id = %review_id,
                        investigation_id = %investigation_id,
                        error = %e,
                        "Resume failed"
                    );
                    if let Some(emitter) = &cfg.emitter {
                        emitter.rollback().await.ok();
                    }
                }
            }
        }

        Ok(resumed)
    }

    async fn mark_review_resumed(&self, pool: &PgPool, review_id: Uuid) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        sqlx::query("UPDATE pending_reviews SET workflow_resumed_at = $2 WHERE id = $1")
            .bind(review_id)
            .bind(now)
            .execute(pool)
            .await?;
        Ok(())
    }
}
