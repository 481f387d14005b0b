//! End-to-end workflow engine tests.
//!
//! Runs the full graph against the in-memory checkpointer with scripted
//! LLM and tool clients. No database, no network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use soctalk::graph::{Node, ResumePayload, RunConfig, RunOutcome, WorkflowEngine};
use soctalk::hil::{DecisionSource, HilBackend, HilError, HilRequest, HilResponse, HilService};
use soctalk::integrations::testing::ScriptedToolClient;
use soctalk::integrations::ToolClients;
use soctalk::llm::testing::ScriptedChatModel;
use soctalk::persistence::{thread_id, Checkpointer, MemoryCheckpointer};
use soctalk::types::{
    Alert, HumanDecision, InvestigationStatus, Phase, Severity,
};
use soctalk::{Investigation, WorkflowState};

fn investigation_with(id: &str, level: u8, description: &str) -> Investigation {
    let mut inv = Investigation::new();
    inv.add_alert(
        Alert::from_summary_block(&format!(
            "Alert ID: {id}\nTime: 2026-01-15T10:00:00Z\nAgent: web-01\nLevel: {level}\nDescription: {description}"
        ))
        .unwrap(),
    );
    inv.title = inv.generate_title();
    inv
}

fn config(
    fast: &[&str],
    reasoning: &[&str],
    clients: ToolClients,
    hil: Option<Arc<HilService>>,
) -> RunConfig {
    RunConfig {
        emitter: None,
        pool: None,
        hil,
        hil_backend: "dashboard".to_string(),
        fast_llm: Arc::new(ScriptedChatModel::new(fast)),
        reasoning_llm: Arc::new(ScriptedChatModel::new(reasoning)),
        clients,
    }
}

const SUPERVISOR_ENRICH: &str = r#"{"next_action": "ENRICH", "action_reasoning": "pending observables", "tp_confidence": 0.4, "confidence_reasoning": "not yet enriched"}"#;
const SUPERVISOR_VERDICT: &str = r#"{"next_action": "VERDICT", "action_reasoning": "enrichment complete", "tp_confidence": 0.3, "confidence_reasoning": "all clean"}"#;
const VERDICT_CLOSE: &str = r#"{
    "decision": "close", "confidence": 0.9,
    "threat_assessment": "Benign DNS traffic",
    "evidence_strength": "strong", "potential_impact": "low", "urgency": "routine",
    "key_evidence": ["analyzer verdict benign"],
    "recommendation": "Close as false positive"
}"#;
const VERDICT_ESCALATE: &str = r#"{
    "decision": "escalate", "confidence": 0.92,
    "threat_assessment": "Known malware hash on an endpoint",
    "evidence_strength": "strong", "potential_impact": "high", "urgency": "urgent",
    "key_evidence": ["45/60 engines flagged the hash"],
    "recommendation": "Escalate for incident response"
}"#;
const VERDICT_NEEDS_MORE_INFO: &str = r#"{
    "decision": "needs_more_info", "confidence": 0.4,
    "threat_assessment": "Inconclusive",
    "evidence_strength": "weak", "potential_impact": "medium", "urgency": "routine",
    "recommendation": "Gather more evidence"
}"#;

/// Happy path: one low-severity alert, benign enrichment, supervisor goes
/// to verdict after one round, verdict closes.
#[tokio::test]
async fn test_happy_path_auto_close() {
    let checkpointer = Arc::new(MemoryCheckpointer::new());
    let engine = WorkflowEngine::new(checkpointer.clone());

    let analyzers = Arc::new(
        ScriptedToolClient::new("cortex")
            .respond("analyze_ip_with_abuseipdb", "Abuse Confidence Score: 2"),
    );
    let cfg = config(
        &[SUPERVISOR_ENRICH, SUPERVISOR_VERDICT],
        &[VERDICT_CLOSE],
        ToolClients {
            analyzers: Some(analyzers),
            ..ToolClients::default()
        },
        None,
    );

    let inv = investigation_with("a-1", 2, "dns query to 8.8.8.8");
    let inv_id = inv.id;
    let outcome = engine
        .run(WorkflowState::initial(inv), &cfg)
        .await
        .unwrap();

    let state = match outcome {
        RunOutcome::Completed(state) => state,
        RunOutcome::Interrupted(_) => panic!("expected completion"),
    };

    assert_eq!(state.investigation.status, InvestigationStatus::Closed);
    assert_eq!(state.current_phase, Phase::Closed);
    assert_eq!(state.investigation.enrichments.len(), 1);
    assert_eq!(state.investigation.malicious_indicators().len(), 0);
    assert!(state
        .investigation
        .closure_reason
        .as_deref()
        .unwrap()
        .contains("Closed by AI verdict"));

    // Final checkpoint reflects the completed run.
    let snapshot = checkpointer
        .load(&thread_id(inv_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.next_node, None);
    assert!(snapshot.interrupt.is_none());
}

/// Escalation via chat: critical hash, malicious enrichment, verdict
/// escalates, chat backend approves, case is created.
#[tokio::test]
async fn test_escalation_via_chat_approval() {
    struct ApproveBackend;

    #[async_trait]
    impl HilBackend for ApproveBackend {
        fn name(&self) -> &str {
            "test-chat"
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn request_approval(&self, request: &HilRequest) -> Result<HilResponse, HilError> {
            Ok(HilResponse {
                investigation_id: request.investigation_id,
                decision: HumanDecision::Approve,
                reviewer: Some("analyst@soc".to_string()),
                feedback: None,
                responded_at: Utc::now(),
                source: DecisionSource::Chat,
                backend: "test-chat".to_string(),
            })
        }
    }

    let engine = WorkflowEngine::new(Arc::new(MemoryCheckpointer::new()));

    let analyzers = Arc::new(ScriptedToolClient::new("cortex").respond(
        "scan_hash_with_virustotal",
        "Malicious detections: 45/60 engines flagged this hash",
    ));
    let hive = Arc::new(
        ScriptedToolClient::new("thehive")
            .respond("create_thehive_case", "Case ID: ~4242")
            .respond("create_case_observable", "ok"),
    );
    let hil = Arc::new(HilService::new(Arc::new(ApproveBackend), None, None, None));

    let cfg = config(
        &[SUPERVISOR_ENRICH, SUPERVISOR_VERDICT],
        &[VERDICT_ESCALATE],
        ToolClients {
            analyzers: Some(analyzers),
            case_management: Some(hive),
            ..ToolClients::default()
        },
        Some(hil),
    );

    let inv = investigation_with(
        "a-2",
        13,
        "malware dropped hash d41d8cd98f00b204e9800998ecf8427e",
    );
    assert_eq!(inv.max_severity(), Severity::Critical);

    let outcome = engine
        .run(WorkflowState::initial(inv), &cfg)
        .await
        .unwrap();
    let state = match outcome {
        RunOutcome::Completed(state) => state,
        RunOutcome::Interrupted(_) => panic!("chat backend should have answered inline"),
    };

    assert_eq!(state.human_decision, Some(HumanDecision::Approve));
    assert_eq!(state.human_decision_source.as_deref(), Some("chat"));
    assert_eq!(
        state.investigation.thehive_case_id.as_deref(),
        Some("~4242")
    );
    assert!(state.investigation.malicious_indicators().len() >= 1);
    assert!(state
        .investigation
        .closure_reason
        .as_deref()
        .unwrap()
        .contains("Approved by analyst"));
}

/// Verdict retry cap: needs_more_info twice forces the workflow to human
/// review instead of looping through the supervisor again.
#[tokio::test]
async fn test_verdict_retry_cap_forces_review() {
    let checkpointer = Arc::new(MemoryCheckpointer::new());
    let engine = WorkflowEngine::new(checkpointer.clone());

    // Supervisor always wants a verdict; the reasoning model never decides.
    let cfg = config(
        &[SUPERVISOR_VERDICT],
        &[VERDICT_NEEDS_MORE_INFO],
        ToolClients::default(),
        None,
    );

    let inv = investigation_with("a-3", 8, "odd login pattern");
    let inv_id = inv.id;
    let outcome = engine
        .run(WorkflowState::initial(inv), &cfg)
        .await
        .unwrap();

    match outcome {
        RunOutcome::Interrupted(interrupt) => {
            assert_eq!(interrupt.kind, "human_review");
            assert_eq!(interrupt.investigation_id, inv_id);
        }
        RunOutcome::Completed(_) => panic!("expected suspension at human review"),
    }

    let snapshot = checkpointer
        .load(&thread_id(inv_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.state.verdict_retry_count, 2);
    assert_eq!(snapshot.next_node, Some(Node::HumanReview));
    assert!(snapshot.interrupt.is_some());
}

/// Suspend on the dashboard path, then resume with a dashboard approval:
/// the workflow continues through TheHive and closes, and the decision
/// source is preserved.
#[tokio::test]
async fn test_suspend_and_resume_with_dashboard_decision() {
    let checkpointer = Arc::new(MemoryCheckpointer::new());
    let engine = WorkflowEngine::new(checkpointer.clone());

    let hive = Arc::new(
        ScriptedToolClient::new("thehive")
            .respond("create_thehive_case", "Case ID: ~99")
            .respond("create_case_observable", "ok"),
    );
    let cfg = config(
        &[SUPERVISOR_VERDICT],
        &[VERDICT_ESCALATE],
        ToolClients {
            case_management: Some(hive),
            ..ToolClients::default()
        },
        None,
    );

    let inv = investigation_with("a-4", 10, "suspicious beacon");
    let inv_id = inv.id;
    let tid = thread_id(inv_id);

    // First run suspends at human review.
    let outcome = engine
        .run(WorkflowState::initial(inv), &cfg)
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Interrupted(_)));
    assert_eq!(engine.interrupts(&tid).await.unwrap().len(), 1);

    // Dashboard approves; the resume loop injects the decision.
    let outcome = engine
        .resume(
            &tid,
            ResumePayload {
                decision: "approve".to_string(),
                feedback: Some("confirmed by on-call".to_string()),
                reviewer: Some("oncall@soc".to_string()),
                source: Some("dashboard".to_string()),
            },
            &cfg,
        )
        .await
        .unwrap();

    let state = match outcome {
        RunOutcome::Completed(state) => state,
        RunOutcome::Interrupted(_) => panic!("resume should complete the workflow"),
    };
    assert_eq!(state.human_decision, Some(HumanDecision::Approve));
    assert_eq!(state.human_decision_source.as_deref(), Some("dashboard"));
    assert_eq!(state.investigation.thehive_case_id.as_deref(), Some("~99"));

    // The interrupt is consumed; resuming again is an error.
    assert!(engine.interrupts(&tid).await.unwrap().is_empty());
    let again = engine
        .resume(
            &tid,
            ResumePayload {
                decision: "approve".to_string(),
                feedback: None,
                reviewer: None,
                source: Some("dashboard".to_string()),
            },
            &cfg,
        )
        .await;
    assert!(again.is_err());
}

/// A dashboard rejection resumes into the close node.
#[tokio::test]
async fn test_resume_with_rejection_closes() {
    let engine = WorkflowEngine::new(Arc::new(MemoryCheckpointer::new()));
    let cfg = config(
        &[SUPERVISOR_VERDICT],
        &[VERDICT_ESCALATE],
        ToolClients::default(),
        None,
    );

    let inv = investigation_with("a-5", 9, "likely false positive");
    let tid = thread_id(inv.id);

    let outcome = engine
        .run(WorkflowState::initial(inv), &cfg)
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Interrupted(_)));

    let outcome = engine
        .resume(
            &tid,
            ResumePayload {
                decision: "reject".to_string(),
                feedback: Some("known benign scanner".to_string()),
                reviewer: None,
                source: Some("dashboard".to_string()),
            },
            &cfg,
        )
        .await
        .unwrap();

    let state = match outcome {
        RunOutcome::Completed(state) => state,
        RunOutcome::Interrupted(_) => panic!("expected completion"),
    };
    assert_eq!(state.investigation.status, InvestigationStatus::Closed);
    let reason = state.investigation.closure_reason.unwrap();
    assert!(reason.contains("Rejected by analyst during human review"));
    assert!(reason.contains("known benign scanner"));
    // Rejection never creates a case.
    assert!(state.investigation.thehive_case_id.is_none());
}

/// The iteration bound terminates a supervisor that never stops enriching.
#[tokio::test]
async fn test_iteration_bound_terminates_workflow() {
    let engine = WorkflowEngine::new(Arc::new(MemoryCheckpointer::new()));

    // The analyzer returns nothing conclusive and the supervisor keeps
    // asking for enrichment; the iteration cap forces a verdict.
    let analyzers = Arc::new(
        ScriptedToolClient::new("cortex")
            .respond("analyze_ip_with_abuseipdb", "nothing of note"),
    );
    let cfg = config(
        &[SUPERVISOR_ENRICH],
        &[VERDICT_CLOSE],
        ToolClients {
            analyzers: Some(analyzers),
            ..ToolClients::default()
        },
        None,
    );

    let inv = investigation_with("a-6", 5, "chatter with 203.0.113.77");
    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        engine.run(WorkflowState::initial(inv), &cfg),
    )
    .await
    .expect("workflow must terminate")
    .unwrap();

    let state = match outcome {
        RunOutcome::Completed(state) => state,
        RunOutcome::Interrupted(_) => panic!("expected completion"),
    };
    assert!(state.iteration_count >= 10);
    assert_eq!(state.investigation.status, InvestigationStatus::Closed);
}
