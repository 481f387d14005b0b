//! TheHive worker: case creation for approved escalations.

use regex::Regex;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

use crate::graph::engine::RunConfig;
use crate::integrations::ToolClient;
use crate::types::{
    EnrichmentVerdict, Investigation, InvestigationStatus, ObservableType, Phase, WorkflowState,
};

/// TheHive worker node. Creates a case from the investigation, uploads
/// observables with their enrichment verdicts, and records the case ID.
pub async fn thehive_worker_node(mut state: WorkflowState, cfg: &RunConfig) -> WorkflowState {
    info!("TheHive worker started");

    let Some(client) = cfg.clients.case_management.clone() else {
        warn!("Case-management integration disabled, cannot escalate");
        state.record_error("TheHive integration disabled".to_string());
        state.current_phase = Phase::Closed;
        return state;
    };

    match create_case(&client, &state.investigation).await {
        Ok(Some(case_id)) => {
            info!(case_id = %case_id, "Case created");
            state.investigation.thehive_case_id = Some(case_id.clone());
            state.investigation.status = InvestigationStatus::Escalated;

            if let Some(emitter) = &cfg.emitter {
                if let Err(e) = emitter
                    .emit_thehive_case_created(
                        state.investigation.id,
                        &case_id,
                        None,
                        &state.investigation.title,
                    )
                    .await
                {
                    warn!(error = %e, "Event emission failed");
                }
            }

            add_observables_to_case(&client, &case_id, &state.investigation).await;
        }
        Ok(None) => {
            warn!("Case creation returned no case ID");
            state.record_error("Failed to create TheHive case".to_string());
        }
        Err(e) => {
            error!(error = %e, "TheHive worker error");
            state.record_error(format!("TheHive worker error: {e}"));
        }
    }

    state.current_phase = Phase::Closed;
    state.touch();
    state
}

async fn create_case(
    client: &Arc<dyn ToolClient>,
    investigation: &Investigation,
) -> anyhow::Result<Option<String>> {
    let severity = match investigation.max_severity() {
        crate::types::Severity::Low => 1,
        crate::types::Severity::Medium => 2,
        crate::types::Severity::High => 3,
        crate::types::Severity::Critical => 4,
    };

    info!(
        title = %investigation.title,
        severity = severity,
        "Creating TheHive case"
    );

    let result = client
        .call_tool(
            "create_thehive_case",
            json!({
                "title": investigation.title,
                "description": investigation.case_description(),
                "severity": severity,
                "tags": investigation.case_tags(),
                "tlp": 2,
                "pap": 2,
            }),
        )
        .await?;

    Ok(extract_case_id(&result))
}

/// Upload the investigation's observables to the new case, flagging IOCs
/// based on their enrichment verdicts.
async fn add_observables_to_case(
    client: &Arc<dyn ToolClient>,
    case_id: &str,
    investigation: &Investigation,
) {
    let mut added = 0usize;
    let mut seen: Vec<&str> = Vec::new();

    for observable in &investigation.observables {
        if seen.contains(&observable.value.as_str()) {
            continue;
        }

        let data_type = match observable.observable_type {
            ObservableType::Ip => "ip",
            ObservableType::Domain => "domain",
            ObservableType::Url => "url",
            t if t.is_hash() => "hash",
            ObservableType::Email => "mail",
            ObservableType::Filename => "filename",
            ObservableType::Fqdn => "fqdn",
            ObservableType::RegistryKey => "registry",
            _ => "other",
        };

        let enrichment = investigation.enrichments.iter().find(|e| {
            e.observable_value() == observable.value
                && e.observable_type() == observable.observable_type
        });

        let mut is_ioc = false;
        let mut message = observable.context.clone().unwrap_or_default();
        let mut tags = observable.tags.clone();
        tags.push(format!("source:{}", observable.source));

        if let Some(e) = enrichment {
            is_ioc = e.is_suspicious();
            match e.verdict() {
                EnrichmentVerdict::Malicious => {
                    message = format!("[MALICIOUS] {message} - {}: malicious", e.analyzer());
                }
                EnrichmentVerdict::Suspicious => {
                    message = format!("[SUSPICIOUS] {message} - {}: suspicious", e.analyzer());
                }
                _ => {}
            }
            tags.push(format!("verdict:{}", e.verdict()));
            tags.push(format!("analyzer:{}", e.analyzer()));
        }

        match client
            .call_tool(
                "create_case_observable",
                json!({
                    "case_id": case_id,
                    "data_type": data_type,
                    "data": observable.value,
                    "message": if message.trim().is_empty() { None } else { Some(message.trim()) },
                    "ioc": is_ioc,
                    "sighted": true,
                    "tags": tags,
                }),
            )
            .await
        {
            Ok(_) => {
                seen.push(&observable.value);
                added += 1;
            }
            Err(e) => {
                warn!(
                    case_id = case_id,
                    observable = %observable.value,
                    error = %e,
                    "Failed to add observable"
                );
            }
        }
    }

    info!(case_id = case_id, count = added, "Observables added to case");
}

fn case_id_regexes() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"Case ID:\s*([^\s\n]+)",
            r#"_id["']?\s*:\s*["']?([^"'\s,}]+)"#,
            r#"(?i)case[_-]?id["']?\s*:\s*["']?([^"'\s,}]+)"#,
            r"#(\d+)",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// Extract the case ID from TheHive's response text or JSON.
pub fn extract_case_id(result: &str) -> Option<String> {
    let trimmed = result.trim();
    if trimmed.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(trimmed) {
            for key in ["_id", "id", "caseId"] {
                if let Some(id) = parsed.get(key).and_then(serde_json::Value::as_str) {
                    return Some(id.to_string());
                }
            }
        }
    }

    for re in case_id_regexes() {
        if let Some(caps) = re.captures(result) {
            return Some(caps[1].to_string());
        }
    }

    // A short token with no spaces is likely a bare ID.
    if !trimmed.is_empty() && trimmed.len() < 50 && !trimmed.contains(' ') {
        return Some(trimmed.to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::test_support::test_config_with_clients;
    use crate::integrations::testing::ScriptedToolClient;
    use crate::integrations::ToolClients;
    use crate::llm::testing::ScriptedChatModel;
    use crate::types::Alert;

    #[test]
    fn test_extract_case_id_variants() {
        assert_eq!(
            extract_case_id(r#"{"_id": "~4099136", "title": "x"}"#),
            Some("~4099136".to_string())
        );
        assert_eq!(
            extract_case_id("Case created.\nCase ID: ~12345\nStatus: Open"),
            Some("~12345".to_string())
        );
        assert_eq!(extract_case_id("created case #77"), Some("77".to_string()));
        assert_eq!(extract_case_id("~817"), Some("~817".to_string()));
        assert_eq!(
            extract_case_id("something went wrong and no identifier is present here"),
            None
        );
    }

    #[tokio::test]
    async fn test_worker_creates_case_and_uploads_observables() {
        let hive = Arc::new(
            ScriptedToolClient::new("thehive")
                .respond("create_thehive_case", "Case ID: ~900")
                .respond("create_case_observable", "ok"),
        );
        let cfg = test_config_with_clients(
            Arc::new(ScriptedChatModel::new(&["{}"])),
            ToolClients {
                case_management: Some(hive.clone()),
                ..ToolClients::default()
            },
        );

        let mut inv = Investigation::new();
        inv.add_alert(
            Alert::from_summary_block(
                "Alert ID: 1\nTime: x\nAgent: web-01\nLevel: 13\nDescription: C2 beacon to 203.0.113.9",
            )
            .unwrap(),
        );
        inv.title = inv.generate_title();
        let state = thehive_worker_node(WorkflowState::initial(inv), &cfg).await;

        assert_eq!(
            state.investigation.thehive_case_id,
            Some("~900".to_string())
        );
        assert_eq!(state.investigation.status, InvestigationStatus::Escalated);
        assert_eq!(state.current_phase, Phase::Closed);

        let calls = hive.calls.lock().await;
        assert!(calls.iter().any(|(tool, _)| tool == "create_thehive_case"));
        assert!(calls
            .iter()
            .any(|(tool, _)| tool == "create_case_observable"));
    }

    #[tokio::test]
    async fn test_worker_records_error_without_integration() {
        let cfg = test_config_with_clients(
            Arc::new(ScriptedChatModel::new(&["{}"])),
            ToolClients::default(),
        );
        let state = thehive_worker_node(WorkflowState::initial(Investigation::new()), &cfg).await;
        assert!(state.last_error.is_some());
        assert!(state.investigation.thehive_case_id.is_none());
    }
}
