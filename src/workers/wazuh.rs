//! Wazuh worker: SIEM forensics, vulnerabilities, and log context.

use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

use crate::graph::engine::RunConfig;
use crate::integrations::ToolClient;
use crate::types::{Finding, Severity, WorkflowState};

/// Process names that warrant a closer look when seen on an endpoint.
const SUSPICIOUS_PROCESS_PATTERNS: &[&str] = &[
    "powershell",
    "cmd.exe",
    "wscript",
    "cscript",
    "mshta",
    "certutil",
    "bitsadmin",
    "regsvr32",
    "rundll32",
    "nc",
    "ncat",
    "netcat",
    "curl",
    "wget",
    "mimikatz",
    "procdump",
    "psexec",
];

/// Ports that are expected to be listening and not worth flagging.
const COMMON_PORTS: &[u32] = &[22, 80, 443, 3306, 5432, 6379, 8080, 8443, 9200];

/// Wazuh worker node. Dispatches on the supervisor's specific instructions:
/// forensics/process, vulnerability, log search, or (default) agent context.
pub async fn wazuh_worker_node(mut state: WorkflowState, cfg: &RunConfig) -> WorkflowState {
    info!("Wazuh worker started");

    let Some(client) = cfg.clients.siem.clone() else {
        info!("SIEM integration disabled, skipping");
        state.touch();
        return state;
    };

    let instructions = state
        .supervisor_decision
        .as_ref()
        .and_then(|d| d.specific_instructions.clone())
        .unwrap_or_default()
        .to_lowercase();

    let result = if instructions.contains("forensics") || instructions.contains("process") {
        collect_agent_forensics(&client, &mut state).await
    } else if instructions.contains("vulnerability") || instructions.contains("vuln") {
        collect_vulnerabilities(&client, &mut state).await
    } else if instructions.contains("log") {
        search_manager_logs(&client, &mut state).await
    } else {
        collect_agent_context(&client, &mut state).await
    };

    match result {
        Ok(()) => {
            state.last_error = None;
            info!("Wazuh worker completed");
        }
        Err(e) => {
            error!(error = %e, "Wazuh worker error");
            state.record_error(format!("Wazuh worker error: {e}"));
        }
    }

    state.touch();
    state
}

fn unique_agent_names(state: &WorkflowState) -> Vec<String> {
    let names: BTreeSet<String> = state
        .investigation
        .alerts
        .iter()
        .map(|a| a.source.agent_name.clone())
        .filter(|n| !n.is_empty() && n != "unknown")
        .collect();
    names.into_iter().collect()
}

fn metadata_object(state: &mut WorkflowState) -> &mut serde_json::Map<String, Value> {
    if !state.investigation.metadata.is_object() {
        state.investigation.metadata = Value::Object(Default::default());
    }
    match &mut state.investigation.metadata {
        Value::Object(map) => map,
        // Unreachable after the normalisation above.
        _ => unreachable!("investigation metadata was just normalised to an object"),
    }
}

/// Default action: fetch agent information for each unique agent.
async fn collect_agent_context(
    client: &Arc<dyn ToolClient>,
    state: &mut WorkflowState,
) -> anyhow::Result<()> {
    let agent_names = unique_agent_names(state);
    if agent_names.is_empty() {
        return Ok(());
    }

    for agent_name in agent_names.iter().take(5) {
        match client
            .call_tool(
                "get_wazuh_agents",
                json!({ "status": "active", "name": agent_name, "limit": 1 }),
            )
            .await
        {
            Ok(result) if !result.is_empty() => {
                let meta = metadata_object(state);
                let agents_info = meta
                    .entry("agents_info".to_string())
                    .or_insert_with(|| Value::Object(Default::default()));
                if let Value::Object(map) = agents_info {
                    map.insert(agent_name.clone(), Value::String(result));
                }
                info!(agent = %agent_name, "Agent context retrieved");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(agent = %agent_name, error = %e, "Failed to get agent info");
            }
        }
    }
    Ok(())
}

/// Forensics: running processes and listening ports for known agents.
async fn collect_agent_forensics(
    client: &Arc<dyn ToolClient>,
    state: &mut WorkflowState,
) -> anyhow::Result<()> {
    let agents: Vec<(String, String)> = {
        let meta = metadata_object(state);
        match meta.get("agents_info") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(name, data)| {
                    data.as_str()
                        .and_then(extract_agent_id)
                        .map(|id| (name.clone(), id))
                })
                .collect(),
            _ => Vec::new(),
        }
    };

    for (agent_name, agent_id) in agents {
        match client
            .call_tool(
                "get_wazuh_agent_processes",
                json!({ "agent_id": agent_id, "limit": 50 }),
            )
            .await
        {
            Ok(processes) => {
                let suspicious = analyze_processes(&processes);
                if !suspicious.is_empty() {
                    info!(
                        agent = %agent_name,
                        count = suspicious.len(),
                        "Suspicious processes found"
                    );
                    let mut finding = Finding::new(
                        format!("Suspicious processes found on {agent_name}"),
                        Severity::Medium,
                    );
                    finding.evidence = suspicious.into_iter().take(5).collect();
                    finding.recommendations = vec![
                        "Review process execution".to_string(),
                        "Check parent process chain".to_string(),
                    ];
                    finding.source = Some("wazuh".to_string());
                    state.investigation.add_finding(finding);
                }
            }
            Err(e) => warn!(agent = %agent_name, error = %e, "Failed to get processes"),
        }

        match client
            .call_tool(
                "get_wazuh_agent_ports",
                json!({ "agent_id": agent_id, "protocol": "tcp", "state": "LISTENING", "limit": 50 }),
            )
            .await
        {
            Ok(ports) => {
                let unusual = analyze_ports(&ports);
                if !unusual.is_empty() {
                    let mut finding = Finding::new(
                        format!("Unusual listening ports on {agent_name}"),
                        Severity::Low,
                    );
                    finding.evidence = unusual.into_iter().take(5).collect();
                    finding.recommendations = vec!["Verify port usage is legitimate".to_string()];
                    finding.source = Some("wazuh".to_string());
                    state.investigation.add_finding(finding);
                }
            }
            Err(e) => warn!(agent = %agent_name, error = %e, "Failed to get ports"),
        }
    }
    Ok(())
}

/// Critical vulnerabilities for known agents.
async fn collect_vulnerabilities(
    client: &Arc<dyn ToolClient>,
    state: &mut WorkflowState,
) -> anyhow::Result<()> {
    let agents: Vec<(String, String)> = {
        let meta = metadata_object(state);
        match meta.get("agents_info") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(name, data)| {
                    data.as_str()
                        .and_then(extract_agent_id)
                        .map(|id| (name.clone(), id))
                })
                .collect(),
            _ => Vec::new(),
        }
    };

    for (agent_name, agent_id) in agents {
        match client
            .call_tool(
                "get_wazuh_critical_vulnerabilities",
                json!({ "agent_id": agent_id, "limit": 20 }),
            )
            .await
        {
            Ok(result) if !result.is_empty() && !result.contains("No ") => {
                info!(agent = %agent_name, "Critical vulnerabilities found");
                let mut finding = Finding::new(
                    format!("Critical vulnerabilities found on {agent_name}"),
                    Severity::High,
                );
                let preview: String = result.chars().take(500).collect();
                finding.evidence = vec![preview];
                finding.recommendations = vec![
                    "Prioritize patching critical vulnerabilities".to_string(),
                    "Assess if vulnerabilities are being exploited".to_string(),
                ];
                finding.source = Some("wazuh".to_string());
                state.investigation.add_finding(finding);
            }
            Ok(_) => {}
            Err(e) => warn!(agent = %agent_name, error = %e, "Failed to get vulnerabilities"),
        }
    }
    Ok(())
}

/// Search manager error logs and stash them in investigation metadata.
async fn search_manager_logs(
    client: &Arc<dyn ToolClient>,
    state: &mut WorkflowState,
) -> anyhow::Result<()> {
    match client
        .call_tool("get_wazuh_manager_error_logs", json!({ "limit": 20 }))
        .await
    {
        Ok(result) if !result.is_empty() => {
            let meta = metadata_object(state);
            meta.insert("manager_errors".to_string(), Value::String(result));
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to search logs"),
    }
    Ok(())
}

fn agent_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ID:\s*(\d+)").unwrap())
}

fn port_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Port:\s*(\d+)").unwrap())
}

/// Extract a zero-padded 3-digit agent ID from a SIEM agent listing.
pub fn extract_agent_id(agent_data: &str) -> Option<String> {
    agent_id_regex()
        .captures(agent_data)
        .map(|caps| format!("{:0>3}", &caps[1]))
}

/// Lines mentioning a process from the suspicious allowlist.
pub fn analyze_processes(processes_text: &str) -> Vec<String> {
    let mut suspicious = Vec::new();
    for line in processes_text.to_lowercase().lines() {
        if SUSPICIOUS_PROCESS_PATTERNS.iter().any(|p| line.contains(p)) {
            let preview: String = line.trim().chars().take(100).collect();
            suspicious.push(format!("Suspicious process: {preview}"));
        }
    }
    suspicious
}

/// Listening ports above 1024 that are not on the common-port list.
pub fn analyze_ports(ports_text: &str) -> Vec<String> {
    let mut unusual = Vec::new();
    for caps in port_regex().captures_iter(ports_text) {
        let Ok(port) = caps[1].parse::<u32>() else {
            continue;
        };
        if port > 1024 && !COMMON_PORTS.contains(&port) {
            let m = caps.get(0).map_or(0, |m| m.start());
            let start = m.saturating_sub(50);
            let end = (m + 50).min(ports_text.len());
            let context = ports_text
                .get(start..end)
                .unwrap_or("")
                .trim()
                .to_string();
            unusual.push(format!("Unusual port {port}: {context}"));
        }
    }
    unusual
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::test_support::test_config_with_clients;
    use crate::integrations::testing::ScriptedToolClient;
    use crate::integrations::ToolClients;
    use crate::llm::testing::ScriptedChatModel;
    use crate::types::{Alert, Investigation, SupervisorAction, SupervisorDecision};

    #[test]
    fn test_extract_agent_id_zero_pads() {
        assert_eq!(extract_agent_id("Agent web-01\nID: 7\nStatus: active"), Some("007".to_string()));
        assert_eq!(extract_agent_id("ID: 123"), Some("123".to_string()));
        assert_eq!(extract_agent_id("no id here"), None);
    }

    #[test]
    fn test_analyze_processes_flags_allowlist() {
        let text = "PID 100 systemd\nPID 200 powershell.exe -enc AAA\nPID 300 nginx";
        let suspicious = analyze_processes(text);
        assert_eq!(suspicious.len(), 1);
        assert!(suspicious[0].contains("powershell"));
    }

    #[test]
    fn test_analyze_ports_skips_common() {
        let text = "Port: 443 nginx\nPort: 4444 unknown\nPort: 8080 proxy\nPort: 31337 elite";
        let unusual = analyze_ports(text);
        assert_eq!(unusual.len(), 2);
        assert!(unusual[0].contains("4444"));
        assert!(unusual[1].contains("31337"));
    }

    fn state_with_agent() -> WorkflowState {
        let mut inv = Investigation::new();
        inv.add_alert(
            Alert::from_summary_block(
                "Alert ID: 1\nTime: x\nAgent: web-01\nLevel: 8\nDescription: suspicious login",
            )
            .unwrap(),
        );
        WorkflowState::initial(inv)
    }

    #[tokio::test]
    async fn test_default_dispatch_collects_agent_context() {
        let siem = Arc::new(
            ScriptedToolClient::new("wazuh")
                .respond("get_wazuh_agents", "Agent: web-01\nID: 3\nStatus: active"),
        );
        let cfg = test_config_with_clients(
            Arc::new(ScriptedChatModel::new(&["{}"])),
            ToolClients {
                siem: Some(siem),
                ..ToolClients::default()
            },
        );
        let state = wazuh_worker_node(state_with_agent(), &cfg).await;
        let agents = &state.investigation.metadata["agents_info"];
        assert!(agents["web-01"].as_str().unwrap().contains("ID: 3"));
    }

    #[tokio::test]
    async fn test_forensics_dispatch_adds_findings() {
        let siem = Arc::new(
            ScriptedToolClient::new("wazuh")
                .respond("get_wazuh_agent_processes", "PID 1 mimikatz.exe running")
                .respond("get_wazuh_agent_ports", "Port: 4444 listener"),
        );
        let cfg = test_config_with_clients(
            Arc::new(ScriptedChatModel::new(&["{}"])),
            ToolClients {
                siem: Some(siem),
                ..ToolClients::default()
            },
        );

        let mut state = state_with_agent();
        // Agent context from a previous pass.
        state.investigation.metadata = json!({
            "agents_info": { "web-01": "ID: 3" }
        });
        state.supervisor_decision = Some(SupervisorDecision {
            next_action: SupervisorAction::Investigate,
            action_reasoning: String::new(),
            tp_confidence: 0.5,
            confidence_reasoning: String::new(),
            specific_instructions: Some("collect process forensics".to_string()),
        });

        let state = wazuh_worker_node(state, &cfg).await;
        assert_eq!(state.investigation.findings.len(), 2);
        assert!(state.investigation.findings[0]
            .description
            .contains("Suspicious processes"));
        assert!(state.investigation.findings[1]
            .description
            .contains("Unusual listening ports"));
    }
}
