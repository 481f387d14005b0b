//! MISP worker: threat-intelligence contextualization of observables.

use chrono::Utc;
use regex::Regex;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::graph::engine::RunConfig;
use crate::integrations::ToolClient;
use crate::types::{
    Finding, MispContext, MispEventContext, MispMatch, Observable, ObservableType, Severity,
    WarninglistHit, WorkflowState,
};

/// Observables checked per pass.
const MISP_BATCH: usize = 10;

/// Event contexts fetched per IOC match.
const EVENTS_PER_MATCH: usize = 3;

fn searchable(observable_type: ObservableType) -> bool {
    matches!(
        observable_type,
        ObservableType::Ip
            | ObservableType::Domain
            | ObservableType::Url
            | ObservableType::HashMd5
            | ObservableType::HashSha1
            | ObservableType::HashSha256
            | ObservableType::Email
            | ObservableType::Fqdn
    )
}

/// MISP worker node. Searches the IOC database for not-yet-checked
/// observables, pulls event context for matches, aggregates threat actors,
/// campaigns, and warninglist hits, and derives findings.
pub async fn misp_worker_node(mut state: WorkflowState, cfg: &RunConfig) -> WorkflowState {
    info!("MISP worker started");

    let Some(client) = cfg.clients.threat_intel.clone() else {
        info!("Threat-intel integration disabled, skipping");
        state.touch();
        return state;
    };

    let mut context = state.investigation.misp_context.clone().unwrap_or_default();
    let checked: BTreeSet<String> = context.checked_iocs.iter().cloned().collect();

    let to_check: Vec<Observable> = state
        .investigation
        .observables
        .iter()
        .filter(|o| searchable(o.observable_type) && !checked.contains(&o.value))
        .take(MISP_BATCH)
        .cloned()
        .collect();

    if to_check.is_empty() {
        info!("No observables to check in MISP");
        state.touch();
        return state;
    }

    let findings_before = state.investigation.findings.len();

    for observable in to_check {
        let value_preview: String = observable.value.chars().take(50).collect();
        info!(
            observable_type = %observable.observable_type,
            value = %value_preview,
            "Checking MISP for IOC"
        );

        match search_ioc(&client, &observable).await {
            Ok(Some(ioc_match)) => {
                context.checked_iocs.push(observable.value.clone());

                for event_id in ioc_match.event_ids.iter().take(EVENTS_PER_MATCH) {
                    if context.events.contains_key(event_id) {
                        continue;
                    }
                    if let Some(event_context) = get_event_context(&client, event_id).await {
                        for actor in &event_context.threat_actors {
                            if !context.threat_actors.contains(actor) {
                                context.threat_actors.push(actor.clone());
                            }
                        }
                        for campaign in &event_context.campaigns {
                            if !context.campaigns.contains(campaign) {
                                context.campaigns.push(campaign.clone());
                            }
                        }
                        context.events.insert(event_id.clone(), event_context);
                    }
                }

                if let Some(emitter) = &cfg.emitter {
                    if let Err(e) = emitter
                        .emit_misp_context_retrieved(
                            state.investigation.id,
                            observable.observable_type.as_str(),
                            &observable.value,
                            ioc_match.event_ids.len(),
                            &context.threat_actors,
                        )
                        .await
                    {
                        warn!(error = %e, "Event emission failed");
                    }
                }

                context.matches.push(ioc_match);
            }
            Ok(None) => {
                context.checked_iocs.push(observable.value.clone());
            }
            Err(e) => {
                warn!(observable = %value_preview, error = %e, "MISP check failed");
                continue;
            }
        }

        if let Some(hit) = check_warninglist(&client, &observable).await {
            context.warninglist_hits.push(hit);
        }
    }

    let new_findings = generate_misp_findings(
        &context.matches,
        &context.threat_actors,
        &context.campaigns,
        &context.warninglist_hits,
    );
    for finding in new_findings {
        state.investigation.add_finding(finding);
    }

    context.last_checked = Some(Utc::now());

    info!(
        checked = context.checked_iocs.len(),
        matches = context.matches.len(),
        threat_actors = context.threat_actors.len(),
        warninglist_hits = context.warninglist_hits.len(),
        new_findings = state.investigation.findings.len() - findings_before,
        "MISP worker completed"
    );

    state.investigation.misp_context = Some(context);
    state.touch();
    state
}

fn event_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Event ID:\s*(\d+)").unwrap())
}

fn category_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Category:\s*([^\n]+)").unwrap())
}

fn tags_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Tags:\s*([^\n]+)").unwrap())
}

fn info_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Info:\s*([^\n]+)").unwrap())
}

fn threat_level_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Threat Level:\s*(\w+)").unwrap())
}

fn threat_actor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)threat-actor[^\n]*?\*\s*([^\n:]+)").unwrap())
}

fn campaign_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)campaign[^\n]*?\*\s*([^\n:]+)").unwrap())
}

fn mitre_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)mitre-attack[^\n]*?\*\s*([^\n:]+)").unwrap())
}

fn attribute_count_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Attributes:\s*(\d+)").unwrap())
}

fn warninglist_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-\s*([^(]+)\s*\(ID:").unwrap())
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Search the TIP for an IOC; `None` means no match.
async fn search_ioc(
    client: &Arc<dyn ToolClient>,
    observable: &Observable,
) -> anyhow::Result<Option<MispMatch>> {
    let result = client
        .call_tool("search_misp_ioc", json!({ "value": observable.value }))
        .await?;

    if result.is_empty() || (result.contains("No ") && result.contains(" found")) {
        return Ok(None);
    }

    let event_ids = dedup(
        event_id_regex()
            .captures_iter(&result)
            .map(|c| c[1].to_string())
            .collect(),
    );
    let categories = dedup(
        category_regex()
            .captures_iter(&result)
            .map(|c| c[1].trim().to_string())
            .collect(),
    );
    let tags = tags_regex()
        .captures(&result)
        .map(|c| {
            c[1].split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let to_ids = result.contains("To IDS: true") || result.to_lowercase().contains("to_ids: true");

    Ok(Some(MispMatch {
        value: observable.value.clone(),
        observable_type: observable.observable_type.to_string(),
        event_ids,
        categories,
        tags,
        to_ids,
    }))
}

/// Fetch full context for one TIP event.
async fn get_event_context(
    client: &Arc<dyn ToolClient>,
    event_id: &str,
) -> Option<MispEventContext> {
    let result = client
        .call_tool("get_misp_event_context", json!({ "event_id": event_id }))
        .await
        .map_err(|e| {
            warn!(event_id = event_id, error = %e, "MISP event context failed");
        })
        .ok()?;

    if result.is_empty() {
        return None;
    }

    Some(MispEventContext {
        event_id: event_id.to_string(),
        info: info_regex()
            .captures(&result)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default(),
        threat_level: threat_level_regex()
            .captures(&result)
            .map(|c| c[1].to_string())
            .unwrap_or_default(),
        threat_actors: dedup(
            threat_actor_regex()
                .captures_iter(&result)
                .map(|c| c[1].trim().to_string())
                .collect(),
        ),
        campaigns: dedup(
            campaign_regex()
                .captures_iter(&result)
                .map(|c| c[1].trim().to_string())
                .collect(),
        ),
        mitre_techniques: dedup(
            mitre_regex()
                .captures_iter(&result)
                .map(|c| c[1].trim().to_string())
                .collect(),
        ),
        tags: tags_regex()
            .captures(&result)
            .map(|c| c[1].split(',').map(|t| t.trim().to_string()).collect())
            .unwrap_or_default(),
        attribute_count: attribute_count_regex()
            .captures(&result)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0),
    })
}

/// Check the warninglists; returns a hit only when the IOC is listed.
async fn check_warninglist(
    client: &Arc<dyn ToolClient>,
    observable: &Observable,
) -> Option<WarninglistHit> {
    let result = client
        .call_tool("check_misp_warninglist", json!({ "value": observable.value }))
        .await
        .map_err(|e| {
            warn!(error = %e, "MISP warninglist check failed");
        })
        .ok()?;

    if result.is_empty() || result.contains("NOT on any warninglist") {
        return None;
    }
    if !result.contains("WARNING") && !result.to_lowercase().contains("warninglist") {
        return None;
    }

    Some(WarninglistHit {
        value: observable.value.clone(),
        observable_type: observable.observable_type.to_string(),
        warninglists: warninglist_name_regex()
            .captures_iter(&result)
            .map(|c| c[1].trim().to_string())
            .collect(),
    })
}

/// Derive findings from the accumulated MISP context.
pub fn generate_misp_findings(
    matches: &[MispMatch],
    threat_actors: &[String],
    campaigns: &[String],
    warninglist_hits: &[WarninglistHit],
) -> Vec<Finding> {
    let mut findings = Vec::new();

    let to_ids_matches: Vec<&MispMatch> = matches.iter().filter(|m| m.to_ids).collect();
    if !to_ids_matches.is_empty() {
        let mut finding = Finding::new(
            format!(
                "MISP: {} IOC(s) flagged for IDS detection found in threat intelligence",
                to_ids_matches.len()
            ),
            Severity::High,
        );
        finding.evidence = to_ids_matches
            .iter()
            .take(5)
            .map(|m| {
                format!(
                    "{} ({}) - Events: {}",
                    m.value,
                    m.observable_type,
                    m.event_ids.join(", ")
                )
            })
            .collect();
        finding.recommendations = vec![
            "Review MISP event context for attribution".to_string(),
            "Consider blocking these IOCs at perimeter".to_string(),
            "Search for related indicators in the environment".to_string(),
        ];
        finding.source = Some("misp".to_string());
        findings.push(finding);
    } else if !matches.is_empty() {
        let mut finding = Finding::new(
            format!(
                "MISP: {} IOC(s) found in threat intelligence database",
                matches.len()
            ),
            Severity::Medium,
        );
        finding.evidence = matches
            .iter()
            .take(5)
            .map(|m| {
                format!(
                    "{} ({}) - Events: {}",
                    m.value,
                    m.observable_type,
                    m.event_ids.join(", ")
                )
            })
            .collect();
        finding.recommendations = vec![
            "Review MISP event context for more details".to_string(),
            "Assess if IOCs are still relevant".to_string(),
        ];
        finding.source = Some("misp".to_string());
        findings.push(finding);
    }

    if !threat_actors.is_empty() {
        let names = threat_actors
            .iter()
            .take(3)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut finding = Finding::new(
            format!("MISP: Potential threat actor attribution identified - {names}"),
            Severity::High,
        );
        finding.evidence = threat_actors
            .iter()
            .take(5)
            .map(|ta| format!("Threat actor: {ta}"))
            .collect();
        finding.recommendations = vec![
            "Review threat actor TTPs in MITRE ATT&CK".to_string(),
            "Search for other indicators associated with this actor".to_string(),
            "Consider threat actor targeting and motivation".to_string(),
        ];
        finding.source = Some("misp".to_string());
        findings.push(finding);
    }

    if !campaigns.is_empty() {
        let names = campaigns
            .iter()
            .take(3)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut finding = Finding::new(
            format!("MISP: IOCs linked to known campaign(s) - {names}"),
            Severity::High,
        );
        finding.evidence = campaigns
            .iter()
            .take(5)
            .map(|c| format!("Campaign: {c}"))
            .collect();
        finding.recommendations = vec![
            "Review campaign timeline and scope".to_string(),
            "Check for other campaign indicators".to_string(),
        ];
        finding.source = Some("misp".to_string());
        findings.push(finding);
    }

    if !warninglist_hits.is_empty() {
        let mut finding = Finding::new(
            format!(
                "MISP: {} IOC(s) found on warninglists - potential false positives",
                warninglist_hits.len()
            ),
            Severity::Low,
        );
        finding.evidence = warninglist_hits
            .iter()
            .take(5)
            .map(|h| format!("{} on: {}", h.value, h.warninglists.join(", ")))
            .collect();
        finding.recommendations = vec![
            "Review warninglist matches for false positive assessment".to_string(),
            "These IOCs may be benign (CDN IPs, common domains, etc.)".to_string(),
        ];
        finding.source = Some("misp".to_string());
        findings.push(finding);
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::test_support::test_config_with_clients;
    use crate::integrations::testing::ScriptedToolClient;
    use crate::integrations::ToolClients;
    use crate::llm::testing::ScriptedChatModel;
    use crate::types::{Alert, Investigation};

    #[test]
    fn test_finding_severities() {
        let matches = vec![MispMatch {
            value: "1.2.3.4".into(),
            observable_type: "ip".into(),
            event_ids: vec!["42".into()],
            to_ids: true,
            ..MispMatch::default()
        }];
        let actors = vec!["APT-Example".to_string()];
        let campaigns = vec!["Operation Example".to_string()];
        let hits = vec![WarninglistHit {
            value: "8.8.8.8".into(),
            observable_type: "ip".into(),
            warninglists: vec!["Google DNS".into()],
        }];

        let findings = generate_misp_findings(&matches, &actors, &campaigns, &hits);
        assert_eq!(findings.len(), 4);
        assert_eq!(findings[0].severity, Severity::High); // to_ids IOCs
        assert_eq!(findings[1].severity, Severity::High); // threat actor
        assert_eq!(findings[2].severity, Severity::High); // campaign
        assert_eq!(findings[3].severity, Severity::Low); // warninglist
    }

    #[test]
    fn test_plain_matches_are_medium() {
        let matches = vec![MispMatch {
            value: "1.2.3.4".into(),
            observable_type: "ip".into(),
            to_ids: false,
            ..MispMatch::default()
        }];
        let findings = generate_misp_findings(&matches, &[], &[], &[]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    fn state_with_ip() -> WorkflowState {
        let mut inv = Investigation::new();
        inv.add_alert(
            Alert::from_summary_block(
                "Alert ID: 1\nTime: x\nAgent: web-01\nLevel: 10\nDescription: beacon to 203.0.113.50",
            )
            .unwrap(),
        );
        WorkflowState::initial(inv)
    }

    #[tokio::test]
    async fn test_worker_aggregates_context() {
        let tip = Arc::new(
            ScriptedToolClient::new("misp")
                .respond(
                    "search_misp_ioc",
                    "Match found\nEvent ID: 42\nCategory: Network activity\nTo IDS: true\nTags: apt, c2",
                )
                .respond(
                    "get_misp_event_context",
                    "Info: C2 infrastructure\nThreat Level: High\nthreat-actor galaxy * APT-Example\ncampaign galaxy * Operation Example\nAttributes: 12",
                )
                .respond("check_misp_warninglist", "NOT on any warninglist"),
        );
        let cfg = test_config_with_clients(
            Arc::new(ScriptedChatModel::new(&["{}"])),
            ToolClients {
                threat_intel: Some(tip),
                ..ToolClients::default()
            },
        );

        let state = misp_worker_node(state_with_ip(), &cfg).await;
        let context = state.investigation.misp_context.unwrap();
        assert_eq!(context.matches.len(), 1);
        assert!(context.matches[0].to_ids);
        assert_eq!(context.threat_actors, vec!["APT-Example"]);
        assert_eq!(context.campaigns, vec!["Operation Example"]);
        assert!(context.checked_iocs.contains(&"203.0.113.50".to_string()));
        // High-severity findings derived from the to_ids match + attribution.
        assert!(state
            .investigation
            .findings
            .iter()
            .any(|f| f.description.contains("IDS detection")));
    }

    #[tokio::test]
    async fn test_worker_skips_already_checked() {
        let tip = Arc::new(
            ScriptedToolClient::new("misp").respond("search_misp_ioc", "No IOC found"),
        );
        let cfg = test_config_with_clients(
            Arc::new(ScriptedChatModel::new(&["{}"])),
            ToolClients {
                threat_intel: Some(tip.clone()),
                ..ToolClients::default()
            },
        );

        let mut state = state_with_ip();
        let mut context = MispContext::default();
        context.checked_iocs.push("203.0.113.50".to_string());
        state.investigation.misp_context = Some(context);

        let state = misp_worker_node(state, &cfg).await;
        assert!(tip.calls.lock().await.is_empty());
        assert_eq!(
            state.investigation.misp_context.unwrap().checked_iocs.len(),
            1
        );
    }
}
