//! Cortex worker: threat-intelligence enrichment of observables.

use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::graph::engine::RunConfig;
use crate::types::{Enrichment, EnrichmentVerdict, Observable, ObservableType, Phase, WorkflowState};

/// Observables handled per pass.
const ENRICHMENT_BATCH: usize = 10;

/// Analyzer tool for an observable type: `(tool, analyzer name)`. URL gets a
/// secondary scanner as well.
pub fn analyzer_for(observable_type: ObservableType) -> Option<(&'static str, &'static str)> {
    match observable_type {
        ObservableType::Ip => Some(("analyze_ip_with_abuseipdb", "AbuseIPDB")),
        ObservableType::Url => Some(("scan_url_with_virustotal", "VirusTotal")),
        ObservableType::HashMd5 | ObservableType::HashSha1 | ObservableType::HashSha256 => {
            Some(("scan_hash_with_virustotal", "VirusTotal"))
        }
        ObservableType::Domain | ObservableType::Email | ObservableType::Fqdn => {
            Some(("analyze_with_abusefinder", "AbuseFinder"))
        }
        _ => None,
    }
}

/// Secondary analyzer, run in addition to the primary where one exists.
pub fn secondary_analyzer_for(
    observable_type: ObservableType,
) -> Option<(&'static str, &'static str)> {
    match observable_type {
        ObservableType::Url => Some(("analyze_url_with_urlscan_io", "Urlscan.io")),
        _ => None,
    }
}

fn tool_args(tool: &str, observable: &Observable) -> Value {
    // 15 retries (~60 seconds) gives slow analyzers time to finish.
    match tool {
        "analyze_ip_with_abuseipdb" => json!({ "ip": observable.value, "max_retries": 15 }),
        "scan_url_with_virustotal" | "analyze_url_with_urlscan_io" => {
            json!({ "url": observable.value, "max_retries": 15 })
        }
        "scan_hash_with_virustotal" => json!({ "hash": observable.value, "max_retries": 15 }),
        "analyze_with_abusefinder" => {
            let data_type = match observable.observable_type {
                ObservableType::Email => "mail",
                ObservableType::Fqdn => "fqdn",
                ObservableType::Ip => "ip",
                ObservableType::Url => "url",
                _ => "domain",
            };
            json!({ "data": observable.value, "data_type": data_type, "max_retries": 15 })
        }
        _ => json!({ "data": observable.value, "max_retries": 15 }),
    }
}

/// Cortex worker node. Pops up to [`ENRICHMENT_BATCH`] pending observables,
/// runs the mapped analyzer for each, and records results. Analyzer failures
/// become `unknown` enrichments; they never fail the workflow.
pub async fn cortex_worker_node(mut state: WorkflowState, cfg: &RunConfig) -> WorkflowState {
    info!("Cortex worker started");

    let Some(client) = cfg.clients.analyzers.clone() else {
        info!("Analyzer integration disabled, skipping enrichment");
        state.current_phase = Phase::Analysis;
        state.pending_observables.clear();
        state.touch();
        return state;
    };

    let batch: Vec<Observable> = state
        .pending_observables
        .iter()
        .take(ENRICHMENT_BATCH)
        .cloned()
        .collect();

    if batch.is_empty() {
        info!("No observables to enrich");
        state.current_phase = Phase::Analysis;
        state.touch();
        return state;
    }

    let investigation_id = state.investigation.id;
    let mut processed: HashSet<String> = HashSet::new();

    for observable in batch {
        if processed.contains(&observable.value) {
            continue;
        }

        let Some((tool, analyzer)) = analyzer_for(observable.observable_type) else {
            state.investigation.add_enrichment(Enrichment::Result {
                observable_value: observable.value.clone(),
                observable_type: observable.observable_type,
                analyzer: "none".to_string(),
                verdict: EnrichmentVerdict::Unknown,
                confidence: 0.0,
                details: json!({
                    "note": format!("No analyzer available for type {}", observable.observable_type)
                }),
                enriched_at: Utc::now(),
            });
            processed.insert(observable.value.clone());
            continue;
        };

        let value_preview: String = observable.value.chars().take(50).collect();
        info!(
            observable_type = %observable.observable_type,
            value = %value_preview,
            analyzer = analyzer,
            "Enriching observable"
        );

        if let Some(emitter) = &cfg.emitter {
            if let Err(e) = emitter
                .emit_enrichment_requested(
                    investigation_id,
                    observable.observable_type.as_str(),
                    &observable.value,
                    analyzer,
                )
                .await
            {
                warn!(error = %e, "Event emission failed");
            }
            if let Err(e) = emitter
                .emit_analyzer_invoked(investigation_id, analyzer, &observable.value)
                .await
            {
                warn!(error = %e, "Event emission failed");
            }
        }

        let started = std::time::Instant::now();
        match client.call_tool(tool, tool_args(tool, &observable)).await {
            Ok(response) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                let (verdict, confidence, details) = parse_enrichment_result(&response, tool);

                if let Some(emitter) = &cfg.emitter {
                    if let Err(e) = emitter
                        .emit_enrichment_completed(
                            investigation_id,
                            observable.observable_type.as_str(),
                            &observable.value,
                            analyzer,
                            verdict.as_str(),
                            Some(confidence),
                            elapsed_ms,
                        )
                        .await
                    {
                        warn!(error = %e, "Event emission failed");
                    }
                    if let Err(e) = emitter
                        .emit_analyzer_completed(investigation_id, analyzer, true, elapsed_ms)
                        .await
                    {
                        warn!(error = %e, "Event emission failed");
                    }
                }

                state.investigation.add_enrichment(Enrichment::Result {
                    observable_value: observable.value.clone(),
                    observable_type: observable.observable_type,
                    analyzer: analyzer.to_string(),
                    verdict,
                    confidence,
                    details,
                    enriched_at: Utc::now(),
                });
            }
            Err(e) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                warn!(
                    observable = %value_preview,
                    error = %e,
                    "Enrichment failed"
                );

                if let Some(emitter) = &cfg.emitter {
                    let error_preview: String = e.to_string().chars().take(500).collect();
                    if let Err(emit_err) = emitter
                        .emit_enrichment_failed(
                            investigation_id,
                            observable.observable_type.as_str(),
                            &observable.value,
                            analyzer,
                            &error_preview,
                        )
                        .await
                    {
                        warn!(error = %emit_err, "Event emission failed");
                    }
                    if let Err(emit_err) = emitter
                        .emit_analyzer_completed(investigation_id, analyzer, false, elapsed_ms)
                        .await
                    {
                        warn!(error = %emit_err, "Event emission failed");
                    }
                }

                state.investigation.add_enrichment(Enrichment::Failed {
                    observable_value: observable.value.clone(),
                    observable_type: observable.observable_type,
                    analyzer: analyzer.to_string(),
                    error: e.to_string(),
                    enriched_at: Utc::now(),
                });
            }
        }

        processed.insert(observable.value.clone());
    }

    state
        .pending_observables
        .retain(|o| !processed.contains(&o.value));

    if state.pending_observables.is_empty() {
        state.current_phase = Phase::Analysis;
    }

    info!(
        enriched = processed.len(),
        remaining = state.pending_observables.len(),
        "Cortex worker completed"
    );
    state.touch();
    state
}

fn ratio_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)/(\d+)").unwrap())
}

fn abuse_score_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"abuse confidence score[:\s]*(\d+)").unwrap())
}

/// Parse a textual analyzer response into `(verdict, confidence, details)`
/// using analyzer-specific rules:
///
/// - AbuseIPDB: score >= 80 malicious, 30-79 suspicious, else benign.
/// - VirusTotal: detection ratio >= 0.3 malicious, >= 0.1 suspicious.
/// - Urlscan.io / AbuseFinder: keyword rules.
/// - Anything else falls through to generic keyword matching.
pub fn parse_enrichment_result(result: &str, tool: &str) -> (EnrichmentVerdict, f64, Value) {
    let preview: String = result.chars().take(1000).collect();
    let mut details = json!({ "raw_result": preview });
    if result.trim_start().starts_with('{') {
        if let Ok(parsed) = serde_json::from_str::<Value>(result) {
            details = parsed;
        }
    }

    let lower = result.to_lowercase();
    let mut verdict = EnrichmentVerdict::Unknown;
    let mut confidence = 0.5;

    if tool == "analyze_ip_with_abuseipdb" {
        if let Some(caps) = abuse_score_regex().captures(&lower) {
            if let Ok(score) = caps[1].parse::<u32>() {
                if score >= 80 {
                    verdict = EnrichmentVerdict::Malicious;
                    confidence = f64::from(score) / 100.0;
                } else if score >= 30 {
                    verdict = EnrichmentVerdict::Suspicious;
                    confidence = f64::from(score) / 100.0;
                } else {
                    verdict = EnrichmentVerdict::Benign;
                    confidence = 1.0 - f64::from(score) / 100.0;
                }
            }
        }
    } else if tool.contains("virustotal") {
        if lower.contains("malicious") {
            if let Some(caps) = ratio_regex().captures(&lower) {
                let detections: f64 = caps[1].parse().unwrap_or(0.0);
                let total: f64 = caps[2].parse().unwrap_or(0.0);
                if total > 0.0 {
                    let ratio = detections / total;
                    if ratio >= 0.3 {
                        verdict = EnrichmentVerdict::Malicious;
                        confidence = (0.5 + ratio).min(0.95);
                    } else if ratio >= 0.1 {
                        verdict = EnrichmentVerdict::Suspicious;
                        confidence = 0.5 + ratio;
                    } else {
                        verdict = EnrichmentVerdict::Benign;
                        confidence = 1.0 - ratio;
                    }
                }
            } else {
                // "malicious" without a ratio is only a weak signal.
                verdict = EnrichmentVerdict::Suspicious;
                confidence = 0.6;
            }
        } else if lower.contains("clean") || lower.contains("harmless") {
            verdict = EnrichmentVerdict::Benign;
            confidence = 0.8;
        }
    } else if tool.contains("urlscan") {
        if lower.contains("malicious") || lower.contains("phishing") {
            verdict = EnrichmentVerdict::Malicious;
            confidence = 0.8;
        } else if lower.contains("suspicious") {
            verdict = EnrichmentVerdict::Suspicious;
            confidence = 0.6;
        } else if lower.contains("safe") || lower.contains("benign") {
            verdict = EnrichmentVerdict::Benign;
            confidence = 0.7;
        }
    } else if tool.contains("abusefinder") {
        if lower.contains("abuse") && lower.contains("found") {
            verdict = EnrichmentVerdict::Suspicious;
            confidence = 0.6;
        } else if lower.contains("no abuse") {
            verdict = EnrichmentVerdict::Benign;
            confidence = 0.7;
        }
    }

    if verdict == EnrichmentVerdict::Unknown {
        if ["malware", "threat", "attack", "dangerous"]
            .iter()
            .any(|w| lower.contains(w))
        {
            verdict = EnrichmentVerdict::Malicious;
            confidence = 0.7;
        } else if ["suspicious", "potentially", "risky"]
            .iter()
            .any(|w| lower.contains(w))
        {
            verdict = EnrichmentVerdict::Suspicious;
            confidence = 0.5;
        } else if ["clean", "safe", "benign", "legitimate"]
            .iter()
            .any(|w| lower.contains(w))
        {
            verdict = EnrichmentVerdict::Benign;
            confidence = 0.6;
        }
    }

    (verdict, confidence, details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::test_support::{test_config, test_config_with_clients};
    use crate::integrations::testing::ScriptedToolClient;
    use crate::integrations::ToolClients;
    use crate::llm::testing::ScriptedChatModel;
    use crate::types::{Alert, Investigation};
    use std::sync::Arc;

    #[test]
    fn test_abuseipdb_thresholds() {
        let (v, c, _) =
            parse_enrichment_result("Abuse Confidence Score: 95", "analyze_ip_with_abuseipdb");
        assert_eq!(v, EnrichmentVerdict::Malicious);
        assert!((c - 0.95).abs() < 1e-9);

        let (v, _, _) =
            parse_enrichment_result("Abuse Confidence Score: 45", "analyze_ip_with_abuseipdb");
        assert_eq!(v, EnrichmentVerdict::Suspicious);

        let (v, c, _) =
            parse_enrichment_result("Abuse Confidence Score: 5", "analyze_ip_with_abuseipdb");
        assert_eq!(v, EnrichmentVerdict::Benign);
        assert!((c - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_virustotal_detection_ratio() {
        let (v, c, _) = parse_enrichment_result(
            "Malicious detections: 45/60 engines flagged this hash",
            "scan_hash_with_virustotal",
        );
        assert_eq!(v, EnrichmentVerdict::Malicious);
        assert!((c - 0.95).abs() < 1e-9);

        let (v, _, _) = parse_enrichment_result(
            "malicious: 9/60 engines",
            "scan_hash_with_virustotal",
        );
        assert_eq!(v, EnrichmentVerdict::Suspicious);

        let (v, _, _) = parse_enrichment_result(
            "malicious: 1/70 engines",
            "scan_hash_with_virustotal",
        );
        assert_eq!(v, EnrichmentVerdict::Benign);

        let (v, _, _) = parse_enrichment_result("This file is clean", "scan_hash_with_virustotal");
        assert_eq!(v, EnrichmentVerdict::Benign);
    }

    #[test]
    fn test_urlscan_and_abusefinder_keywords() {
        let (v, _, _) =
            parse_enrichment_result("Verdict: phishing page", "analyze_url_with_urlscan_io");
        assert_eq!(v, EnrichmentVerdict::Malicious);

        let (v, _, _) =
            parse_enrichment_result("No abuse contacts found issues", "analyze_with_abusefinder");
        assert_eq!(v, EnrichmentVerdict::Suspicious);
    }

    #[test]
    fn test_generic_fallback() {
        let (v, _, _) = parse_enrichment_result("known malware distribution host", "other_tool");
        assert_eq!(v, EnrichmentVerdict::Malicious);

        let (v, _, _) = parse_enrichment_result("nothing of note", "other_tool");
        assert_eq!(v, EnrichmentVerdict::Unknown);
    }

    #[test]
    fn test_analyzer_mapping() {
        assert_eq!(
            analyzer_for(ObservableType::Ip),
            Some(("analyze_ip_with_abuseipdb", "AbuseIPDB"))
        );
        assert_eq!(
            analyzer_for(ObservableType::HashMd5),
            Some(("scan_hash_with_virustotal", "VirusTotal"))
        );
        assert_eq!(
            analyzer_for(ObservableType::Domain),
            Some(("analyze_with_abusefinder", "AbuseFinder"))
        );
        assert_eq!(analyzer_for(ObservableType::Process), None);
        assert_eq!(
            secondary_analyzer_for(ObservableType::Url),
            Some(("analyze_url_with_urlscan_io", "Urlscan.io"))
        );
    }

    fn state_with_ip() -> WorkflowState {
        let mut inv = Investigation::new();
        inv.add_alert(
            Alert::from_summary_block(
                "Alert ID: 1\nTime: x\nAgent: web-01\nLevel: 4\nDescription: dns query to 8.8.8.8",
            )
            .unwrap(),
        );
        WorkflowState::initial(inv)
    }

    #[tokio::test]
    async fn test_worker_enriches_and_clears_pending() {
        let analyzers = Arc::new(
            ScriptedToolClient::new("cortex")
                .respond("analyze_ip_with_abuseipdb", "Abuse Confidence Score: 2"),
        );
        let cfg = test_config_with_clients(
            Arc::new(ScriptedChatModel::new(&["{}"])),
            ToolClients {
                analyzers: Some(analyzers),
                ..ToolClients::default()
            },
        );

        let state = cortex_worker_node(state_with_ip(), &cfg).await;
        assert!(state.pending_observables.is_empty());
        assert_eq!(state.investigation.enrichments.len(), 1);
        assert_eq!(
            state.investigation.enrichments[0].verdict(),
            EnrichmentVerdict::Benign
        );
        assert_eq!(state.current_phase, Phase::Analysis);
    }

    #[tokio::test]
    async fn test_worker_records_failure_as_unknown() {
        // No scripted response, so the tool call errors out.
        let analyzers = Arc::new(ScriptedToolClient::new("cortex"));
        let cfg = test_config_with_clients(
            Arc::new(ScriptedChatModel::new(&["{}"])),
            ToolClients {
                analyzers: Some(analyzers),
                ..ToolClients::default()
            },
        );

        let state = cortex_worker_node(state_with_ip(), &cfg).await;
        assert_eq!(state.investigation.enrichments.len(), 1);
        assert_eq!(
            state.investigation.enrichments[0].verdict(),
            EnrichmentVerdict::Unknown
        );
        // The workflow keeps going: pending drained, no hard failure.
        assert!(state.pending_observables.is_empty());
    }

    #[tokio::test]
    async fn test_worker_skips_when_integration_disabled() {
        let cfg = test_config(Arc::new(ScriptedChatModel::new(&["{}"])));
        let state = cortex_worker_node(state_with_ip(), &cfg).await;
        assert!(state.investigation.enrichments.is_empty());
        assert_eq!(state.current_phase, Phase::Analysis);
    }
}
