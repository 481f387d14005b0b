//! Alert poller: buffered, deduplicating, severity-sorted fetcher over the
//! SIEM interface.

use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::PollingConfig;
use crate::integrations::ToolClient;
use crate::types::Alert;

/// Bounded seen-ID cache with FIFO eviction. Only the poller owns it.
struct SeenCache {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenCache {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Insert an ID; returns false when it was already present.
    fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Polls the SIEM for new alerts with buffered batch dispensing.
///
/// Fetches up to `max_alerts_per_poll` at a time, filters already-seen IDs,
/// sorts new alerts by severity (critical first, stable), and returns them
/// in `batch_size` chunks. The SIEM is only queried when the buffer runs
/// dry.
pub struct AlertPoller {
    siem: Arc<dyn ToolClient>,
    config: PollingConfig,
    buffer: VecDeque<Alert>,
    seen: SeenCache,
    poll_count: u64,
    fetch_count: u64,
}

impl AlertPoller {
    pub fn new(siem: Arc<dyn ToolClient>, config: PollingConfig) -> Self {
        let capacity = config.seen_cache_capacity;
        Self {
            siem,
            config,
            buffer: VecDeque::new(),
            seen: SeenCache::new(capacity),
            poll_count: 0,
            fetch_count: 0,
        }
    }

    /// Next batch of alerts to process (up to `batch_size`), fetching from
    /// the SIEM when the buffer is empty.
    pub async fn poll(&mut self) -> Vec<Alert> {
        self.poll_count += 1;

        if self.buffer.is_empty() {
            self.fetch_alerts().await;
        }

        let mut batch = Vec::new();
        while batch.len() < self.config.batch_size {
            match self.buffer.pop_front() {
                Some(alert) => batch.push(alert),
                None => break,
            }
        }

        info!(
            batch_size = batch.len(),
            remaining_in_buffer = self.buffer.len(),
            poll_count = self.poll_count,
            "Alert batch returned"
        );
        batch
    }

    async fn fetch_alerts(&mut self) {
        self.fetch_count += 1;
        info!(
            fetch_count = self.fetch_count,
            max_alerts = self.config.max_alerts_per_poll,
            "Fetching alerts from SIEM"
        );

        let response = self
            .siem
            .call_tool(
                "get_siem_alert_summary",
                json!({ "limit": self.config.max_alerts_per_poll }),
            )
            .await;

        let all_alerts = match response {
            Ok(text) => Alert::parse_summary(&text),
            Err(e) => {
                error!(error = %e, "Alert fetch failed");
                return;
            }
        };
        let total = all_alerts.len();

        let mut new_alerts: Vec<Alert> = all_alerts
            .into_iter()
            .filter(|a| self.seen.insert(&a.id))
            .collect();

        // Stable sort: critical first, ties keep fetch order.
        new_alerts.sort_by_key(|a| a.severity.priority());

        let added = new_alerts.len();
        self.buffer.extend(new_alerts);

        info!(
            total_from_siem = total,
            new_alerts = added,
            buffer_size = self.buffer.len(),
            seen_cache_size = self.seen.len(),
            "Alerts fetched"
        );
    }

    pub fn has_pending_alerts(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn mark_as_seen(&mut self, alert_id: &str) {
        self.seen.insert(alert_id);
    }

    pub fn is_seen(&self, alert_id: &str) -> bool {
        self.seen.contains(alert_id)
    }

    /// Continuous polling loop. Calls `on_batch` with each non-empty batch
    /// and sleeps `interval` only once the buffer has drained. Fetch errors
    /// are logged and retried on the next tick.
    pub async fn run_continuous<F, Fut>(&mut self, cancel: CancellationToken, mut on_batch: F)
    where
        F: FnMut(Vec<Alert>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_alerts = self.config.max_alerts_per_poll,
            batch_size = self.config.batch_size,
            "Starting continuous alert polling"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let alerts = self.poll().await;
            if !alerts.is_empty() {
                on_batch(alerts).await;
            }

            if self.buffer.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            }
        }

        info!("Alert polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::testing::ScriptedToolClient;

    fn summary(entries: &[(&str, u8)]) -> String {
        entries
            .iter()
            .map(|(id, level)| {
                format!(
                    "Alert ID: {id}\nTime: 2026-01-15T10:00:00Z\nAgent: web-01\nLevel: {level}\nDescription: alert {id}\n"
                )
            })
            .collect()
    }

    fn poller_with(response: &str, batch_size: usize) -> AlertPoller {
        let siem = Arc::new(
            ScriptedToolClient::new("siem").respond("get_siem_alert_summary", response),
        );
        let config = PollingConfig {
            batch_size,
            ..PollingConfig::default()
        };
        AlertPoller::new(siem, config)
    }

    #[tokio::test]
    async fn test_poll_returns_severity_sorted_batch() {
        let text = summary(&[("low-1", 2), ("crit-1", 13), ("med-1", 5)]);
        let mut poller = poller_with(&text, 10);

        let batch = poller.poll().await;
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].id, "crit-1");
        assert_eq!(batch[1].id, "med-1");
        assert_eq!(batch[2].id, "low-1");
    }

    #[tokio::test]
    async fn test_poll_dispenses_in_batches() {
        let text = summary(&[("a", 5), ("b", 5), ("c", 5)]);
        let mut poller = poller_with(&text, 2);

        let first = poller.poll().await;
        assert_eq!(first.len(), 2);
        assert!(poller.has_pending_alerts());

        let second = poller.poll().await;
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_across_fetches() {
        let text = summary(&[("a", 5), ("b", 5)]);
        let mut poller = poller_with(&text, 10);

        let first = poller.poll().await;
        assert_eq!(first.len(), 2);

        // Same alerts come back from the SIEM; none should surface again.
        let second = poller.poll().await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_error_returns_empty_batch() {
        let siem = Arc::new(ScriptedToolClient::new("siem"));
        let mut poller = AlertPoller::new(siem, PollingConfig::default());
        let batch = poller.poll().await;
        assert!(batch.is_empty());
    }

    #[test]
    fn test_seen_cache_eviction() {
        let mut cache = SeenCache::new(2);
        assert!(cache.insert("a"));
        assert!(cache.insert("b"));
        assert!(cache.insert("c"));
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(!cache.insert("b"));
    }
}
