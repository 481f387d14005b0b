//! Database tailer: bridges the event store to the SSE bus.
//!
//! The orchestrator appends events inside its own transactions; this task
//! polls the events table and republishes anything new onto the in-process
//! bus for SSE subscribers.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::persistence::{store, EventRecord};

use super::event_bus::{BroadcastEvent, EventBus};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);
const BATCH_LIMIT: i64 = 100;
const SEEN_CAPACITY: usize = 1000;
const SEEN_TRIM_TO: usize = 500;

/// Flatten an event row into the broadcast payload the dashboard expects.
fn broadcast_payload(event: &EventRecord) -> Value {
    let mut payload = serde_json::Map::new();
    payload.insert("id".to_string(), Value::String(event.id.to_string()));
    payload.insert(
        "aggregate_id".to_string(),
        Value::String(event.aggregate_id.to_string()),
    );
    payload.insert(
        "timestamp".to_string(),
        Value::String(event.timestamp.to_rfc3339()),
    );
    if let Value::Object(data) = &event.data {
        for (key, value) in data {
            payload.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Value::Object(payload)
}

/// Run the tailer until cancellation.
///
/// Starts from the latest stored event (old events are not re-broadcast).
/// Each tick re-reads from one second before the last seen timestamp to
/// catch same-timestamp stragglers, deduplicating through a bounded
/// recently-seen set.
pub async fn run_event_tailer(pool: PgPool, bus: Arc<EventBus>, cancel: CancellationToken) {
    info!("Event tailer started");

    let mut last_timestamp: Option<DateTime<Utc>> = None;
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_order: VecDeque<String> = VecDeque::new();

    // Record the current head so only new events are broadcast.
    match latest_event(&pool).await {
        Ok(Some(event)) => {
            seen_ids.insert(event.id.to_string());
            seen_order.push_back(event.id.to_string());
            last_timestamp = Some(event.timestamp);
            info!(last_timestamp = %event.timestamp, "Event tailer initialized");
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Event tailer init failed"),
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let since = last_timestamp
            .map(|ts| ts - ChronoDuration::seconds(1))
            .unwrap_or_else(|| Utc::now() - ChronoDuration::minutes(1));

        let events = {
            let mut conn = match pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Event tailer poll failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            };
            match store::get_events_since(&mut conn, since, BATCH_LIMIT).await {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Event tailer poll failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            }
        };

        let mut broadcast_count = 0usize;
        for event in events {
            let event_id = event.id.to_string();
            if seen_ids.contains(&event_id) {
                continue;
            }

            bus.publish(BroadcastEvent {
                id: event_id.clone(),
                event_type: event.event_type.clone(),
                data: broadcast_payload(&event),
                timestamp: event.timestamp,
            })
            .await;

            seen_ids.insert(event_id.clone());
            seen_order.push_back(event_id);
            last_timestamp = Some(event.timestamp);
            broadcast_count += 1;
        }

        // Bound the dedup set.
        if seen_order.len() > SEEN_CAPACITY {
            while seen_order.len() > SEEN_TRIM_TO {
                if let Some(evicted) = seen_order.pop_front() {
                    seen_ids.remove(&evicted);
                }
            }
        }

        if broadcast_count > 0 {
            debug!(count = broadcast_count, "Events broadcast to SSE bus");
        }
    }

    info!("Event tailer stopped");
}

async fn latest_event(pool: &PgPool) -> Result<Option<EventRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, aggregate_id, aggregate_type, event_type, version,
                  timestamp, data, metadata, idempotency_key
           FROM events ORDER BY timestamp DESC LIMIT 1"#,
    )
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_broadcast_payload_flattens_data() {
        let event = EventRecord {
            id: Uuid::new_v4(),
            aggregate_id: Uuid::new_v4(),
            aggregate_type: "Investigation".to_string(),
            event_type: "alert.correlated".to_string(),
            version: 3,
            timestamp: Utc::now(),
            data: serde_json::json!({ "severity": "high", "alert_id": "a-1" }),
            metadata: serde_json::json!({}),
            idempotency_key: None,
        };
        let payload = broadcast_payload(&event);
        assert_eq!(payload["severity"], "high");
        assert_eq!(payload["alert_id"], "a-1");
        assert_eq!(payload["id"], event.id.to_string());
        assert_eq!(payload["aggregate_id"], event.aggregate_id.to_string());
    }

    #[test]
    fn test_broadcast_payload_keeps_envelope_fields() {
        // A data key colliding with the envelope must not clobber it.
        let id = Uuid::new_v4();
        let event = EventRecord {
            id,
            aggregate_id: Uuid::new_v4(),
            aggregate_type: "Investigation".to_string(),
            event_type: "x".to_string(),
            version: 1,
            timestamp: Utc::now(),
            data: serde_json::json!({ "id": "fake" }),
            metadata: serde_json::json!({}),
            idempotency_key: None,
        };
        let payload = broadcast_payload(&event);
        assert_eq!(payload["id"], id.to_string());
    }
}
