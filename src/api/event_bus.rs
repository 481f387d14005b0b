//! In-process fan-out bus for SSE broadcasting.
//!
//! One producer (the database tailer) and one bounded channel per
//! subscriber. Publishing never blocks: a full queue drops the event with a
//! warning, and closed queues are pruned as they are discovered.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An event to broadcast to SSE clients.
#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    pub id: String,
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

pub struct EventBus {
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<BroadcastEvent>>>,
    queue_capacity: usize,
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// Publish to all subscribers without blocking. Full queues drop the
    /// event; disconnected subscribers are removed.
    pub async fn publish(&self, event: BroadcastEvent) {
        let mut subscribers = self.subscribers.lock().await;
        let mut disconnected = Vec::new();

        for (subscriber_id, sender) in subscribers.iter() {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscriber_id = %subscriber_id,
                        event_type = %event.event_type,
                        "Subscriber queue full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    disconnected.push(*subscriber_id);
                }
            }
        }

        for subscriber_id in disconnected {
            subscribers.remove(&subscriber_id);
            info!(subscriber_id = %subscriber_id, "Subscriber disconnected");
        }

        debug!(
            event_type = %event.event_type,
            subscriber_count = subscribers.len(),
            "Event published"
        );
    }

    /// Register a new subscriber with its own bounded queue.
    pub async fn subscribe(&self) -> (Uuid, mpsc::Receiver<BroadcastEvent>) {
        let subscriber_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        self.subscribers.lock().await.insert(subscriber_id, sender);
        info!(subscriber_id = %subscriber_id, "Subscriber connected");
        (subscriber_id, receiver)
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u32) -> BroadcastEvent {
        BroadcastEvent {
            id: n.to_string(),
            event_type: "investigation.created".to_string(),
            data: serde_json::json!({ "n": n }),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber_in_order() {
        let bus = EventBus::new(10);
        let (_, mut rx) = bus.subscribe().await;

        for n in 0..3 {
            bus.publish(event(n)).await;
        }
        for n in 0..3 {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.id, n.to_string());
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_events() {
        let bus = EventBus::new(2);
        let (_, mut rx) = bus.subscribe().await;

        for n in 0..5 {
            bus.publish(event(n)).await;
        }
        // Only the first two fit; the rest were dropped, not queued.
        assert_eq!(rx.recv().await.unwrap().id, "0");
        assert_eq!(rx.recv().await.unwrap().id, "1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let bus = EventBus::new(2);
        let (_, rx) = bus.subscribe().await;
        assert_eq!(bus.subscriber_count().await, 1);

        drop(rx);
        bus.publish(event(0)).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_affect_others() {
        let bus = EventBus::new(1);
        let (_, mut fast_rx) = bus.subscribe().await;
        let (_, _slow_rx) = bus.subscribe().await;

        bus.publish(event(0)).await;
        assert_eq!(fast_rx.recv().await.unwrap().id, "0");

        // The slow subscriber's queue is now full; the fast one still
        // receives the next event.
        bus.publish(event(1)).await;
        assert_eq!(fast_rx.recv().await.unwrap().id, "1");
    }
}
