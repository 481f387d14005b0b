//! SSE endpoint streaming live investigation events.

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tracing::info;

use crate::api::auth::RequireAuth;
use crate::api::event_bus::BroadcastEvent;
use crate::api::{ApiError, ApiState};
use crate::persistence::EventRecord;

/// Seconds of subscriber inactivity before a heartbeat ping.
const HEARTBEAT: Duration = Duration::from_secs(30);

/// Recent events replayed to a freshly connected client.
const BACKFILL_LIMIT: i64 = 20;

fn message_event(id: &str, event_type: &str, data: serde_json::Value) -> Event {
    let mut payload = json!({ "event_type": event_type });
    if let (serde_json::Value::Object(target), serde_json::Value::Object(extra)) =
        (&mut payload, data)
    {
        for (key, value) in extra {
            target.insert(key, value);
        }
    }
    Event::default()
        .event("message")
        .id(id)
        .data(payload.to_string())
}

fn ping_event() -> Event {
    Event::default()
        .event("ping")
        .data(r#"{"type": "ping"}"#)
}

/// GET /api/events/stream
pub async fn stream(
    State(state): State<ApiState>,
    RequireAuth(_user): RequireAuth,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (subscriber_id, receiver) = state.bus.subscribe().await;
    info!(subscriber_id = %subscriber_id, "SSE client connecting");

    // Initial ping plus a backfill of the last hour so the client has data
    // before the first live event.
    let mut initial = vec![Ok(Event::default()
        .event("ping")
        .id(format!("ping-{subscriber_id}"))
        .data(r#"{"type": "ping", "message": "connected"}"#))];

    let since = Utc::now() - ChronoDuration::hours(1);
    let recent: Vec<EventRecord> = sqlx::query_as(
        r#"SELECT id, aggregate_id, aggregate_type, event_type, version,
                  timestamp, data, metadata, idempotency_key
           FROM events WHERE timestamp > $1
           ORDER BY timestamp DESC LIMIT $2"#,
    )
    .bind(since)
    .bind(BACKFILL_LIMIT)
    .fetch_all(&state.pool)
    .await?;

    for record in recent.into_iter().rev() {
        let mut data = json!({
            "id": record.id.to_string(),
            "aggregate_id": record.aggregate_id.to_string(),
            "timestamp": record.timestamp.to_rfc3339(),
        });
        if let (serde_json::Value::Object(target), serde_json::Value::Object(extra)) =
            (&mut data, record.data)
        {
            for (key, value) in extra {
                target.entry(key).or_insert(value);
            }
        }
        initial.push(Ok(message_event(
            &record.id.to_string(),
            &record.event_type,
            data,
        )));
    }

    let live = futures::stream::unfold(receiver, |mut receiver| async move {
        match tokio::time::timeout(HEARTBEAT, receiver.recv()).await {
            Ok(Some(BroadcastEvent {
                id,
                event_type,
                data,
                ..
            })) => Some((
                Ok::<_, Infallible>(message_event(&id, &event_type, data)),
                receiver,
            )),
            // Bus gone; end the stream.
            Ok(None) => None,
            // Idle: keep the connection alive.
            Err(_) => Some((Ok(ping_event()), receiver)),
        }
    });

    let stream = futures::stream::iter(initial).chain(live);
    Ok(Sse::new(stream))
}

/// GET /api/events/health
pub async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "subscriber_count": state.bus.subscriber_count().await,
    }))
}
