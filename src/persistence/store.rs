//! Append-only event store with optimistic concurrency and idempotency.
//!
//! Every mutating function takes `&mut PgConnection` so the caller decides
//! the transaction boundary; appends and their projections always commit (or
//! roll back) together.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use super::events::EventType;
use super::read_models::EventRecord;

pub const DEFAULT_AGGREGATE_TYPE: &str = "Investigation";

/// Errors surfaced by the append path. Callers retry on `Concurrency` and
/// treat `Idempotency` as success-with-existing-row.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("concurrency conflict for aggregate {aggregate_id}: expected version {expected}, actual version {actual}")]
    Concurrency {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },
    #[error("event with idempotency key '{key}' already exists")]
    Idempotency { key: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Optional append parameters.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    pub aggregate_type: Option<String>,
    pub metadata: Option<Value>,
    pub expected_version: Option<i64>,
    pub idempotency_key: Option<String>,
}

/// Append one event, assigning the next contiguous version.
///
/// With an `idempotency_key` that is already stored, returns the existing
/// event unchanged. A unique-constraint race on the version maps to
/// `StoreError::Concurrency`; one on the idempotency key maps to
/// `StoreError::Idempotency` (only reachable when two writers race the
/// pre-insert lookup).
pub async fn append(
    conn: &mut PgConnection,
    aggregate_id: Uuid,
    event_type: EventType,
    data: Value,
    options: AppendOptions,
) -> Result<EventRecord, StoreError> {
    let current_version = get_latest_version(conn, aggregate_id).await?;

    if let Some(expected) = options.expected_version {
        if current_version != expected {
            return Err(StoreError::Concurrency {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }
    }

    if let Some(key) = options.idempotency_key.as_deref() {
        if let Some(existing) = get_by_idempotency_key(conn, key).await? {
            info!(
                idempotency_key = key,
                event_id = %existing.id,
                "Idempotent event already exists"
            );
            return Ok(existing);
        }
    }

    let new_version = current_version + 1;
    let aggregate_type = options
        .aggregate_type
        .unwrap_or_else(|| DEFAULT_AGGREGATE_TYPE.to_string());

    let inserted: Result<EventRecord, sqlx::Error> = sqlx::query_as(
        r#"INSERT INTO events
           (id, aggregate_id, aggregate_type, event_type, version, timestamp,
            data, metadata, idempotency_key)
           VALUES ($1, $2, $3, $4, $5, NOW(), $6, $7, $8)
           RETURNING id, aggregate_id, aggregate_type, event_type, version,
                     timestamp, data, metadata, idempotency_key"#,
    )
    .bind(Uuid::new_v4())
    .bind(aggregate_id)
    .bind(&aggregate_type)
    .bind(event_type.as_str())
    .bind(new_version)
    .bind(&data)
    .bind(options.metadata.unwrap_or_else(|| Value::Object(Default::default())))
    .bind(options.idempotency_key.as_deref())
    .fetch_one(&mut *conn)
    .await;

    match inserted {
        Ok(event) => {
            info!(
                event_id = %event.id,
                aggregate_id = %aggregate_id,
                event_type = %event_type,
                version = new_version,
                "Event appended"
            );
            Ok(event)
        }
        Err(e) => {
            if let Some(db_err) = e.as_database_error() {
                match db_err.constraint() {
                    Some("uq_aggregate_version") => {
                        let actual = get_latest_version(conn, aggregate_id).await?;
                        return Err(StoreError::Concurrency {
                            aggregate_id,
                            expected: new_version - 1,
                            actual,
                        });
                    }
                    Some("ix_events_idempotency_key") => {
                        if let Some(key) = options.idempotency_key {
                            return Err(StoreError::Idempotency { key });
                        }
                    }
                    _ => {}
                }
            }
            Err(StoreError::Database(e))
        }
    }
}

/// Append several events atomically with contiguous versions.
pub async fn append_batch(
    conn: &mut PgConnection,
    aggregate_id: Uuid,
    events: Vec<(EventType, Value, Option<Value>)>,
    aggregate_type: Option<&str>,
    expected_version: Option<i64>,
) -> Result<Vec<EventRecord>, StoreError> {
    let current_version = get_latest_version(conn, aggregate_id).await?;

    if let Some(expected) = expected_version {
        if current_version != expected {
            return Err(StoreError::Concurrency {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }
    }

    let aggregate_type = aggregate_type.unwrap_or(DEFAULT_AGGREGATE_TYPE);
    let mut created = Vec::with_capacity(events.len());

    for (i, (event_type, data, metadata)) in events.into_iter().enumerate() {
        let version = current_version + i as i64 + 1;
        let event: EventRecord = sqlx::query_as(
            r#"INSERT INTO events
               (id, aggregate_id, aggregate_type, event_type, version, timestamp,
                data, metadata, idempotency_key)
               VALUES ($1, $2, $3, $4, $5, NOW(), $6, $7, NULL)
               RETURNING id, aggregate_id, aggregate_type, event_type, version,
                         timestamp, data, metadata, idempotency_key"#,
        )
        .bind(Uuid::new_v4())
        .bind(aggregate_id)
        .bind(aggregate_type)
        .bind(event_type.as_str())
        .bind(version)
        .bind(&data)
        .bind(metadata.unwrap_or_else(|| Value::Object(Default::default())))
        .fetch_one(&mut *conn)
        .await?;
        created.push(event);
    }

    Ok(created)
}

/// Events for one aggregate ordered by version ascending.
pub async fn get_events(
    conn: &mut PgConnection,
    aggregate_id: Uuid,
    from_version: Option<i64>,
    to_version: Option<i64>,
) -> Result<Vec<EventRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, aggregate_id, aggregate_type, event_type, version,
                  timestamp, data, metadata, idempotency_key
           FROM events
           WHERE aggregate_id = $1
             AND version >= COALESCE($2, 1)
             AND ($3::BIGINT IS NULL OR version <= $3)
           ORDER BY version"#,
    )
    .bind(aggregate_id)
    .bind(from_version)
    .bind(to_version)
    .fetch_all(conn)
    .await
}

/// Events of one type across aggregates, newest first.
pub async fn get_events_by_type(
    conn: &mut PgConnection,
    event_type: EventType,
    since: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<EventRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, aggregate_id, aggregate_type, event_type, version,
                  timestamp, data, metadata, idempotency_key
           FROM events
           WHERE event_type = $1
             AND ($2::TIMESTAMPTZ IS NULL OR timestamp > $2)
           ORDER BY timestamp DESC
           LIMIT $3"#,
    )
    .bind(event_type.as_str())
    .bind(since)
    .bind(limit)
    .fetch_all(conn)
    .await
}

/// Events after a timestamp across all aggregates, oldest first.
pub async fn get_events_since(
    conn: &mut PgConnection,
    since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<EventRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, aggregate_id, aggregate_type, event_type, version,
                  timestamp, data, metadata, idempotency_key
           FROM events
           WHERE timestamp >= $1
           ORDER BY timestamp
           LIMIT $2"#,
    )
    .bind(since)
    .bind(limit)
    .fetch_all(conn)
    .await
}

/// Latest version for an aggregate, 0 when it has no events.
pub async fn get_latest_version(
    conn: &mut PgConnection,
    aggregate_id: Uuid,
) -> Result<i64, sqlx::Error> {
    let row: (Option<i64>,) =
        sqlx::query_as("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .fetch_one(conn)
            .await?;
    Ok(row.0.unwrap_or(0))
}

/// Distinct aggregate IDs of a given type.
pub async fn get_all_aggregate_ids(
    conn: &mut PgConnection,
    aggregate_type: &str,
    limit: i64,
) -> Result<Vec<Uuid>, sqlx::Error> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT DISTINCT aggregate_id FROM events WHERE aggregate_type = $1 LIMIT $2",
    )
    .bind(aggregate_type)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn get_by_idempotency_key(
    conn: &mut PgConnection,
    key: &str,
) -> Result<Option<EventRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, aggregate_id, aggregate_type, event_type, version,
                  timestamp, data, metadata, idempotency_key
           FROM events WHERE idempotency_key = $1"#,
    )
    .bind(key)
    .fetch_optional(conn)
    .await
}
