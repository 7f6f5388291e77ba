//! The ordered event log of each room.

use sqlx::{PgPool, Row};
use tessera_engine::RoomEvent;

/// A stored event row.
#[derive(Debug)]
pub struct StoredEvent {
    pub event_id: String,
    pub room_id: String,
    pub seq: i64,
    pub event_type: String,
    pub sender: String,
    pub content: serde_json::Value,
    pub origin_ts: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEvent {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEvent {
            event_id: row.try_get("event_id")?,
            room_id: row.try_get("room_id")?,
            seq: row.try_get("seq")?,
            event_type: row.try_get("event_type")?,
            sender: row.try_get("sender")?,
            content: row.try_get("content")?,
            origin_ts: row.try_get("origin_ts")?,
        })
    }
}

impl From<StoredEvent> for RoomEvent {
    fn from(stored: StoredEvent) -> Self {
        RoomEvent {
            event_id: stored.event_id,
            room_id: stored.room_id,
            seq: stored.seq.max(0) as u64,
            event_type: stored.event_type,
            sender: stored.sender,
            content: stored.content,
            origin_ts: stored.origin_ts.max(0) as u64,
        }
    }
}

/// Append an event to a room and return it with its sequence number.
///
/// The room row stays locked until commit, so concurrent publishers to one
/// room commit in sequence order and readers never skip a gap that fills later.
pub async fn append_event(
    pool: &PgPool,
    event_id: &str,
    room_id: &str,
    sender: &str,
    event_type: &str,
    content: &serde_json::Value,
    origin_ts: i64,
) -> Result<StoredEvent, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let (seq,): (i64,) = sqlx::query_as(
        r#"UPDATE rooms SET last_seq = last_seq + 1 WHERE room_id = $1 RETURNING last_seq"#,
    )
    .bind(room_id)
    .fetch_one(&mut *tx)
    .await?;

    let stored = sqlx::query_as::<_, StoredEvent>(
        r#"
        INSERT INTO events (event_id, room_id, seq, event_type, sender, content, origin_ts)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING event_id, room_id, seq, event_type, sender, content, origin_ts
        "#,
    )
    .bind(event_id)
    .bind(room_id)
    .bind(seq)
    .bind(event_type)
    .bind(sender)
    .bind(content)
    .bind(origin_ts)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(stored)
}

/// Events of a room after `since`, in sequence order. An empty `types`
/// matches every event type.
pub async fn events_since(
    pool: &PgPool,
    room_id: &str,
    since: i64,
    types: &[String],
    limit: i64,
) -> Result<Vec<StoredEvent>, sqlx::Error> {
    sqlx::query_as::<_, StoredEvent>(
        r#"
        SELECT event_id, room_id, seq, event_type, sender, content, origin_ts
        FROM events
        WHERE room_id = $1
          AND seq > $2
          AND (cardinality($3::text[]) = 0 OR event_type = ANY($3))
        ORDER BY seq ASC
        LIMIT $4
        "#,
    )
    .bind(room_id)
    .bind(since)
    .bind(types)
    .bind(limit)
    .fetch_all(pool)
    .await
}
