//! Publishing to and reading from a room's event log.

use sqlx::PgPool;
use tessera_engine::protocol::relay::{EventsQuery, PublishRequest, PublishResponse};
use tessera_engine::{EventPage, RoomEvent};

use crate::auth::AuthMember;
use crate::db;
use crate::error::{AppError, Result};
use crate::websocket::ServerMessage;
use crate::AppState;

use super::require_member;

/// Default page size for event reads.
const DEFAULT_LIMIT: u32 = 100;

/// Maximum page size for event reads.
const MAX_LIMIT: u32 = 1000;

/// Append an event and push it to the room's subscribers.
pub async fn handle_publish(
    state: &AppState,
    room_id: &str,
    member: &AuthMember,
    request: PublishRequest,
) -> Result<PublishResponse> {
    require_member(&state.pool, room_id, &member.member_id).await?;
    if request.event_type.trim().is_empty() {
        return Err(AppError::BadRequest("event type is empty".into()));
    }

    let event_id = format!("${}", uuid::Uuid::new_v4().simple());
    let stored = db::append_event(
        &state.pool,
        &event_id,
        room_id,
        &member.member_id,
        &request.event_type,
        &request.content,
        chrono::Utc::now().timestamp_millis(),
    )
    .await?;

    let event = RoomEvent::from(stored);
    tracing::debug!(
        room_id = %room_id,
        seq = event.seq,
        event_type = %event.event_type,
        sender = %event.sender,
        "event published"
    );

    let response = PublishResponse {
        event_id: event.event_id.clone(),
        seq: event.seq,
    };
    state
        .hub
        .broadcast(room_id, &ServerMessage::Event { event });
    Ok(response)
}

/// Read a page of a room's events.
pub async fn handle_read_events(
    state: &AppState,
    room_id: &str,
    member: &AuthMember,
    query: EventsQuery,
) -> Result<EventPage> {
    require_member(&state.pool, room_id, &member.member_id).await?;
    read_page(&state.pool, room_id, &query).await
}

/// Events after `query.since`, at most one page, plus the position to resume from.
pub async fn read_page(pool: &PgPool, room_id: &str, query: &EventsQuery) -> Result<EventPage> {
    let since = query.since.unwrap_or(0);
    let limit = page_limit(query.limit);
    let types = parse_types(query.types.as_deref());

    // Fetch one more than requested to check if there are more
    let mut stored = db::events_since(
        pool,
        room_id,
        i64::try_from(since).unwrap_or(i64::MAX),
        &types,
        i64::from(limit) + 1,
    )
    .await?;

    let has_more = stored.len() > limit as usize;
    stored.truncate(limit as usize);
    let events: Vec<RoomEvent> = stored.into_iter().map(RoomEvent::from).collect();
    let next_since = events.last().map(|e| e.seq).unwrap_or(since);

    Ok(EventPage {
        events,
        next_since,
        has_more,
    })
}

fn page_limit(requested: Option<u32>) -> u32 {
    requested
        .map(|l| l.clamp(1, MAX_LIMIT))
        .unwrap_or(DEFAULT_LIMIT)
}

fn parse_types(types: Option<&str>) -> Vec<String> {
    types
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped() {
        assert_eq!(page_limit(None), DEFAULT_LIMIT);
        assert_eq!(page_limit(Some(0)), 1);
        assert_eq!(page_limit(Some(50)), 50);
        assert_eq!(page_limit(Some(5000)), MAX_LIMIT);
    }

    #[test]
    fn types_are_split_on_commas() {
        assert!(parse_types(None).is_empty());
        assert!(parse_types(Some("")).is_empty());
        assert_eq!(
            parse_types(Some("tessera.replicate, m.room.message,")),
            vec!["tessera.replicate", "m.room.message"]
        );
    }
}
