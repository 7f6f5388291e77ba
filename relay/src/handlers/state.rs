//! Room state reads and writes.

use crate::auth::AuthMember;
use crate::db;
use crate::error::{AppError, Result};
use crate::websocket::ServerMessage;
use crate::AppState;

use super::require_member;

/// The current value of a state type. Missing state is `NotFound`.
pub async fn handle_get_state(
    state: &AppState,
    room_id: &str,
    member: &AuthMember,
    state_type: &str,
) -> Result<serde_json::Value> {
    require_member(&state.pool, room_id, &member.member_id).await?;
    db::get_state(&state.pool, room_id, state_type)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("state {state_type} in {room_id}")))
}

/// Replace a state value and notify the room's subscribers.
pub async fn handle_put_state(
    state: &AppState,
    room_id: &str,
    member: &AuthMember,
    state_type: &str,
    content: serde_json::Value,
) -> Result<()> {
    require_member(&state.pool, room_id, &member.member_id).await?;
    db::put_state(&state.pool, room_id, state_type, &content, &member.member_id).await?;

    tracing::debug!(room_id = %room_id, state_type = %state_type, sender = %member.member_id, "state replaced");
    state.hub.broadcast(
        room_id,
        &ServerMessage::State {
            state_type: state_type.to_string(),
            sender: member.member_id.clone(),
        },
    );
    Ok(())
}
