//! Room creation, invites and joins.

use tessera_engine::protocol::relay::{CreateRoomRequest, CreateRoomResponse, InviteRequest};

use crate::auth::AuthMember;
use crate::db::{self, JoinResult};
use crate::error::{AppError, Result};
use crate::AppState;

use super::require_member;

/// Create a room owned by the caller.
pub async fn handle_create_room(
    state: &AppState,
    member: &AuthMember,
    request: CreateRoomRequest,
) -> Result<CreateRoomResponse> {
    let room_id = format!(
        "!{}:{}",
        uuid::Uuid::new_v4().simple(),
        state.config.server_name
    );

    db::create_room(
        &state.pool,
        &room_id,
        &member.member_id,
        request.name.as_deref(),
        request.topic.as_deref(),
    )
    .await?;

    tracing::info!(
        room_id = %room_id,
        creator = %member.member_id,
        username = %member.username,
        name = ?request.name,
        "room created"
    );
    Ok(CreateRoomResponse { room_id })
}

/// Invite another member into a room the caller is in.
pub async fn handle_invite(
    state: &AppState,
    room_id: &str,
    member: &AuthMember,
    request: InviteRequest,
) -> Result<()> {
    require_member(&state.pool, room_id, &member.member_id).await?;
    if !db::member_exists(&state.pool, &request.member_id).await? {
        return Err(AppError::NotFound(format!("member {}", request.member_id)));
    }

    db::invite_member(&state.pool, room_id, &request.member_id, &member.member_id).await?;
    tracing::info!(room_id = %room_id, invitee = %request.member_id, by = %member.member_id, "invited");
    Ok(())
}

/// Accept an invite. Joining a room one is already in succeeds.
pub async fn handle_join(state: &AppState, room_id: &str, member: &AuthMember) -> Result<()> {
    if !db::room_exists(&state.pool, room_id).await? {
        return Err(AppError::NotFound(format!("room {room_id}")));
    }

    match db::join_room(&state.pool, room_id, &member.member_id).await? {
        JoinResult::Joined => {
            tracing::info!(room_id = %room_id, member_id = %member.member_id, "joined");
            Ok(())
        }
        JoinResult::AlreadyMember => Ok(()),
        JoinResult::NotInvited => Err(AppError::Forbidden(format!(
            "{} has no invite to {room_id}",
            member.member_id
        ))),
    }
}
