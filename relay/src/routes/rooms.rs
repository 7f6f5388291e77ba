//! Room routes: events, state, locks, membership and the live socket.

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tessera_engine::protocol::relay::{
    CreateRoomRequest, CreateRoomResponse, EventsQuery, InviteRequest, LockRequest, LockResponse,
    PublishRequest, PublishResponse, ReleaseLockRequest,
};
use tessera_engine::EventPage;

use crate::auth::AuthMember;
use crate::error::Result;
use crate::handlers::{self, require_member};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{room_id}/events", get(read_events).post(publish))
        .route(
            "/rooms/{room_id}/state/{state_type}",
            get(get_state).put(put_state),
        )
        .route("/rooms/{room_id}/locks", post(acquire_lock))
        .route("/rooms/{room_id}/locks/release", post(release_lock))
        .route("/rooms/{room_id}/invite", post(invite))
        .route("/rooms/{room_id}/join", post(join))
        .route("/rooms/{room_id}/ws", get(subscribe))
}

/// POST /rooms
async fn create_room(
    State(state): State<AppState>,
    member: AuthMember,
    Json(request): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<CreateRoomResponse>)> {
    let response = handlers::handle_create_room(&state, &member, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /rooms/{room_id}/events
async fn publish(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    member: AuthMember,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>> {
    let response = handlers::handle_publish(&state, &room_id, &member, request).await?;
    Ok(Json(response))
}

/// GET /rooms/{room_id}/events?since=&types=&limit=
async fn read_events(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    member: AuthMember,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventPage>> {
    let page = handlers::handle_read_events(&state, &room_id, &member, query).await?;
    Ok(Json(page))
}

/// GET /rooms/{room_id}/state/{state_type}
async fn get_state(
    State(state): State<AppState>,
    Path((room_id, state_type)): Path<(String, String)>,
    member: AuthMember,
) -> Result<Json<serde_json::Value>> {
    let content = handlers::handle_get_state(&state, &room_id, &member, &state_type).await?;
    Ok(Json(content))
}

/// PUT /rooms/{room_id}/state/{state_type}
async fn put_state(
    State(state): State<AppState>,
    Path((room_id, state_type)): Path<(String, String)>,
    member: AuthMember,
    Json(content): Json<serde_json::Value>,
) -> Result<StatusCode> {
    handlers::handle_put_state(&state, &room_id, &member, &state_type, content).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /rooms/{room_id}/locks - 409 while another holder's lock is live.
async fn acquire_lock(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    member: AuthMember,
    Json(request): Json<LockRequest>,
) -> Result<Json<LockResponse>> {
    let lock = handlers::handle_acquire_lock(&state, &room_id, &member, request).await?;
    Ok(Json(lock))
}

/// POST /rooms/{room_id}/locks/release
async fn release_lock(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    member: AuthMember,
    Json(request): Json<ReleaseLockRequest>,
) -> Result<StatusCode> {
    handlers::handle_release_lock(&state, &room_id, &member, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /rooms/{room_id}/invite
async fn invite(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    member: AuthMember,
    Json(request): Json<InviteRequest>,
) -> Result<StatusCode> {
    handlers::handle_invite(&state, &room_id, &member, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /rooms/{room_id}/join
async fn join(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    member: AuthMember,
) -> Result<StatusCode> {
    handlers::handle_join(&state, &room_id, &member).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /rooms/{room_id}/ws - Upgrade to a live subscription of the room.
async fn subscribe(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    member: AuthMember,
) -> Result<Response> {
    require_member(&state.pool, &room_id, &member.member_id).await?;
    Ok(ws.on_upgrade(move |socket| {
        handlers::handle_websocket_connection(socket, state, room_id, member.member_id)
    }))
}
