//! Member registration routes.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tessera_engine::protocol::relay::{RegisterMemberRequest, RegisterMemberResponse};

use crate::error::Result;
use crate::handlers::handle_register;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/members", post(register_handler))
}

/// POST /members - Register a member. Needs no token.
async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterMemberRequest>,
) -> Result<(StatusCode, Json<RegisterMemberResponse>)> {
    let response = handle_register(&state, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
