//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Domain of the member ids this relay issues
    pub server_name: String,
    /// Open WebSocket subscriptions
    pub subscriptions: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// GET /health - Liveness only; does not touch the database.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        server_name: state.config.server_name.clone(),
        subscriptions: state.hub.connection_count(),
    })
}

async fn root() -> &'static str {
    "Tessera Relay"
}
