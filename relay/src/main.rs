//! Tessera Relay - reference transport for Tessera nodes.
//!
//! Serves rooms with a totally ordered event log, per-room state, expiring
//! named locks and bearer-token members over HTTP, and pushes room activity
//! to WebSocket subscribers. State lives in PostgreSQL.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod routes;
mod websocket;

use crate::config::Config;
use crate::db::Pool;
use crate::websocket::RoomHub;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
    pub hub: Arc<RoomHub>,
}

#[cfg(test)]
impl AppState {
    /// State over a pool that never connects; only for requests rejected
    /// before touching the database.
    pub(crate) fn for_tests() -> Self {
        let config = Config::for_tests();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        Self {
            pool,
            config: Arc::new(config),
            hub: RoomHub::new_shared(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        server_name = %config.server_name,
        "Starting Tessera Relay on {}:{}",
        config.host,
        config.port
    );

    let pool = db::create_pool(&config.database_url, config.max_connections).await?;

    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState {
        pool,
        config: Arc::new(config),
        hub: RoomHub::new_shared(),
    };

    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Relay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
