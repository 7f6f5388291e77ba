//! Tessera Node - keeps a local store replicated through a relay.

use std::sync::Arc;

use tessera_engine::{Schema, Store};
use tessera_node::{
    bootstrap, HttpTransport, Inbound, MemberAccount, MemoryTransport, NodeConfig, NodeState,
    Replicator, ReplicatorSettings, StateFile, Transport,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SCHEMA_VERSION: u32 = 1;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_node=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = NodeConfig::from_env()?;

    let transport: Arc<dyn Transport> = match &config.relay_url {
        Some(url) => {
            let mut http = HttpTransport::new(url.as_str())?;
            if let Some(account) = &config.account {
                http = http.with_access_token(account.access_token.as_str());
            }
            http.health().await?;
            tracing::info!("Connected to relay at {}", url);
            Arc::new(http)
        }
        None => {
            tracing::warn!("No TESSERA_RELAY_URL set, replicating in memory only");
            Arc::new(MemoryTransport::new())
        }
    };

    // Restore local state
    let state_file = StateFile::new(&config.state_path);
    let mut store = Store::new(Schema::new(SCHEMA_VERSION), config.node_id.as_str());
    let mut sync_tokens = Default::default();
    if let Some(state) = state_file.load().await? {
        store.import_state(state.snapshot)?;
        sync_tokens = state.sync_tokens;
        tracing::info!("Restored state from {}", state_file.path().display());
    }

    let replicator = Replicator::builder(store, Arc::clone(&transport))
        .settings(ReplicatorSettings::from(&config))
        .build();
    let inbound = Inbound::new(replicator.store(), transport).with_tokens(sync_tokens);

    let account = config.account.clone().map(MemberAccount::from);
    let outcome = bootstrap(&replicator, &config.project, &config.device_name, account.as_ref()).await?;
    tracing::info!(
        database_id = %outcome.database_id,
        created = outcome.created,
        "Node {} ready",
        config.node_id
    );

    let mut ticker = tokio::time::interval(config.sync_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = replicator.retry_pending().await {
                    tracing::error!(error = %e, "retry failed");
                }
                match inbound.sync_current().await {
                    Ok(Some(synced)) if synced.events > 0 => {
                        tracing::debug!(room_id = %synced.room_id, events = synced.events, "synced");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "inbound sync failed"),
                }
                save(&replicator, &inbound, &state_file).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                save(&replicator, &inbound, &state_file).await;
                break;
            }
        }
    }

    Ok(())
}

async fn save(replicator: &Replicator, inbound: &Inbound, state_file: &StateFile) {
    let snapshot = replicator.store().lock().await.export_state();
    let state = NodeState {
        snapshot,
        sync_tokens: inbound.tokens(),
    };
    if let Err(e) = state_file.save(&state).await {
        tracing::error!(error = %e, "could not save state");
    }
}
