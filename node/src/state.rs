//! Publishing authoritative database and target state into the primary room.

use std::sync::Arc;
use std::time::Duration;

use tessera_engine::{
    Database, EntityKind, EntityRef, ReplicationTarget, StateFixture, DATABASE_STATE, TARGET_STATE,
};
use tokio::time::Instant;

use crate::error::{NodeError, Result};
use crate::transport::{LockToken, Transport};
use crate::SharedStore;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Writes state fixtures under a room lock so concurrent writers never interleave.
pub struct StatePublisher {
    store: SharedStore,
    transport: Arc<dyn Transport>,
    lock_timeout: Duration,
    lock_ttl: Duration,
}

impl StatePublisher {
    pub fn new(
        store: SharedStore,
        transport: Arc<dyn Transport>,
        lock_timeout: Duration,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            lock_timeout,
            lock_ttl,
        }
    }

    /// Publish the current state of an updated database or target.
    ///
    /// Returns whether anything was written. Secondary targets and entities
    /// without an authoritative room are skipped.
    pub async fn update_state(&self, entity: &EntityRef) -> Result<bool> {
        let Some((room_id, state_type)) = self.resolve(entity).await else {
            return Ok(false);
        };

        let token = self.acquire(&room_id, state_type).await?;
        let published = self.put_fixture(entity, &room_id, state_type).await;

        if let Err(e) = self.transport.release_lock(&room_id, state_type, &token).await {
            tracing::warn!(room_id = %room_id, key = state_type, error = %e, "lock release failed");
        }

        published
    }

    /// The room and state key an entity publishes to, if any.
    async fn resolve(&self, entity: &EntityRef) -> Option<(String, &'static str)> {
        let store = self.store.lock().await;
        match entity.kind {
            EntityKind::Database => {
                let database = store.get::<Database>(&entity.id)?;
                let Some(primary) = store.primary_target(&database.meta.id) else {
                    tracing::warn!(database_id = %database.meta.id, "no primary target, state not published");
                    return None;
                };
                match primary.room_id() {
                    Some(room_id) => Some((room_id.to_string(), DATABASE_STATE)),
                    None => {
                        tracing::warn!(target_id = %primary.meta.id, "primary target has no room yet");
                        None
                    }
                }
            }
            EntityKind::ReplicationTarget => {
                let target = store.get::<ReplicationTarget>(&entity.id)?;
                if !target.primary {
                    return None;
                }
                match target.room_id() {
                    Some(room_id) => Some((room_id.to_string(), TARGET_STATE)),
                    None => {
                        tracing::warn!(target_id = %target.meta.id, "primary target has no room yet");
                        None
                    }
                }
            }
            EntityKind::Device | EntityKind::Record => None,
        }
    }

    async fn acquire(&self, room_id: &str, key: &str) -> Result<LockToken> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            if let Some(token) = self
                .transport
                .acquire_lock(room_id, key, self.lock_ttl)
                .await?
            {
                return Ok(token);
            }
            if Instant::now() >= deadline {
                return Err(NodeError::LockAcquire {
                    room_id: room_id.to_string(),
                    key: key.to_string(),
                });
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    /// Snapshot the entity while holding the lock so the latest version wins.
    async fn put_fixture(&self, entity: &EntityRef, room_id: &str, state_type: &str) -> Result<bool> {
        let fixture = {
            let store = self.store.lock().await;
            match store.get_entity(entity) {
                Some(stored) => stored.snapshot()?,
                None => return Ok(false),
            }
        };
        let content = serde_json::to_value(StateFixture { fixture })?;
        self.transport
            .put_room_state(room_id, state_type, &content)
            .await?;
        tracing::debug!(room_id = %room_id, state_type, entity = %entity, "state published");
        Ok(true)
    }
}
