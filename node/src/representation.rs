//! Representation strategies: projecting entities onto a target.
//!
//! A strategy turns a pending representation log into metadata. The flusher
//! stores that metadata on the entity (and optionally the target) and marks
//! the log applied in the same transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tessera_engine::{
    Entity, MetadataMap, ReplicationTarget, RepresentationLog, ROOM_ID, ROOM_REPRESENTATION,
};

use crate::error::{NodeError, Result};
use crate::transport::Transport;

/// Everything a strategy may look at.
#[derive(Debug, Clone, Copy)]
pub struct RepresentationContext<'a> {
    pub log: &'a RepresentationLog,
    /// Current stored state of the represented entity
    pub entity: &'a Entity,
    pub target: &'a ReplicationTarget,
}

/// Metadata to merge back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepresentationOutput {
    pub entity: MetadataMap,
    /// Stored on the target when present
    pub target: Option<MetadataMap>,
}

#[async_trait]
pub trait RepresentationStrategy: Send + Sync {
    /// Method name matched against [`RepresentationLog::method`].
    fn method(&self) -> &str;

    async fn apply(&self, ctx: RepresentationContext<'_>) -> Result<RepresentationOutput>;
}

/// Mirrors an entity into a transport room of its own.
#[derive(Clone)]
pub struct RoomStrategy {
    transport: Arc<dyn Transport>,
}

impl RoomStrategy {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl RepresentationStrategy for RoomStrategy {
    fn method(&self) -> &str {
        ROOM_REPRESENTATION
    }

    async fn apply(&self, ctx: RepresentationContext<'_>) -> Result<RepresentationOutput> {
        let existing = ctx
            .entity
            .metadata()
            .get(ROOM_ID)
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let room_id = match existing {
            Some(room_id) => {
                tracing::debug!(entity = %ctx.log.entity, room_id = %room_id, "entity already has a room");
                room_id
            }
            None => {
                let name = ctx.log.metadata.get("name").and_then(|v| v.as_str());
                let topic = ctx.log.metadata.get("topic").and_then(|v| v.as_str());
                let room_id = self.transport.create_room(name, topic).await?;
                tracing::info!(entity = %ctx.log.entity, room_id = %room_id, "room created");
                room_id
            }
        };

        let mut entity = MetadataMap::new();
        entity.insert(ROOM_ID.to_string(), room_id.clone().into());
        let target = ctx.target.room_id().is_none().then(|| {
            let mut target = MetadataMap::new();
            target.insert(ROOM_ID.to_string(), room_id.into());
            target
        });

        Ok(RepresentationOutput { entity, target })
    }
}

/// Strategies by method name.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn RepresentationStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Arc<dyn RepresentationStrategy>) {
        self.strategies
            .insert(strategy.method().to_string(), strategy);
    }

    pub fn get(&self, method: &str) -> Result<Arc<dyn RepresentationStrategy>> {
        self.strategies
            .get(method)
            .cloned()
            .ok_or_else(|| NodeError::UnknownRepresentation(method.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use tessera_engine::{Database, VersionedEntity};

    fn log_for(db: &Database) -> RepresentationLog {
        RepresentationLog {
            id: 1,
            target_id: "t-1".into(),
            entity: db.entity_ref(),
            method: ROOM_REPRESENTATION.into(),
            metadata: db.representation_metadata(),
            created_at: 1000,
            attempts: 0,
            error: None,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn room_strategy_creates_a_named_room() {
        let transport = MemoryTransport::new();
        let strategy = RoomStrategy::new(Arc::new(transport.clone()));
        let db = Database::new("db-1", "notes", 1000);
        let entity = db.clone().into_entity();
        let target = ReplicationTarget::new("t-1", "db-1", "main", "transport", 1000);
        let log = log_for(&db);

        let output = strategy
            .apply(RepresentationContext {
                log: &log,
                entity: &entity,
                target: &target,
            })
            .await
            .unwrap();

        let room_id = output.entity[ROOM_ID].as_str().unwrap().to_string();
        assert_eq!(transport.room_name(&room_id).as_deref(), Some("notes"));
        assert_eq!(output.target.unwrap()[ROOM_ID], room_id.as_str());
    }

    #[tokio::test]
    async fn existing_rooms_are_reused() {
        let transport = MemoryTransport::new();
        let strategy = RoomStrategy::new(Arc::new(transport.clone()));
        let mut db = Database::new("db-1", "notes", 1000);
        db.metadata.insert(ROOM_ID.into(), "!known:memory".into());
        let entity = db.clone().into_entity();
        let mut target = ReplicationTarget::new("t-1", "db-1", "main", "transport", 1000);
        target.metadata.insert(ROOM_ID.into(), "!known:memory".into());
        let log = log_for(&db);

        let output = strategy
            .apply(RepresentationContext {
                log: &log,
                entity: &entity,
                target: &target,
            })
            .await
            .unwrap();

        assert_eq!(transport.room_count(), 0);
        assert_eq!(output.entity[ROOM_ID], "!known:memory");
        assert!(output.target.is_none());
    }

    #[test]
    fn unknown_method() {
        let registry = StrategyRegistry::new();
        assert!(matches!(
            registry.get("calendar"),
            Err(NodeError::UnknownRepresentation(m)) if m == "calendar"
        ));
    }
}
