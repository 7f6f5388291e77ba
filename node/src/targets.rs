//! Target drivers: how a batch reaches each kind of replication target.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tessera_engine::{
    ReplicationBatch, ReplicationTarget, TargetCapabilities, TargetKinds, DUMMY_TARGET_KIND,
    REPLICATION_EVENT,
};

use crate::error::{NodeError, Result};
use crate::transport::Transport;

/// Kind of targets that replicate into a transport room.
pub const TRANSPORT_TARGET_KIND: &str = "transport";

/// Delivery implementation for one target kind.
#[async_trait]
pub trait TargetDriver: Send + Sync {
    /// The kind tag targets use to select this driver.
    fn kind(&self) -> &str;

    fn capabilities(&self) -> TargetCapabilities;

    /// Deliver all changes of one transaction as a single unit.
    async fn deliver(&self, target: &ReplicationTarget, batch: &ReplicationBatch) -> Result<()>;
}

/// Fallback driver. Accepts every batch and sends it nowhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyDriver;

#[async_trait]
impl TargetDriver for DummyDriver {
    fn kind(&self) -> &str {
        DUMMY_TARGET_KIND
    }

    fn capabilities(&self) -> TargetCapabilities {
        TargetCapabilities { represents: false }
    }

    async fn deliver(&self, target: &ReplicationTarget, batch: &ReplicationBatch) -> Result<()> {
        tracing::trace!(target_id = %target.meta.id, txn_id = %batch.txn_id, "dropping batch");
        Ok(())
    }
}

/// Publishes each batch as one event in the target's room.
#[derive(Clone)]
pub struct TransportDriver {
    transport: Arc<dyn Transport>,
}

impl TransportDriver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl TargetDriver for TransportDriver {
    fn kind(&self) -> &str {
        TRANSPORT_TARGET_KIND
    }

    fn capabilities(&self) -> TargetCapabilities {
        TargetCapabilities { represents: true }
    }

    async fn deliver(&self, target: &ReplicationTarget, batch: &ReplicationBatch) -> Result<()> {
        let room_id = target
            .room_id()
            .ok_or_else(|| NodeError::ReplicationDelivery {
                target_id: target.meta.id.clone(),
                message: "target has no room".to_string(),
            })?;
        let content = serde_json::to_value(batch)?;
        let event_id = self
            .transport
            .publish(room_id, REPLICATION_EVENT, content)
            .await
            .map_err(|e| NodeError::ReplicationDelivery {
                target_id: target.meta.id.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(
            target_id = %target.meta.id,
            room_id = %room_id,
            event_id = %event_id,
            txn_id = %batch.txn_id,
            entries = batch.len(),
            "batch published"
        );
        Ok(())
    }
}

/// Drivers by target kind.
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn TargetDriver>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// A registry holding only the dummy driver.
    pub fn new() -> Self {
        let mut registry = Self {
            drivers: BTreeMap::new(),
        };
        registry.register(Arc::new(DummyDriver));
        registry
    }

    pub fn register(&mut self, driver: Arc<dyn TargetDriver>) {
        self.drivers.insert(driver.kind().to_string(), driver);
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn TargetDriver>> {
        self.drivers
            .get(kind)
            .cloned()
            .ok_or_else(|| NodeError::UnknownTargetKind(kind.to_string()))
    }

    /// The engine-side registry matching these drivers.
    pub fn target_kinds(&self) -> TargetKinds {
        self.drivers
            .values()
            .fold(TargetKinds::new(), |kinds, driver| {
                kinds.with_kind(driver.kind(), driver.capabilities())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use tessera_engine::{BatchEntry, Database, VersionedEntity, ROOM_ID};

    fn batch() -> ReplicationBatch {
        let db = Database::new("db-1", "notes", 1000);
        ReplicationBatch {
            txn_id: "node-1:1".into(),
            origin: "node-1".into(),
            entries: vec![BatchEntry {
                entity: db.entity_ref(),
                snapshot: db.into_entity().snapshot().unwrap(),
            }],
        }
    }

    #[test]
    fn registry_exposes_engine_kinds() {
        let transport = Arc::new(MemoryTransport::new());
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(TransportDriver::new(transport)));

        let kinds = registry.target_kinds();
        assert!(!kinds.get(DUMMY_TARGET_KIND).unwrap().represents);
        assert!(kinds.get(TRANSPORT_TARGET_KIND).unwrap().represents);
        assert!(matches!(
            registry.get("matrix"),
            Err(NodeError::UnknownTargetKind(_))
        ));
    }

    #[tokio::test]
    async fn transport_driver_publishes_one_event_per_batch() {
        let transport = MemoryTransport::new();
        let room = transport.create_room(None, None).await.unwrap();
        let driver = TransportDriver::new(Arc::new(transport.clone()));

        let mut target =
            ReplicationTarget::new("t-1", "db-1", "main", TRANSPORT_TARGET_KIND, 1000);
        target
            .metadata
            .insert(ROOM_ID.into(), serde_json::json!(room.clone()));

        driver.deliver(&target, &batch()).await.unwrap();

        let events = transport.events(&room);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, REPLICATION_EVENT);
        let delivered: ReplicationBatch =
            serde_json::from_value(events[0].content.clone()).unwrap();
        assert_eq!(delivered, batch());
    }

    #[tokio::test]
    async fn transport_driver_requires_a_room() {
        let driver = TransportDriver::new(Arc::new(MemoryTransport::new()));
        let target = ReplicationTarget::new("t-1", "db-1", "main", TRANSPORT_TARGET_KIND, 1000);
        let err = driver.deliver(&target, &batch()).await.unwrap_err();
        assert!(matches!(err, NodeError::ReplicationDelivery { .. }));
    }
}
