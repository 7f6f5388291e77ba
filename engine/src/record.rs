//! Application data records.

use crate::{
    entity::merge_metadata, CollectionName, Entity, EntityId, EntityKind, EntityMeta, MetadataMap,
    Timestamp, VersionedEntity,
};
use serde::{Deserialize, Serialize};

/// A row of application data, validated against its collection schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(flatten)]
    pub meta: EntityMeta,
    /// Database this record belongs to
    pub database_id: EntityId,
    /// Collection this record belongs to
    pub collection: CollectionName,
    /// The actual data payload (JSON object)
    pub payload: serde_json::Value,
    /// Metadata written back by representations
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl Record {
    /// Create a new record.
    pub fn new(
        id: impl Into<EntityId>,
        database_id: impl Into<EntityId>,
        collection: impl Into<CollectionName>,
        payload: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            meta: EntityMeta::new(id, timestamp),
            database_id: database_id.into(),
            collection: collection.into(),
            payload,
            metadata: MetadataMap::new(),
        }
    }

    /// Check if the record is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.meta.deleted
    }

    /// Replace the payload.
    pub fn set_payload(&mut self, payload: serde_json::Value) {
        self.payload = payload;
    }

    /// Get a field from the payload.
    pub fn get_field(&self, field: &str) -> Option<&serde_json::Value> {
        self.payload.get(field)
    }
}

impl VersionedEntity for Record {
    const KIND: EntityKind = EntityKind::Record;

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn database_id(&self) -> Option<&str> {
        Some(&self.database_id)
    }

    // The strategy comes from the collection schema, resolved by the store.

    fn representation_metadata(&self) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert("collection".into(), self.collection.clone().into());
        if let Some(name) = self.payload.get("name").or_else(|| self.payload.get("title")) {
            metadata.insert("name".into(), name.clone());
        }
        metadata
    }

    fn store_metadata(&mut self, metadata: &MetadataMap) {
        merge_metadata(&mut self.metadata, metadata);
    }

    fn into_entity(self) -> Entity {
        Entity::Record(self)
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Record(record) => Some(record),
            _ => None,
        }
    }
}
