//! The logical database being replicated, and the local pointer to the current one.

use crate::{
    entity::merge_metadata, Entity, EntityId, EntityKind, EntityMeta, MetadataMap, Timestamp,
    VersionedEntity, ROOM_REPRESENTATION,
};
use serde::{Deserialize, Serialize};

/// Metadata key under which a represented entity stores its room.
pub const ROOM_ID: &str = "room_id";

/// A logical database shared by a set of devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Addressing metadata; holds `room_id` once represented
    #[serde(default)]
    pub metadata: MetadataMap,
    /// Devices permitted to replicate this database
    #[serde(default)]
    pub devices: Vec<EntityId>,
}

impl Database {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            meta: EntityMeta::new(id, timestamp),
            name: name.into(),
            description: None,
            metadata: MetadataMap::new(),
            devices: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn room_id(&self) -> Option<&str> {
        self.metadata.get(ROOM_ID).and_then(|v| v.as_str())
    }

    /// Grant a device access. Returns false if it was already listed.
    pub fn add_device(&mut self, device_id: impl Into<EntityId>) -> bool {
        let device_id = device_id.into();
        if self.devices.contains(&device_id) {
            return false;
        }
        self.devices.push(device_id);
        true
    }
}

impl VersionedEntity for Database {
    const KIND: EntityKind = EntityKind::Database;

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn database_id(&self) -> Option<&str> {
        Some(&self.meta.id)
    }

    fn representation_strategy(&self) -> Option<&str> {
        Some(ROOM_REPRESENTATION)
    }

    fn representation_metadata(&self) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert("name".into(), self.name.clone().into());
        if let Some(description) = &self.description {
            metadata.insert("topic".into(), description.clone().into());
        }
        metadata
    }

    fn store_metadata(&mut self, metadata: &MetadataMap) {
        merge_metadata(&mut self.metadata, metadata);
    }

    fn into_entity(self) -> Entity {
        Entity::Database(self)
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Database(db) => Some(db),
            _ => None,
        }
    }
}

/// Local singleton naming the database this device works on. Never replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub database_id: EntityId,
    pub created_at: Timestamp,
}
