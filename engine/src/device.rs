//! Devices and their local transport credentials.

use crate::{
    entity::merge_metadata, Entity, EntityId, EntityKind, EntityMeta, MetadataMap, Timestamp,
    VersionedEntity,
};
use serde::{Deserialize, Serialize};

/// A participant that holds a copy of a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub database_id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl Device {
    pub fn new(
        id: impl Into<EntityId>,
        database_id: impl Into<EntityId>,
        name: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            meta: EntityMeta::new(id, timestamp),
            database_id: database_id.into(),
            name: name.into(),
            display_name: None,
            metadata: MetadataMap::new(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

impl VersionedEntity for Device {
    const KIND: EntityKind = EntityKind::Device;

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn database_id(&self) -> Option<&str> {
        Some(&self.database_id)
    }

    fn store_metadata(&mut self, metadata: &MetadataMap) {
        merge_metadata(&mut self.metadata, metadata);
    }

    fn into_entity(self) -> Entity {
        Entity::Device(self)
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Device(device) => Some(device),
            _ => None,
        }
    }
}

/// Transport account of a device on one target. Kept locally, never replicated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub device_id: EntityId,
    pub target_id: EntityId,
    pub member_id: String,
    pub access_token: String,
}

// Keep tokens out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("device_id", &self.device_id)
            .field("target_id", &self.target_id)
            .field("member_id", &self.member_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_token() {
        let creds = Credentials {
            device_id: "dev-1".into(),
            target_id: "t-1".into(),
            member_id: "@dev-1:relay".into(),
            access_token: "secret".into(),
        };
        let debug = format!("{creds:?}");
        assert!(debug.contains("@dev-1:relay"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn device_has_no_representation() {
        let device = Device::new("dev-1", "db-1", "laptop", 1000).with_display_name("Laptop");
        assert_eq!(device.representation_strategy(), None);
        assert_eq!(device.database_id(), Some("db-1"));
        assert_eq!(device.display_name.as_deref(), Some("Laptop"));
    }
}
