//! Replication targets and the registry of target kinds.

use crate::{
    database::ROOM_ID, entity::merge_metadata, error::Result, Entity, EntityId, EntityKind,
    EntityMeta, Error, MetadataMap, Timestamp, VersionedEntity,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of the fallback target every database gets. Delivers nowhere.
pub const DUMMY_TARGET_KIND: &str = "dummy";

/// A destination a database replicates to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationTarget {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub database_id: EntityId,
    /// Unique within a database only
    pub name: String,
    /// Registered target kind tag
    pub kind: String,
    /// The primary target's room holds the authoritative state of the database
    #[serde(default)]
    pub primary: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Addressing information (`room_id`)
    #[serde(default)]
    pub metadata: MetadataMap,
    /// Free-form configuration of the target kind's driver
    #[serde(default)]
    pub config: MetadataMap,
}

fn default_enabled() -> bool {
    true
}

impl ReplicationTarget {
    pub fn new(
        id: impl Into<EntityId>,
        database_id: impl Into<EntityId>,
        name: impl Into<String>,
        kind: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            meta: EntityMeta::new(id, timestamp),
            database_id: database_id.into(),
            name: name.into(),
            kind: kind.into(),
            primary: false,
            enabled: true,
            metadata: MetadataMap::new(),
            config: MetadataMap::new(),
        }
    }

    /// The fallback target created when a database has none.
    pub fn dummy(database_id: &str, timestamp: Timestamp) -> Self {
        Self::new(
            Self::dummy_id(database_id),
            database_id,
            DUMMY_TARGET_KIND,
            DUMMY_TARGET_KIND,
            timestamp,
        )
    }

    pub fn dummy_id(database_id: &str) -> EntityId {
        format!("{database_id}.{DUMMY_TARGET_KIND}")
    }

    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    pub fn with_config(mut self, config: MetadataMap) -> Self {
        self.config = config;
        self
    }

    pub fn room_id(&self) -> Option<&str> {
        self.metadata.get(ROOM_ID).and_then(|v| v.as_str())
    }

    /// Not soft-deleted and enabled.
    pub fn is_active(&self) -> bool {
        !self.meta.deleted && self.enabled
    }
}

impl VersionedEntity for ReplicationTarget {
    const KIND: EntityKind = EntityKind::ReplicationTarget;

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
        Entity::ReplicationTarget(self)
    }

    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::ReplicationTarget(target) => Some(target),
            _ => None,
        }
    }
}

/// What a target kind can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCapabilities {
    /// Whether representation logs are created for this kind
    pub represents: bool,
}

/// Explicit registry of target kinds. `dummy` is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetKinds {
    kinds: BTreeMap<String, TargetCapabilities>,
}

impl Default for TargetKinds {
    fn default() -> Self {
        let mut kinds = BTreeMap::new();
        kinds.insert(DUMMY_TARGET_KIND.to_string(), TargetCapabilities::default());
        Self { kinds }
    }
}

impl TargetKinds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, capabilities: TargetCapabilities) {
        self.kinds.insert(kind.into(), capabilities);
    }

    pub fn with_kind(mut self, kind: impl Into<String>, capabilities: TargetCapabilities) -> Self {
        self.register(kind, capabilities);
        self
    }

    pub fn get(&self, kind: &str) -> Result<TargetCapabilities> {
        self.kinds
            .get(kind)
            .copied()
            .ok_or_else(|| Error::UnknownTargetKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_target_shape() {
        let target = ReplicationTarget::dummy("db-1", 1000);
        assert_eq!(target.meta.id, "db-1.dummy");
        assert_eq!(target.kind, DUMMY_TARGET_KIND);
        assert!(!target.primary);
        assert!(target.is_active());
    }

    #[test]
    fn disabled_or_deleted_target_is_inactive() {
        let mut target = ReplicationTarget::new("t-1", "db-1", "main", "dummy", 1000);
        target.enabled = false;
        assert!(!target.is_active());

        target.enabled = true;
        target.meta.deleted = true;
        assert!(!target.is_active());
    }

    #[test]
    fn registry_defaults_to_dummy() {
        let kinds = TargetKinds::default();
        assert!(!kinds.get(DUMMY_TARGET_KIND).unwrap().represents);
        assert_eq!(
            kinds.get("matrix"),
            Err(Error::UnknownTargetKind("matrix".into()))
        );

        let kinds = kinds.with_kind("transport", TargetCapabilities { represents: true });
        assert!(kinds.get("transport").unwrap().represents);
        assert_eq!(kinds.kinds().collect::<Vec<_>>(), vec!["dummy", "transport"]);
    }

    #[test]
    fn enabled_defaults_to_true_when_missing() {
        let json = serde_json::json!({
            "id": "t-1",
            "createdAt": 1,
            "modifiedAt": 1,
            "databaseId": "db-1",
            "name": "main",
            "kind": "dummy"
        });
        let target: ReplicationTarget = serde_json::from_value(json).unwrap();
        assert!(target.enabled);
        assert!(!target.primary);
    }
}
