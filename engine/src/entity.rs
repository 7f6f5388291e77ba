//! Versioned entities and the tagged references logs use to point at them.
//!
//! Logs never hold typed foreign keys. They carry an [`EntityRef`] (kind tag +
//! id) and the [`Entity`] loader turns a tag and a serialized snapshot back
//! into the concrete type.

use crate::{
    error::Result, Database, Device, EntityId, Error, MetadataMap, Record, ReplicationTarget,
    Timestamp, Version,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Method name of the strategy that mirrors an entity into a transport room.
pub const ROOM_REPRESENTATION: &str = "room";

/// Tag identifying the concrete type behind an [`EntityRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Database,
    ReplicationTarget,
    Device,
    Record,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Database => "database",
            EntityKind::ReplicationTarget => "replication_target",
            EntityKind::Device => "device",
            EntityKind::Record => "record",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generic reference to any versioned entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Identity, timestamps, tombstone and version shared by every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    /// Globally unique, never changes
    pub id: EntityId,
    /// When the entity was first persisted (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the entity was last persisted (milliseconds since epoch)
    pub modified_at: Timestamp,
    /// Soft delete flag (tombstone)
    #[serde(default)]
    pub deleted: bool,
    /// Monotonic version, assigned by the store on every save
    #[serde(default)]
    pub version: Version,
}

impl EntityMeta {
    pub fn new(id: impl Into<EntityId>, timestamp: Timestamp) -> Self {
        Self {
            id: id.into(),
            created_at: timestamp,
            modified_at: timestamp,
            deleted: false,
            version: 0,
        }
    }
}

/// Contract every replicated type implements.
pub trait VersionedEntity: Clone + Sized {
    const KIND: EntityKind;

    fn meta(&self) -> &EntityMeta;

    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// The database owning this entity. `None` falls back to the current database.
    fn database_id(&self) -> Option<&str>;

    /// Name of the representation strategy for newly created instances.
    fn representation_strategy(&self) -> Option<&str> {
        None
    }

    /// Properties snapshotted into a representation log at creation time.
    fn representation_metadata(&self) -> MetadataMap {
        MetadataMap::new()
    }

    /// Merge metadata produced by a representation back into this entity.
    fn store_metadata(&mut self, metadata: &MetadataMap);

    fn into_entity(self) -> Entity;

    fn from_entity(entity: Entity) -> Option<Self>;

    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(Self::KIND, self.meta().id.clone())
    }
}

/// Tagged union over every replicated type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum Entity {
    Database(Database),
    ReplicationTarget(ReplicationTarget),
    Device(Device),
    Record(Record),
}

macro_rules! each_entity {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Entity::Database($inner) => $body,
            Entity::ReplicationTarget($inner) => $body,
            Entity::Device($inner) => $body,
            Entity::Record($inner) => $body,
        }
    };
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Database(_) => EntityKind::Database,
            Entity::ReplicationTarget(_) => EntityKind::ReplicationTarget,
            Entity::Device(_) => EntityKind::Device,
            Entity::Record(_) => EntityKind::Record,
        }
    }

    pub fn meta(&self) -> &EntityMeta {
        each_entity!(self, e => e.meta())
    }

    pub fn meta_mut(&mut self) -> &mut EntityMeta {
        each_entity!(self, e => e.meta_mut())
    }

    pub fn id(&self) -> &EntityId {
        &self.meta().id
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.id().clone())
    }

    pub fn is_deleted(&self) -> bool {
        self.meta().deleted
    }

    pub fn database_id(&self) -> Option<&str> {
        each_entity!(self, e => e.database_id())
    }

    pub fn representation_strategy(&self) -> Option<&str> {
        each_entity!(self, e => e.representation_strategy())
    }

    pub fn representation_metadata(&self) -> MetadataMap {
        each_entity!(self, e => e.representation_metadata())
    }

    pub fn store_metadata(&mut self, metadata: &MetadataMap) {
        each_entity!(self, e => e.store_metadata(metadata))
    }

    /// Metadata written back by representations.
    pub fn metadata(&self) -> &MetadataMap {
        each_entity!(self, e => &e.metadata)
    }

    /// Serialize the concrete entity (without the kind tag).
    pub fn snapshot(&self) -> Result<serde_json::Value> {
        each_entity!(self, e => serde_json::to_value(e))
            .map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    /// Decode a snapshot produced by [`Entity::snapshot`] for the given kind.
    pub fn from_snapshot(kind: EntityKind, snapshot: serde_json::Value) -> Result<Self> {
        let entity = match kind {
            EntityKind::Database => serde_json::from_value(snapshot).map(Entity::Database),
            EntityKind::ReplicationTarget => {
                serde_json::from_value(snapshot).map(Entity::ReplicationTarget)
            }
            EntityKind::Device => serde_json::from_value(snapshot).map(Entity::Device),
            EntityKind::Record => serde_json::from_value(snapshot).map(Entity::Record),
        };
        entity.map_err(|e| Error::InvalidPayload(format!("{kind} snapshot: {e}")))
    }

    /// Convert into a concrete type, failing if the tag does not match.
    pub fn downcast<E: VersionedEntity>(self) -> Result<E> {
        let actual = self.kind();
        E::from_entity(self).ok_or(Error::KindMismatch {
            expected: E::KIND,
            actual,
        })
    }
}

/// Shallow merge used by every `store_metadata` implementation.
pub(crate) fn merge_metadata(into: &mut MetadataMap, from: &MetadataMap) {
    for (key, value) in from {
        into.insert(key.clone(), value.clone());
    }
}
