//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory Store and persistent storage.
//! They are designed for deterministic serialization to ensure consistency.

use crate::{
    error::Result, Credentials, DatabaseConfig, Entity, EntityRef, Error, LogId, NodeId,
    ReplicationLog, RepresentationLog, Schema, SchemaVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the store state.
///
/// Uses BTreeMap and id-sorted vectors for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version at time of snapshot
    pub schema_version: SchemaVersion,
    /// Node ID of the store
    pub node_id: NodeId,
    /// Transactions started so far; keeps transaction ids unique across restarts
    pub txn_counter: u64,
    /// Next log id to hand out
    pub next_log_id: LogId,
    /// All entities keyed by `kind:id`
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub replication_logs: Vec<ReplicationLog>,
    #[serde(default)]
    pub representation_logs: Vec<RepresentationLog>,
    #[serde(default)]
    pub config: Option<DatabaseConfig>,
    #[serde(default)]
    pub credentials: Vec<Credentials>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(schema_version: SchemaVersion, node_id: impl Into<NodeId>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            node_id: node_id.into(),
            txn_counter: 0,
            next_log_id: 1,
            entities: BTreeMap::new(),
            replication_logs: Vec::new(),
            representation_logs: Vec::new(),
            config: None,
            credentials: Vec::new(),
        }
    }

    /// Add an entity to the snapshot.
    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.entity_ref().to_string(), entity);
    }

    /// Get an entity from the snapshot.
    pub fn get_entity(&self, entity: &EntityRef) -> Option<&Entity> {
        self.entities.get(&entity.to_string())
    }

    /// Count entities including tombstones.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Count undelivered replication logs.
    pub fn pending_replication_count(&self) -> usize {
        self.replication_logs.iter().filter(|l| l.is_pending()).count()
    }

    /// Count unapplied representation logs.
    pub fn pending_representation_count(&self) -> usize {
        self.representation_logs
            .iter()
            .filter(|l| l.is_pending())
            .count()
    }

    /// Validate the snapshot against a schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        // Check schema version
        if self.schema_version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }

        for (key, entity) in &self.entities {
            if key != &entity.entity_ref().to_string() {
                return Err(Error::InvalidSnapshot(format!(
                    "entity stored under {key} is {}",
                    entity.entity_ref()
                )));
            }
            if let Entity::Record(record) = entity {
                schema.validate_record(record)?;
            }
        }

        let max_log_id = self
            .replication_logs
            .iter()
            .map(|l| l.id)
            .chain(self.representation_logs.iter().map(|l| l.id))
            .max()
            .unwrap_or(0);
        if max_log_id >= self.next_log_id {
            return Err(Error::InvalidSnapshot(format!(
                "log id {max_log_id} is not below next log id {}",
                self.next_log_id
            )));
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        // Validate format version
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Snapshot format version
    pub format_version: u32,
    /// Schema version
    pub schema_version: SchemaVersion,
    /// Node ID
    pub node_id: NodeId,
    /// Transactions started at snapshot time
    pub txn_counter: u64,
    /// Total entity count
    pub entity_count: usize,
    /// Undelivered replication log count
    pub pending_replication_count: usize,
    /// Unapplied representation log count
    pub pending_representation_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            schema_version: snapshot.schema_version,
            node_id: snapshot.node_id.clone(),
            txn_counter: snapshot.txn_counter,
            entity_count: snapshot.entity_count(),
            pending_replication_count: snapshot.pending_replication_count(),
            pending_representation_count: snapshot.pending_representation_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, FieldDef, FieldType};
    use crate::{Database, EntityKind, Record, VersionedEntity};
    use serde_json::json;

    fn test_schema() -> Schema {
        Schema::new(1).with_collection(CollectionSchema::new(
            "users",
            vec![
                FieldDef::required("name", FieldType::String),
                FieldDef::optional("age", FieldType::Int),
            ],
        ))
    }

    fn user(id: &str, name: serde_json::Value) -> Entity {
        Record::new(id, "db-1", "users", json!({ "name": name }), 1000).into_entity()
    }

    fn replication_log(id: LogId, deleted: bool) -> ReplicationLog {
        ReplicationLog {
            id,
            target_id: "db-1.dummy".into(),
            entity: EntityRef::new(EntityKind::Database, "db-1"),
            payload: json!({}),
            txn_id: "node-1:1".into(),
            representation_logs: vec![],
            created_at: 1000,
            deleted,
        }
    }

    #[test]
    fn create_empty_snapshot() {
        let snapshot = StoreSnapshot::new(1, "node-1");
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.schema_version, 1);
        assert_eq!(snapshot.node_id, "node-1");
        assert_eq!(snapshot.entity_count(), 0);
        assert_eq!(snapshot.next_log_id, 1);
    }

    #[test]
    fn add_and_get_entity() {
        let mut snapshot = StoreSnapshot::new(1, "node-1");
        snapshot.add_entity(user("user-1", json!("Alice")));

        assert_eq!(snapshot.entity_count(), 1);
        let key = EntityRef::new(EntityKind::Record, "user-1");
        let retrieved = snapshot.get_entity(&key).unwrap();
        assert_eq!(retrieved.id(), "user-1");
    }

    #[test]
    fn json_roundtrip() {
        let mut snapshot = StoreSnapshot::new(1, "node-1");
        snapshot.add_entity(Database::new("db-1", "notes", 1000).into_entity());
        snapshot.add_entity(user("user-1", json!("Alice")));
        snapshot.replication_logs.push(replication_log(1, false));
        snapshot.next_log_id = 2;
        snapshot.config = Some(DatabaseConfig {
            database_id: "db-1".into(),
            created_at: 1000,
        });

        let json = snapshot.to_json().unwrap();
        let restored = StoreSnapshot::from_json(&json).unwrap();

        assert_eq!(snapshot, restored);
    }

    #[test]
    fn deterministic_serialization() {
        let mut snapshot1 = StoreSnapshot::new(1, "node-1");
        let mut snapshot2 = StoreSnapshot::new(1, "node-1");

        snapshot1.add_entity(user("user-a", json!("Alice")));
        snapshot1.add_entity(user("user-b", json!("Bob")));

        // Add in reverse order
        snapshot2.add_entity(user("user-b", json!("Bob")));
        snapshot2.add_entity(user("user-a", json!("Alice")));

        assert_eq!(snapshot1.to_json().unwrap(), snapshot2.to_json().unwrap());
    }

    #[test]
    fn validate_snapshot_success() {
        let mut snapshot = StoreSnapshot::new(1, "node-1");
        snapshot.add_entity(user("user-1", json!("Alice")));
        snapshot.replication_logs.push(replication_log(1, false));
        snapshot.next_log_id = 2;

        assert!(snapshot.validate(&test_schema()).is_ok());
    }

    #[test]
    fn validate_snapshot_schema_version_mismatch() {
        let snapshot = StoreSnapshot::new(99, "node-1"); // Wrong version

        let result = snapshot.validate(&test_schema());
        assert!(matches!(result, Err(Error::SchemaVersionMismatch { .. })));
    }

    #[test]
    fn validate_snapshot_invalid_payload() {
        let mut snapshot = StoreSnapshot::new(1, "node-1");
        snapshot.add_entity(user("user-1", json!(123))); // name should be string

        let result = snapshot.validate(&test_schema());
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn validate_rejects_log_id_overlap() {
        let mut snapshot = StoreSnapshot::new(1, "node-1");
        snapshot.replication_logs.push(replication_log(5, false));
        snapshot.next_log_id = 5;

        let result = snapshot.validate(&test_schema());
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn snapshot_metadata() {
        let mut snapshot = StoreSnapshot::new(1, "node-1");
        snapshot.txn_counter = 42;
        snapshot.add_entity(user("user-1", json!("Alice")));
        snapshot.replication_logs.push(replication_log(1, true));
        snapshot.replication_logs.push(replication_log(2, false));

        let metadata: SnapshotMetadata = (&snapshot).into();

        assert_eq!(metadata.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(metadata.node_id, "node-1");
        assert_eq!(metadata.txn_counter, 42);
        assert_eq!(metadata.entity_count, 1);
        assert_eq!(metadata.pending_replication_count, 1);
        assert_eq!(metadata.pending_representation_count, 0);
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "schemaVersion": 1,
            "nodeId": "node-1",
            "txnCounter": 0,
            "nextLogId": 1,
            "entities": {}
        }"#;

        let result = StoreSnapshot::from_json(json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }
}
