//! Wire payloads exchanged over the transport.
//!
//! Everything here is JSON with camelCase field names. The relay and the
//! node's HTTP transport share these types so the two sides cannot drift.

use crate::{error::Result, Entity, EntityRef, NodeId, TxnGroup, TxnId};
use serde::{Deserialize, Serialize};

/// Event type of a replicated transaction.
pub const REPLICATION_EVENT: &str = "tessera.replicate";
/// Room state key holding the authoritative database fixture.
pub const DATABASE_STATE: &str = "tessera.database";
/// Room state key holding the authoritative primary-target fixture.
pub const TARGET_STATE: &str = "tessera.database.target";

/// One entity snapshot inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub entity: EntityRef,
    pub snapshot: serde_json::Value,
}

/// All changes of one transaction for one target. Delivered as a single event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationBatch {
    pub txn_id: TxnId,
    /// Node that produced the transaction
    pub origin: NodeId,
    pub entries: Vec<BatchEntry>,
}

impl ReplicationBatch {
    pub fn from_group(group: &TxnGroup, origin: impl Into<NodeId>) -> Self {
        Self {
            txn_id: group.txn_id.clone(),
            origin: origin.into(),
            entries: group
                .logs
                .iter()
                .map(|log| BatchEntry {
                    entity: log.entity.clone(),
                    snapshot: log.payload.clone(),
                })
                .collect(),
        }
    }

    /// Decode every entry into its concrete entity.
    pub fn entities(&self) -> Result<Vec<Entity>> {
        self.entries
            .iter()
            .map(|e| Entity::from_snapshot(e.entity.kind, e.snapshot.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A state value published under a room state key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFixture {
    /// Full serialized entity snapshot
    pub fixture: serde_json::Value,
}

/// An event read back from a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub event_id: String,
    pub room_id: String,
    /// Position in the room's total order
    pub seq: u64,
    pub event_type: String,
    pub sender: String,
    pub content: serde_json::Value,
    pub origin_ts: u64,
}

/// Restricts which events a read returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    /// Event types to include; empty means all
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl EventFilter {
    pub fn of_type(event_type: impl Into<String>) -> Self {
        Self {
            types: vec![event_type.into()],
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, event_type: &str) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t == event_type)
    }
}

/// A page of events plus the token to continue from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    pub events: Vec<RoomEvent>,
    /// Pass as `since` to read events after this page
    pub next_since: u64,
    pub has_more: bool,
}

/// Relay request and response bodies.
pub mod relay {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CreateRoomRequest {
        pub name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub topic: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CreateRoomResponse {
        pub room_id: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PublishRequest {
        pub event_type: String,
        pub content: serde_json::Value,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct PublishResponse {
        pub event_id: String,
        pub seq: u64,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EventsQuery {
        #[serde(default)]
        pub since: Option<u64>,
        /// Comma separated event types
        #[serde(default)]
        pub types: Option<String>,
        #[serde(default)]
        pub limit: Option<u32>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LockRequest {
        pub key: String,
        pub ttl_ms: u64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LockResponse {
        pub token: String,
        pub expires_at: u64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ReleaseLockRequest {
        pub key: String,
        pub token: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RegisterMemberRequest {
        pub username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub display_name: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RegisterMemberResponse {
        pub member_id: String,
        pub access_token: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InviteRequest {
        pub member_id: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ErrorBody {
        pub error: String,
        pub code: String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, ReplicationLog, VersionedEntity};
    use serde_json::json;

    #[test]
    fn batch_from_group_preserves_log_order() {
        let db = Database::new("db-1", "notes", 1000);
        let logs = vec![
            ReplicationLog {
                id: 1,
                target_id: "t-1".into(),
                entity: db.entity_ref(),
                payload: db.clone().into_entity().snapshot().unwrap(),
                txn_id: "node-1:1".into(),
                representation_logs: vec![],
                created_at: 1000,
                deleted: false,
            },
            ReplicationLog {
                id: 2,
                target_id: "t-1".into(),
                entity: crate::EntityRef::new(crate::EntityKind::Record, "r-1"),
                payload: json!({
                    "id": "r-1", "createdAt": 1000, "modifiedAt": 1000, "version": 0,
                    "databaseId": "db-1", "collection": "todos", "payload": {"title": "x"}
                }),
                txn_id: "node-1:1".into(),
                representation_logs: vec![],
                created_at: 1000,
                deleted: false,
            },
        ];
        let group = crate::group_by_txn(&logs).remove(0);

        let batch = ReplicationBatch::from_group(&group, "node-1");
        assert_eq!(batch.txn_id, "node-1:1");
        assert_eq!(batch.len(), 2);

        let entities = batch.entities().unwrap();
        assert_eq!(entities[0].id(), "db-1");
        assert_eq!(entities[1].id(), "r-1");
    }

    #[test]
    fn filter_matching() {
        assert!(EventFilter::default().matches("anything"));
        let filter = EventFilter::of_type(REPLICATION_EVENT);
        assert!(filter.matches("tessera.replicate"));
        assert!(!filter.matches("m.room.message"));
    }

    #[test]
    fn fixture_wire_shape() {
        let fixture = StateFixture {
            fixture: json!({"id": "db-1"}),
        };
        assert_eq!(
            serde_json::to_value(&fixture).unwrap(),
            json!({"fixture": {"id": "db-1"}})
        );
    }
}
