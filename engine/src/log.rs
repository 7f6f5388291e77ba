//! Replication and representation logs.
//!
//! Both are append-only work items owned by a target. A log is consumed by
//! soft-deleting it: a replication log once its batch was delivered, a
//! representation log once its metadata was stored or once it was given up
//! on. Deleted logs are never processed again.

use crate::{EntityId, EntityRef, LogId, MetadataMap, Timestamp, TxnId};
use serde::{Deserialize, Serialize};

/// A pending change to deliver to a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationLog {
    /// Store-local sequence; orders logs by creation
    pub id: LogId,
    pub target_id: EntityId,
    pub entity: EntityRef,
    /// Snapshot of the entity at scheduling time
    pub payload: serde_json::Value,
    /// Transaction that produced the log; logs of one transaction travel together
    pub txn_id: TxnId,
    /// Representation logs created alongside this one
    #[serde(default)]
    pub representation_logs: Vec<LogId>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub deleted: bool,
}

impl ReplicationLog {
    pub fn is_pending(&self) -> bool {
        !self.deleted
    }
}

/// A pending projection of an entity onto a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepresentationLog {
    pub id: LogId,
    pub target_id: EntityId,
    pub entity: EntityRef,
    /// Name of the representation strategy
    pub method: String,
    /// Entity properties captured when the log was created
    #[serde(default)]
    pub metadata: MetadataMap,
    pub created_at: Timestamp,
    /// Failed applications so far
    #[serde(default)]
    pub attempts: u32,
    /// Error of the last failed application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl RepresentationLog {
    pub fn is_pending(&self) -> bool {
        !self.deleted
    }

    /// Consumed without ever being applied.
    pub fn is_abandoned(&self) -> bool {
        self.deleted && self.error.is_some()
    }
}
