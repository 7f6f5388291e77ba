//! Inbound ingest decisions.
//!
//! Entities received from other devices are loaded raw: they never schedule
//! replication. When the same entity exists locally, the higher
//! `(version, modified_at)` wins. An exact tie is broken by comparing the
//! canonical JSON snapshots so every device picks the same winner regardless
//! of arrival order.

use crate::{error::Result, Entity, EntityRef};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// What happened to one incoming entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IngestDecision {
    /// Incoming state replaced (or created) the local row
    Applied,
    /// Local state is newer; incoming dropped
    Stale,
    /// Identical to the local row
    Unchanged,
}

/// Outcome of ingesting one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub applied: Vec<EntityRef>,
    pub stale: Vec<EntityRef>,
    pub unchanged: Vec<EntityRef>,
    /// The batch originated from this node and was skipped entirely
    #[serde(default)]
    pub own_origin: bool,
}

impl IngestResult {
    pub(crate) fn record(&mut self, entity: EntityRef, decision: IngestDecision) {
        match decision {
            IngestDecision::Applied => self.applied.push(entity),
            IngestDecision::Stale => self.stale.push(entity),
            IngestDecision::Unchanged => self.unchanged.push(entity),
        }
    }

    pub fn merge(&mut self, other: IngestResult) {
        self.applied.extend(other.applied);
        self.stale.extend(other.stale);
        self.unchanged.extend(other.unchanged);
    }

    pub fn total(&self) -> usize {
        self.applied.len() + self.stale.len() + self.unchanged.len()
    }
}

/// Decide whether `incoming` should replace `stored`.
pub fn decide(incoming: &Entity, stored: Option<&Entity>) -> Result<IngestDecision> {
    let Some(stored) = stored else {
        return Ok(IngestDecision::Applied);
    };

    let incoming_key = (incoming.meta().version, incoming.meta().modified_at);
    let stored_key = (stored.meta().version, stored.meta().modified_at);

    let ordering = match incoming_key.cmp(&stored_key) {
        Ordering::Equal => {
            // serde_json maps are ordered by key, so to_string is canonical.
            let a = incoming.snapshot()?.to_string();
            let b = stored.snapshot()?.to_string();
            a.cmp(&b)
        }
        other => other,
    };

    Ok(match ordering {
        Ordering::Greater => IngestDecision::Applied,
        Ordering::Less => IngestDecision::Stale,
        Ordering::Equal => IngestDecision::Unchanged,
    })
}
