//! Per-transaction replication buffer.
//!
//! A transaction owns exactly one buffer. Every outermost save registers each
//! of its targets here; only the first registration of a target within the
//! transaction produces a commit hook, so a target is flushed at most once per
//! transaction no matter how many entities were written.

use crate::{error::Result, EntityId, Error, ReplicationTarget};
use serde::{Deserialize, Serialize};

/// Outcome of [`ReplicationBuffer::register_flush`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First registration of this target in the transaction; a flush hook must be queued.
    First,
    /// The target is already pending; the instance was appended.
    Repeat,
}

/// Targets awaiting a flush, keyed by target id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFlush {
    pub target_id: EntityId,
    /// Every instance registered for this target, in registration order
    pub targets: Vec<ReplicationTarget>,
}

/// Multimap of target id to the target instances registered during one transaction.
///
/// Keyed by id rather than by name: target names are only unique within a database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationBuffer {
    bound: bool,
    pending: Vec<PendingFlush>,
}

impl ReplicationBuffer {
    /// A buffer not attached to any transaction. Registration fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer bound to an active transaction.
    pub(crate) fn bound() -> Self {
        Self {
            bound: true,
            pending: Vec::new(),
        }
    }

    /// Unbind from the transaction, keeping the pending entries for the commit hooks.
    pub(crate) fn detach(&mut self) -> Self {
        self.bound = false;
        Self {
            bound: false,
            pending: std::mem::take(&mut self.pending),
        }
    }

    /// Whether the buffer still belongs to an open transaction.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Record that `target` must be flushed when the transaction commits.
    pub fn register_flush(&mut self, target: &ReplicationTarget) -> Result<Registration> {
        if !self.bound {
            return Err(Error::NotInTransaction);
        }

        let target_id = &target.meta.id;
        match self.pending.iter_mut().find(|p| &p.target_id == target_id) {
            Some(entry) => {
                entry.targets.push(target.clone());
                Ok(Registration::Repeat)
            }
            None => {
                self.pending.push(PendingFlush {
                    target_id: target_id.clone(),
                    targets: vec![target.clone()],
                });
                Ok(Registration::First)
            }
        }
    }

    /// Pending entries in first-registration order.
    pub fn pending(&self) -> &[PendingFlush] {
        &self.pending
    }

    pub fn get(&self, target_id: &str) -> Option<&PendingFlush> {
        self.pending.iter().find(|p| p.target_id == target_id)
    }

    /// Remove a target's entry. Returns whether it was present.
    pub fn clear(&mut self, target_id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.target_id != target_id);
        self.pending.len() != before
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
