//! Flush planning: grouping undelivered logs and detecting restart cycles.

use crate::{error::Result, Error, LogId, ReplicationLog, TxnId};

/// Consecutive restarts without progress allowed per flush.
pub const DEFAULT_MAX_RESTARTS: u32 = 16;

/// Transient failures after which a representation log is given up on.
pub const DEFAULT_MAX_REPRESENTATION_ATTEMPTS: u32 = 5;

/// Undelivered replication logs of one transaction, in creation order.
#[derive(Debug, Clone, PartialEq)]
pub struct TxnGroup {
    pub txn_id: TxnId,
    pub logs: Vec<ReplicationLog>,
}

impl TxnGroup {
    /// Representation logs linked to any log of the group, deduplicated, in order.
    pub fn representation_ids(&self) -> Vec<LogId> {
        let mut ids: Vec<LogId> = Vec::new();
        for log in &self.logs {
            for id in &log.representation_logs {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }

    pub fn log_ids(&self) -> Vec<LogId> {
        self.logs.iter().map(|l| l.id).collect()
    }
}

/// Group logs by transaction, ordering groups by their first log id.
///
/// Deleted logs are skipped. Input order does not matter.
pub fn group_by_txn<'a>(logs: impl IntoIterator<Item = &'a ReplicationLog>) -> Vec<TxnGroup> {
    let mut pending: Vec<&ReplicationLog> = logs.into_iter().filter(|l| l.is_pending()).collect();
    pending.sort_by_key(|l| l.id);

    let mut groups: Vec<TxnGroup> = Vec::new();
    for log in pending {
        match groups.iter_mut().find(|g| g.txn_id == log.txn_id) {
            Some(group) => group.logs.push(log.clone()),
            None => groups.push(TxnGroup {
                txn_id: log.txn_id.clone(),
                logs: vec![log.clone()],
            }),
        }
    }
    groups
}

/// Detects flush restart cycles.
///
/// A restart makes progress when the target's pending representation backlog
/// shrank since the previous one. Only restarts without progress count
/// against the limit; any progress resets the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushBudget {
    max_stalled: u32,
    stalled: u32,
    restarts: u32,
    backlog: Option<usize>,
}

impl Default for FlushBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESTARTS)
    }
}

impl FlushBudget {
    pub fn new(max_stalled: u32) -> Self {
        Self {
            max_stalled,
            stalled: 0,
            restarts: 0,
            backlog: None,
        }
    }

    /// Record a restart given the backlog before and after the work that
    /// caused it.
    pub fn restart(&mut self, before: usize, after: usize) -> Result<()> {
        let baseline = self.backlog.map_or(before, |seen| seen.min(before));
        if after < baseline {
            self.stalled = 0;
        } else {
            if self.stalled >= self.max_stalled {
                return Err(Error::FlushRestartLimit {
                    limit: self.max_stalled,
                });
            }
            self.stalled += 1;
        }
        self.backlog = Some(after);
        self.restarts += 1;
        Ok(())
    }

    /// Every restart so far, with or without progress.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn stalled(&self) -> u32 {
        self.stalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityKind, EntityRef};
    use serde_json::json;

    fn log(id: LogId, txn: &str) -> ReplicationLog {
        ReplicationLog {
            id,
            target_id: "t-1".into(),
            entity: EntityRef::new(EntityKind::Record, format!("r-{id}")),
            payload: json!({}),
            txn_id: txn.into(),
            representation_logs: Vec::new(),
            created_at: 1000,
            deleted: false,
        }
    }

    #[test]
    fn groups_follow_first_log_order() {
        let logs = vec![log(4, "b"), log(1, "a"), log(3, "a"), log(2, "b"), log(5, "c")];
        let groups = group_by_txn(&logs);

        let shape: Vec<(&str, Vec<LogId>)> = groups
            .iter()
            .map(|g| (g.txn_id.as_str(), g.log_ids()))
            .collect();
        assert_eq!(
            shape,
            vec![("a", vec![1, 3]), ("b", vec![2, 4]), ("c", vec![5])]
        );
    }

    #[test]
    fn delivered_logs_are_skipped() {
        let mut delivered = log(1, "a");
        delivered.deleted = true;
        let logs = vec![delivered, log(2, "a")];

        let groups = group_by_txn(&logs);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].log_ids(), vec![2]);
    }

    #[test]
    fn representation_ids_are_deduplicated() {
        let mut a = log(1, "a");
        a.representation_logs = vec![7, 8];
        let mut b = log(2, "a");
        b.representation_logs = vec![8, 9];

        let groups = group_by_txn(&[a, b]);
        assert_eq!(groups[0].representation_ids(), vec![7, 8, 9]);
    }

    #[test]
    fn progress_never_exhausts_the_budget() {
        let mut budget = FlushBudget::new(2);
        for backlog in (0..40).rev() {
            assert!(budget.restart(backlog + 1, backlog).is_ok());
        }
        assert_eq!(budget.restarts(), 40);
        assert_eq!(budget.stalled(), 0);
    }

    #[test]
    fn stalled_restarts_are_bounded() {
        let mut budget = FlushBudget::new(2);
        // Each application creates as much work as it consumes.
        assert!(budget.restart(3, 3).is_ok());
        assert!(budget.restart(3, 3).is_ok());
        assert_eq!(budget.restart(3, 3), Err(Error::FlushRestartLimit { limit: 2 }));
        assert_eq!(budget.restarts(), 2);
    }

    #[test]
    fn progress_resets_the_stall_count() {
        let mut budget = FlushBudget::new(1);
        assert!(budget.restart(4, 4).is_ok());
        assert!(budget.restart(4, 3).is_ok());
        assert!(budget.restart(3, 3).is_ok());
        assert_eq!(budget.stalled(), 1);
        assert!(budget.restart(3, 2).is_ok());
        assert_eq!(budget.stalled(), 0);
    }

    #[test]
    fn growth_between_restarts_is_not_progress() {
        let mut budget = FlushBudget::new(0);
        assert!(budget.restart(2, 1).is_ok());
        // The backlog grew back to 2 outside the restart, then shrank to 1.
        assert_eq!(budget.restart(2, 1), Err(Error::FlushRestartLimit { limit: 0 }));
    }
}
