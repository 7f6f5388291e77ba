//! Flushing a target: applying representations, then delivering batches.
//!
//! One flush per target runs at a time. The store lock is only held for short
//! read or write sections and never across a transport call.

use std::sync::Arc;

use dashmap::DashMap;
use tessera_engine::{
    CommitHook, EntityId, FlushBudget, ReplicationBatch, ReplicationTarget, RepresentationLog,
    TxnGroup, VersionedEntity,
};
use tokio::sync::Mutex;

use crate::error::{NodeError, Result};
use crate::representation::{RepresentationContext, StrategyRegistry};
use crate::targets::DriverRegistry;
use crate::{now_millis, SharedStore};

/// What one flush of one target did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub target_id: EntityId,
    pub delivered_groups: usize,
    pub delivered_logs: usize,
    pub representations_applied: usize,
    pub restarts: u32,
    /// Groups left undelivered because a representation failed transiently
    pub held_back: usize,
    /// Representation attempts that failed
    pub failed: usize,
    /// Representation logs given up on; their groups were delivered without them
    pub abandoned: usize,
}

/// Drives the flush algorithm for individual targets.
pub struct Flusher {
    store: SharedStore,
    drivers: DriverRegistry,
    strategies: StrategyRegistry,
    locks: DashMap<EntityId, Arc<Mutex<()>>>,
    max_restarts: u32,
    max_attempts: u32,
}

impl Flusher {
    pub fn new(
        store: SharedStore,
        drivers: DriverRegistry,
        strategies: StrategyRegistry,
        max_restarts: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            drivers,
            strategies,
            locks: DashMap::new(),
            max_restarts,
            max_attempts,
        }
    }

    fn lock_for(&self, target_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(target_id.to_string()).or_default().clone()
    }

    /// Flush every undelivered group of a target, oldest first.
    ///
    /// Hooks committed while storing representation metadata are appended to
    /// `deferred`, except flushes of this target, which the restart covers.
    pub async fn replicate(
        &self,
        target_id: &str,
        deferred: &mut Vec<CommitHook>,
    ) -> Result<FlushReport> {
        let lock = self.lock_for(target_id);
        let _guard = lock.lock().await;

        let mut budget = FlushBudget::new(self.max_restarts);
        let mut report = FlushReport {
            target_id: target_id.to_string(),
            ..FlushReport::default()
        };

        'flush: loop {
            let (target, groups) = {
                let store = self.store.lock().await;
                (
                    store.get::<ReplicationTarget>(target_id),
                    store.pending_groups(target_id),
                )
            };
            let Some(target) = target.filter(ReplicationTarget::is_active) else {
                tracing::debug!(target_id = %target_id, "target inactive, nothing flushed");
                return Ok(report);
            };
            let driver = self.drivers.get(&target.kind)?;

            for group in groups {
                let (representations, backlog) = {
                    let store = self.store.lock().await;
                    (
                        store.pending_representations(&group.representation_ids()),
                        store.pending_representation_count(target_id),
                    )
                };

                let mut applied = 0;
                let mut retry_later = 0;
                for log in &representations {
                    match self.apply_representation(&target, log, deferred).await {
                        Ok(()) => applied += 1,
                        Err(e) => {
                            report.failed += 1;
                            if self.record_failure(log, &e).await? {
                                report.abandoned += 1;
                            } else {
                                retry_later += 1;
                            }
                        }
                    }
                }
                report.representations_applied += applied;

                if applied > 0 {
                    let remaining = {
                        let store = self.store.lock().await;
                        store.pending_representation_count(target_id)
                    };
                    budget.restart(backlog, remaining)?;
                    report.restarts = budget.restarts();
                    continue 'flush;
                }
                if retry_later > 0 {
                    report.held_back += 1;
                    return Ok(report);
                }

                let batch = self.prepare_batch(&group).await?;
                driver.deliver(&target, &batch).await?;

                let delivered = {
                    let mut store = self.store.lock().await;
                    store.mark_delivered(&group.log_ids())
                };
                report.delivered_groups += 1;
                report.delivered_logs += delivered;
            }

            if report.delivered_groups > 0 {
                tracing::debug!(
                    target_id = %target_id,
                    groups = report.delivered_groups,
                    logs = report.delivered_logs,
                    restarts = report.restarts,
                    "flush complete"
                );
            }
            return Ok(report);
        }
    }

    /// Run one representation and store its metadata in a single transaction.
    async fn apply_representation(
        &self,
        target: &ReplicationTarget,
        log: &RepresentationLog,
        deferred: &mut Vec<CommitHook>,
    ) -> Result<()> {
        let strategy = self.strategies.get(&log.method)?;
        let entity = {
            let store = self.store.lock().await;
            store.get_entity(&log.entity).cloned()
        }
        .ok_or_else(|| NodeError::RepresentationApply {
            method: log.method.clone(),
            message: format!("{} no longer exists", log.entity),
        })?;

        let output = strategy
            .apply(RepresentationContext {
                log,
                entity: &entity,
                target,
            })
            .await?;

        let (_, committed) = {
            let mut store = self.store.lock().await;
            store.transaction(now_millis(), |tx| {
                tx.store_metadata(&log.entity, &output.entity)?;
                if let Some(metadata) = &output.target {
                    tx.store_metadata(&target.entity_ref(), metadata)?;
                }
                tx.mark_applied(log.id)
            })?
        };

        for hook in committed.hooks {
            let own_flush = matches!(&hook, CommitHook::Flush { target_id } if *target_id == target.meta.id);
            if !own_flush && !deferred.contains(&hook) {
                deferred.push(hook);
            }
        }
        Ok(())
    }

    /// Store a failed application on its log. Returns whether the log was
    /// given up on, in which case its group no longer waits for it.
    async fn record_failure(&self, log: &RepresentationLog, error: &NodeError) -> Result<bool> {
        let permanent = !error.is_transient();
        let (abandoned, _) = {
            let mut store = self.store.lock().await;
            store.transaction(now_millis(), |tx| {
                tx.fail_representation(log.id, error.to_string(), permanent, self.max_attempts)
            })?
        };
        if abandoned {
            tracing::warn!(
                target_id = %log.target_id,
                log_id = log.id,
                method = %log.method,
                entity = %log.entity,
                error = %error,
                "representation abandoned"
            );
        } else {
            tracing::warn!(
                target_id = %log.target_id,
                log_id = log.id,
                method = %log.method,
                attempt = log.attempts + 1,
                error = %error,
                "representation failed, retrying on next flush"
            );
        }
        Ok(abandoned)
    }

    /// Refresh payloads of represented entities and build the batch.
    async fn prepare_batch(&self, group: &TxnGroup) -> Result<ReplicationBatch> {
        let mut store = self.store.lock().await;
        let represented: Vec<_> = group
            .logs
            .iter()
            .filter(|l| !l.representation_logs.is_empty())
            .map(|l| l.id)
            .collect();
        store.refresh_payloads(&represented)?;

        let current = TxnGroup {
            txn_id: group.txn_id.clone(),
            logs: group
                .logs
                .iter()
                .filter_map(|l| store.replication_log(l.id).cloned())
                .collect(),
        };
        Ok(ReplicationBatch::from_group(&current, store.node_id().clone()))
    }
}
