//! The replication orchestrator.
//!
//! [`Replicator::write`] is the single entry point for local changes: it runs a
//! closure in a store transaction, commits, flushes every target the
//! transaction registered, and then publishes state for updated databases and
//! targets.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tessera_engine::{
    CommitHook, Committed, EntityId, EntityKind, EntityRef, Error, ReplicationBuffer,
    ReplicationTarget, SaveOutcome, Store, Transaction, TxnId, VersionedEntity,
    DEFAULT_MAX_REPRESENTATION_ATTEMPTS, DEFAULT_MAX_RESTARTS,
};
use tokio::sync::Mutex;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::flush::{FlushReport, Flusher};
use crate::representation::{RepresentationStrategy, RoomStrategy, StrategyRegistry};
use crate::state::StatePublisher;
use crate::targets::{DriverRegistry, TargetDriver, TransportDriver};
use crate::transport::Transport;
use crate::{now_millis, SharedStore};

/// Tunables of the replication loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicatorSettings {
    pub max_flush_restarts: u32,
    pub max_representation_attempts: u32,
    pub lock_timeout: Duration,
    pub lock_ttl: Duration,
}

impl Default for ReplicatorSettings {
    fn default() -> Self {
        Self {
            max_flush_restarts: DEFAULT_MAX_RESTARTS,
            max_representation_attempts: DEFAULT_MAX_REPRESENTATION_ATTEMPTS,
            lock_timeout: Duration::from_secs(5),
            lock_ttl: Duration::from_secs(30),
        }
    }
}

impl From<&NodeConfig> for ReplicatorSettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            max_flush_restarts: config.max_flush_restarts,
            max_representation_attempts: config.max_representation_attempts,
            lock_timeout: config.lock_timeout,
            lock_ttl: config.lock_ttl,
        }
    }
}

/// What running the hooks of a commit did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub txn_id: Option<TxnId>,
    pub flushes: Vec<FlushReport>,
    /// Flushes that failed; their logs stay pending for a retry
    pub flush_errors: usize,
    pub states_published: usize,
    /// Buffer entries still registered after processing
    pub unflushed: usize,
}

impl CommitReport {
    pub fn delivered_logs(&self) -> usize {
        self.flushes.iter().map(|f| f.delivered_logs).sum()
    }

    pub fn flush_for(&self, target_id: &str) -> Option<&FlushReport> {
        self.flushes.iter().find(|f| f.target_id == target_id)
    }
}

/// Coordinates the store, target flushes and state publication.
#[derive(Clone)]
pub struct Replicator {
    store: SharedStore,
    transport: Arc<dyn Transport>,
    flusher: Arc<Flusher>,
    publisher: Arc<StatePublisher>,
}

impl Replicator {
    /// Start building a replicator. The transport driver and the room
    /// strategy are registered over `transport`.
    pub fn builder(store: Store, transport: Arc<dyn Transport>) -> ReplicatorBuilder {
        let mut drivers = DriverRegistry::new();
        drivers.register(Arc::new(TransportDriver::new(Arc::clone(&transport))));
        let mut strategies = StrategyRegistry::new();
        strategies.register(Arc::new(RoomStrategy::new(Arc::clone(&transport))));

        ReplicatorBuilder {
            store,
            transport,
            drivers,
            strategies,
            settings: ReplicatorSettings::default(),
        }
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Run `f` in a transaction and process its commit hooks.
    ///
    /// Flush failures are logged and leave logs pending. State publication
    /// failures are returned, although the transaction stays committed.
    pub async fn write<T, F>(&self, f: F) -> Result<(T, CommitReport)>
    where
        T: Send,
        F: FnOnce(&mut Transaction<'_>) -> tessera_engine::error::Result<T> + Send,
    {
        let (value, committed) = {
            let mut store = self.store.lock().await;
            store.transaction(now_millis(), f)?
        };
        let report = self.process(committed).await?;
        Ok((value, report))
    }

    pub async fn save<E>(&self, entity: &mut E) -> Result<(SaveOutcome, CommitReport)>
    where
        E: VersionedEntity + Send,
    {
        self.write(|tx| tx.save(entity)).await
    }

    pub async fn delete<E>(&self, entity: &mut E) -> Result<(SaveOutcome, CommitReport)>
    where
        E: VersionedEntity + Send,
    {
        self.write(|tx| tx.delete(entity)).await
    }

    /// Re-drive every target that still has undelivered logs.
    pub async fn retry_pending(&self) -> Result<CommitReport> {
        let targets = self.store.lock().await.targets_with_pending();
        let hooks = targets
            .into_iter()
            .map(|target_id| CommitHook::Flush { target_id })
            .collect();
        let mut report = CommitReport::default();
        self.run_hooks(hooks, None, &mut report).await?;
        Ok(report)
    }

    /// Flush one target now, then run whatever that flush deferred.
    pub async fn flush_target(&self, target_id: &str) -> Result<FlushReport> {
        let mut deferred = Vec::new();
        let flushed = self.flusher.replicate(target_id, &mut deferred).await?;
        let mut report = CommitReport::default();
        self.run_hooks(deferred, None, &mut report).await?;
        Ok(flushed)
    }

    /// Publish the state of one database or target.
    pub async fn publish_state(&self, entity: &EntityRef) -> Result<bool> {
        self.publisher.update_state(entity).await
    }

    /// Make a target the primary of its database, demoting the current one.
    pub async fn promote_target(&self, target_id: &str) -> Result<CommitReport> {
        let ((), report) = self.write(|tx| tx.promote_target(target_id)).await?;
        Ok(report)
    }

    /// Disabled targets get no new logs and are skipped by flushes.
    pub async fn set_target_enabled(&self, target_id: &str, enabled: bool) -> Result<CommitReport> {
        let (_, report) = self
            .write(|tx| {
                let mut target = tx.get::<ReplicationTarget>(target_id).ok_or_else(|| {
                    Error::EntityNotFound(EntityRef::new(EntityKind::ReplicationTarget, target_id))
                })?;
                target.enabled = enabled;
                tx.save(&mut target)
            })
            .await?;
        Ok(report)
    }

    async fn process(&self, committed: Committed) -> Result<CommitReport> {
        let Committed {
            txn_id,
            mut buffer,
            hooks,
        } = committed;
        let mut report = CommitReport {
            txn_id: Some(txn_id),
            ..CommitReport::default()
        };
        self.run_hooks(hooks, Some(&mut buffer), &mut report).await?;
        report.unflushed = buffer.len();
        Ok(report)
    }

    /// Flushes first, in queue order, then state publication.
    async fn run_hooks(
        &self,
        hooks: Vec<CommitHook>,
        mut buffer: Option<&mut ReplicationBuffer>,
        report: &mut CommitReport,
    ) -> Result<()> {
        let mut flushes: VecDeque<EntityId> = VecDeque::new();
        let mut states: Vec<EntityRef> = Vec::new();
        enqueue(hooks, &mut flushes, &mut states);

        while let Some(target_id) = flushes.pop_front() {
            let mut deferred = Vec::new();
            match self.flusher.replicate(&target_id, &mut deferred).await {
                Ok(flushed) => report.flushes.push(flushed),
                Err(e) => {
                    tracing::error!(target_id = %target_id, error = %e, "flush failed");
                    report.flush_errors += 1;
                }
            }
            if let Some(buffer) = buffer.as_deref_mut() {
                buffer.clear(&target_id);
            }
            enqueue(deferred, &mut flushes, &mut states);
        }

        for entity in states {
            if self.publisher.update_state(&entity).await? {
                report.states_published += 1;
            }
        }
        Ok(())
    }
}

fn enqueue(hooks: Vec<CommitHook>, flushes: &mut VecDeque<EntityId>, states: &mut Vec<EntityRef>) {
    for hook in hooks {
        match hook {
            CommitHook::Flush { target_id } => {
                if !flushes.contains(&target_id) {
                    flushes.push_back(target_id);
                }
            }
            CommitHook::PublishState { entity } => {
                if !states.contains(&entity) {
                    states.push(entity);
                }
            }
        }
    }
}

/// Assembles a [`Replicator`].
pub struct ReplicatorBuilder {
    store: Store,
    transport: Arc<dyn Transport>,
    drivers: DriverRegistry,
    strategies: StrategyRegistry,
    settings: ReplicatorSettings,
}

impl ReplicatorBuilder {
    /// Add or replace the driver of a target kind.
    pub fn driver(mut self, driver: Arc<dyn TargetDriver>) -> Self {
        self.drivers.register(driver);
        self
    }

    /// Add or replace a representation strategy.
    pub fn strategy(mut self, strategy: Arc<dyn RepresentationStrategy>) -> Self {
        self.strategies.register(strategy);
        self
    }

    pub fn settings(mut self, settings: ReplicatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Replicator {
        let mut store = self.store;
        let kinds = self.drivers.target_kinds();
        for kind in kinds.kinds() {
            if let Ok(capabilities) = kinds.get(kind) {
                store.register_target_kind(kind, capabilities);
            }
        }

        let store: SharedStore = Arc::new(Mutex::new(store));
        let flusher = Flusher::new(
            Arc::clone(&store),
            self.drivers,
            self.strategies,
            self.settings.max_flush_restarts,
            self.settings.max_representation_attempts,
        );
        let publisher = StatePublisher::new(
            Arc::clone(&store),
            Arc::clone(&self.transport),
            self.settings.lock_timeout,
            self.settings.lock_ttl,
        );

        Replicator {
            store,
            transport: self.transport,
            flusher: Arc::new(flusher),
            publisher: Arc::new(publisher),
        }
    }
}
