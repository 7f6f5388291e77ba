//! Store - the in-memory state container.
//!
//! The Store holds every entity, the replication and representation logs, the
//! current database config and local credentials. All writes go through a
//! [`Transaction`], which has exclusive access to the store for its lifetime,
//! keeps an undo log, and carries its own [`ReplicationBuffer`]. Dropping a
//! transaction without committing rolls it back.

use crate::{
    error::Result,
    flush::group_by_txn,
    ingest::{self, IngestDecision},
    pipeline::{plan_replication, Intent, SaveOptions},
    version, Credentials, Database, DatabaseConfig, Entity, EntityId, EntityKind, EntityRef,
    Error, IngestResult, LogId, MetadataMap, NodeId, Registration, ReplicationBatch,
    ReplicationBuffer, ReplicationLog, ReplicationTarget, RepresentationLog, Schema,
    StoreSnapshot, TargetCapabilities, TargetKinds, Timestamp, TxnGroup, TxnId, Version,
    VersionedEntity, SNAPSHOT_FORMAT_VERSION,
};
use std::collections::BTreeMap;

/// Work the caller must run after a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitHook {
    /// Flush a target's pending replication logs
    Flush { target_id: EntityId },
    /// Publish the authoritative state of an updated database or target
    PublishState { entity: EntityRef },
}

/// Result of committing a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub txn_id: TxnId,
    /// The transaction's buffer, detached; entries are cleared as flushes complete
    pub buffer: ReplicationBuffer,
    /// Hooks in the order they were queued
    pub hooks: Vec<CommitHook>,
}

impl Committed {
    pub fn flush_targets(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().filter_map(|h| match h {
            CommitHook::Flush { target_id } => Some(target_id.as_str()),
            _ => None,
        })
    }

    pub fn state_updates(&self) -> impl Iterator<Item = &EntityRef> {
        self.hooks.iter().filter_map(|h| match h {
            CommitHook::PublishState { entity } => Some(entity),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Result of saving one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub entity: EntityRef,
    /// Version persisted
    pub version: Version,
    /// The row did not exist before
    pub created: bool,
    /// Replication was scheduled for this save
    pub scheduled: bool,
}

/// The main store holding all state.
#[derive(Debug, Clone)]
pub struct Store {
    /// Schema for record validation
    schema: Schema,
    /// Node ID for this store instance
    node_id: NodeId,
    /// Registered target kinds
    target_kinds: TargetKinds,
    entities: BTreeMap<EntityRef, Entity>,
    replication_logs: BTreeMap<LogId, ReplicationLog>,
    representation_logs: BTreeMap<LogId, RepresentationLog>,
    config: Option<DatabaseConfig>,
    credentials: BTreeMap<(EntityId, EntityId), Credentials>,
    next_log_id: LogId,
    txn_counter: u64,
}

impl Store {
    /// Create a new store with the given schema and node ID.
    pub fn new(schema: Schema, node_id: impl Into<NodeId>) -> Self {
        Self {
            schema,
            node_id: node_id.into(),
            target_kinds: TargetKinds::default(),
            entities: BTreeMap::new(),
            replication_logs: BTreeMap::new(),
            representation_logs: BTreeMap::new(),
            config: None,
            credentials: BTreeMap::new(),
            next_log_id: 1,
            txn_counter: 0,
        }
    }

    /// Builder-style registration of the target kinds in use.
    pub fn with_target_kinds(mut self, target_kinds: TargetKinds) -> Self {
        self.target_kinds = target_kinds;
        self
    }

    pub fn register_target_kind(&mut self, kind: impl Into<String>, capabilities: TargetCapabilities) {
        self.target_kinds.register(kind, capabilities);
    }

    /// Get the node ID.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn target_kinds(&self) -> &TargetKinds {
        &self.target_kinds
    }

    // ---- transactions -------------------------------------------------

    /// Start a transaction. `now` stamps every row it writes.
    pub fn begin(&mut self, now: Timestamp) -> Transaction<'_> {
        self.txn_counter += 1;
        let id = format!("{}:{}", self.node_id, self.txn_counter);
        Transaction {
            store: self,
            id,
            now,
            undo: Vec::new(),
            buffer: ReplicationBuffer::bound(),
            hooks: Vec::new(),
            finished: false,
        }
    }

    /// Run `f` in a transaction, committing on success and rolling back on error.
    pub fn transaction<T>(
        &mut self,
        now: Timestamp,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<(T, Committed)> {
        let mut tx = self.begin(now);
        let value = f(&mut tx)?;
        Ok((value, tx.commit()))
    }

    /// Save one entity in its own transaction.
    pub fn save<E: VersionedEntity>(&mut self, entity: &mut E, now: Timestamp) -> Result<Committed> {
        self.transaction(now, |tx| tx.save(entity).map(|_| ()))
            .map(|(_, committed)| committed)
    }

    // ---- reads --------------------------------------------------------

    pub fn get_entity(&self, entity: &EntityRef) -> Option<&Entity> {
        self.entities.get(entity)
    }

    /// Get a non-deleted entity by id.
    pub fn get<E: VersionedEntity>(&self, id: &str) -> Option<E> {
        self.get_including_deleted::<E>(id)
            .filter(|e| !e.meta().deleted)
    }

    /// Get an entity by id, tombstones included.
    pub fn get_including_deleted<E: VersionedEntity>(&self, id: &str) -> Option<E> {
        self.entities
            .get(&EntityRef::new(E::KIND, id))
            .cloned()
            .and_then(E::from_entity)
    }

    /// All entities of a kind, tombstones included, ordered by id.
    pub fn entities_of(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities
            .iter()
            .filter(move |(key, _)| key.kind == kind)
            .map(|(_, entity)| entity)
    }

    pub fn config(&self) -> Option<&DatabaseConfig> {
        self.config.as_ref()
    }

    pub fn current_database(&self) -> Option<Database> {
        self.config
            .as_ref()
            .and_then(|c| self.get::<Database>(&c.database_id))
    }

    /// Active targets of a database: primary first, then by creation time and id.
    pub fn targets_for(&self, database_id: &str) -> Vec<ReplicationTarget> {
        let mut targets: Vec<ReplicationTarget> = self
            .entities_of(EntityKind::ReplicationTarget)
            .filter_map(|e| match e {
                Entity::ReplicationTarget(t) if t.database_id == database_id && t.is_active() => {
                    Some(t.clone())
                }
                _ => None,
            })
            .collect();
        targets.sort_by(|a, b| {
            (!a.primary, a.meta.created_at, &a.meta.id).cmp(&(!b.primary, b.meta.created_at, &b.meta.id))
        });
        targets
    }

    /// The non-deleted primary target of a database.
    pub fn primary_target(&self, database_id: &str) -> Option<ReplicationTarget> {
        self.entities_of(EntityKind::ReplicationTarget)
            .find_map(|e| match e {
                Entity::ReplicationTarget(t)
                    if t.database_id == database_id && t.primary && !t.meta.deleted =>
                {
                    Some(t.clone())
                }
                _ => None,
            })
    }

    pub fn replication_log(&self, id: LogId) -> Option<&ReplicationLog> {
        self.replication_logs.get(&id)
    }

    pub fn representation_log(&self, id: LogId) -> Option<&RepresentationLog> {
        self.representation_logs.get(&id)
    }

    /// Every replication log, ordered by id.
    pub fn replication_logs(&self) -> impl Iterator<Item = &ReplicationLog> {
        self.replication_logs.values()
    }

    /// Every representation log, ordered by id.
    pub fn representation_logs(&self) -> impl Iterator<Item = &RepresentationLog> {
        self.representation_logs.values()
    }

    /// Undelivered logs of a target grouped by transaction, oldest group first.
    pub fn pending_groups(&self, target_id: &str) -> Vec<TxnGroup> {
        group_by_txn(
            self.replication_logs
                .values()
                .filter(|l| l.target_id == target_id),
        )
    }

    /// Targets with undelivered logs, ordered by their oldest pending log.
    pub fn targets_with_pending(&self) -> Vec<EntityId> {
        let mut targets: Vec<EntityId> = Vec::new();
        for log in self.replication_logs.values().filter(|l| l.is_pending()) {
            if !targets.contains(&log.target_id) {
                targets.push(log.target_id.clone());
            }
        }
        targets
    }

    /// The still pending representation logs among `ids`, in the given order.
    pub fn pending_representations(&self, ids: &[LogId]) -> Vec<RepresentationLog> {
        ids.iter()
            .filter_map(|id| self.representation_logs.get(id))
            .filter(|l| l.is_pending())
            .cloned()
            .collect()
    }

    /// Pending representation logs owned by a target.
    pub fn pending_representation_count(&self, target_id: &str) -> usize {
        self.representation_logs
            .values()
            .filter(|l| l.target_id == target_id && l.is_pending())
            .count()
    }

    pub fn credentials(&self, device_id: &str, target_id: &str) -> Option<&Credentials> {
        self.credentials
            .get(&(device_id.to_string(), target_id.to_string()))
    }

    /// Any credentials stored for a target.
    pub fn credentials_for_target(&self, target_id: &str) -> Option<&Credentials> {
        self.credentials.values().find(|c| c.target_id == target_id)
    }

    // ---- log consumption ----------------------------------------------

    /// Consume delivered replication logs. Returns how many were pending.
    pub fn mark_delivered(&mut self, ids: &[LogId]) -> usize {
        let mut count = 0;
        for id in ids {
            if let Some(log) = self.replication_logs.get_mut(id) {
                if !log.deleted {
                    log.deleted = true;
                    count += 1;
                }
            }
        }
        count
    }

    /// Re-snapshot the entities of the given logs so they carry current state.
    pub fn refresh_payloads(&mut self, ids: &[LogId]) -> Result<usize> {
        let mut count = 0;
        for id in ids {
            let Some(log) = self.replication_logs.get_mut(id) else {
                continue;
            };
            if let Some(entity) = self.entities.get(&log.entity) {
                log.payload = entity.snapshot()?;
                count += 1;
            }
        }
        Ok(count)
    }

    // ---- inbound ------------------------------------------------------

    /// Load a batch received from another node. Own batches are skipped.
    pub fn ingest(&mut self, batch: &ReplicationBatch, now: Timestamp) -> Result<IngestResult> {
        if batch.origin == self.node_id {
            return Ok(IngestResult {
                own_origin: true,
                ..IngestResult::default()
            });
        }

        let entities = batch.entities()?;
        let (result, _) = self.transaction(now, |tx| {
            let mut result = IngestResult::default();
            for entity in entities {
                let entity_ref = entity.entity_ref();
                let decision = tx.load_fixture(entity)?;
                result.record(entity_ref, decision);
            }
            Ok(result)
        })?;
        Ok(result)
    }

    // ---- persistence --------------------------------------------------

    /// Export the complete state as a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        StoreSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version: self.schema.version,
            node_id: self.node_id.clone(),
            txn_counter: self.txn_counter,
            next_log_id: self.next_log_id,
            entities: self
                .entities
                .iter()
                .map(|(key, entity)| (key.to_string(), entity.clone()))
                .collect(),
            replication_logs: self.replication_logs.values().cloned().collect(),
            representation_logs: self.representation_logs.values().cloned().collect(),
            config: self.config.clone(),
            credentials: self.credentials.values().cloned().collect(),
        }
    }

    /// Replace the state with a snapshot taken by the same node.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate(&self.schema)?;
        if snapshot.node_id != self.node_id {
            return Err(Error::InvalidSnapshot(format!(
                "snapshot belongs to node {}, not {}",
                snapshot.node_id, self.node_id
            )));
        }

        self.entities = snapshot
            .entities
            .into_values()
            .map(|e| (e.entity_ref(), e))
            .collect();
        self.replication_logs = snapshot
            .replication_logs
            .into_iter()
            .map(|l| (l.id, l))
            .collect();
        self.representation_logs = snapshot
            .representation_logs
            .into_iter()
            .map(|l| (l.id, l))
            .collect();
        self.config = snapshot.config;
        self.credentials = snapshot
            .credentials
            .into_iter()
            .map(|c| ((c.device_id.clone(), c.target_id.clone()), c))
            .collect();
        self.next_log_id = snapshot.next_log_id;
        self.txn_counter = snapshot.txn_counter;
        Ok(())
    }

    fn allocate_log_id(&mut self) -> LogId {
        let id = self.next_log_id;
        self.next_log_id += 1;
        id
    }
}

/// Previous values restored on rollback.
#[derive(Debug)]
enum Undo {
    Entity(EntityRef, Option<Entity>),
    ReplicationLog(LogId, Option<ReplicationLog>),
    RepresentationLog(LogId, Option<RepresentationLog>),
    Config(Option<DatabaseConfig>),
    Credentials((EntityId, EntityId), Option<Credentials>),
}

/// An open transaction with exclusive access to the store.
#[derive(Debug)]
pub struct Transaction<'s> {
    store: &'s mut Store,
    id: TxnId,
    now: Timestamp,
    undo: Vec<Undo>,
    buffer: ReplicationBuffer,
    hooks: Vec<CommitHook>,
    finished: bool,
}

impl<'s> Transaction<'s> {
    pub fn id(&self) -> &TxnId {
        &self.id
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Read access to the store, including this transaction's uncommitted writes.
    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn buffer(&self) -> &ReplicationBuffer {
        &self.buffer
    }

    pub fn hooks(&self) -> &[CommitHook] {
        &self.hooks
    }

    pub fn get<E: VersionedEntity>(&self, id: &str) -> Option<E> {
        self.store.get(id)
    }

    /// Save an entity and schedule its replication.
    pub fn save<E: VersionedEntity>(&mut self, entity: &mut E) -> Result<SaveOutcome> {
        self.save_with(entity, SaveOptions::top_level())
    }

    pub fn save_with<E: VersionedEntity>(
        &mut self,
        entity: &mut E,
        options: SaveOptions,
    ) -> Result<SaveOutcome> {
        let mut erased = entity.clone().into_entity();
        let outcome = self.save_entity(&mut erased, options)?;
        *entity.meta_mut() = erased.meta().clone();
        Ok(outcome)
    }

    /// Soft delete: a save with the tombstone set.
    pub fn delete<E: VersionedEntity>(&mut self, entity: &mut E) -> Result<SaveOutcome> {
        let was_deleted = entity.meta().deleted;
        entity.meta_mut().deleted = true;
        let result = self.save(entity);
        if result.is_err() {
            entity.meta_mut().deleted = was_deleted;
        }
        result
    }

    /// The save path: version check, validation, persist, then scheduling at depth 0.
    pub fn save_entity(&mut self, entity: &mut Entity, options: SaveOptions) -> Result<SaveOutcome> {
        let key = entity.entity_ref();
        let stored = self.store.entities.get(&key);
        let created = stored.is_none();
        let stored_created_at = stored.map(|e| e.meta().created_at);

        let version =
            version::check_write(&key.id, entity.meta().version, stored.map(|e| e.meta().version))?;
        self.validate(entity)?;

        {
            let meta = entity.meta_mut();
            meta.version = version;
            meta.modified_at = self.now;
            if let Some(created_at) = stored_created_at {
                meta.created_at = created_at;
            }
        }
        self.put_entity(entity.clone());

        if !created && matches!(key.kind, EntityKind::Database | EntityKind::ReplicationTarget) {
            self.push_hook(CommitHook::PublishState {
                entity: key.clone(),
            });
        }

        let scheduled = options.schedules();
        if scheduled {
            self.schedule(entity, created, options)?;
        }

        Ok(SaveOutcome {
            entity: key,
            version,
            created,
            scheduled,
        })
    }

    /// Schedule replication of an already persisted entity.
    pub fn schedule_replication(&mut self, entity: &EntityRef, created: bool) -> Result<()> {
        let stored = self
            .store
            .entities
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::EntityNotFound(entity.clone()))?;
        self.schedule(&stored, created, SaveOptions::top_level())
    }

    /// Merge representation metadata into a stored entity and save it.
    pub fn store_metadata(&mut self, entity: &EntityRef, metadata: &MetadataMap) -> Result<SaveOutcome> {
        let mut stored = self
            .store
            .entities
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::EntityNotFound(entity.clone()))?;
        stored.store_metadata(metadata);
        self.save_entity(&mut stored, SaveOptions::top_level())
    }

    /// Consume a representation log.
    pub fn mark_applied(&mut self, log_id: LogId) -> Result<()> {
        let log = self
            .store
            .representation_logs
            .get(&log_id)
            .cloned()
            .ok_or(Error::LogNotFound(log_id))?;
        if log.deleted {
            return Ok(());
        }
        let mut applied = log.clone();
        applied.deleted = true;
        self.store.representation_logs.insert(log_id, applied);
        self.undo.push(Undo::RepresentationLog(log_id, Some(log)));
        Ok(())
    }

    /// Record a failed application of a representation log.
    ///
    /// The log stays pending for the next flush unless the failure is
    /// permanent or `max_attempts` is reached; then it is consumed with the
    /// error kept. Returns whether the log was given up on.
    pub fn fail_representation(
        &mut self,
        log_id: LogId,
        error: impl Into<String>,
        permanent: bool,
        max_attempts: u32,
    ) -> Result<bool> {
        let log = self
            .store
            .representation_logs
            .get(&log_id)
            .cloned()
            .ok_or(Error::LogNotFound(log_id))?;
        if log.deleted {
            return Ok(log.is_abandoned());
        }
        let mut failed = log.clone();
        failed.attempts += 1;
        failed.error = Some(error.into());
        failed.deleted = permanent || failed.attempts >= max_attempts;
        let abandoned = failed.deleted;
        self.store.representation_logs.insert(log_id, failed);
        self.undo.push(Undo::RepresentationLog(log_id, Some(log)));
        Ok(abandoned)
    }

    /// Point the local config at a database. Setting the same database twice is a no-op.
    pub fn set_current_database(&mut self, database_id: &str) -> Result<()> {
        if let Some(existing) = &self.store.config {
            if existing.database_id == database_id {
                return Ok(());
            }
            return Err(Error::DuplicateDatabaseConfig {
                existing: existing.database_id.clone(),
            });
        }
        let previous = self.store.config.replace(DatabaseConfig {
            database_id: database_id.to_string(),
            created_at: self.now,
        });
        self.undo.push(Undo::Config(previous));
        Ok(())
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        let key = (credentials.device_id.clone(), credentials.target_id.clone());
        let previous = self.store.credentials.insert(key.clone(), credentials);
        self.undo.push(Undo::Credentials(key, previous));
    }

    /// Make a target the primary of its database, demoting the current primary.
    pub fn promote_target(&mut self, target_id: &str) -> Result<()> {
        let mut target = self
            .store
            .get::<ReplicationTarget>(target_id)
            .ok_or_else(|| {
                Error::EntityNotFound(EntityRef::new(EntityKind::ReplicationTarget, target_id))
            })?;
        if target.primary {
            return Ok(());
        }

        if let Some(mut current) = self.store.primary_target(&target.database_id) {
            current.primary = false;
            self.save(&mut current)?;
        }

        target.primary = true;
        self.save(&mut target)?;
        Ok(())
    }

    /// Load an entity received from elsewhere without versioning or scheduling.
    ///
    /// Last writer wins. A loaded primary target demotes any other local primary
    /// of the same database so the uniqueness invariant survives raw loads.
    pub fn load_fixture(&mut self, entity: Entity) -> Result<IngestDecision> {
        let key = entity.entity_ref();
        let decision = ingest::decide(&entity, self.store.entities.get(&key))?;
        if decision != IngestDecision::Applied {
            return Ok(decision);
        }

        if let Entity::ReplicationTarget(target) = &entity {
            if target.primary && !target.meta.deleted {
                if let Some(mut other) = self.store.primary_target(&target.database_id) {
                    if other.meta.id != target.meta.id {
                        other.primary = false;
                        self.put_entity(other.into_entity());
                    }
                }
            }
        }

        self.put_entity(entity);
        Ok(decision)
    }

    /// Commit and hand back the hooks to run.
    pub fn commit(mut self) -> Committed {
        self.finished = true;
        Committed {
            txn_id: self.id.clone(),
            buffer: self.buffer.detach(),
            hooks: std::mem::take(&mut self.hooks),
        }
    }

    /// Undo every write made by this transaction.
    pub fn rollback(mut self) {
        self.undo_all();
        self.finished = true;
    }

    fn validate(&self, entity: &Entity) -> Result<()> {
        match entity {
            Entity::Record(record) => self.store.schema.validate_record(record),
            Entity::ReplicationTarget(target) => {
                self.store.target_kinds.get(&target.kind)?;
                if target.primary && !target.meta.deleted {
                    if let Some(existing) = self.store.primary_target(&target.database_id) {
                        if existing.meta.id != target.meta.id {
                            return Err(Error::DuplicatePrimaryTarget {
                                database_id: target.database_id.clone(),
                            });
                        }
                    }
                }
                Ok(())
            }
            Entity::Database(_) | Entity::Device(_) => Ok(()),
        }
    }

    fn schedule(&mut self, entity: &Entity, created: bool, options: SaveOptions) -> Result<()> {
        let database_id = self.resolve_database(entity)?;

        let mut targets = self.store.targets_for(&database_id);
        if targets.is_empty() {
            targets.push(self.ensure_fallback_target(&database_id, options.nested())?);
        }

        let strategy = if created {
            match entity {
                Entity::Record(record) => self
                    .store
                    .schema
                    .representation_for(&record.collection)
                    .map(str::to_string),
                other => other.representation_strategy().map(str::to_string),
            }
        } else {
            None
        };

        let intents = plan_replication(
            entity,
            created,
            strategy.as_deref(),
            &targets,
            &self.store.target_kinds,
        )?;
        self.execute(intents)
    }

    fn resolve_database(&self, entity: &Entity) -> Result<EntityId> {
        let database_id = match entity.database_id().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self
                .store
                .config
                .as_ref()
                .map(|c| c.database_id.clone())
                .ok_or_else(|| Error::NoDatabase(entity.id().clone()))?,
        };

        let key = EntityRef::new(EntityKind::Database, database_id.clone());
        if !self.store.entities.contains_key(&key) {
            return Err(Error::EntityNotFound(key));
        }
        Ok(database_id)
    }

    fn ensure_fallback_target(
        &mut self,
        database_id: &str,
        options: SaveOptions,
    ) -> Result<ReplicationTarget> {
        let mut fallback = self
            .store
            .get_including_deleted::<ReplicationTarget>(&ReplicationTarget::dummy_id(database_id))
            .map(|mut existing| {
                existing.meta.deleted = false;
                existing.enabled = true;
                existing
            })
            .unwrap_or_else(|| ReplicationTarget::dummy(database_id, self.now));
        self.save_with(&mut fallback, options)?;
        Ok(fallback)
    }

    fn execute(&mut self, intents: Vec<Intent>) -> Result<()> {
        let mut linked: BTreeMap<EntityId, Vec<LogId>> = BTreeMap::new();

        for intent in intents {
            match intent {
                Intent::CreateRepresentationLog {
                    target_id,
                    entity,
                    method,
                    metadata,
                } => {
                    let id = self.store.allocate_log_id();
                    linked.entry(target_id.clone()).or_default().push(id);
                    self.put_representation_log(RepresentationLog {
                        id,
                        target_id,
                        entity,
                        method,
                        metadata,
                        created_at: self.now,
                        attempts: 0,
                        error: None,
                        deleted: false,
                    });
                }
                Intent::CreateReplicationLog {
                    target_id,
                    entity,
                    payload,
                } => {
                    let id = self.store.allocate_log_id();
                    let representation_logs = linked.remove(&target_id).unwrap_or_default();
                    self.put_replication_log(ReplicationLog {
                        id,
                        target_id,
                        entity,
                        payload,
                        txn_id: self.id.clone(),
                        representation_logs,
                        created_at: self.now,
                        deleted: false,
                    });
                }
                Intent::RegisterFlush { target } => {
                    if self.buffer.register_flush(&target)? == Registration::First {
                        self.push_hook(CommitHook::Flush {
                            target_id: target.meta.id.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn push_hook(&mut self, hook: CommitHook) {
        if !self.hooks.contains(&hook) {
            self.hooks.push(hook);
        }
    }

    fn put_entity(&mut self, entity: Entity) {
        let key = entity.entity_ref();
        let previous = self.store.entities.insert(key.clone(), entity);
        self.undo.push(Undo::Entity(key, previous));
    }

    fn put_replication_log(&mut self, log: ReplicationLog) {
        let id = log.id;
        let previous = self.store.replication_logs.insert(id, log);
        self.undo.push(Undo::ReplicationLog(id, previous));
    }

    fn put_representation_log(&mut self, log: RepresentationLog) {
        let id = log.id;
        let previous = self.store.representation_logs.insert(id, log);
        self.undo.push(Undo::RepresentationLog(id, previous));
    }

    fn undo_all(&mut self) {
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Entity(key, previous) => restore(&mut self.store.entities, key, previous),
                Undo::ReplicationLog(id, previous) => {
                    restore(&mut self.store.replication_logs, id, previous)
                }
                Undo::RepresentationLog(id, previous) => {
                    restore(&mut self.store.representation_logs, id, previous)
                }
                Undo::Config(previous) => self.store.config = previous,
                Undo::Credentials(key, previous) => {
                    restore(&mut self.store.credentials, key, previous)
                }
            }
        }
        self.hooks.clear();
        self.buffer = ReplicationBuffer::new();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}
