//! # Tessera Engine
//!
//! A deterministic replication engine for local-first databases that converge
//! over a shared, append-only messaging transport.
//!
//! This crate holds everything about replication that can be decided without
//! touching the network: versioned entities, the in-memory relational store and
//! its transactions, the per-transaction replication buffer, the save pipeline
//! that turns a write into replication intents, and the grouping rules a flush
//! follows. The async side (transports, target drivers, representation
//! strategies) lives in `tessera-node`.
//!
//! ## Design Principles
//!
//! - **No IO**: The engine has no knowledge of files, network, or wall clocks
//! - **Deterministic**: Ids, ordering and conflict decisions depend only on inputs
//! - **Explicit context**: Transactions carry their own replication buffer and
//!   commit hooks; nothing is thread-local
//!
//! ## Core Concepts
//!
//! ### Entities
//!
//! Every replicated row implements [`VersionedEntity`]: a stable id, a monotonic
//! version, timestamps and a soft-delete flag ([`EntityMeta`]). Logs refer to
//! entities through a tagged [`EntityRef`] and decode them with
//! [`Entity::from_snapshot`].
//!
//! ### Saving
//!
//! [`Transaction::save`] performs the optimistic version check, persists the row,
//! and (for the outermost save) plans replication: representation logs for new
//! entities, one [`ReplicationLog`] per target, and a flush registration in the
//! transaction's [`ReplicationBuffer`]. [`Transaction::commit`] hands back the
//! commit hooks the caller must run.
//!
//! ### Flushing
//!
//! [`Store::pending_groups`] returns undelivered logs grouped by transaction in
//! creation order. A group is delivered as one [`ReplicationBatch`].
//!
//! ## Quick Start
//!
//! ```rust
//! use tessera_engine::{Database, Record, Schema, CollectionSchema, FieldDef, FieldType, Store};
//! use serde_json::json;
//!
//! let schema = Schema::new(1).with_collection(CollectionSchema::new(
//!     "todos",
//!     vec![FieldDef::required("title", FieldType::String)],
//! ));
//! let mut store = Store::new(schema, "device-1");
//!
//! let mut db = Database::new("db-1", "notes", 1000);
//! let mut todo = Record::new("todo-1", "db-1", "todos", json!({"title": "Buy milk"}), 1000);
//!
//! let mut tx = store.begin(1000);
//! tx.save(&mut db).unwrap();
//! tx.save(&mut todo).unwrap();
//! let committed = tx.commit();
//!
//! // One fallback target was created, so exactly one flush is pending.
//! assert_eq!(committed.buffer.len(), 1);
//! assert_eq!(store.pending_groups(&committed.buffer.pending()[0].target_id).len(), 1);
//! ```
//!
//! ## Persistence
//!
//! Use [`Store::export_state`] and [`Store::import_state`] with [`StoreSnapshot`]
//! for persistence. Snapshots serialize with deterministic ordering.

pub mod buffer;
pub mod database;
pub mod device;
pub mod entity;
pub mod error;
pub mod flush;
pub mod ingest;
pub mod log;
pub mod pipeline;
pub mod protocol;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod target;
pub mod version;

// Re-export main types at crate root
pub use buffer::{PendingFlush, Registration, ReplicationBuffer};
pub use database::{Database, DatabaseConfig, ROOM_ID};
pub use device::{Credentials, Device};
pub use entity::{Entity, EntityKind, EntityMeta, EntityRef, VersionedEntity, ROOM_REPRESENTATION};
pub use error::Error;
pub use flush::{
    group_by_txn, FlushBudget, TxnGroup, DEFAULT_MAX_REPRESENTATION_ATTEMPTS, DEFAULT_MAX_RESTARTS,
};
pub use ingest::{IngestDecision, IngestResult};
pub use log::{ReplicationLog, RepresentationLog};
pub use pipeline::{plan_replication, Intent, SaveOptions};
pub use protocol::{
    BatchEntry, EventFilter, EventPage, ReplicationBatch, RoomEvent, StateFixture,
    DATABASE_STATE, REPLICATION_EVENT, TARGET_STATE,
};
pub use record::Record;
pub use schema::{CollectionSchema, FieldDef, FieldType, Schema};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{CommitHook, Committed, SaveOutcome, Store, Transaction};
pub use target::{ReplicationTarget, TargetCapabilities, TargetKinds, DUMMY_TARGET_KIND};

/// Type aliases for clarity
pub type EntityId = String;
pub type CollectionName = String;
pub type NodeId = String;
pub type TxnId = String;
pub type LogId = u64;
pub type Version = u64;
pub type Timestamp = u64;
pub type SchemaVersion = u32;

/// Free-form key/value bag used for representation and addressing metadata.
pub type MetadataMap = serde_json::Map<String, serde_json::Value>;
