//! # Tessera Node
//!
//! The device runtime. It owns a [`tessera_engine::Store`] behind an async
//! mutex and drives the replication loop against a shared transport:
//!
//! - [`Replicator`] commits local writes and flushes the targets they touched
//! - [`Flusher`] applies pending representations, then delivers one batch per
//!   transaction, oldest first
//! - [`StatePublisher`] writes database and primary-target fixtures into the
//!   primary room under a transport lock
//! - [`Inbound`] reads other devices' batches and loads them raw
//!
//! [`bootstrap`] creates or reopens the project database and
//! [`join_database`] adopts one published by another device.

pub mod bootstrap;
pub mod config;
pub mod device;
pub mod error;
pub mod flush;
pub mod ingest;
pub mod persist;
pub mod replicator;
pub mod representation;
pub mod state;
pub mod targets;
pub mod transport;

use std::sync::Arc;

use tessera_engine::{Store, Timestamp};

pub use bootstrap::{bootstrap, join_database, BootstrapOutcome, JoinOutcome};
pub use config::{ConfigError, NodeConfig, TransportAccount};
pub use device::{register_device, DeviceRegistration};
pub use error::{NodeError, Result};
pub use flush::{FlushReport, Flusher};
pub use ingest::{Inbound, SyncOutcome};
pub use persist::{NodeState, StateFile};
pub use replicator::{CommitReport, Replicator, ReplicatorBuilder, ReplicatorSettings};
pub use representation::{
    RepresentationContext, RepresentationOutput, RepresentationStrategy, RoomStrategy,
    StrategyRegistry,
};
pub use state::StatePublisher;
pub use targets::{DriverRegistry, DummyDriver, TargetDriver, TransportDriver, TRANSPORT_TARGET_KIND};
pub use transport::{FailOp, HttpTransport, LockToken, MemberAccount, MemoryTransport, Transport};

/// The store shared by every part of the runtime.
pub type SharedStore = Arc<tokio::sync::Mutex<Store>>;

/// Wall clock in milliseconds since the epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
