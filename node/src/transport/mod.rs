//! The shared, append-only messaging transport.
//!
//! A transport offers rooms with a totally ordered event log, per-room state
//! keyed by type, expiring named locks, and member accounts. The node only
//! talks to it through [`Transport`]; [`MemoryTransport`] runs in-process and
//! [`HttpTransport`] talks to a `tessera-relay`.

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::{FailOp, MemoryTransport};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_engine::{EventFilter, EventPage};

use crate::config::TransportAccount;
use crate::error::Result;

/// Proof of holding a room lock; required to release it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken(pub String);

/// A newly registered transport member.
#[derive(Clone, PartialEq, Eq)]
pub struct MemberAccount {
    pub member_id: String,
    pub access_token: String,
}

impl From<TransportAccount> for MemberAccount {
    fn from(account: TransportAccount) -> Self {
        Self {
            member_id: account.member_id,
            access_token: account.access_token,
        }
    }
}

impl std::fmt::Debug for MemberAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberAccount")
            .field("member_id", &self.member_id)
            .finish_non_exhaustive()
    }
}

/// Client of the ordered-log transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a room and return its id.
    async fn create_room(&self, name: Option<&str>, topic: Option<&str>) -> Result<String>;

    /// Append an event to a room. Returns the event id.
    async fn publish(
        &self,
        room_id: &str,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<String>;

    /// Read events after `since` (exclusive) in room order.
    async fn read_events(
        &self,
        room_id: &str,
        filter: &EventFilter,
        since: Option<u64>,
    ) -> Result<EventPage>;

    /// Current state under `state_type`, `None` when never set.
    async fn get_room_state(
        &self,
        room_id: &str,
        state_type: &str,
    ) -> Result<Option<serde_json::Value>>;

    async fn put_room_state(
        &self,
        room_id: &str,
        state_type: &str,
        content: &serde_json::Value,
    ) -> Result<()>;

    /// Try to take a named lock. `None` when someone else holds it.
    async fn acquire_lock(
        &self,
        room_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>>;

    async fn release_lock(&self, room_id: &str, key: &str, token: &LockToken) -> Result<()>;

    /// Create a member account.
    async fn register_member(
        &self,
        username: &str,
        display_name: Option<&str>,
    ) -> Result<MemberAccount>;

    async fn invite(&self, room_id: &str, member_id: &str) -> Result<()>;

    /// Join a room as the member owning `access_token`.
    async fn join_room(&self, room_id: &str, access_token: &str) -> Result<()>;
}
