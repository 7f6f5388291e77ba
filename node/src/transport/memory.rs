//! In-process transport.
//!
//! Rooms, locks and members live in a shared hub. Clones of a
//! [`MemoryTransport`] talk to the same hub, so several nodes in one process
//! (or one test) can replicate to each other. Lock expiry uses tokio's clock.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tessera_engine::{EventFilter, EventPage, RoomEvent};
use tokio::time::Instant;

use super::{LockToken, MemberAccount, Transport};
use crate::error::{NodeError, Result};

const DEFAULT_PAGE: usize = 100;

/// Operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOp {
    CreateRoom,
    Publish,
    ReadEvents,
    PutState,
    AcquireLock,
}

#[derive(Debug, Default)]
struct Room {
    name: Option<String>,
    members: BTreeSet<String>,
    invited: BTreeSet<String>,
    events: Vec<RoomEvent>,
    state: HashMap<String, serde_json::Value>,
    /// Lock and state operations in the order they happened
    journal: Vec<String>,
}

#[derive(Debug)]
struct HeldLock {
    token: String,
    holder: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Hub {
    rooms: DashMap<String, Room>,
    locks: DashMap<(String, String), HeldLock>,
    /// access token -> member id
    members: DashMap<String, String>,
    failures: DashMap<FailOp, u32>,
    state_latency_ms: AtomicU64,
    counter: AtomicU64,
}

/// Transport backed by process memory.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
    sender: String,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Hub::default()),
            sender: "@admin:memory".to_string(),
        }
    }

    /// A handle on the same hub acting as another member.
    pub fn as_member(&self, member_id: impl Into<String>) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            sender: member_id.into(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: FailOp, times: u32) {
        self.hub.failures.insert(op, times);
    }

    /// Delay every state write, widening the window for interleaving.
    pub fn set_state_latency(&self, latency: Duration) {
        self.hub
            .state_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn room_count(&self) -> usize {
        self.hub.rooms.len()
    }

    pub fn room_name(&self, room_id: &str) -> Option<String> {
        self.hub.rooms.get(room_id).and_then(|r| r.name.clone())
    }

    pub fn events(&self, room_id: &str) -> Vec<RoomEvent> {
        self.hub
            .rooms
            .get(room_id)
            .map(|r| r.events.clone())
            .unwrap_or_default()
    }

    pub fn state(&self, room_id: &str, state_type: &str) -> Option<serde_json::Value> {
        self.hub
            .rooms
            .get(room_id)
            .and_then(|r| r.state.get(state_type).cloned())
    }

    pub fn journal(&self, room_id: &str) -> Vec<String> {
        self.hub
            .rooms
            .get(room_id)
            .map(|r| r.journal.clone())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room_id: &str, member_id: &str) -> bool {
        self.hub
            .rooms
            .get(room_id)
            .map(|r| r.members.contains(member_id))
            .unwrap_or(false)
    }

    fn check(&self, op: FailOp) -> Result<()> {
        if let Some(mut remaining) = self.hub.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NodeError::Transport(format!("injected {op:?} failure")));
            }
        }
        Ok(())
    }

    fn next_id(&self, prefix: char) -> String {
        let n = self.hub.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}{n}:memory")
    }

    fn with_room<T>(&self, room_id: &str, f: impl FnOnce(&mut Room) -> Result<T>) -> Result<T> {
        let mut room = self
            .hub
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| NodeError::Transport(format!("unknown room {room_id}")))?;
        f(&mut room)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_room(&self, name: Option<&str>, _topic: Option<&str>) -> Result<String> {
        self.check(FailOp::CreateRoom)?;
        let room_id = self.next_id('!');
        let mut room = Room {
            name: name.map(str::to_string),
            ..Room::default()
        };
        room.members.insert(self.sender.clone());
        self.hub.rooms.insert(room_id.clone(), room);
        tracing::debug!(room_id = %room_id, creator = %self.sender, "memory room created");
        Ok(room_id)
    }

    async fn publish(
        &self,
        room_id: &str,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<String> {
        self.check(FailOp::Publish)?;
        let event_id = self.next_id('$');
        self.with_room(room_id, |room| {
            let seq = room.events.len() as u64 + 1;
            room.events.push(RoomEvent {
                event_id: event_id.clone(),
                room_id: room_id.to_string(),
                seq,
                event_type: event_type.to_string(),
                sender: self.sender.clone(),
                content,
                origin_ts: chrono::Utc::now().timestamp_millis().max(0) as u64,
            });
            Ok(())
        })?;
        Ok(event_id)
    }

    async fn read_events(
        &self,
        room_id: &str,
        filter: &EventFilter,
        since: Option<u64>,
    ) -> Result<EventPage> {
        self.check(FailOp::ReadEvents)?;
        let since = since.unwrap_or(0);
        let limit = filter.limit.map(|l| l as usize).unwrap_or(DEFAULT_PAGE).max(1);

        self.with_room(room_id, |room| {
            let mut matching = room
                .events
                .iter()
                .filter(|e| e.seq > since && filter.matches(&e.event_type));
            let events: Vec<RoomEvent> = matching.by_ref().take(limit).cloned().collect();
            let has_more = matching.next().is_some();
            let next_since = events.last().map(|e| e.seq).unwrap_or(since);
            Ok(EventPage {
                events,
                next_since,
                has_more,
            })
        })
    }

    async fn get_room_state(
        &self,
        room_id: &str,
        state_type: &str,
    ) -> Result<Option<serde_json::Value>> {
        self.with_room(room_id, |room| Ok(room.state.get(state_type).cloned()))
    }

    async fn put_room_state(
        &self,
        room_id: &str,
        state_type: &str,
        content: &serde_json::Value,
    ) -> Result<()> {
        self.check(FailOp::PutState)?;
        self.with_room(room_id, |room| {
            room.journal.push(format!("put:{}:{state_type}", self.sender));
            Ok(())
        })?;

        let latency = self.hub.state_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        self.with_room(room_id, |room| {
            room.state.insert(state_type.to_string(), content.clone());
            Ok(())
        })
    }

    async fn acquire_lock(
        &self,
        room_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>> {
        self.check(FailOp::AcquireLock)?;
        let now = Instant::now();
        let token = self.next_id('~');
        let lock = HeldLock {
            token: token.clone(),
            holder: self.sender.clone(),
            expires_at: now + ttl,
        };

        let acquired = match self.hub.locks.entry((room_id.to_string(), key.to_string())) {
            Entry::Occupied(held) if held.get().expires_at > now => false,
            Entry::Occupied(mut expired) => {
                expired.insert(lock);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lock);
                true
            }
        };

        if !acquired {
            return Ok(None);
        }
        self.with_room(room_id, |room| {
            room.journal.push(format!("lock:{}:{key}", self.sender));
            Ok(())
        })?;
        Ok(Some(LockToken(token)))
    }

    async fn release_lock(&self, room_id: &str, key: &str, token: &LockToken) -> Result<()> {
        let lock_key = (room_id.to_string(), key.to_string());
        let released = self
            .hub
            .locks
            .remove_if(&lock_key, |_, held| held.token == token.0)
            .is_some();

        if released {
            self.with_room(room_id, |room| {
                room.journal.push(format!("unlock:{}:{key}", self.sender));
                Ok(())
            })?;
        } else {
            tracing::debug!(room_id = %room_id, key = %key, "lock already expired or taken over");
        }
        Ok(())
    }

    async fn register_member(
        &self,
        username: &str,
        _display_name: Option<&str>,
    ) -> Result<MemberAccount> {
        let member_id = format!("@{username}:memory");
        if self.hub.members.iter().any(|m| m.value() == &member_id) {
            return Err(NodeError::Transport(format!("member {member_id} already exists")));
        }
        let access_token = uuid::Uuid::new_v4().to_string();
        self.hub
            .members
            .insert(access_token.clone(), member_id.clone());
        Ok(MemberAccount {
            member_id,
            access_token,
        })
    }

    async fn invite(&self, room_id: &str, member_id: &str) -> Result<()> {
        self.with_room(room_id, |room| {
            room.invited.insert(member_id.to_string());
            Ok(())
        })
    }

    async fn join_room(&self, room_id: &str, access_token: &str) -> Result<()> {
        let member_id = self
            .hub
            .members
            .get(access_token)
            .map(|m| m.value().clone())
            .ok_or_else(|| NodeError::Transport("unknown access token".into()))?;

        self.with_room(room_id, |room| {
            if !room.members.contains(&member_id) && !room.invited.remove(&member_id) {
                return Err(NodeError::Transport(format!(
                    "{member_id} is not invited to {room_id}"
                )));
            }
            room.members.insert(member_id.clone());
            Ok(())
        })
    }
}

impl MemoryTransport {
    /// Current holder of a lock, if it has not expired.
    pub fn lock_holder(&self, room_id: &str, key: &str) -> Option<String> {
        self.hub
            .locks
            .get(&(room_id.to_string(), key.to_string()))
            .filter(|l| l.expires_at > Instant::now())
            .map(|l| l.holder.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_are_ordered_and_paged() {
        let transport = MemoryTransport::new();
        let room = transport.create_room(Some("notes"), None).await.unwrap();
        for i in 0..5 {
            transport
                .publish(&room, "tessera.replicate", json!({ "i": i }))
                .await
                .unwrap();
        }
        transport.publish(&room, "m.other", json!({})).await.unwrap();

        let filter = EventFilter::of_type("tessera.replicate").with_limit(3);
        let first = transport.read_events(&room, &filter, None).await.unwrap();
        assert_eq!(first.events.len(), 3);
        assert!(first.has_more);

        let second = transport
            .read_events(&room, &filter, Some(first.next_since))
            .await
            .unwrap();
        assert_eq!(second.events.len(), 2);
        assert!(!second.has_more);
        assert_eq!(second.events[1].content["i"], 4);

        let empty = transport
            .read_events(&room, &filter, Some(second.next_since))
            .await
            .unwrap();
        assert!(empty.events.is_empty());
        assert_eq!(empty.next_since, second.next_since);
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let a = MemoryTransport::new();
        let b = a.as_member("@b:memory");
        let room = a.create_room(None, None).await.unwrap();
        let ttl = Duration::from_secs(30);

        let token = a.acquire_lock(&room, "k", ttl).await.unwrap().unwrap();
        assert!(b.acquire_lock(&room, "k", ttl).await.unwrap().is_none());
        assert_eq!(a.lock_holder(&room, "k").as_deref(), Some("@admin:memory"));

        // Releasing with a foreign token does nothing.
        b.release_lock(&room, "k", &LockToken("bogus".into()))
            .await
            .unwrap();
        assert!(b.acquire_lock(&room, "k", ttl).await.unwrap().is_none());

        a.release_lock(&room, "k", &token).await.unwrap();
        assert!(b.acquire_lock(&room, "k", ttl).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_can_be_taken() {
        let a = MemoryTransport::new();
        let b = a.as_member("@b:memory");
        let room = a.create_room(None, None).await.unwrap();

        a.acquire_lock(&room, "k", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(b
            .acquire_lock(&room, "k", Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn join_requires_invite() {
        let admin = MemoryTransport::new();
        let room = admin.create_room(Some("db"), None).await.unwrap();
        let account = admin.register_member("phone", None).await.unwrap();

        assert!(admin.join_room(&room, &account.access_token).await.is_err());

        admin.invite(&room, &account.member_id).await.unwrap();
        admin.join_room(&room, &account.access_token).await.unwrap();
        assert!(admin.is_member(&room, "@phone:memory"));
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let transport = MemoryTransport::new();
        transport.fail_next(FailOp::CreateRoom, 1);
        assert!(transport.create_room(None, None).await.is_err());
        assert!(transport.create_room(None, None).await.is_ok());
    }

    #[tokio::test]
    async fn room_state_roundtrip() {
        let transport = MemoryTransport::new();
        let room = transport.create_room(None, None).await.unwrap();
        assert_eq!(
            transport.get_room_state(&room, "tessera.database").await.unwrap(),
            None
        );

        let content = json!({"fixture": {"id": "db-1"}});
        transport
            .put_room_state(&room, "tessera.database", &content)
            .await
            .unwrap();
        assert_eq!(
            transport.get_room_state(&room, "tessera.database").await.unwrap(),
            Some(content)
        );
    }
}
