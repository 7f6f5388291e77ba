//! Room subscriptions of WebSocket connections.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// One connection subscribed to one room.
#[derive(Debug)]
pub struct Subscription {
    pub room_id: String,
    pub member_id: String,
    pub sender: MessageSender,
}

/// Tracks which connections listen to which room.
#[derive(Debug, Default)]
pub struct RoomHub {
    connections: DashMap<String, Subscription>,
    by_room: DashMap<String, Vec<String>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Subscribe a connection to a room. Returns the connection id.
    pub fn register(&self, room_id: String, member_id: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.by_room
            .entry(room_id.clone())
            .or_default()
            .push(conn_id.clone());
        tracing::info!(conn_id = %conn_id, room_id = %room_id, member_id = %member_id, "subscribed");

        self.connections.insert(
            conn_id.clone(),
            Subscription {
                room_id,
                member_id,
                sender,
            },
        );
        conn_id
    }

    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, sub)) = self.connections.remove(conn_id) {
            if let Some(mut conn_ids) = self.by_room.get_mut(&sub.room_id) {
                conn_ids.retain(|id| id != conn_id);
                if conn_ids.is_empty() {
                    drop(conn_ids);
                    self.by_room.remove_if(&sub.room_id, |_, ids| ids.is_empty());
                }
            }
            tracing::info!(
                conn_id = %conn_id,
                room_id = %sub.room_id,
                member_id = %sub.member_id,
                "unsubscribed"
            );
        }
    }

    /// Send a message to every connection subscribed to `room_id`.
    ///
    /// Returns the number of connections that received it.
    pub fn broadcast(&self, room_id: &str, message: &ServerMessage) -> usize {
        let conn_ids = match self.by_room.get(room_id) {
            Some(ids) => ids.clone(),
            None => return 0,
        };

        let sent = conn_ids
            .iter()
            .filter(|id| self.send_to(id, message.clone()))
            .count();
        tracing::debug!(room_id = %room_id, recipients = sent, "broadcast to room");
        sent
    }

    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(sub) => sub.sender.send(message).is_ok(),
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.by_room.len()
    }
}
