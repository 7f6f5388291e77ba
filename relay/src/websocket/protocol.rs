//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and tagged by a snake_case `type`.

use serde::{Deserialize, Serialize};
use tessera_engine::{EventPage, RoomEvent};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Read events after a sequence number.
    Catchup {
        #[serde(default)]
        since: Option<u64>,
        /// Comma separated event types
        #[serde(default)]
        types: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// An event was appended to the subscribed room.
    Event { event: RoomEvent },

    /// A state type of the subscribed room was replaced.
    State { state_type: String, sender: String },

    /// Response to a catchup request.
    Events {
        page: EventPage,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to ping.
    Pong,

    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_deserialization() {
        let json = r#"{"type": "catchup", "since": 12, "types": "tessera.replicate", "request_id": "r1"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Catchup {
                since,
                types,
                limit,
                request_id,
            } => {
                assert_eq!(since, Some(12));
                assert_eq!(types.as_deref(), Some("tessera.replicate"));
                assert_eq!(limit, None);
                assert_eq!(request_id.as_deref(), Some("r1"));
            }
            _ => panic!("Expected Catchup message"),
        }

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_server_message_serialization() {
        let json = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let msg = ServerMessage::Event {
            event: RoomEvent {
                event_id: "$e1".into(),
                room_id: "!r:relay.test".into(),
                seq: 3,
                event_type: "tessera.replicate".into(),
                sender: "@alice:relay.test".into(),
                content: json!({"txnId": "n:1"}),
                origin_ts: 1000,
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["seq"], 3);
        assert_eq!(value["event"]["eventType"], "tessera.replicate");

        let msg = ServerMessage::error("bad", None);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"error","message":"bad"}"#);
    }
}
