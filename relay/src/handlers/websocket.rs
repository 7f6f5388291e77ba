//! WebSocket handler for room subscriptions.
//!
//! Registers the connection with the hub, forwards hub messages to the
//! socket, and answers catchup and ping requests until the client leaves.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tessera_engine::protocol::relay::EventsQuery;
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ServerMessage};
use crate::AppState;

use super::read_page;

/// Handle an established WebSocket connection subscribed to `room_id`.
pub async fn handle_websocket_connection(
    socket: WebSocket,
    state: AppState,
    room_id: String,
    member_id: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let conn_id = state.hub.register(room_id.clone(), member_id.clone(), tx);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &state, &room_id).await;
                state.hub.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(conn_id = %conn_id, "Binary messages not supported");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    state.hub.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        member_id = %member_id,
        active_connections = state.hub.connection_count(),
        active_rooms = state.hub.room_count(),
        "WebSocket client disconnected"
    );
}

async fn process_message(text: &str, state: &AppState, room_id: &str) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Catchup {
            since,
            types,
            limit,
            request_id,
        } => {
            let query = EventsQuery {
                since,
                types,
                limit,
            };
            match read_page(&state.pool, room_id, &query).await {
                Ok(page) => ServerMessage::Events { page, request_id },
                Err(e) => ServerMessage::error(e.to_string(), request_id),
            }
        }
        ClientMessage::Ping => ServerMessage::Pong,
    }
}
