//! WebSocket transport for the broadcast hub.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//!
//! Client → server:
//! - `{"event":"join","data":"<scope>"}` enters that scope's room
//! - `{"event":"leave"}` leaves the current room
//!
//! Server → client:
//! - `changeUpdate` / `changeUpdate:<scope>` with a change payload
//! - `joined` / `left` acknowledgements and `error` for rejected frames

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::state::AppState;
use crate::models::{Scope, WireChange};
use crate::services::{BroadcastHub, ConnectionGuard, HubMessage};

/// Frames accepted from clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientFrame {
    Join(String),
    Leave,
}

/// Frames sent to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    pub event: String,
    pub data: serde_json::Value,
}

impl ServerFrame {
    pub fn change(message: &HubMessage) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: message.channel.to_string(),
            data: serde_json::to_value(WireChange::from(message.event.as_ref()))?,
        })
    }

    fn ack(event: &str, scope: Option<&Scope>) -> Self {
        Self {
            event: event.to_string(),
            data: scope.map_or(serde_json::Value::Null, |s| s.as_str().into()),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            event: "error".to_string(),
            data: serde_json::Value::String(message.into()),
        }
    }
}

/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: BroadcastHub) {
    let (guard, hub_rx) = hub.connect_guarded();
    let connection = guard.id();
    let (mut sink, mut stream) = socket.split();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let mut writer = tokio::spawn(async move {
        let mut hub_rx = hub_rx;
        let mut reply_rx = reply_rx;
        loop {
            let frame = tokio::select! {
                Some(message) = hub_rx.recv() => match ServerFrame::change(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Skipping unserializable change: {}", e);
                        continue;
                    }
                },
                Some(frame) = reply_rx.recv() => frame,
                else => break,
            };
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Skipping unserializable frame: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                tracing::debug!(%connection, "WebSocket send failed: {}", e);
                break;
            }
        }
    });

    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    let reply = handle_frame(&guard, text.as_str());
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        guard
    });

    // Whichever side finishes first ends the connection.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    hub.leave(connection);
    tracing::debug!(%connection, "WebSocket closed");
}

fn handle_frame(guard: &ConnectionGuard, text: &str) -> ServerFrame {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Join(raw)) => match Scope::parse(&raw) {
            Some(scope) => {
                guard.join(scope.clone());
                ServerFrame::ack("joined", Some(&scope))
            }
            None => ServerFrame::error("join requires a non-empty scope"),
        },
        Ok(ClientFrame::Leave) => {
            let left = guard.leave_room();
            ServerFrame::ack("left", left.as_ref())
        }
        Err(e) => {
            tracing::debug!(connection = %guard.id(), "Rejected client frame: {}", e);
            ServerFrame::error(format!("unrecognized frame: {}", e))
        }
    }
}
