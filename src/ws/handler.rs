//! WebSocket upgrade handler

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::registry::DEFAULT_ROOM;
use crate::game::RoomHandle;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientId, ClientMsg, ServerMsg};

/// Outbound queue depth per connection
const OUTBOUND_BUFFER: usize = 256;

/// Longest accepted display name
const MAX_NAME_LEN: usize = 24;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Room to join; created on first use
    #[serde(default)]
    pub room: Option<String>,
    /// Display name shown in rankings
    #[serde(default)]
    pub name: Option<String>,
}

impl WsQuery {
    fn room_id(&self) -> String {
        match self.room.as_deref().map(str::trim) {
            Some(room) if !room.is_empty() => room.to_string(),
            _ => DEFAULT_ROOM.to_string(),
        }
    }

    fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.chars().take(MAX_NAME_LEN).collect(),
            _ => "Player".to_string(),
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, query: WsQuery, state: AppState) {
    let client_id: ClientId = Uuid::new_v4();
    let room_id = query.room_id();
    let name = query.display_name();

    info!(client_id = %client_id, room_id = %room_id, name = %name, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<Arc<str>>(OUTBOUND_BUFFER);

    let writer_handle = tokio::spawn(write_loop(client_id, ws_sink, out_rx));

    queue_msg(
        &out_tx,
        &ServerMsg::Connected {
            client_id,
            room_id: room_id.clone(),
        },
    );

    let room = match state
        .rooms
        .join(&room_id, client_id, name, Box::new(out_tx.clone()))
        .await
    {
        Ok(room) => room,
        Err(e) => {
            warn!(client_id = %client_id, room_id = %room_id, error = %e, "Join rejected");
            queue_msg(
                &out_tx,
                &ServerMsg::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                },
            );
            // Let the writer flush the error, then close.
            drop(out_tx);
            let _ = writer_handle.await;
            return;
        }
    };
    drop(out_tx);

    let limiter = ConnectionRateLimiter::new(state.config.input_rate_limit);
    read_loop(client_id, &room, ws_stream, &limiter).await;

    state.rooms.leave(&room_id, client_id).await;
    writer_handle.abort();

    info!(client_id = %client_id, room_id = %room_id, "WebSocket connection closed");
}

/// Forward queued payloads to the socket until either side closes
async fn write_loop(
    client_id: ClientId,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Arc<str>>,
) {
    while let Some(payload) = out_rx.recv().await {
        if let Err(e) = ws_sink.send(Message::Text(payload.to_string())).await {
            debug!(client_id = %client_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = ws_sink.close().await;
}

/// Reader loop: WebSocket -> room
async fn read_loop(
    client_id: ClientId,
    room: &RoomHandle,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    limiter: &ConnectionRateLimiter,
) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !limiter.check_input() {
                    warn!(client_id = %client_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        if !room.input(client_id, msg).await {
                            debug!(client_id = %client_id, room_id = %room.id, "Room closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(client_id = %client_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Queue a message outside the room (handshake and rejections)
fn queue_msg(out_tx: &mpsc::Sender<Arc<str>>, msg: &ServerMsg) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            if out_tx.try_send(Arc::from(json)).is_err() {
                debug!("Outbound queue unavailable");
            }
        }
        Err(e) => error!(error = %e, "Failed to serialize message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults_room_and_name() {
        let query = WsQuery {
            room: Some("  ".into()),
            name: None,
        };
        assert_eq!(query.room_id(), DEFAULT_ROOM);
        assert_eq!(query.display_name(), "Player");
    }

    #[test]
    fn long_names_are_truncated() {
        let query = WsQuery {
            room: Some("arena".into()),
            name: Some("x".repeat(100)),
        };
        assert_eq!(query.room_id(), "arena");
        assert_eq!(query.display_name().len(), MAX_NAME_LEN);
    }
}
