//! WebSocket connection handler.
//!
//! The socket loop only turns frames into [`ConnectionEvent`]s. All protocol
//! behavior lives in [`handle_event`], a synchronous transition over the
//! shared directory and the connection's own bookkeeping.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{is_valid_user_id, ClientMessage, ServerMessage};
use crate::state::{ClientSender, ConnectionHandle, ConnectionId, RelayState};

/// Something that happened on a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A text frame arrived.
    Text(String),
    /// The connection is gone.
    Closed,
}

/// Per-connection bookkeeping.
pub struct Connection {
    id: ConnectionId,
    sender: ClientSender,
    user_ids: Vec<String>,
}

impl Connection {
    pub fn new(sender: ClientSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            user_ids: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// User ids this connection has registered.
    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            sender: self.sender.clone(),
        }
    }

    fn reply(&self, msg: ServerMessage) {
        if self.sender.send(msg).is_err() {
            tracing::debug!(connection = %self.id, "Reply dropped, connection closing");
        }
    }
}

/// Handle a single WebSocket connection.
///
/// This function runs for the lifetime of the connection:
/// 1. Spawns a sender task to forward outbound messages
/// 2. Feeds every incoming text frame to [`handle_event`]
/// 3. Releases the connection's directory bindings on close
pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create the outbound channel for this client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut connection = Connection::new(tx);
    tracing::info!(connection = %connection.id(), "WebSocket connected");

    // ── Sender Task ───────────────────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                }
            }
        }
    });

    // ── Process Messages ──────────────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                handle_event(&state, &mut connection, ConnectionEvent::Text(text));
            }
            Ok(Message::Close(_)) => {
                tracing::info!(connection = %connection.id(), "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(
                    connection = %connection.id(),
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
            Ok(Message::Binary(_)) => {
                tracing::debug!(connection = %connection.id(), "Ignoring binary frame");
            }
            _ => {} // Ping/Pong are answered by axum
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────────────

    handle_event(&state, &mut connection, ConnectionEvent::Closed);
    sender_task.abort();
    tracing::info!(connection = %connection.id(), "WebSocket disconnected");
}

/// Apply one connection event to the relay state.
///
/// Malformed input is logged and dropped; the connection stays open and
/// nothing is sent back.
pub fn handle_event(state: &RelayState, connection: &mut Connection, event: ConnectionEvent) {
    match event {
        ConnectionEvent::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(msg) => handle_client_message(state, connection, msg),
            Err(e) => {
                tracing::warn!(
                    connection = %connection.id,
                    error = %e,
                    "Dropping malformed client message"
                );
            }
        },
        ConnectionEvent::Closed => {
            for user_id in connection.user_ids.drain(..) {
                if state.directory.disconnect(&user_id, connection.id) {
                    tracing::info!(user_id = user_id.as_str(), "User offline");
                } else {
                    tracing::debug!(
                        user_id = user_id.as_str(),
                        "Binding already taken over by a newer connection"
                    );
                }
            }
        }
    }
}

/// Handle a parsed client message.
fn handle_client_message(state: &RelayState, connection: &mut Connection, msg: ClientMessage) {
    match msg {
        ClientMessage::Register { user_id } => {
            handle_register(state, connection, user_id);
        }

        ClientMessage::AnnouncePublicKey {
            user_id,
            public_key,
        } => {
            if !is_valid_user_id(&user_id) || !public_key.is_well_formed() {
                tracing::warn!(
                    connection = %connection.id,
                    "Dropping malformed public key announcement"
                );
                return;
            }
            state.directory.announce(&user_id, public_key);
            tracing::info!(user_id = user_id.as_str(), "Public key announced");
        }

        ClientMessage::RequestPublicKey { target_user_id } => {
            let public_key = state.directory.lookup_key(&target_user_id);
            tracing::debug!(
                target_user = target_user_id.as_str(),
                found = public_key.is_some(),
                "Public key lookup"
            );
            connection.reply(ServerMessage::PublicKey {
                target_user_id,
                public_key,
            });
        }

        ClientMessage::SendMessage {
            from,
            to,
            ciphertext,
        } => {
            if from.is_empty() || to.is_empty() {
                tracing::warn!(connection = %connection.id, "Dropping message with empty sender or recipient");
                return;
            }
            let status = state.relay_message(&from, &to, ciphertext);
            connection.reply(status);
        }

        ClientMessage::Ping => {
            connection.reply(ServerMessage::Pong);
        }
    }
}

fn handle_register(state: &RelayState, connection: &mut Connection, user_id: String) {
    if !is_valid_user_id(&user_id) {
        tracing::warn!(connection = %connection.id, "Dropping register with invalid user id");
        return;
    }

    if let Some(previous) = state.directory.register(&user_id, connection.handle()) {
        tracing::info!(
            user_id = user_id.as_str(),
            previous = %previous,
            "Registration moved to a new connection"
        );
    } else {
        tracing::info!(user_id = user_id.as_str(), "User registered");
    }

    if !connection.user_ids.contains(&user_id) {
        connection.user_ids.push(user_id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
