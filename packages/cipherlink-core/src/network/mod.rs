//! # Network Module
//!
//! Client side of the relay: wire messages, response correlation and the
//! WebSocket bridge.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RELAY CLIENT                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   ExchangeSession                                                      │
//! │        │  register / announce / request_public_key / send_message      │
//! │        ▼                                                                │
//! │   ┌──────────────┐   outbound mpsc   ┌──────────────┐                  │
//! │   │ RelayClient  │──────────────────►│ writer task  │──► WebSocket ──┐ │
//! │   │              │                   └──────────────┘                │ │
//! │   │  pending     │   dispatch()      ┌──────────────┐                │ │
//! │   │  key/deliv.  │◄──────────────────│ reader task  │◄── WebSocket ◄─┘ │
//! │   └──────┬───────┘                   └──────────────┘                  │
//! │          │ message{from, ciphertext}                                    │
//! │          ▼                                                              │
//! │      inbox mpsc ──► engine decrypts                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `RelayClient` itself is transport-agnostic: anything that drains the
//! outbound channel and calls [`RelayClient::dispatch`] can drive it.

mod pending;
pub mod relay_client;

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::crypto::{EncodedPublicKey, PublicKey};
use crate::error::{Error, Result};

pub use pending::{PendingDeliveries, PendingKeyRequests};
pub use relay_client::{DeliveryStatus, IncomingMessage, RelayClientMessage, RelayServerMessage};

struct Inner {
    outbound: mpsc::UnboundedSender<RelayClientMessage>,
    key_requests: PendingKeyRequests,
    deliveries: PendingDeliveries,
    inbox: mpsc::UnboundedSender<IncomingMessage>,
}

/// Handle to one relay connection. Cheap to clone.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<Inner>,
}

impl RelayClient {
    /// Create a client over raw channels.
    ///
    /// Outgoing messages appear on the receiver paired with `outbound`;
    /// forwarded ciphertext is pushed to `inbox`.
    pub fn new(
        outbound: mpsc::UnboundedSender<RelayClientMessage>,
        inbox: mpsc::UnboundedSender<IncomingMessage>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                outbound,
                key_requests: PendingKeyRequests::default(),
                deliveries: PendingDeliveries::default(),
                inbox,
            }),
        }
    }

    /// Connect to a relay WebSocket and spawn the writer and reader tasks.
    pub async fn connect(url: &str, inbox: mpsc::UnboundedSender<IncomingMessage>) -> Result<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        tracing::info!(url, "Connected to relay");

        let (mut ws_sender, mut ws_receiver) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<RelayClientMessage>();
        let client = Self::new(tx, inbox);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to serialize relay message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader = client.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<RelayServerMessage>(&text) {
                            Ok(msg) => reader.dispatch(msg),
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping unparseable relay frame");
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Relay connection error");
                        break;
                    }
                }
            }
            tracing::info!("Relay connection closed");
        });

        Ok(client)
    }

    fn send(&self, msg: RelayClientMessage) -> Result<()> {
        self.inner.outbound.send(msg).map_err(|_| Error::NotConnected)
    }

    /// Bind `user_id` to this connection.
    pub fn register(&self, user_id: &str) -> Result<()> {
        self.send(RelayClientMessage::Register {
            user_id: user_id.to_string(),
        })
    }

    /// Publish `key` under `user_id`.
    pub fn announce_public_key(&self, user_id: &str, key: &PublicKey) -> Result<()> {
        self.send(RelayClientMessage::AnnouncePublicKey {
            user_id: user_id.to_string(),
            public_key: key.encode(),
        })
    }

    /// Keep-alive.
    pub fn ping(&self) -> Result<()> {
        self.send(RelayClientMessage::Ping)
    }

    /// Ask the relay for `target`'s public key and wait for the answer.
    ///
    /// `Ok(None)` means the relay does not know the target. A newer request
    /// for the same target makes this one fail with
    /// [`Error::PeerKeyMissing`].
    pub async fn request_public_key(
        &self,
        target: &str,
        timeout: Duration,
    ) -> Result<Option<EncodedPublicKey>> {
        let (id, rx) = self.inner.key_requests.register(target);

        if let Err(e) = self.send(RelayClientMessage::RequestPublicKey {
            target_user_id: target.to_string(),
        }) {
            self.inner.key_requests.cancel(target, id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(key)) => Ok(key),
            Ok(Err(_)) => Err(Error::PeerKeyMissing(format!("{} (request superseded)", target))),
            Err(_) => {
                self.inner.key_requests.cancel(target, id);
                Err(Error::Timeout(format!("public key of {}", target)))
            }
        }
    }

    /// Send ciphertext to `to` and wait for the relay's delivery status.
    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        ciphertext: String,
        timeout: Duration,
    ) -> Result<DeliveryStatus> {
        let rx = self.inner.deliveries.register(to);

        if let Err(e) = self.send(RelayClientMessage::SendMessage {
            from: from.to_string(),
            to: to.to_string(),
            ciphertext,
        }) {
            self.inner.deliveries.cancel_latest(to);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout(format!("delivery status for {}", to))),
        }
    }

    /// Route one inbound relay message.
    pub fn dispatch(&self, msg: RelayServerMessage) {
        match msg {
            RelayServerMessage::PublicKey {
                target_user_id,
                public_key,
            } => {
                if !self.inner.key_requests.resolve(&target_user_id, public_key) {
                    tracing::debug!(target_user = %target_user_id, "Ignoring unsolicited public key response");
                }
            }
            RelayServerMessage::DeliveryStatus(status) => {
                let to = status.to.clone();
                if !self.inner.deliveries.resolve(status) {
                    tracing::debug!(to = %to, "Delivery status with no live waiter");
                }
            }
            RelayServerMessage::Message { from, ciphertext } => {
                tracing::debug!(from = %from, len = ciphertext.len(), "Received relayed message");
                if self.inner.inbox.send(IncomingMessage { from, ciphertext }).is_err() {
                    tracing::warn!("Inbox closed, dropping relayed message");
                }
            }
            RelayServerMessage::Pong => {}
        }
    }

    /// Whether the outbound channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.inner.outbound.is_closed()
    }

    /// Outstanding peer key requests.
    pub fn pending_key_requests(&self) -> usize {
        self.inner.key_requests.len()
    }

    /// Sends still awaiting a delivery status.
    pub fn pending_deliveries(&self) -> usize {
        self.inner.deliveries.len()
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("connected", &self.is_connected())
            .field("pending_key_requests", &self.pending_key_requests())
            .field("pending_deliveries", &self.pending_deliveries())
            .finish()
    }
}
