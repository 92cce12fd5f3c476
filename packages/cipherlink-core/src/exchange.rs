//! # Exchange Protocol
//!
//! Client-side state machine driving key discovery and delivery through a
//! relay.
//!
//! ## State Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        EXCHANGE STATES                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Idle ──register()──► Registered ──announce_key()──► KeyAnnounced      │
//! │                                                          │              │
//! │                                          discover_peer() │◄───────────┐ │
//! │                                                          ▼            │ │
//! │                                                  PeerKeyRequested     │ │
//! │                                             key │          │ null /   │ │
//! │                                                 ▼          │ timeout  │ │
//! │                                           PeerKeyBound     ▼          │ │
//! │                                                 │       Failed ───────┤ │
//! │                                       encrypt() │                     │ │
//! │                                                 ▼                     │ │
//! │                                            Encrypted                  │ │
//! │                                                 │ send()              │ │
//! │                                                 ▼                     │ │
//! │                                               Sent                    │ │
//! │                                       ok:true │    │ ok:false/timeout │ │
//! │                                               ▼    ▼                  │ │
//! │                                       Delivered   Failed ─────────────┘ │
//! │                                                                         │
//! │  discover_peer() may be re-entered from KeyAnnounced or any later      │
//! │  state. Anything else out of order is Error::InvalidState.             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use crate::engine::SharedEngine;
use crate::error::{Error, Result};
use crate::network::{DeliveryStatus, IncomingMessage, RelayClient};

/// Failure reason when discovery yields no usable key.
pub const PEER_KEY_MISSING: &str = "peer key missing";

/// Failure reason when the relay never reports delivery.
pub const DELIVERY_STATUS_TIMEOUT: &str = "delivery status timeout";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a session is in the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ExchangeState {
    Idle,
    Registered,
    KeyAnnounced,
    PeerKeyRequested { target: String },
    PeerKeyBound { peer: String },
    Encrypted { peer: String, ciphertext: String },
    Sent { peer: String },
    Delivered { peer: String },
    Failed { reason: String },
}

impl ExchangeState {
    /// Short name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeState::Idle => "Idle",
            ExchangeState::Registered => "Registered",
            ExchangeState::KeyAnnounced => "KeyAnnounced",
            ExchangeState::PeerKeyRequested { .. } => "PeerKeyRequested",
            ExchangeState::PeerKeyBound { .. } => "PeerKeyBound",
            ExchangeState::Encrypted { .. } => "Encrypted",
            ExchangeState::Sent { .. } => "Sent",
            ExchangeState::Delivered { .. } => "Delivered",
            ExchangeState::Failed { .. } => "Failed",
        }
    }

    fn has_announced(&self) -> bool {
        !matches!(self, ExchangeState::Idle | ExchangeState::Registered)
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Timeouts for correlated relay responses.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeConfig {
    /// How long to wait for a `publicKey` answer
    pub peer_key_timeout: Duration,
    /// How long to wait for a `deliveryStatus`
    pub delivery_timeout: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            peer_key_timeout: DEFAULT_TIMEOUT,
            delivery_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// One device's side of the exchange.
pub struct ExchangeSession {
    user_id: String,
    engine: SharedEngine,
    client: RelayClient,
    config: ExchangeConfig,
    state: ExchangeState,
}

impl ExchangeSession {
    /// Start a session in `Idle`.
    pub fn new(
        user_id: impl Into<String>,
        engine: SharedEngine,
        client: RelayClient,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            engine,
            client,
            config,
            state: ExchangeState::Idle,
        }
    }

    /// Our user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current state.
    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    /// The engine this session encrypts with.
    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    fn transition(&mut self, next: ExchangeState) {
        tracing::debug!(user_id = %self.user_id, from = %self.state, to = %next, "Exchange transition");
        self.state = next;
    }

    /// `Idle → Registered`. No acknowledgement is awaited.
    pub fn register(&mut self) -> Result<()> {
        if self.state != ExchangeState::Idle {
            return Err(self.invalid("register"));
        }
        self.client.register(&self.user_id)?;
        self.transition(ExchangeState::Registered);
        Ok(())
    }

    /// `Registered → KeyAnnounced`.
    pub fn announce_key(&mut self) -> Result<()> {
        if self.state != ExchangeState::Registered {
            return Err(self.invalid("announce key"));
        }
        let key = self.engine.read().public_key().clone();
        self.client.announce_public_key(&self.user_id, &key)?;
        self.transition(ExchangeState::KeyAnnounced);
        Ok(())
    }

    /// Look up `target`'s key and bind it.
    ///
    /// A null answer, an invalid key, a superseded request or a timeout all
    /// end in `Failed("peer key missing")`. There is no automatic retry.
    pub async fn discover_peer(&mut self, target: &str) -> Result<()> {
        if !self.state.has_announced() {
            return Err(self.invalid("discover peer"));
        }

        self.transition(ExchangeState::PeerKeyRequested {
            target: target.to_string(),
        });

        let outcome = self
            .client
            .request_public_key(target, self.config.peer_key_timeout)
            .await;

        let key = match outcome {
            Ok(Some(encoded)) => match encoded.decode() {
                Ok(key) => Ok(key),
                Err(e) => {
                    tracing::warn!(target_user = target, error = %e, "Relay returned an unusable public key");
                    Err(Error::PeerKeyMissing(target.to_string()))
                }
            },
            Ok(None) => Err(Error::PeerKeyMissing(target.to_string())),
            Err(Error::NotConnected) => Err(Error::NotConnected),
            Err(e) => {
                tracing::debug!(target_user = target, error = %e, "Peer key lookup failed");
                Err(Error::PeerKeyMissing(target.to_string()))
            }
        };

        match key {
            Ok(key) => {
                self.engine.write().bind_peer_key(key);
                self.transition(ExchangeState::PeerKeyBound {
                    peer: target.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.transition(ExchangeState::Failed {
                    reason: PEER_KEY_MISSING.to_string(),
                });
                Err(e)
            }
        }
    }

    /// `PeerKeyBound → Encrypted`. On failure the state is unchanged.
    pub fn encrypt(&mut self, plaintext: &str) -> Result<()> {
        let peer = match &self.state {
            ExchangeState::PeerKeyBound { peer } => peer.clone(),
            _ => return Err(self.invalid("encrypt")),
        };

        let ciphertext = self.engine.read().encrypt(plaintext)?;
        self.transition(ExchangeState::Encrypted { peer, ciphertext });
        Ok(())
    }

    /// `Encrypted → Sent → Delivered | Failed`.
    ///
    /// A negative status is returned as `Ok`; the session ends in
    /// `Failed(reason)`.
    pub async fn send(&mut self) -> Result<DeliveryStatus> {
        let (peer, ciphertext) = match &self.state {
            ExchangeState::Encrypted { peer, ciphertext } => (peer.clone(), ciphertext.clone()),
            _ => return Err(self.invalid("send")),
        };

        self.transition(ExchangeState::Sent { peer: peer.clone() });

        let outcome = self
            .client
            .send_message(&self.user_id, &peer, ciphertext, self.config.delivery_timeout)
            .await;

        match outcome {
            Ok(status) if status.ok => {
                tracing::info!(to = %peer, "Message delivered");
                self.transition(ExchangeState::Delivered { peer });
                Ok(status)
            }
            Ok(status) => {
                let reason = status
                    .reason
                    .clone()
                    .unwrap_or_else(|| "delivery failed".to_string());
                tracing::info!(to = %peer, %reason, "Message not delivered");
                self.transition(ExchangeState::Failed { reason });
                Ok(status)
            }
            Err(e) => {
                let reason = match &e {
                    Error::Timeout(_) => DELIVERY_STATUS_TIMEOUT.to_string(),
                    other => other.to_string(),
                };
                self.transition(ExchangeState::Failed { reason });
                Err(e)
            }
        }
    }

    /// Discover `target`, encrypt `plaintext` for it and send.
    pub async fn send_text(&mut self, target: &str, plaintext: &str) -> Result<DeliveryStatus> {
        self.discover_peer(target).await?;
        self.encrypt(plaintext)?;
        self.send().await
    }

    /// Decrypt a message the relay forwarded to us.
    pub fn open(&self, incoming: &IncomingMessage) -> Result<String> {
        self.engine.read().decrypt(&incoming.ciphertext)
    }
}

impl fmt::Debug for ExchangeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeSession")
            .field("user_id", &self.user_id)
            .field("state", &self.state.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncodedPublicKey;
    use crate::engine::RsaEngine;
    use crate::network::{RelayClientMessage, RelayServerMessage};
    use crate::test_support::{key_a, key_b};
    use tokio::sync::mpsc;

    fn fast() -> ExchangeConfig {
        ExchangeConfig {
            peer_key_timeout: Duration::from_millis(50),
            delivery_timeout: Duration::from_millis(50),
        }
    }

    struct Harness {
        session: ExchangeSession,
        client: RelayClient,
        outbound: mpsc::UnboundedReceiver<RelayClientMessage>,
        _inbox: mpsc::UnboundedReceiver<IncomingMessage>,
    }

    fn harness(user_id: &str, config: ExchangeConfig) -> Harness {
        let (out_tx, outbound) = mpsc::unbounded_channel();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let client = RelayClient::new(out_tx, inbox_tx);
        let engine = RsaEngine::new(key_b().clone()).into_shared();
        Harness {
            session: ExchangeSession::new(user_id, engine, client.clone(), config),
            client,
            outbound,
            _inbox: inbox,
        }
    }

    /// Fake relay that answers key lookups with `key` and every send with
    /// `status`.
    fn spawn_relay(
        client: RelayClient,
        mut outbound: mpsc::UnboundedReceiver<RelayClientMessage>,
        key: Option<EncodedPublicKey>,
        status: Option<DeliveryStatus>,
    ) -> tokio::task::JoinHandle<Vec<RelayClientMessage>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(msg) = outbound.recv().await {
                match &msg {
                    RelayClientMessage::RequestPublicKey { target_user_id } => {
                        client.dispatch(RelayServerMessage::PublicKey {
                            target_user_id: target_user_id.clone(),
                            public_key: key.clone(),
                        });
                    }
                    RelayClientMessage::SendMessage { .. } => {
                        if let Some(status) = status.clone() {
                            client.dispatch(RelayServerMessage::DeliveryStatus(status));
                        }
                    }
                    _ => {}
                }
                seen.push(msg);
                if seen.len() >= 4 {
                    break;
                }
            }
            seen
        })
    }

    async fn announced(h: &mut Harness) {
        h.session.register().unwrap();
        h.session.announce_key().unwrap();
        assert_eq!(h.session.state(), &ExchangeState::KeyAnnounced);
    }

    #[tokio::test]
    async fn test_happy_path_to_delivered() {
        let mut h = harness("B", fast());
        announced(&mut h).await;

        let relay = spawn_relay(
            h.client.clone(),
            h.outbound,
            Some(key_a().public_key().encode()),
            Some(DeliveryStatus::delivered("A")),
        );

        let status = h.session.send_text("A", "hi").await.unwrap();
        assert!(status.ok);
        assert_eq!(
            h.session.state(),
            &ExchangeState::Delivered { peer: "A".into() }
        );

        let seen = relay.await.unwrap();
        assert!(matches!(seen[0], RelayClientMessage::Register { .. }));
        assert!(matches!(seen[1], RelayClientMessage::AnnouncePublicKey { .. }));
        let ciphertext = match &seen[3] {
            RelayClientMessage::SendMessage { from, to, ciphertext } => {
                assert_eq!((from.as_str(), to.as_str()), ("B", "A"));
                ciphertext.clone()
            }
            other => panic!("Wrong message: {:?}", other),
        };

        let alice = RsaEngine::new(key_a().clone());
        assert_eq!(alice.decrypt(&ciphertext).unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_null_key_fails_with_peer_key_missing() {
        let mut h = harness("B", fast());
        announced(&mut h).await;
        let _relay = spawn_relay(h.client.clone(), h.outbound, None, None);

        let result = h.session.discover_peer("C").await;
        assert!(matches!(result, Err(Error::PeerKeyMissing(_))));
        assert_eq!(
            h.session.state(),
            &ExchangeState::Failed {
                reason: PEER_KEY_MISSING.into()
            }
        );
    }

    #[tokio::test]
    async fn test_peer_key_timeout_fails() {
        let mut h = harness("B", fast());
        announced(&mut h).await;

        // relay never answers
        let result = h.session.discover_peer("A").await;
        assert!(matches!(result, Err(Error::PeerKeyMissing(_))));
        assert_eq!(h.session.state().name(), "Failed");
        assert_eq!(h.client.pending_key_requests(), 0);
    }

    #[tokio::test]
    async fn test_superseded_request_fails() {
        let mut h = harness("B", ExchangeConfig {
            peer_key_timeout: Duration::from_secs(2),
            delivery_timeout: Duration::from_secs(2),
        });
        announced(&mut h).await;

        let client = h.client.clone();
        let mut outbound = h.outbound;
        let interloper = tokio::spawn(async move {
            // wait for the session's request, then supersede it
            loop {
                if let Some(RelayClientMessage::RequestPublicKey { .. }) = outbound.recv().await {
                    break;
                }
            }
            let _ = client.request_public_key("A", Duration::from_millis(10)).await;
        });

        let result = h.session.discover_peer("A").await;
        assert!(matches!(result, Err(Error::PeerKeyMissing(_))));
        assert_eq!(
            h.session.state(),
            &ExchangeState::Failed {
                reason: PEER_KEY_MISSING.into()
            }
        );
        interloper.await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_status_fails_with_reason() {
        let mut h = harness("B", fast());
        announced(&mut h).await;
        let _relay = spawn_relay(
            h.client.clone(),
            h.outbound,
            Some(key_a().public_key().encode()),
            Some(DeliveryStatus::failed("A", "user offline")),
        );

        let status = h.session.send_text("A", "hi").await.unwrap();
        assert!(!status.ok);
        assert_eq!(
            h.session.state(),
            &ExchangeState::Failed {
                reason: "user offline".into()
            }
        );
    }

    #[tokio::test]
    async fn test_delivery_timeout_fails() {
        let mut h = harness("B", fast());
        announced(&mut h).await;
        let _relay = spawn_relay(
            h.client.clone(),
            h.outbound,
            Some(key_a().public_key().encode()),
            None,
        );

        let result = h.session.send_text("A", "hi").await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(
            h.session.state(),
            &ExchangeState::Failed {
                reason: DELIVERY_STATUS_TIMEOUT.into()
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_transitions_leave_state_unchanged() {
        let mut h = harness("B", fast());

        assert!(matches!(h.session.announce_key(), Err(Error::InvalidState { .. })));
        assert!(matches!(h.session.encrypt("hi"), Err(Error::InvalidState { .. })));
        assert!(matches!(
            h.session.discover_peer("A").await,
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(h.session.send().await, Err(Error::InvalidState { .. })));
        assert_eq!(h.session.state(), &ExchangeState::Idle);

        h.session.register().unwrap();
        assert!(matches!(h.session.register(), Err(Error::InvalidState { .. })));
        assert_eq!(h.session.state(), &ExchangeState::Registered);
    }

    #[tokio::test]
    async fn test_rediscovery_after_failure() {
        let mut h = harness("B", fast());
        announced(&mut h).await;

        assert!(h.session.discover_peer("A").await.is_err());
        assert_eq!(h.session.state().name(), "Failed");

        let _relay = spawn_relay(
            h.client.clone(),
            h.outbound,
            Some(key_a().public_key().encode()),
            None,
        );
        h.session.discover_peer("A").await.unwrap();
        assert_eq!(
            h.session.state(),
            &ExchangeState::PeerKeyBound { peer: "A".into() }
        );
    }

    #[test]
    fn test_open_decrypts_incoming() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (inbox_tx, _inbox_rx) = mpsc::unbounded_channel();
        let client = RelayClient::new(out_tx, inbox_tx);
        let session = ExchangeSession::new(
            "A",
            RsaEngine::new(key_a().clone()).into_shared(),
            client,
            ExchangeConfig::default(),
        );

        let ciphertext = crate::crypto::encrypt("hi", key_a().public_key()).unwrap();
        let incoming = IncomingMessage {
            from: "B".into(),
            ciphertext,
        };
        assert_eq!(session.open(&incoming).unwrap(), "hi");
    }
}
