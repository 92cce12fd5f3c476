//! Engine server state.

use std::collections::VecDeque;
use std::sync::Arc;

use cipherlink_core::{ExchangeSession, IncomingMessage, SharedEngine};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

/// Default number of decrypted messages kept for `GET /messages`.
pub const DEFAULT_INBOX_CAPACITY: usize = 100;

/// A relayed message after decryption.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub from: String,
    pub plaintext: String,
}

/// Bounded in-memory inbox. The oldest message is dropped when full.
#[derive(Clone)]
pub struct Inbox {
    messages: Arc<Mutex<VecDeque<ReceivedMessage>>>,
    capacity: usize,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, message: ReceivedMessage) {
        let mut messages = self.messages.lock();
        if messages.len() >= self.capacity {
            messages.pop_front();
            tracing::debug!("Inbox full, dropped oldest message");
        }
        messages.push_back(message);
    }

    /// Take every stored message, oldest first.
    pub fn drain(&self) -> Vec<ReceivedMessage> {
        self.messages.lock().drain(..).collect()
    }
}

/// Everything needed to talk through a relay.
#[derive(Clone)]
pub struct RelayLink {
    pub session: Arc<tokio::sync::Mutex<ExchangeSession>>,
    pub inbox: Inbox,
}

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub user_id: String,
    pub engine: SharedEngine,
    /// `None` when no relay URL is configured.
    pub relay: Option<RelayLink>,
}

/// Decrypt relayed ciphertext into `inbox` until the relay client goes away.
pub async fn run_inbox(
    engine: SharedEngine,
    mut incoming: mpsc::UnboundedReceiver<IncomingMessage>,
    inbox: Inbox,
) {
    while let Some(message) = incoming.recv().await {
        let decrypted = engine.read().decrypt(&message.ciphertext);
        match decrypted {
            Ok(plaintext) => {
                tracing::info!(from = %message.from, "Received message");
                inbox.push(ReceivedMessage {
                    from: message.from,
                    plaintext,
                });
            }
            Err(e) => {
                tracing::warn!(from = %message.from, error = %e, "Dropping undecryptable message");
            }
        }
    }
    tracing::debug!("Inbox consumer stopped");
}
