//! Server state management.
//!
//! The key directory maps user ids to their live connection and last
//! announced public key. It is the only shared mutable state in the relay
//! and is backed by a DashMap so handlers on different worker threads never
//! block each other.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{PublicKeyRecord, ServerMessage};

/// Reason reported when the recipient has no live connection.
pub const REASON_USER_OFFLINE: &str = "user offline";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// A connected client's sender channel.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Identity of one WebSocket connection.
pub type ConnectionId = Uuid;

/// Where to reach a registered user.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub sender: ClientSender,
}

/// Directory record for one user id.
#[derive(Debug, Clone, Default)]
pub struct DirectoryEntry {
    /// Live connection; `None` means offline.
    pub connection: Option<ConnectionHandle>,
    /// Last announced key. Survives disconnects.
    pub public_key: Option<PublicKeyRecord>,
}

/// User id → connection and public key.
///
/// Entries are created on first register or announce and never removed.
#[derive(Clone, Default)]
pub struct Directory {
    entries: Arc<DashMap<String, DirectoryEntry>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `handle`. Returns the id of a different connection
    /// that previously held the binding, if any.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionId> {
        let mut entry = self.entries.entry(user_id.to_string()).or_default();
        let previous = entry.connection.replace(handle.clone());
        previous.map(|old| old.id).filter(|old| *old != handle.id)
    }

    /// Store or replace the public key for `user_id`.
    pub fn announce(&self, user_id: &str, key: PublicKeyRecord) {
        self.entries
            .entry(user_id.to_string())
            .or_default()
            .public_key = Some(key);
    }

    /// Public key announced for `user_id`, if any.
    pub fn lookup_key(&self, user_id: &str) -> Option<PublicKeyRecord> {
        self.entries
            .get(user_id)
            .and_then(|entry| entry.public_key.clone())
    }

    /// Live connection for `user_id`, if any.
    pub fn connection(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.entries
            .get(user_id)
            .and_then(|entry| entry.connection.clone())
    }

    /// Clear the connection for `user_id` only if it is still `connection_id`.
    /// Returns whether anything was cleared.
    pub fn disconnect(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        match self.entries.get_mut(user_id) {
            Some(mut entry) => {
                let owned = entry
                    .connection
                    .as_ref()
                    .is_some_and(|current| current.id == connection_id);
                if owned {
                    entry.connection = None;
                }
                owned
            }
            None => false,
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries
            .get(user_id)
            .is_some_and(|entry| entry.connection.is_some())
    }

    /// Users with a live connection.
    pub fn online_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.connection.is_some())
            .count()
    }

    /// Users with an announced key.
    pub fn known_key_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.public_key.is_some())
            .count()
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct RelayState {
    /// User id → connection and key.
    pub directory: Directory,

    /// Server configuration.
    pub config: RelayConfig,

    /// When this relay started.
    pub started_at: DateTime<Utc>,
}

impl RelayState {
    /// Create a new relay state with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            directory: Directory::new(),
            config,
            started_at: Utc::now(),
        }
    }

    /// Forward ciphertext to `to` and build the status for the sender.
    ///
    /// The ciphertext is passed through untouched. Nothing is queued for
    /// offline users.
    pub fn relay_message(&self, from: &str, to: &str, ciphertext: String) -> ServerMessage {
        let Some(target) = self.directory.connection(to) else {
            tracing::debug!(from, to, "Recipient offline, dropping message");
            return ServerMessage::undelivered(to, REASON_USER_OFFLINE);
        };

        let forwarded = ServerMessage::Message {
            from: from.to_string(),
            ciphertext,
        };

        if target.sender.send(forwarded).is_ok() {
            tracing::debug!(from, to, "Message relayed");
            ServerMessage::delivered(to)
        } else {
            tracing::debug!(from, to, "Recipient connection closing, dropping message");
            ServerMessage::undelivered(to, REASON_USER_OFFLINE)
        }
    }

    /// Number of online users.
    pub fn online_count(&self) -> usize {
        self.directory.online_count()
    }

    /// Number of users with an announced key.
    pub fn known_key_count(&self) -> usize {
        self.directory.known_key_count()
    }

    /// Seconds since start.
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
