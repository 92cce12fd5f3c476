//! Relay protocol message definitions.
//!
//! The relay speaks a simple JSON-over-WebSocket protocol. Every frame is one
//! object tagged by `type`. Ciphertext is opaque to the relay; public keys are
//! only checked for shape.

use serde::{Deserialize, Serialize};

/// Longest user id the relay accepts.
pub const MAX_USER_ID_LEN: usize = 128;

/// Longest decimal string accepted for `n` or `e` (covers 8192-bit moduli).
const MAX_DECIMAL_DIGITS: usize = 2500;

// ── Shared Types ──────────────────────────────────────────────────────────────

/// A public key as announced by a client: decimal strings, never parsed as
/// numbers by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicKeyRecord {
    pub n: String,
    pub e: String,
}

impl PublicKeyRecord {
    /// Both fields are non-empty decimal strings of sane length.
    pub fn is_well_formed(&self) -> bool {
        is_decimal(&self.n) && is_decimal(&self.e)
    }
}

fn is_decimal(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_DECIMAL_DIGITS
        && value.bytes().all(|b| b.is_ascii_digit())
}

/// A user id is non-empty, bounded, and free of control characters.
pub fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.trim().is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && !user_id.chars().any(char::is_control)
}

// ── Client → Relay ────────────────────────────────────────────────────────────

/// Messages sent from a client to the relay server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Bind this connection to a user id. Last register wins.
    Register {
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// Store (or replace) the public key for a user id.
    AnnouncePublicKey {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "publicKey")]
        public_key: PublicKeyRecord,
    },

    /// Look up a user's public key.
    RequestPublicKey {
        #[serde(rename = "targetUserId")]
        target_user_id: String,
    },

    /// Route ciphertext to another user. Never queued.
    SendMessage {
        from: String,
        to: String,
        ciphertext: String,
    },

    /// Ping to keep connection alive.
    Ping,
}

// ── Relay → Client ────────────────────────────────────────────────────────────

/// Messages sent from the relay server to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Answer to `requestPublicKey`. `publicKey` is `null` for unknown users.
    PublicKey {
        #[serde(rename = "targetUserId")]
        target_user_id: String,
        #[serde(rename = "publicKey")]
        public_key: Option<PublicKeyRecord>,
    },

    /// Ciphertext forwarded unmodified from another user.
    Message { from: String, ciphertext: String },

    /// Outcome of one `sendMessage`, returned to the sender.
    DeliveryStatus {
        ok: bool,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Pong response to client ping.
    Pong,
}

impl ServerMessage {
    /// Positive delivery status for `to`.
    pub fn delivered(to: &str) -> Self {
        ServerMessage::DeliveryStatus {
            ok: true,
            to: to.to_string(),
            reason: None,
        }
    }

    /// Negative delivery status for `to`.
    pub fn undelivered(to: &str, reason: &str) -> Self {
        ServerMessage::DeliveryStatus {
            ok: false,
            to: to.to_string(),
            reason: Some(reason.to_string()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
