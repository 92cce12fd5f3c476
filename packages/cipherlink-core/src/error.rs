//! # Error Handling
//!
//! Error types for CipherLink Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Validation Errors                                                 │
//! │  │   ├── Validation            - Malformed input                       │
//! │  │   └── InvalidKey            - Public key fails structural checks    │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── Crypto                - Generic encrypt/decrypt failure       │
//! │  │   ├── NoPeerKey             - Encrypt before a peer key is bound    │
//! │  │   └── KeyGen                - Exponent not invertible after retries │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   └── Persistence           - Key store unreadable / unwritable     │
//! │  │                                                                      │
//! │  ├── Routing & Protocol Errors                                         │
//! │  │   ├── RecipientOffline      - Target has no live connection         │
//! │  │   ├── PeerKeyMissing        - Peer key discovery failed             │
//! │  │   └── InvalidState          - Operation not allowed in this state   │
//! │  │                                                                      │
//! │  └── Transport Errors                                                  │
//! │      ├── NotConnected          - Relay channel closed                  │
//! │      ├── ConnectionFailed      - Could not reach the relay             │
//! │      └── Timeout               - Correlated response never arrived     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Crypto` carries no detail. Every decrypt failure collapses into it
//! whether the frame or the padding check was at fault.

use thiserror::Error;

/// Result type alias for CipherLink Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CipherLink Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Validation Errors (100-199)
    // ========================================================================

    /// Malformed or incomplete input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Public key fails structural validation
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Any encrypt/decrypt failure. Never differentiated by cause.
    #[error("Cryptographic operation failed")]
    Crypto,

    /// Encrypt was called before a peer public key was bound
    #[error("Peer public key not set")]
    NoPeerKey,

    /// Key generation could not find an invertible public exponent
    #[error("Key generation failed: {0}")]
    KeyGen(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Key store unreadable, corrupt or unwritable
    #[error("Key store error: {0}")]
    Persistence(String),

    // ========================================================================
    // Routing & Protocol Errors (500-599)
    // ========================================================================

    /// Target user has no live connection on the relay
    #[error("Recipient offline: {0}")]
    RecipientOffline(String),

    /// Peer key lookup returned nothing usable
    #[error("Peer key missing for {0}")]
    PeerKeyMissing(String),

    /// Exchange operation invoked from a state that does not allow it
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the session was in
        state: String,
    },

    /// Not connected to the relay
    #[error("Not connected to the relay.")]
    NotConnected,

    /// Failed to connect to the relay
    #[error("Failed to connect to relay: {0}")]
    ConnectionFailed(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable numeric code, grouped by category:
    /// - 100-199: Validation
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Routing, protocol and transport
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::Validation(_) => 100,
            Error::InvalidKey(_) => 101,

            Error::Crypto => 300,
            Error::NoPeerKey => 301,
            Error::KeyGen(_) => 302,

            Error::Persistence(_) => 400,

            Error::RecipientOffline(_) => 500,
            Error::PeerKeyMissing(_) => 501,
            Error::InvalidState { .. } => 502,
            Error::NotConnected => 503,
            Error::ConnectionFailed(_) => 504,
            Error::Timeout(_) => 505,

            Error::Io(_) => 900,
            Error::Serialization(_) => 901,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by retrying the step that produced
    /// them, e.g. restarting peer key discovery.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::RecipientOffline(_)
                | Error::PeerKeyMissing(_)
                | Error::KeyGen(_)
                | Error::NotConnected
        )
    }
}
