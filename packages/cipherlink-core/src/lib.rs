//! # CipherLink Core
//!
//! End-to-end encrypted text messaging between two devices through a relay
//! that only ever sees public keys and ciphertext.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       CIPHERLINK CORE MODULES                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │   Crypto    │  │   Engine    │  │   Storage   │  │   Exchange   │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - BigUint   │  │ - Own keys  │  │ - Key file  │  │ - Register   │   │
//! │  │ - Primes    │  │ - Peer key  │  │ - 0600      │  │ - Announce   │   │
//! │  │ - OAEP      │  │ - Encrypt   │  │ - Regen on  │  │ - Discover   │   │
//! │  │ - Framing   │  │ - Decrypt   │  │   corrupt   │  │ - Send       │   │
//! │  └──────┬──────┘  └──────┬──────┘  └─────────────┘  └──────┬───────┘   │
//! │         │                │                                 │           │
//! │         └───────►────────┘                                 ▼           │
//! │                                              ┌─────────────────────────┐│
//! │                                              │        Network          ││
//! │                                              │ - Relay wire messages   ││
//! │                                              │ - Response correlation  ││
//! │                                              │ - WebSocket bridge      ││
//! │                                              └─────────────────────────┘│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`crypto`] - RSA arithmetic, keys, padding and the ciphertext codec
//! - [`engine`] - Per-device engine holding our key pair and the peer key
//! - [`storage`] - Local key persistence
//! - [`network`] - Relay protocol messages and client
//! - [`exchange`] - Key discovery and delivery state machine
//!
//! ## Security Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CONFIDENTIALITY BOUNDARY                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Device A                     Relay                      Device B      │
//! │  ────────                     ─────                      ────────      │
//! │  KeyPair(A) ── (n,e) ──►  directory[A] ──► (n,e) ──► bind_peer_key     │
//! │                                                          │             │
//! │  decrypt ◄── ciphertext ◄── forward ◄── ciphertext ◄── encrypt         │
//! │                                                                         │
//! │  Private exponents and plaintext never leave the device.               │
//! │  The relay is trusted for routing only; it can drop or reorder.        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod crypto;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod network;
pub mod storage;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use crypto::{EncodedPublicKey, KeyPair, PublicKey};
pub use engine::{RsaEngine, SharedEngine};
pub use error::{Error, Result};
pub use exchange::{ExchangeConfig, ExchangeSession, ExchangeState};
pub use network::{DeliveryStatus, IncomingMessage, RelayClient};
pub use storage::KeyStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}

// ============================================================================
// TEST SUPPORT
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
