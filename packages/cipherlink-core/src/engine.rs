//! # RSA Engine
//!
//! Per-device engine: one key pair, at most one bound peer key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          RSA ENGINE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   own KeyPair ──► public_key() ──► announced to the relay              │
//! │                                                                         │
//! │   peer PublicKey ◄── bind_peer_key() ◄── relay lookup / HTTP           │
//! │        │                                                               │
//! │        ▼                                                                │
//! │   encrypt(plaintext) ──► ciphertext for the peer                       │
//! │   decrypt(ciphertext) ──► plaintext sent to us                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Talking to several peers means one engine per peer, or re-binding before
//! each send.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::crypto::{self, KeyPair, PublicKey};
use crate::error::{Error, Result};

/// Engine shared between the HTTP surface and the exchange session.
pub type SharedEngine = Arc<RwLock<RsaEngine>>;

/// Local cryptographic engine.
#[derive(Debug)]
pub struct RsaEngine {
    key_pair: KeyPair,
    peer: Option<PublicKey>,
}

impl RsaEngine {
    /// Create an engine around an existing key pair with no peer bound.
    pub fn new(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            peer: None,
        }
    }

    /// Wrap into the shared handle used across tasks.
    pub fn into_shared(self) -> SharedEngine {
        Arc::new(RwLock::new(self))
    }

    /// Our public key.
    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public_key()
    }

    /// Bind the peer key used by [`RsaEngine::encrypt`], replacing any
    /// previous binding.
    pub fn bind_peer_key(&mut self, key: PublicKey) {
        tracing::debug!(bits = key.modulus_bits(), "Bound peer public key");
        self.peer = Some(key);
    }

    /// Currently bound peer key.
    pub fn peer_key(&self) -> Option<&PublicKey> {
        self.peer.as_ref()
    }

    /// Drop the peer binding.
    pub fn clear_peer_key(&mut self) {
        self.peer = None;
    }

    /// Plaintext bytes per block for the bound peer.
    pub fn block_capacity(&self) -> Option<usize> {
        self.peer.as_ref().map(crypto::block_capacity)
    }

    /// Encrypt for the bound peer.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let peer = self.peer.as_ref().ok_or(Error::NoPeerKey)?;
        crypto::encrypt(plaintext, peer)
    }

    /// Decrypt ciphertext addressed to us.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        crypto::decrypt(ciphertext, &self.key_pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{key_a, key_b};

    #[test]
    fn test_encrypt_requires_peer() {
        let engine = RsaEngine::new(key_a().clone());
        assert!(matches!(engine.encrypt("hi"), Err(Error::NoPeerKey)));
        assert!(engine.block_capacity().is_none());
    }

    #[test]
    fn test_two_engines_exchange() {
        let alice = RsaEngine::new(key_a().clone());
        let mut bob = RsaEngine::new(key_b().clone());

        bob.bind_peer_key(alice.public_key().clone());
        let ciphertext = bob.encrypt("hi").unwrap();

        assert_eq!(alice.decrypt(&ciphertext).unwrap(), "hi");
        // the sender cannot read its own ciphertext
        assert!(matches!(bob.decrypt(&ciphertext), Err(Error::Crypto)));
    }

    #[test]
    fn test_rebinding_replaces_peer() {
        let mut engine = RsaEngine::new(key_a().clone());
        engine.bind_peer_key(key_b().public_key().clone());
        engine.bind_peer_key(key_a().public_key().clone());
        assert_eq!(engine.peer_key(), Some(key_a().public_key()));

        let ciphertext = engine.encrypt("to self").unwrap();
        assert_eq!(engine.decrypt(&ciphertext).unwrap(), "to self");

        engine.clear_peer_key();
        assert!(engine.peer_key().is_none());
    }
}
