//! # Cryptography Module
//!
//! RSA for short text messages, built on arbitrary-precision integers,
//! with OAEP padding and a framed base64 ciphertext codec.
//!
//! ## Layering
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      CRYPTOGRAPHIC LAYERS                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  codec    encrypt(&str, &PublicKey) / decrypt(&str, &KeyPair)           │
//! │    │      chunking, u32-BE framing, base64, generic failures           │
//! │    ▼                                                                    │
//! │  padding  OAEP (SHA-256, MGF1-SHA-256, empty label)                     │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  keys     KeyPair / PublicKey, generation, CRT private op               │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  math     mod_pow, Miller-Rabin, extended gcd, modular inverse          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Parameters
//!
//! | Parameter | Value |
//! |-----------|-------|
//! | Public exponent | 65537 |
//! | Default modulus | 2048 bits |
//! | Minimum modulus | 768 bits |
//! | Miller-Rabin rounds | 40 |
//! | Padding overhead | 66 bytes per block |
//! | Max blocks per message | 256 |
//!
//! ## Security Considerations
//!
//! 1. **Randomized padding**: the same plaintext never encrypts to the same
//!    ciphertext twice
//! 2. **Uniform failures**: every decrypt failure is [`crate::Error::Crypto`]
//! 3. **Secure random**: `rand::rngs::OsRng` for primes, witnesses and seeds
//! 4. **Zeroization**: padded plaintext buffers are wiped on drop

mod codec;
mod keys;
pub mod math;
mod padding;

pub use codec::{block_capacity, decrypt, encrypt, MAX_BLOCKS};
pub use keys::{
    EncodedPublicKey, KeyPair, PublicKey, DEFAULT_MODULUS_BITS, MAX_KEYGEN_ATTEMPTS,
    MIN_MODULUS_BITS, PUBLIC_EXPONENT,
};
pub use padding::OAEP_OVERHEAD;
