//! # Ciphertext Codec
//!
//! Turns plaintext strings into the transport ciphertext and back.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CIPHERTEXT FORMAT                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  plaintext (UTF-8) ──► chunks of ≤ k-66 bytes                           │
//! │                                                                         │
//! │  each chunk ──► OAEP ──► m ──► c = m^e mod n ──► k-byte big-endian      │
//! │                                                                         │
//! │  frame   = u32 BE length (always k) ‖ block                             │
//! │  payload = frame₁ ‖ frame₂ ‖ … (at most 256 frames)                     │
//! │  wire    = base64 (standard alphabet, padded)                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use num_bigint::BigUint;
use num_traits::One;
use zeroize::Zeroizing;

use super::keys::{KeyPair, PublicKey};
use super::math::mod_pow;
use super::padding;
use crate::error::{Error, Result};

/// Upper bound on blocks per message.
pub const MAX_BLOCKS: usize = 256;

const FRAME_HEADER_LEN: usize = 4;

/// Plaintext bytes carried by one block under `key`.
pub fn block_capacity(key: &PublicKey) -> usize {
    padding::capacity(key.modulus_len())
}

/// Encrypt a UTF-8 string for the holder of `key`.
pub fn encrypt(plaintext: &str, key: &PublicKey) -> Result<String> {
    let k = key.modulus_len();
    let capacity = block_capacity(key);
    if capacity == 0 {
        return Err(Error::Crypto);
    }

    let bytes = plaintext.as_bytes();
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![bytes]
    } else {
        bytes.chunks(capacity).collect()
    };
    if chunks.len() > MAX_BLOCKS {
        return Err(Error::Crypto);
    }

    let mut framed = Vec::with_capacity(chunks.len() * (FRAME_HEADER_LEN + k));
    for chunk in chunks {
        let c = encrypt_block(chunk, key)?;
        let block = to_fixed_width(&c, k)?;
        framed.extend_from_slice(&(k as u32).to_be_bytes());
        framed.extend_from_slice(&block);
    }

    Ok(STANDARD.encode(framed))
}

fn encrypt_block(chunk: &[u8], key: &PublicKey) -> Result<BigUint> {
    let n_minus_one: BigUint = key.n() - 1u32;
    loop {
        let encoded = padding::encode(chunk, key.modulus_len())?;
        let m = BigUint::from_bytes_be(&encoded);
        // 0, 1 and n-1 are fixed points of RSA; a fresh seed avoids them
        if m <= BigUint::one() || m >= n_minus_one {
            continue;
        }
        return Ok(mod_pow(&m, key.e(), key.n()));
    }
}

/// Decrypt ciphertext produced by [`encrypt`] against our public key.
///
/// Bad base64, a bad frame, an out-of-range block, a padding mismatch and
/// invalid UTF-8 all come back as the same [`Error::Crypto`].
pub fn decrypt(ciphertext: &str, key_pair: &KeyPair) -> Result<String> {
    let raw = STANDARD
        .decode(ciphertext.trim())
        .map_err(|_| Error::Crypto)?;

    let public = key_pair.public_key();
    let k = public.modulus_len();

    if raw.is_empty() {
        return Err(Error::Crypto);
    }

    let mut plaintext = Zeroizing::new(Vec::new());
    let mut rest = raw.as_slice();
    let mut blocks = 0usize;

    while !rest.is_empty() {
        if rest.len() < FRAME_HEADER_LEN {
            return Err(Error::Crypto);
        }
        let (header, tail) = rest.split_at(FRAME_HEADER_LEN);
        let header: [u8; FRAME_HEADER_LEN] = header.try_into().map_err(|_| Error::Crypto)?;
        let len = u32::from_be_bytes(header) as usize;
        if len != k || tail.len() < len {
            return Err(Error::Crypto);
        }

        blocks += 1;
        if blocks > MAX_BLOCKS {
            return Err(Error::Crypto);
        }

        let (block, tail) = tail.split_at(len);
        rest = tail;

        let c = BigUint::from_bytes_be(block);
        if &c >= public.n() {
            return Err(Error::Crypto);
        }

        let m = key_pair.private_op(&c);
        let encoded = to_fixed_width(&m, k)?;
        let chunk = padding::decode(&encoded, k)?;
        plaintext.extend_from_slice(&chunk);
    }

    String::from_utf8(plaintext.to_vec()).map_err(|_| Error::Crypto)
}

/// Big-endian encoding left-padded to exactly `width` bytes.
fn to_fixed_width(value: &BigUint, width: usize) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = Zeroizing::new(value.to_bytes_be());
    if bytes.len() > width {
        return Err(Error::Crypto);
    }
    let mut out = Zeroizing::new(vec![0u8; width]);
    out[width - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}
