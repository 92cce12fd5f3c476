//! OAEP padding (SHA-256, MGF1-SHA-256, empty label).
//!
//! ```text
//!          ┌──────┬──────────────┬─────────────────────────────────────┐
//!   EM  =  │ 0x00 │ maskedSeed   │ maskedDB                            │
//!          │  1B  │    32B       │  k - 33 bytes                       │
//!          └──────┴──────────────┴─────────────────────────────────────┘
//!
//!   DB  =  lHash(32B) ‖ 0x00…0x00 ‖ 0x01 ‖ M
//! ```

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

/// SHA-256 output size.
pub const HASH_LEN: usize = 32;

/// Bytes of every block consumed by padding.
pub const OAEP_OVERHEAD: usize = 2 * HASH_LEN + 2;

/// Largest message that fits one block of a `k`-byte modulus.
pub fn capacity(modulus_len: usize) -> usize {
    modulus_len.saturating_sub(OAEP_OVERHEAD)
}

fn mgf1(seed: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut mask = Zeroizing::new(Vec::with_capacity(len + HASH_LEN));
    let mut counter: u32 = 0;
    while mask.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_be_bytes());
        mask.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    mask.truncate(len);
    mask
}

/// Pad `message` into a `k`-byte encoded block with a fresh random seed.
pub fn encode(message: &[u8], modulus_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let k = modulus_len;
    if k <= OAEP_OVERHEAD || message.len() > capacity(k) {
        return Err(Error::Crypto);
    }

    let l_hash = Sha256::digest(b"");
    let db_len = k - HASH_LEN - 1;

    let mut db = Zeroizing::new(vec![0u8; db_len]);
    db[..HASH_LEN].copy_from_slice(&l_hash);
    db[db_len - message.len() - 1] = 0x01;
    db[db_len - message.len()..].copy_from_slice(message);

    let mut seed = [0u8; HASH_LEN];
    OsRng.fill_bytes(&mut seed);

    let db_mask = mgf1(&seed, db_len);
    for (byte, mask) in db.iter_mut().zip(db_mask.iter()) {
        *byte ^= mask;
    }

    let seed_mask = mgf1(&db, HASH_LEN);
    let mut encoded = Zeroizing::new(vec![0u8; k]);
    for i in 0..HASH_LEN {
        encoded[1 + i] = seed[i] ^ seed_mask[i];
    }
    encoded[1 + HASH_LEN..].copy_from_slice(&db);

    seed.zeroize();
    Ok(encoded)
}

/// Strip padding from a `k`-byte encoded block.
///
/// Every check runs before the result is decided, and every failure is the
/// same [`Error::Crypto`].
pub fn decode(encoded: &[u8], modulus_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let k = modulus_len;
    if encoded.len() != k || k <= OAEP_OVERHEAD {
        return Err(Error::Crypto);
    }

    let leading = encoded[0];
    let masked_seed = &encoded[1..1 + HASH_LEN];
    let masked_db = &encoded[1 + HASH_LEN..];

    let seed_mask = mgf1(masked_db, HASH_LEN);
    let seed: Zeroizing<Vec<u8>> = Zeroizing::new(
        masked_seed
            .iter()
            .zip(seed_mask.iter())
            .map(|(a, b)| a ^ b)
            .collect(),
    );

    let db_mask = mgf1(&seed, masked_db.len());
    let db: Zeroizing<Vec<u8>> = Zeroizing::new(
        masked_db
            .iter()
            .zip(db_mask.iter())
            .map(|(a, b)| a ^ b)
            .collect(),
    );

    let l_hash = Sha256::digest(b"");
    let mut bad = leading;
    for (a, b) in db[..HASH_LEN].iter().zip(l_hash.iter()) {
        bad |= a ^ b;
    }

    let mut separator: Option<usize> = None;
    for (i, &byte) in db[HASH_LEN..].iter().enumerate() {
        if separator.is_none() {
            if byte == 0x01 {
                separator = Some(i);
            } else {
                bad |= byte;
            }
        }
    }

    match separator {
        Some(index) if bad == 0 => Ok(Zeroizing::new(db[HASH_LEN + index + 1..].to_vec())),
        _ => Err(Error::Crypto),
    }
}
