//! # Key Management
//!
//! RSA key generation and the public/private key types.
//!
//! ## Key Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY TYPES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  KeyPair (private, one per device)                                     │
//! │  ─────────────────────────────────                                      │
//! │  • n = p·q, e = 65537, d = e⁻¹ mod φ(n)                                 │
//! │  • p, q kept for CRT-accelerated decryption                            │
//! │  • Never serialized to outbound messages; persisted only by KeyStore   │
//! │                                                                         │
//! │  PublicKey (shareable)                                                 │
//! │  ─────────────────────                                                  │
//! │  • (n, e), validated: e odd, 3 ≤ e < n, n large enough for OAEP        │
//! │                                                                         │
//! │  EncodedPublicKey (wire form)                                          │
//! │  ────────────────────────────                                           │
//! │  • { "n": "<decimal>", "e": "<decimal>" }                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use super::math::{
    gcd, generate_prime, is_probable_prime, mod_inverse, mod_pow, MILLER_RABIN_ROUNDS,
};
use super::padding::OAEP_OVERHEAD;
use crate::error::{Error, Result};

/// Conventional public exponent (F4).
pub const PUBLIC_EXPONENT: u32 = 65_537;

/// Smallest modulus accepted for generation.
pub const MIN_MODULUS_BITS: u64 = 768;

/// Default modulus size for device keys.
pub const DEFAULT_MODULUS_BITS: u64 = 2048;

/// Prime pairs tried before giving up on an invertible exponent.
pub const MAX_KEYGEN_ATTEMPTS: usize = 16;

/// RSA public key `(n, e)`.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    n: BigUint,
    e: BigUint,
}

impl PublicKey {
    /// Build a public key, checking its structure.
    ///
    /// `e` must be odd with `3 ≤ e < n`, and `n` must be wide enough to hold
    /// one OAEP-padded block.
    pub fn new(n: BigUint, e: BigUint) -> Result<Self> {
        if n.is_zero() {
            return Err(Error::InvalidKey("modulus must be positive".into()));
        }
        if e < BigUint::from(3u32) || !e.bit(0) {
            return Err(Error::InvalidKey("exponent must be odd and at least 3".into()));
        }
        if e >= n {
            return Err(Error::InvalidKey("exponent must be smaller than the modulus".into()));
        }
        let modulus_len = byte_len(&n);
        if modulus_len <= OAEP_OVERHEAD {
            return Err(Error::InvalidKey(format!(
                "modulus of {} bits is too small for padded blocks",
                n.bits()
            )));
        }
        Ok(Self { n, e })
    }

    /// Parse a public key from decimal strings.
    pub fn from_decimal(n: &str, e: &str) -> Result<Self> {
        let n = parse_decimal(n).ok_or_else(|| Error::InvalidKey("n is not a decimal integer".into()))?;
        let e = parse_decimal(e).ok_or_else(|| Error::InvalidKey("e is not a decimal integer".into()))?;
        Self::new(n, e)
    }

    /// The modulus `n`.
    pub fn n(&self) -> &BigUint {
        &self.n
    }

    /// The public exponent `e`.
    pub fn e(&self) -> &BigUint {
        &self.e
    }

    /// Bit length of the modulus.
    pub fn modulus_bits(&self) -> u64 {
        self.n.bits()
    }

    /// Byte length `k` of the modulus; every ciphertext block is this wide.
    pub fn modulus_len(&self) -> usize {
        byte_len(&self.n)
    }

    /// Wire representation with decimal strings.
    pub fn encode(&self) -> EncodedPublicKey {
        EncodedPublicKey {
            n: self.n.to_str_radix(10),
            e: self.e.to_str_radix(10),
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &self.n.bits())
            .field("e", &self.e)
            .finish()
    }
}

/// Public key as exchanged over JSON: `{"n": "...", "e": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodedPublicKey {
    /// Modulus, decimal
    pub n: String,
    /// Public exponent, decimal
    pub e: String,
}

impl EncodedPublicKey {
    /// Parse and validate into a [`PublicKey`].
    pub fn decode(&self) -> Result<PublicKey> {
        PublicKey::from_decimal(&self.n, &self.e)
    }
}

impl TryFrom<&EncodedPublicKey> for PublicKey {
    type Error = Error;

    fn try_from(value: &EncodedPublicKey) -> Result<Self> {
        value.decode()
    }
}

/// CRT parameters derived from the primes.
#[derive(Clone)]
struct CrtParams {
    p: BigUint,
    q: BigUint,
    dp: BigUint,
    dq: BigUint,
    qinv: BigUint,
}

/// RSA key pair owned by exactly one engine.
///
/// ## Security
///
/// - `Debug` output never includes `d`, `p` or `q`
/// - No `Serialize` impl; only [`crate::storage::KeyStore`] writes the
///   private half, and only to local storage
#[derive(Clone)]
pub struct KeyPair {
    public: PublicKey,
    d: BigUint,
    crt: Option<CrtParams>,
}

impl KeyPair {
    /// Generate a fresh key pair with a modulus of exactly `bit_length` bits.
    ///
    /// Fails with [`Error::KeyGen`] when the size is unsupported or when no
    /// prime pair with `gcd(e, φ) = 1` turns up within
    /// [`MAX_KEYGEN_ATTEMPTS`] tries.
    pub fn generate(bit_length: u64) -> Result<Self> {
        if bit_length < MIN_MODULUS_BITS || bit_length % 2 != 0 {
            return Err(Error::KeyGen(format!(
                "modulus size must be an even number of bits, at least {}",
                MIN_MODULUS_BITS
            )));
        }

        let half = bit_length / 2;
        let key_pair = Self::generate_with(
            &BigUint::from(PUBLIC_EXPONENT),
            MAX_KEYGEN_ATTEMPTS,
            || generate_prime(half),
        )?;

        tracing::info!(bits = key_pair.modulus_bits(), "Generated RSA key pair");
        Ok(key_pair)
    }

    /// Core generation loop with an injectable prime source.
    fn generate_with<F>(e: &BigUint, max_attempts: usize, mut next_prime: F) -> Result<Self>
    where
        F: FnMut() -> BigUint,
    {
        for attempt in 1..=max_attempts {
            let p = next_prime();
            let mut q = next_prime();
            while q == p {
                q = next_prime();
            }

            let phi = (&p - 1u32) * (&q - 1u32);
            if !gcd(e, &phi).is_one() {
                tracing::debug!(attempt, "Public exponent shares a factor with phi, regenerating primes");
                continue;
            }

            let d = mod_inverse(e, &phi)
                .ok_or_else(|| Error::KeyGen("exponent has no inverse".into()))?;
            let n = &p * &q;
            let public = PublicKey::new(n, e.clone())?;

            return Ok(Self::assemble(public, d, Some((p, q))));
        }

        Err(Error::KeyGen(format!(
            "public exponent not invertible after {} attempts",
            max_attempts
        )))
    }

    /// Rebuild a key pair from stored parts, checking that they agree.
    ///
    /// Inconsistent material is reported as [`Error::Persistence`] so the
    /// caller can fall back to regeneration.
    pub fn from_parts(
        n: BigUint,
        e: BigUint,
        d: BigUint,
        primes: Option<(BigUint, BigUint)>,
    ) -> Result<Self> {
        let public = PublicKey::new(n, e)
            .map_err(|err| Error::Persistence(format!("stored public key invalid: {}", err)))?;

        if d.is_zero() || &d >= public.n() {
            return Err(Error::Persistence("stored private exponent out of range".into()));
        }

        if let Some((p, q)) = &primes {
            if [p, q]
                .iter()
                .any(|f| !is_probable_prime(f, MILLER_RABIN_ROUNDS))
            {
                return Err(Error::Persistence("stored primes are not prime".into()));
            }
            if &(p * q) != public.n() {
                return Err(Error::Persistence("stored primes do not match modulus".into()));
            }
            let phi = (p - 1u32) * (q - 1u32);
            if !((&d * public.e()) % &phi).is_one() {
                return Err(Error::Persistence("stored exponents are not inverse".into()));
            }
        } else {
            let probe = BigUint::from(2u32);
            let round_trip = mod_pow(&mod_pow(&probe, public.e(), public.n()), &d, public.n());
            if round_trip != probe {
                return Err(Error::Persistence("stored exponents are not inverse".into()));
            }
        }

        Ok(Self::assemble(public, d, primes))
    }

    fn assemble(public: PublicKey, d: BigUint, primes: Option<(BigUint, BigUint)>) -> Self {
        let crt = primes.and_then(|(p, q)| {
            let dp = &d % (&p - 1u32);
            let dq = &d % (&q - 1u32);
            let qinv = mod_inverse(&q, &p)?;
            Some(CrtParams { p, q, dp, dq, qinv })
        });

        Self { public, d, crt }
    }

    /// The shareable half `(n, e)`.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Bit length of the modulus.
    pub fn modulus_bits(&self) -> u64 {
        self.public.modulus_bits()
    }

    pub(crate) fn private_exponent(&self) -> &BigUint {
        &self.d
    }

    pub(crate) fn primes(&self) -> Option<(&BigUint, &BigUint)> {
        self.crt.as_ref().map(|crt| (&crt.p, &crt.q))
    }

    /// Raw private operation `c^d mod n`, using CRT when the primes are known.
    pub(crate) fn private_op(&self, c: &BigUint) -> BigUint {
        match &self.crt {
            Some(crt) => {
                let m1 = mod_pow(c, &crt.dp, &crt.p);
                let m2 = mod_pow(c, &crt.dq, &crt.q);
                let m2_mod_p = &m2 % &crt.p;
                let diff = if m1 >= m2_mod_p {
                    m1 - m2_mod_p
                } else {
                    m1 + &crt.p - m2_mod_p
                };
                let h = (&crt.qinv * diff) % &crt.p;
                m2 + h * &crt.q
            }
            None => mod_pow(c, &self.d, self.public.n()),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("private", &"<redacted>")
            .finish()
    }
}

fn byte_len(n: &BigUint) -> usize {
    ((n.bits() + 7) / 8) as usize
}

fn parse_decimal(s: &str) -> Option<BigUint> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    BigUint::parse_bytes(s.as_bytes(), 10)
}

// ============================================================================
// TESTS
// ============================================================================
