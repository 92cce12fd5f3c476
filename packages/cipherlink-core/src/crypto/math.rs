//! # Number Theory
//!
//! Arbitrary-precision primitives behind the RSA engine.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  mod_pow            left-to-right square-and-multiply                  │
//! │  extended_gcd       Bezout coefficients (signed)                       │
//! │  mod_inverse        e⁻¹ mod φ via extended_gcd                          │
//! │  is_probable_prime  trial division + Miller-Rabin                      │
//! │  generate_prime     random odd candidate, top two bits set             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;

/// Miller-Rabin rounds used for key generation (false positive ≤ 4^-40).
pub const MILLER_RABIN_ROUNDS: usize = 40;

/// Primes below 256, used to discard most candidates before Miller-Rabin.
const SMALL_PRIMES: [u32; 54] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Greatest common divisor (Euclid).
pub fn gcd(a: &BigUint, b: &BigUint) -> BigUint {
    let (mut a, mut b) = (a.clone(), b.clone());
    while !b.is_zero() {
        let r = &a % &b;
        a = std::mem::replace(&mut b, r);
    }
    a
}

/// Extended Euclidean algorithm.
///
/// Returns `(g, x, y)` with `g = gcd(a, b)` and `a·x + b·y = g`.
pub fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut old_r, mut r) = (a.clone(), b.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    let (mut old_t, mut t) = (BigInt::zero(), BigInt::one());

    while !r.is_zero() {
        let q = &old_r / &r;

        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);

        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);

        let next_t = &old_t - &q * &t;
        old_t = std::mem::replace(&mut t, next_t);
    }

    (old_r, old_s, old_t)
}

/// Modular inverse of `a` modulo `m`, or `None` when `gcd(a, m) ≠ 1`.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    if m.is_zero() {
        return None;
    }
    if m.is_one() {
        return Some(BigUint::zero());
    }

    let m_int = BigInt::from(m.clone());
    let (g, x, _) = extended_gcd(&BigInt::from(a.clone()), &m_int);
    if !g.is_one() {
        return None;
    }

    x.mod_floor(&m_int).to_biguint()
}

/// Modular exponentiation by left-to-right square-and-multiply.
///
/// One squaring per exponent bit and one multiplication per set bit; every
/// intermediate is reduced, so `base^exponent` is never materialized.
/// `modulus` must be non-zero.
pub fn mod_pow(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> BigUint {
    debug_assert!(!modulus.is_zero(), "mod_pow with zero modulus");
    if modulus.is_one() {
        return BigUint::zero();
    }

    let base = base % modulus;
    let mut result = BigUint::one();

    for i in (0..exponent.bits()).rev() {
        result = (&result * &result) % modulus;
        if exponent.bit(i) {
            result = (&result * &base) % modulus;
        }
    }

    result
}

/// Probabilistic primality test.
///
/// Small primes are checked by trial division; the rest go through
/// `rounds` Miller-Rabin witnesses drawn from `[2, n-2]`.
pub fn is_probable_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }

    for &p in SMALL_PRIMES.iter() {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // n > 251 and odd from here on
    let n_minus_one: BigUint = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    let mut rng = OsRng;
    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = mod_pow(&a, &d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = (&x * &x) % n;
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }

    true
}

/// Generate a random probable prime of exactly `bits` bits.
///
/// The two most significant bits are forced on so that the product of two
/// such primes has exactly `2·bits` bits.
pub fn generate_prime(bits: u64) -> BigUint {
    debug_assert!(bits >= 16, "prime size too small");
    let mut rng = OsRng;

    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(bits - 2, true);
        candidate.set_bit(0, true);

        if is_probable_prime(&candidate, MILLER_RABIN_ROUNDS) {
            return candidate;
        }
    }
}
