//! Big-integer facade
//!
//! Thin layer over `num-bigint` that pins down the two disciplines the wire
//! formats depend on:
//!
//! - **Fixed-width export.** Every serialized integer is big-endian inside a
//!   fixed-width field, right-justified with leading zero bytes. `num-bigint`
//!   strips leading zeros on export, so [`export_into`] re-justifies
//!   explicitly; a value wider than its field is [`NumericError::Width`].
//! - **Primality.** Miller–Rabin with a caller-chosen round count (protocol
//!   callers use [`MR_ROUNDS`]), plus a [`next_prime`] walk that sieves odd
//!   candidates against [`SMALL_PRIMES`] before running witnesses.

#![forbid(unsafe_code)]

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

/// Miller–Rabin round count used by the handshake and key generator.
pub const MR_ROUNDS: u32 = 50;

/// Primes up to 100. Index 0 is 2; the odd tail is what the RSA generator
/// screens (p−1)/(q−1) against.
pub const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Fixed-width serialization errors.
#[derive(Debug, thiserror::Error)]
pub enum NumericError {
    /// The value does not fit its fixed-width field.
    #[error("integer needs {need} bytes but field is {width} bytes wide")]
    Width {
        /// Bytes the value actually occupies.
        need: usize,
        /// Bytes the field provides.
        width: usize,
    },
}

/// Decode a big-endian byte field into an integer. Leading zeros are harmless.
#[inline]
pub fn import_be(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Encode `value` big-endian into `buf`, right-justified with leading zeros.
pub fn export_into(value: &BigUint, buf: &mut [u8]) -> Result<(), NumericError> {
    let raw = value.to_bytes_be();
    if raw.len() > buf.len() {
        return Err(NumericError::Width { need: raw.len(), width: buf.len() });
    }
    let pad = buf.len() - raw.len();
    buf[..pad].fill(0);
    buf[pad..].copy_from_slice(&raw);
    Ok(())
}

/// Encode `value` big-endian into a fresh `width`-byte buffer.
pub fn export_be(value: &BigUint, width: usize) -> Result<Vec<u8>, NumericError> {
    let mut out = vec![0u8; width];
    export_into(value, &mut out)?;
    Ok(out)
}

/// Miller–Rabin probable-primality test with `rounds` random witnesses.
///
/// Witness bases are sampled uniformly from `[2, n−2)`; the sampling RNG is
/// independent of the protocol entropy source (witness choice affects only
/// the error bound, not any wire bytes).
pub fn is_probable_prime(n: &BigUint, rounds: u32) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    if let Some(small) = n.to_u32() {
        if SMALL_PRIMES.contains(&small) {
            return true;
        }
    }
    if n.is_even() {
        return false;
    }

    // n − 1 = 2^s · d with d odd
    let n_minus_1 = n - 1u32;
    let mut d = n_minus_1.clone();
    let mut s = 0u64;
    while d.is_even() {
        d >>= 1;
        s += 1;
    }

    let mut rng = rand::thread_rng();
    let hi = n - &two;
    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &hi);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_1 {
            continue;
        }
        for _ in 1..s {
            x = (&x * &x) % n;
            if x == n_minus_1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Smallest probable prime strictly greater than `n`.
///
/// Candidates step through the odd numbers above `n`; each is trial-divided
/// by [`SMALL_PRIMES`] before the witness loop runs.
pub fn next_prime(n: &BigUint) -> BigUint {
    let two = BigUint::from(2u32);
    if *n < two {
        return two;
    }
    let mut candidate = n + 1u32;
    if candidate.is_even() {
        candidate += 1u32;
    }
    loop {
        if survives_small_sieve(&candidate) && is_probable_prime(&candidate, MR_ROUNDS) {
            return candidate;
        }
        candidate += 2u32;
    }
}

/// Trial division screen. A candidate equal to a table prime passes.
fn survives_small_sieve(candidate: &BigUint) -> bool {
    for &p in &SMALL_PRIMES[1..] {
        let p_big = BigUint::from(p);
        if (candidate % &p_big).is_zero() && *candidate != p_big {
            return false;
        }
    }
    true
}

/// Modular inverse `a⁻¹ mod m` via the extended Euclidean algorithm.
///
/// Returns `None` when `gcd(a, m) ≠ 1`.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    if m.is_zero() {
        return None;
    }
    let m_int = BigInt::from(m.clone());
    let mut r0 = m_int.clone();
    let mut r1 = BigInt::from(a % m);
    let mut t0 = BigInt::zero();
    let mut t1 = BigInt::one();
    while !r1.is_zero() {
        let q = &r0 / &r1;
        let r2 = &r0 - &q * &r1;
        r0 = r1;
        r1 = r2;
        let t2 = &t0 - &q * &t1;
        t0 = t1;
        t1 = t2;
    }
    if !r0.is_one() {
        return None;
    }
    let mut t = t0 % &m_int;
    if t.is_negative() {
        t += &m_int;
    }
    t.to_biguint()
}

/// `lcm(a − 1, b − 1)`, the Carmichael-style exponent modulus the key
/// generator works in.
#[inline]
pub fn lcm_of_predecessors(a: &BigUint, b: &BigUint) -> BigUint {
    (a - 1u32).lcm(&(b - 1u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_right_justifies_short_values() {
        let v = BigUint::from(0xC1A5u32);
        let out = export_be(&v, 6).unwrap();
        assert_eq!(out, [0, 0, 0, 0, 0xC1, 0xA5]);
    }

    #[test]
    fn export_exact_fit_and_zero() {
        let v = BigUint::from(0xABu32);
        assert_eq!(export_be(&v, 1).unwrap(), [0xAB]);
        assert_eq!(export_be(&BigUint::zero(), 3).unwrap(), [0, 0, 0]);
    }

    #[test]
    fn export_rejects_overwide_values() {
        let v = BigUint::from(0x1_0000u32);
        let err = export_be(&v, 2).unwrap_err();
        assert!(matches!(err, NumericError::Width { need: 3, width: 2 }));
    }

    #[test]
    fn import_export_round_trip() {
        let bytes = [0u8, 0, 9, 8, 7, 6];
        let v = import_be(&bytes);
        assert_eq!(export_be(&v, 6).unwrap(), bytes);
    }

    #[test]
    fn random_values_survive_width_round_trips() {
        use num_bigint::RandBigInt;
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let v = rng.gen_biguint(200);
            let wide = export_be(&v, 64).unwrap();
            assert_eq!(wide.len(), 64);
            assert_eq!(import_be(&wide), v);
            // A wider re-export of the re-import stays stable.
            assert_eq!(export_be(&import_be(&wide), 64).unwrap(), wide);
        }
    }

    #[test]
    fn miller_rabin_agrees_on_known_values() {
        for p in [2u32, 3, 5, 97, 101, 65_537, 7919] {
            assert!(is_probable_prime(&BigUint::from(p), MR_ROUNDS), "{p} is prime");
        }
        // 561 is a Carmichael number; Miller–Rabin is not fooled.
        for c in [0u32, 1, 4, 9, 561, 65_536, 7917] {
            assert!(!is_probable_prime(&BigUint::from(c), MR_ROUNDS), "{c} is composite");
        }
    }

    #[test]
    fn next_prime_walks_to_adjacent_primes() {
        assert_eq!(next_prime(&BigUint::from(0u32)), BigUint::from(2u32));
        assert_eq!(next_prime(&BigUint::from(2u32)), BigUint::from(3u32));
        assert_eq!(next_prime(&BigUint::from(65_536u32)), BigUint::from(65_537u32));
        assert_eq!(next_prime(&BigUint::from(7907u32)), BigUint::from(7919u32));
    }

    #[test]
    fn mod_inverse_known_values() {
        let inv = mod_inverse(&BigUint::from(3u32), &BigUint::from(7u32)).unwrap();
        assert_eq!(inv, BigUint::from(5u32));
        let inv = mod_inverse(&BigUint::from(65_537u32), &BigUint::from(1_000_000u32)).unwrap();
        assert_eq!((inv * 65_537u32) % 1_000_000u32, BigUint::one());
    }

    #[test]
    fn mod_inverse_rejects_shared_factor() {
        assert!(mod_inverse(&BigUint::from(2u32), &BigUint::from(4u32)).is_none());
    }

    #[test]
    fn lcm_of_predecessors_small_case() {
        // lcm(10, 12) = 60
        let l = lcm_of_predecessors(&BigUint::from(11u32), &BigUint::from(13u32));
        assert_eq!(l, BigUint::from(60u32));
    }
}
