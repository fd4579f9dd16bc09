//! RSA key generation
//!
//! A fixed pool of workers races to produce the first structurally-valid key.
//! Workers share the entropy source (reads are serialized inside it) but keep
//! all candidate scratch private. The first worker whose candidate survives
//! every screen publishes it and raises a shared finish flag; the others
//! observe the flag at their loop head and bow out. The orchestrator joins
//! every worker before the key becomes visible, so a failed run can never
//! leave partial output behind.
//!
//! ## Candidate screens (all must pass)
//!
//! - `p`, `q` sampled at `bits/2` with the top two bits and the low bit
//!   forced; `q`'s top nibble is XOR-flipped when it collides with `p`'s, so
//!   the primes always differ in their leading nibble.
//! - Composite samples advance via next-prime.
//! - `(p−1)` and `(q−1)` must be coprime with every odd prime ≤ 100.
//! - `e` starts at the first probable prime above 65536 and walks forward
//!   until `gcd(e, λ) = 1` with `λ = lcm(p−1, q−1)`.
//! - `d = e⁻¹ mod λ` must span at least `bits − 4` bits.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::One;

use crate::entropy::{EntropyError, EntropySource};
use crate::numeric::{self, MR_ROUNDS, SMALL_PRIMES};

/// Smallest supported modulus width.
pub const MIN_BITS: usize = 768;
/// Largest supported modulus width.
pub const MAX_BITS: usize = 262_144;
/// Modulus widths must be a multiple of this.
pub const BITS_STEP: usize = 256;

/// Key-generation failures. Structural rejections are silent retries inside
/// the workers; only configuration and entropy problems surface here.
#[derive(Debug, thiserror::Error)]
pub enum KeygenError {
    /// The requested modulus width is out of range or misaligned.
    #[error("modulus width {0} unsupported (need {MIN_BITS}..={MAX_BITS}, multiple of {BITS_STEP})")]
    BadBits(usize),
    /// The randomness source failed.
    #[error(transparent)]
    Entropy(#[from] EntropyError),
}

/// A complete RSA private key with CRT auxiliaries.
///
/// Invariants: `n = p·q`, `d·e ≡ 1 (mod lcm(p−1, q−1))`, `dp = d mod (p−1)`,
/// `dq = d mod (q−1)`, `qinv·q ≡ 1 (mod p)`.
#[derive(Clone, Debug)]
pub struct RsaKey {
    /// Modulus width in bits.
    pub bits: usize,
    /// Modulus `n`.
    pub modulus: BigUint,
    /// Public exponent `e`.
    pub public_exponent: BigUint,
    /// Private exponent `d`.
    pub private_exponent: BigUint,
    /// First prime factor.
    pub prime_p: BigUint,
    /// Second prime factor.
    pub prime_q: BigUint,
    /// `d mod (p−1)`.
    pub crt_dp: BigUint,
    /// `d mod (q−1)`.
    pub crt_dq: BigUint,
    /// `q⁻¹ mod p`.
    pub crt_qinv: BigUint,
}

/// The public half of a key: exactly what encryption and signature
/// verification need.
#[derive(Clone, Debug)]
pub struct PublicKey {
    /// Modulus width in bits.
    pub bits: usize,
    /// Modulus `n`.
    pub modulus: BigUint,
    /// Public exponent `e`.
    pub exponent: BigUint,
}

impl RsaKey {
    /// Project out the public half.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            bits: self.bits,
            modulus: self.modulus.clone(),
            exponent: self.public_exponent.clone(),
        }
    }
}

/// Race `workers` threads to the first valid key.
pub fn generate<E: EntropySource>(
    bits: usize,
    workers: usize,
    entropy: &E,
) -> Result<RsaKey, KeygenError> {
    if bits < MIN_BITS || bits > MAX_BITS || bits % BITS_STEP != 0 {
        return Err(KeygenError::BadBits(bits));
    }
    let workers = workers.clamp(1, crate::MAX_WORKERS);

    let finished = AtomicBool::new(false);
    let winner: Mutex<Option<RsaKey>> = Mutex::new(None);
    let failure: Mutex<Option<KeygenError>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for id in 0..workers {
            let finished = &finished;
            let winner = &winner;
            let failure = &failure;
            scope.spawn(move || worker_loop(id, bits, entropy, finished, winner, failure));
        }
    });

    if let Some(key) = winner.into_inner().expect("winner mutex poisoned") {
        return Ok(key);
    }
    match failure.into_inner().expect("failure mutex poisoned") {
        Some(err) => Err(err),
        // The race only ends with a winner or a recorded failure.
        None => Err(KeygenError::Entropy(EntropyError::Close)),
    }
}

fn worker_loop<E: EntropySource>(
    id: usize,
    bits: usize,
    entropy: &E,
    finished: &AtomicBool,
    winner: &Mutex<Option<RsaKey>>,
    failure: &Mutex<Option<KeygenError>>,
) {
    let mut attempt = 0u64;
    while !finished.load(Ordering::Acquire) {
        attempt += 1;
        tracing::debug!(worker = id, attempt, "sampling candidate primes");
        match try_candidate(bits, entropy) {
            Ok(Some(key)) => {
                let mut slot = winner.lock().expect("winner mutex poisoned");
                if slot.is_none() {
                    *slot = Some(key);
                    finished.store(true, Ordering::Release);
                    tracing::info!(worker = id, attempt, bits, "key accepted");
                }
                return;
            }
            Ok(None) => continue, // structural rejection: silent retry
            Err(err) => {
                let mut slot = failure.lock().expect("failure mutex poisoned");
                if slot.is_none() {
                    *slot = Some(err);
                }
                finished.store(true, Ordering::Release);
                return;
            }
        }
    }
}

/// One full candidate pipeline. `Ok(None)` is a structural rejection.
fn try_candidate<E: EntropySource>(
    bits: usize,
    entropy: &E,
) -> Result<Option<RsaKey>, KeygenError> {
    let half_bytes = bits / 16;

    let p = sample_prime(entropy, half_bytes, None)?;
    let p_bytes = numeric::export_be(&p, half_bytes).expect("prime fits its sample width");
    let q = sample_prime(entropy, half_bytes, Some(p_bytes[0]))?;

    if has_small_factor_below_100(&p) || has_small_factor_below_100(&q) {
        return Ok(None);
    }

    let modulus = &p * &q;
    let lambda = numeric::lcm_of_predecessors(&p, &q);

    // e: first probable prime above 65536, advanced until coprime with λ.
    let mut e = numeric::next_prime(&BigUint::from(65_536u32));
    while !e.gcd(&lambda).is_one() {
        e = numeric::next_prime(&e);
    }

    let d = match numeric::mod_inverse(&e, &lambda) {
        Some(d) => d,
        None => return Ok(None),
    };
    if (d.bits() as usize) < bits - 4 {
        return Ok(None);
    }

    let crt_dp = &d % (&p - 1u32);
    let crt_dq = &d % (&q - 1u32);
    let crt_qinv = match numeric::mod_inverse(&q, &p) {
        Some(qinv) => qinv,
        None => return Ok(None),
    };

    Ok(Some(RsaKey {
        bits,
        modulus,
        public_exponent: e,
        private_exponent: d,
        prime_p: p,
        prime_q: q,
        crt_dp,
        crt_dq,
        crt_qinv,
    }))
}

/// Sample a `width`-byte prime candidate: top two bits and low bit forced;
/// when `avoid_top` is given and the sampled top nibble matches it, bits 4–5
/// are XOR-flipped so the two primes differ in their leading nibble.
fn sample_prime<E: EntropySource>(
    entropy: &E,
    width: usize,
    avoid_top: Option<u8>,
) -> Result<BigUint, KeygenError> {
    let mut buf = vec![0u8; width];
    entropy.fill(&mut buf)?;
    buf[0] |= 0xC0;
    buf[width - 1] |= 0x01;
    if let Some(peer) = avoid_top {
        if buf[0] & 0xF0 == peer & 0xF0 {
            buf[0] ^= 0x30;
        }
    }
    let mut candidate = numeric::import_be(&buf);
    if !numeric::is_probable_prime(&candidate, MR_ROUNDS) {
        candidate = numeric::next_prime(&candidate);
    }
    Ok(candidate)
}

/// True when `n − 1` is divisible by any odd prime ≤ 100.
fn has_small_factor_below_100(n: &BigUint) -> bool {
    let pred = n - 1u32;
    SMALL_PRIMES[1..]
        .iter()
        .any(|&r| !pred.gcd(&BigUint::from(r)).is_one())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entropy::SystemEntropy;
    use num_bigint::RandBigInt;
    use num_traits::Zero;
    use std::sync::OnceLock;

    /// Shared 768-bit key so the codec tests don't each pay for a generation.
    pub(crate) fn test_key() -> &'static RsaKey {
        static KEY: OnceLock<RsaKey> = OnceLock::new();
        KEY.get_or_init(|| {
            let entropy = SystemEntropy::open().expect("open urandom");
            generate(MIN_BITS, 2, &entropy).expect("generate test key")
        })
    }

    #[test]
    fn rejects_unsupported_widths() {
        let entropy = SystemEntropy::open().unwrap();
        assert!(matches!(generate(512, 1, &entropy), Err(KeygenError::BadBits(512))));
        assert!(matches!(generate(900, 1, &entropy), Err(KeygenError::BadBits(900))));
        assert!(matches!(
            generate(MAX_BITS + BITS_STEP, 1, &entropy),
            Err(KeygenError::BadBits(_))
        ));
    }

    #[test]
    fn modulus_is_product_of_distinct_primes() {
        let key = test_key();
        assert_eq!(key.modulus, &key.prime_p * &key.prime_q);
        assert_ne!(key.prime_p, key.prime_q);
        assert_eq!(key.modulus.bits() as usize, key.bits);
    }

    #[test]
    fn prime_headers_are_forced_and_distinct() {
        let key = test_key();
        let half = key.bits / 16;
        let p = numeric::export_be(&key.prime_p, half).unwrap();
        let q = numeric::export_be(&key.prime_q, half).unwrap();
        assert_eq!(p[0] & 0xC0, 0xC0);
        assert_eq!(q[0] & 0xC0, 0xC0);
        assert_ne!(p[0] & 0xF0, q[0] & 0xF0);
        assert_eq!(p[half - 1] & 0x01, 0x01);
        assert_eq!(q[half - 1] & 0x01, 0x01);
    }

    #[test]
    fn prime_predecessors_avoid_small_factors() {
        let key = test_key();
        for &r in &SMALL_PRIMES[1..] {
            let r = BigUint::from(r);
            assert!(((&key.prime_p - 1u32) % &r) != BigUint::zero());
            assert!(((&key.prime_q - 1u32) % &r) != BigUint::zero());
        }
    }

    #[test]
    fn exponents_are_inverse_mod_lambda() {
        let key = test_key();
        let lambda = numeric::lcm_of_predecessors(&key.prime_p, &key.prime_q);
        assert!(key.public_exponent > BigUint::from(65_536u32));
        assert!((&key.public_exponent * &key.private_exponent % &lambda).is_one());
        assert!(key.private_exponent.bits() as usize >= key.bits - 4);
    }

    #[test]
    fn crt_values_match_their_definitions() {
        let key = test_key();
        assert_eq!(key.crt_dp, &key.private_exponent % (&key.prime_p - 1u32));
        assert_eq!(key.crt_dq, &key.private_exponent % (&key.prime_q - 1u32));
        assert!((&key.crt_qinv * &key.prime_q % &key.prime_p).is_one());
    }

    #[test]
    fn exponentiation_round_trips() {
        let key = test_key();
        let mut rng = rand::thread_rng();
        for _ in 0..3 {
            let m = rng.gen_biguint_below(&key.modulus);
            let c = m.modpow(&key.public_exponent, &key.modulus);
            assert_eq!(c.modpow(&key.private_exponent, &key.modulus), m);
        }
    }

    /// Ten independent 2048-bit generations; prime-header forcing must hold
    /// every time. Slow; run with `cargo test -- --ignored`.
    #[test]
    #[ignore]
    fn prime_headers_hold_across_2048_bit_generations() {
        let entropy = SystemEntropy::open().unwrap();
        for _ in 0..10 {
            let key = generate(2048, crate::default_workers(), &entropy).unwrap();
            let p = numeric::export_be(&key.prime_p, 128).unwrap();
            let q = numeric::export_be(&key.prime_q, 128).unwrap();
            assert_eq!(p[0] & 0xC0, 0xC0);
            assert_eq!(q[0] & 0xC0, 0xC0);
            assert_ne!(p[0] & 0xF0, q[0] & 0xF0);
        }
    }
}
