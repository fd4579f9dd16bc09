//! Key-agreement session & packet engine
//!
//! Two fixed-layout packets carry a complete Diffie–Hellman–Merkle exchange
//! over an untrusted bytestream. The initiator ("Alice") samples a fresh
//! 2176-bit prime per session; the responder ("Bob") answers with its public
//! value and both sides land on the same 272-byte shared secret.
//!
//! ## Wire layout (packed, no alignment padding)
//!
//! Initiator packet, 588 bytes, type `0xC1A5`:
//!
//! ```text
//! [  0..  2] packtype  (BE u16)
//! [  2.. 30] hash      (SHA-224 of bytes 30..588)
//! [ 30.. 42] guid      (12 bytes)
//! [ 42.. 44] g         (BE u16, 3 or 5)
//! [ 44..316] p         (272 bytes, BE, right-justified)
//! [316..588] A = g^a mod p
//! ```
//!
//! Responder packet, 314 bytes, type `0xC2A5`:
//!
//! ```text
//! [  0..  2] packtype
//! [  2.. 30] hash      (SHA-224 of bytes 30..314)
//! [ 30.. 42] guid      (copied from the initiator)
//! [ 42..314] B = g^b mod p
//! ```
//!
//! ## Invariants
//!
//! - `p` is sampled with its top and low bits forced to 1, then tested with
//!   50 Miller–Rabin rounds; a composite sample is advanced to the next
//!   probable prime and re-serialized right-justified.
//! - Every big-integer field is emitted at fixed width with leading zeros.
//! - The integrity digest covers every byte after the hash field, so it is
//!   computed only once all other fields are assembled.
//! - The hash is an unkeyed digest, not a MAC; it detects corruption, not an
//!   active adversary. This matches the wire contract of the peer
//!   implementation and must not be "upgraded" unilaterally.

#![forbid(unsafe_code)]

use sha2::{Digest, Sha224};

use crate::entropy::{EntropyError, EntropySource, SystemEntropy};
use crate::numeric::{self, NumericError, MR_ROUNDS};

/// Width of the public modulus and both exponentiation results, in bytes.
pub const PUB_BYTES: usize = 272;
/// Width of a private exponent, in bytes.
pub const PRIV_BYTES: usize = 46;
/// Session correlation id width.
pub const GUID_BYTES: usize = 12;
/// SHA-224 digest width.
pub const SHA224_BYTES: usize = 28;

/// Total initiator packet size.
pub const ALICE_PACKET_BYTES: usize = 2 + SHA224_BYTES + GUID_BYTES + 2 + PUB_BYTES + PUB_BYTES;
/// Total responder packet size.
pub const BOB_PACKET_BYTES: usize = 2 + SHA224_BYTES + GUID_BYTES + PUB_BYTES;

/// Initiator packet type tag.
pub const ALICE_PACKTYPE: u16 = 0xC1A5;
/// Responder packet type tag.
pub const BOB_PACKTYPE: u16 = 0xC2A5;

// Shared field offsets.
const OFF_HASH: usize = 2;
const OFF_GUID: usize = 30;
/// First byte covered by the integrity digest.
const HASHED_FROM: usize = OFF_GUID;

// Initiator-only field offsets.
const OFF_G: usize = 42;
const OFF_P: usize = 44;
const OFF_A: usize = OFF_P + PUB_BYTES;

// Responder-only field offset.
const OFF_B: usize = 42;

/// Handshake failures. Integrity failures are returned to the caller; they
/// are expected whenever the transport corrupts or an endpoint misbehaves.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The packtype field does not match the expected constant.
    #[error("unexpected packet type 0x{got:04X} (want 0x{want:04X})")]
    WrongPacketType {
        /// The constant this parser expects.
        want: u16,
        /// The big-endian-decoded wire value.
        got: u16,
    },
    /// The SHA-224 integrity digest does not cover the received bytes.
    #[error("packet integrity hash mismatch")]
    HashFailure,
    /// The randomness source failed.
    #[error(transparent)]
    Entropy(#[from] EntropyError),
    /// A value overflowed its fixed-width wire field.
    #[error(transparent)]
    Numeric(#[from] NumericError),
}

/// A side's private exponent. Never serialized, never transmitted.
pub struct PrivateKey([u8; PRIV_BYTES]);

impl PrivateKey {
    /// Raw exponent bytes (big-endian).
    pub fn as_bytes(&self) -> &[u8; PRIV_BYTES] {
        &self.0
    }
}

/// Decoded initiator packet.
#[derive(Clone)]
pub struct AlicePacket {
    /// Session correlation id.
    pub guid: [u8; GUID_BYTES],
    /// Group generator, 3 or 5.
    pub generator: u16,
    /// Session prime, right-justified big-endian.
    pub prime: [u8; PUB_BYTES],
    /// Initiator public value `g^a mod p`.
    pub public_value: [u8; PUB_BYTES],
    hash: [u8; SHA224_BYTES],
}

/// Decoded responder packet.
#[derive(Clone)]
pub struct BobPacket {
    /// Correlation id, copied from the initiator.
    pub guid: [u8; GUID_BYTES],
    /// Responder public value `g^b mod p`.
    pub public_value: [u8; PUB_BYTES],
    hash: [u8; SHA224_BYTES],
}

impl AlicePacket {
    /// Serialize to the packed wire layout.
    pub fn encode(&self) -> [u8; ALICE_PACKET_BYTES] {
        let mut raw = [0u8; ALICE_PACKET_BYTES];
        raw[..2].copy_from_slice(&ALICE_PACKTYPE.to_be_bytes());
        raw[OFF_HASH..OFF_GUID].copy_from_slice(&self.hash);
        raw[OFF_GUID..OFF_G].copy_from_slice(&self.guid);
        raw[OFF_G..OFF_P].copy_from_slice(&self.generator.to_be_bytes());
        raw[OFF_P..OFF_A].copy_from_slice(&self.prime);
        raw[OFF_A..].copy_from_slice(&self.public_value);
        raw
    }

    /// Parse and validate a received packet.
    ///
    /// Checks run in order: packet type first, then the integrity digest over
    /// bytes `30..588`. Each failure has its own error kind.
    pub fn decode(raw: &[u8; ALICE_PACKET_BYTES]) -> Result<Self, HandshakeError> {
        check_packtype(raw, ALICE_PACKTYPE)?;
        check_integrity(raw)?;
        let mut packet = AlicePacket {
            guid: [0; GUID_BYTES],
            generator: u16::from_be_bytes([raw[OFF_G], raw[OFF_G + 1]]),
            prime: [0; PUB_BYTES],
            public_value: [0; PUB_BYTES],
            hash: [0; SHA224_BYTES],
        };
        packet.guid.copy_from_slice(&raw[OFF_GUID..OFF_G]);
        packet.prime.copy_from_slice(&raw[OFF_P..OFF_A]);
        packet.public_value.copy_from_slice(&raw[OFF_A..]);
        packet.hash.copy_from_slice(&raw[OFF_HASH..OFF_GUID]);
        Ok(packet)
    }
}

impl BobPacket {
    /// Serialize to the packed wire layout.
    pub fn encode(&self) -> [u8; BOB_PACKET_BYTES] {
        let mut raw = [0u8; BOB_PACKET_BYTES];
        raw[..2].copy_from_slice(&BOB_PACKTYPE.to_be_bytes());
        raw[OFF_HASH..OFF_GUID].copy_from_slice(&self.hash);
        raw[OFF_GUID..OFF_B].copy_from_slice(&self.guid);
        raw[OFF_B..].copy_from_slice(&self.public_value);
        raw
    }

    /// Parse and validate a received packet (type, then digest).
    pub fn decode(raw: &[u8; BOB_PACKET_BYTES]) -> Result<Self, HandshakeError> {
        check_packtype(raw, BOB_PACKTYPE)?;
        check_integrity(raw)?;
        let mut packet = BobPacket {
            guid: [0; GUID_BYTES],
            public_value: [0; PUB_BYTES],
            hash: [0; SHA224_BYTES],
        };
        packet.guid.copy_from_slice(&raw[OFF_GUID..OFF_B]);
        packet.public_value.copy_from_slice(&raw[OFF_B..]);
        packet.hash.copy_from_slice(&raw[OFF_HASH..OFF_GUID]);
        Ok(packet)
    }
}

/// One side of an exchange: the entropy handle, the session id, and the slot
/// the 272-byte shared secret lands in.
pub struct Session<E: EntropySource> {
    entropy: E,
    guid: [u8; GUID_BYTES],
    secret: [u8; PUB_BYTES],
}

impl Session<SystemEntropy> {
    /// Open the kernel randomness device (warming it) and start a session.
    pub fn open() -> Result<Self, HandshakeError> {
        Self::with_entropy(SystemEntropy::open()?)
    }

    /// End the session, releasing the randomness device.
    pub fn close(self) -> Result<(), HandshakeError> {
        self.entropy.close()?;
        Ok(())
    }
}

impl<E: EntropySource> Session<E> {
    /// Start a session over an explicit entropy source; samples the GUID.
    pub fn with_entropy(entropy: E) -> Result<Self, HandshakeError> {
        let mut guid = [0u8; GUID_BYTES];
        entropy.fill(&mut guid)?;
        tracing::debug!(guid = %hex::encode(guid), "session opened");
        Ok(Self { entropy, guid, secret: [0; PUB_BYTES] })
    }

    /// Session correlation id.
    pub fn guid(&self) -> &[u8; GUID_BYTES] {
        &self.guid
    }

    /// The derived shared secret. All zeros until one of
    /// [`generate_bob`](Self::generate_bob) or
    /// [`derive_secret`](Self::derive_secret) has run.
    pub fn secret(&self) -> &[u8; PUB_BYTES] {
        &self.secret
    }

    /// Initiator step: build the opening packet and this side's private key.
    pub fn generate_alice(&mut self) -> Result<(AlicePacket, PrivateKey), HandshakeError> {
        let mut packet = AlicePacket {
            guid: self.guid,
            generator: 0,
            prime: [0; PUB_BYTES],
            public_value: [0; PUB_BYTES],
            hash: [0; SHA224_BYTES],
        };

        // Prime sample: force the width (top bit) and oddness (low bit).
        self.entropy.fill(&mut packet.prime)?;
        packet.prime[0] |= 0x80;
        packet.prime[PUB_BYTES - 1] |= 0x01;
        let mut p = numeric::import_be(&packet.prime);
        if !numeric::is_probable_prime(&p, MR_ROUNDS) {
            p = numeric::next_prime(&p);
            tracing::debug!("prime sample was composite; advanced to next probable prime");
        }
        numeric::export_into(&p, &mut packet.prime)?;

        packet.generator = choose_generator(self.entropy.next_u32()?);

        let mut key = PrivateKey([0; PRIV_BYTES]);
        self.entropy.fill(&mut key.0)?;

        // A = g^a mod p
        let g = num_bigint::BigUint::from(packet.generator);
        let a = numeric::import_be(&key.0);
        let public = g.modpow(&a, &p);
        numeric::export_into(&public, &mut packet.public_value)?;

        seal_alice(&mut packet);
        Ok((packet, key))
    }

    /// Responder step: answer a validated initiator packet.
    ///
    /// Adopts the initiator's GUID (for both the reply and this session) and
    /// derives the shared secret `A^b mod p` into the session slot.
    pub fn generate_bob(&mut self, alice: &AlicePacket) -> Result<(BobPacket, PrivateKey), HandshakeError> {
        self.guid = alice.guid;
        let mut packet = BobPacket {
            guid: alice.guid,
            public_value: [0; PUB_BYTES],
            hash: [0; SHA224_BYTES],
        };

        let mut key = PrivateKey([0; PRIV_BYTES]);
        self.entropy.fill(&mut key.0)?;

        let p = numeric::import_be(&alice.prime);
        let g = num_bigint::BigUint::from(alice.generator);
        let peer_public = numeric::import_be(&alice.public_value);
        let b = numeric::import_be(&key.0);

        // B = g^b mod p
        let public = g.modpow(&b, &p);
        numeric::export_into(&public, &mut packet.public_value)?;

        // s = A^b mod p
        let shared = peer_public.modpow(&b, &p);
        numeric::export_into(&shared, &mut self.secret)?;

        seal_bob(&mut packet);
        tracing::debug!(guid = %hex::encode(packet.guid), "responder keyed");
        Ok((packet, key))
    }

    /// Initiator step two: derive the shared secret `B^a mod p` from the
    /// responder's validated reply and the original initiator state.
    pub fn derive_secret(
        &mut self,
        alice: &AlicePacket,
        bob: &BobPacket,
        key: &PrivateKey,
    ) -> Result<(), HandshakeError> {
        let p = numeric::import_be(&alice.prime);
        let peer_public = numeric::import_be(&bob.public_value);
        let a = numeric::import_be(&key.0);
        let shared = peer_public.modpow(&a, &p);
        numeric::export_into(&shared, &mut self.secret)?;
        tracing::debug!(guid = %hex::encode(self.guid), "initiator keyed");
        Ok(())
    }
}

/// Generator selection: the low bit of a sampled 32-bit word picks 3 or 5.
#[inline]
fn choose_generator(word: u32) -> u16 {
    if word & 1 == 0 {
        3
    } else {
        5
    }
}

fn sha224(data: &[u8]) -> [u8; SHA224_BYTES] {
    Sha224::digest(data).into()
}

fn seal_alice(packet: &mut AlicePacket) {
    let raw = packet.encode();
    packet.hash = sha224(&raw[HASHED_FROM..]);
}

fn seal_bob(packet: &mut BobPacket) {
    let raw = packet.encode();
    packet.hash = sha224(&raw[HASHED_FROM..]);
}

fn check_packtype(raw: &[u8], want: u16) -> Result<(), HandshakeError> {
    let got = u16::from_be_bytes([raw[0], raw[1]]);
    if got != want {
        return Err(HandshakeError::WrongPacketType { want, got });
    }
    Ok(())
}

fn check_integrity(raw: &[u8]) -> Result<(), HandshakeError> {
    let expect = &raw[OFF_HASH..OFF_GUID];
    if sha224(&raw[HASHED_FROM..]) != expect {
        return Err(HandshakeError::HashFailure);
    }
    Ok(())
}
