//! Crate root: public surface, protocol constants, and wire-level invariants
//!
//! `asymkit` bundles two asymmetric primitives that share one entropy and
//! big-integer substrate:
//!
//! - a Diffie–Hellman–Merkle **handshake engine** that agrees on a 272-byte
//!   shared secret through two fixed-layout, digest-tagged packets, and
//! - an **RSA toolkit**: a racing multi-threaded key generator, a TLV (and
//!   optionally PEM) keyfile codec, and a block-oriented file
//!   encrypt/decrypt/sign/verify engine with a parallel decryptor.
//!
//! ## Invariants (wire contract)
//!
//! - **Fixed-width integers.** Every big integer on the wire is big-endian
//!   inside a fixed-width field, right-justified with leading zeros. No field
//!   ever shrinks to the integer's natural width.
//! - **Bespoke formats.** The packet layouts, block padding, file-info header
//!   and keyfile records are this crate's own contract, shared with its peer
//!   implementation. They are deliberately **not** PKCS#1, PSS, OAEP or any
//!   RFC DH group, and must not be swapped for standard equivalents.
//! - **Explicit entropy.** There is no ambient RNG: every component takes an
//!   [`entropy::EntropySource`], and all reads from the shared kernel device
//!   are serialized behind its mutex.
//! - **Failure discipline.** Cryptographic-validity failures (digest
//!   mismatches, header self-check failures, bad signatures) are returned as
//!   typed errors; the library never exits the process.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Block-oriented RSA file codec (encrypt/decrypt/sign/verify).
pub mod blocks;
/// CRC-32 over the zlib polynomial (part of the file-format contract).
pub mod checksum;
/// The shared randomness source and its test-script twin.
pub mod entropy;
/// DHM session lifecycle and the two handshake packets.
pub mod handshake;
/// Racing RSA key generator and key material types.
pub mod keygen;
/// TLV keyfile records with optional PEM armor.
pub mod keyfile;
/// Fixed-width big-integer serialization and primality helpers.
pub mod numeric;
/// JSON-backed runtime settings for the CLI tools.
pub mod settings;

// ============================================================================
// Worker-pool policy (shared by the key generator and the decryptor)
// ============================================================================

/// Hard cap on any worker pool.
pub const MAX_WORKERS: usize = 48;

/// Logical-CPU worker default, clamped to `1..=MAX_WORKERS`.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_WORKERS)
}

// ============================================================================
// Canonical re-exports
// ============================================================================

pub use crate::blocks::{CodecError, DecryptSummary, FileInfoHeader, Location, VerifySummary};
pub use crate::entropy::{EntropyError, EntropySource, SystemEntropy};
pub use crate::handshake::{AlicePacket, BobPacket, HandshakeError, Session};
pub use crate::keyfile::KeyfileError;
pub use crate::keygen::{KeygenError, PublicKey, RsaKey};
pub use crate::settings::Settings;
