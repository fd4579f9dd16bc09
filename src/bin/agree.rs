//! In-process key-agreement demo
//!
//! Runs both sides of the handshake through their real wire encodings and
//! shows that the two 272-byte secrets agree. Useful as a smoke test for the
//! packet layer without any transport.

#![forbid(unsafe_code)]

use asymkit::handshake::{AlicePacket, BobPacket, Session};
use sha2::{Digest, Sha224};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "agree=info,asymkit=info".into()))
        .with_target(false)
        .compact()
        .init();

    eprintln!("Opening initiator session (this samples a fresh 2176-bit prime)...");
    let mut initiator = Session::open()?;
    let (alice, key) = initiator.generate_alice()?;
    let alice_wire = alice.encode();
    eprintln!(
        "✓ Initiator packet: {} bytes, guid {}, g = {}",
        alice_wire.len(),
        hex::encode(alice.guid),
        alice.generator
    );

    // "Receive" on the responder side: decode re-checks type and digest.
    let alice_rx = AlicePacket::decode(&alice_wire)?;
    let mut responder = Session::open()?;
    let (bob, _bob_key) = responder.generate_bob(&alice_rx)?;
    let bob_wire = bob.encode();
    eprintln!("✓ Responder packet: {} bytes, guid {}", bob_wire.len(), hex::encode(bob.guid));

    let bob_rx = BobPacket::decode(&bob_wire)?;
    initiator.derive_secret(&alice, &bob_rx, &key)?;

    let digest_a = Sha224::digest(initiator.secret());
    let digest_b = Sha224::digest(responder.secret());
    eprintln!("  initiator secret digest: {}", hex::encode(digest_a));
    eprintln!("  responder secret digest: {}", hex::encode(digest_b));
    anyhow::ensure!(initiator.secret() == responder.secret(), "secrets disagree");
    eprintln!("✓ Shared secrets agree");

    initiator.close()?;
    responder.close()?;
    Ok(())
}
