//! RSA keypair generator CLI
//!
//! Races a worker pool to a structurally-valid key and writes the private and
//! public keyfiles (`<out>` and `<out>.pub`), raw TLV by default or
//! PEM-armored with `--pem`.

#![forbid(unsafe_code)]

use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

use asymkit::entropy::SystemEntropy;
use asymkit::settings::Settings;
use asymkit::{keyfile, keygen};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "genkey=info,asymkit=info".into()))
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = env::args().collect();

    let settings = match parse_flag(&args, "--settings") {
        Some(p) => Settings::load(Path::new(&p))?,
        None => Settings::default(),
    };

    let bits: usize = parse_flag(&args, "--bits").and_then(|s| s.parse().ok()).unwrap_or(2048);
    let workers: usize = parse_flag(&args, "--threads")
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| settings.effective_workers());
    let out = PathBuf::from(parse_flag(&args, "--out").unwrap_or_else(|| "rsa_key".into()));
    let pem = has_flag(&args, "--pem");

    eprintln!("Generating a {bits}-bit key on {workers} worker(s)...");
    let entropy = SystemEntropy::open()?;
    let started = Instant::now();
    let key = keygen::generate(bits, workers, &entropy)?;
    eprintln!(
        "✓ Key found in {:.1}s (e = {}, |d| = {} bits)",
        started.elapsed().as_secs_f64(),
        key.public_exponent,
        key.private_exponent.bits()
    );

    let pub_path = {
        let mut p = out.clone().into_os_string();
        p.push(".pub");
        PathBuf::from(p)
    };
    keyfile::save_private(&out, &key, pem)?;
    keyfile::save_public(&pub_path, &key.public_key(), pem)?;

    eprintln!("✓ Wrote {} and {}", out.display(), pub_path.display());
    if !pem {
        eprintln!("  (pass --pem for base64-armored keyfiles)");
    }
    Ok(())
}
