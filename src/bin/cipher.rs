//! Block-cipher CLI: encrypt, decrypt, sign, verify
//!
//! ```text
//! cipher encrypt --key <pub-or-priv> --in <file> --out <file> [--settings s.json]
//! cipher decrypt --key <priv>        --in <file> --out <file> [--threads N] [--no-crt]
//! cipher sign    --key <priv>        --in <file> --sig <file>
//! cipher verify  --key <pub-or-priv> --in <file> --sig <file>
//! ```
//!
//! Decrypt and verify echo the timestamp and geotag embedded when the file
//! was sealed or signed.

#![forbid(unsafe_code)]

use std::env;
use std::path::{Path, PathBuf};

use asymkit::blocks::{self, Location};
use asymkit::entropy::SystemEntropy;
use asymkit::keyfile;
use asymkit::settings::Settings;

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

fn required_path(args: &[String], key: &str) -> anyhow::Result<PathBuf> {
    parse_flag(args, key)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("missing required flag {key}"))
}

fn stamp(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| format!("epoch {epoch}"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "cipher=info,asymkit=info".into()))
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).cloned().unwrap_or_default();
    if !matches!(command.as_str(), "encrypt" | "decrypt" | "sign" | "verify") {
        anyhow::bail!("usage: cipher <encrypt | decrypt | sign | verify> --key <file> --in <file> ...");
    }

    let settings = match parse_flag(&args, "--settings") {
        Some(p) => Settings::load(Path::new(&p))?,
        None => Settings::default(),
    };
    let workers: usize = parse_flag(&args, "--threads")
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| settings.effective_workers());
    let use_crt = !has_flag(&args, "--no-crt") && settings.use_crt;
    let location = Location {
        latitude: parse_flag(&args, "--lat").and_then(|s| s.parse().ok()).unwrap_or(settings.latitude),
        longitude: parse_flag(&args, "--lon").and_then(|s| s.parse().ok()).unwrap_or(settings.longitude),
    };

    let key_path = required_path(&args, "--key")?;
    let input = required_path(&args, "--in")?;

    match command.as_str() {
        "encrypt" => {
            let output = required_path(&args, "--out")?;
            let key = keyfile::load_public(&key_path)?;
            let entropy = SystemEntropy::open()?;
            let blocks = blocks::encrypt_file(&input, &output, &key, &entropy, location)?;
            eprintln!("✓ Sealed {} into {} ({} blocks)", input.display(), output.display(), blocks);
        }
        "decrypt" => {
            let output = required_path(&args, "--out")?;
            let key = keyfile::load_private(&key_path)?;
            let summary = blocks::decrypt_file(&input, &output, &key, workers, use_crt)?;
            eprintln!("✓ Opened {} ({} bytes, CRC {:#010X} ok)", output.display(), summary.size, summary.crc);
            eprintln!("  sealed at {}", stamp(summary.time));
            eprintln!(
                "  location {:.4}, {:.4}",
                summary.location.latitude, summary.location.longitude
            );
        }
        "sign" => {
            let sig = required_path(&args, "--sig")?;
            let key = keyfile::load_private(&key_path)?;
            let entropy = SystemEntropy::open()?;
            let signed_at = blocks::sign_file(&input, &sig, &key, &entropy, location)?;
            eprintln!("✓ Signed {} -> {} at {}", input.display(), sig.display(), stamp(signed_at));
        }
        "verify" => {
            let sig = required_path(&args, "--sig")?;
            let key = keyfile::load_public(&key_path)?;
            match blocks::verify_file(&input, &sig, &key) {
                Ok(summary) => {
                    eprintln!("✓ Signature OK");
                    eprintln!("  signed at {}", stamp(summary.time));
                    eprintln!(
                        "  location {:.4}, {:.4}",
                        summary.location.latitude, summary.location.longitude
                    );
                }
                Err(err) => {
                    eprintln!("✗ Signature FAILED: {err}");
                    std::process::exit(1);
                }
            }
        }
        _ => unreachable!("command validated above"),
    }
    Ok(())
}
