//! Process randomness source
//!
//! Every secret sampled by this crate (session GUIDs, DHM private exponents,
//! RSA prime candidates, block padding) comes from a single [`EntropySource`].
//! The production implementation reads the kernel device at
//! [`RANDOM_DEVICE`]; a scripted implementation replays a fixed byte string
//! for deterministic tests.
//!
//! ## Invariants
//!
//! - The device handle is shared by every worker thread; reads are serialized
//!   behind a mutex so that two threads never interleave inside one `fill`.
//! - On open, [`WARMUP_BYTES`] bytes are read and discarded before the source
//!   is handed to a caller.
//! - A short read is an error ([`EntropyError::Read`]), never silently padded.

#![forbid(unsafe_code)]

use std::fs::File;
use std::io::Read;
use std::sync::Mutex;

/// Conventional path of the kernel randomness device.
pub const RANDOM_DEVICE: &str = "/dev/urandom";

/// Bytes read and discarded when the device is opened (32 × 256).
pub const WARMUP_BYTES: usize = 8192;

/// Errors surfaced by the randomness source.
#[derive(Debug, thiserror::Error)]
pub enum EntropyError {
    /// The device could not be opened.
    #[error("cannot open randomness source")]
    Open(#[source] std::io::Error),
    /// The device returned fewer bytes than requested.
    #[error("short read from randomness source")]
    Read(#[source] std::io::Error),
    /// Releasing the device handle failed.
    #[error("close of randomness source failed")]
    Close,
}

/// A source of cryptographically random bytes.
///
/// The trait seam exists so the handshake and key-generation paths can be
/// driven by a replayable script in tests. Production code uses
/// [`SystemEntropy`].
pub trait EntropySource: Send + Sync {
    /// Fill `buf` completely with fresh random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError>;

    /// Sample a single big-endian 32-bit word.
    fn next_u32(&self) -> Result<u32, EntropyError> {
        let mut w = [0u8; 4];
        self.fill(&mut w)?;
        Ok(u32::from_be_bytes(w))
    }
}

/// Shared handle to the kernel randomness device.
///
/// Reads are serialized through the inner mutex; concurrent callers queue.
pub struct SystemEntropy {
    device: Mutex<File>,
}

impl SystemEntropy {
    /// Open and warm the device.
    ///
    /// The warm-up discards [`WARMUP_BYTES`] bytes in 256-byte chunks before
    /// any caller-visible sampling happens.
    pub fn open() -> Result<Self, EntropyError> {
        let mut device = File::open(RANDOM_DEVICE).map_err(EntropyError::Open)?;
        let mut chunk = [0u8; 256];
        for _ in 0..WARMUP_BYTES / chunk.len() {
            device.read_exact(&mut chunk).map_err(EntropyError::Read)?;
        }
        tracing::debug!(device = RANDOM_DEVICE, warmed = WARMUP_BYTES, "entropy source opened");
        Ok(Self { device: Mutex::new(device) })
    }

    /// Release the device handle.
    ///
    /// The handle is consumed; any error the platform reports at close time
    /// maps to [`EntropyError::Close`].
    pub fn close(self) -> Result<(), EntropyError> {
        let device = self.device.into_inner().map_err(|_| EntropyError::Close)?;
        drop(device);
        Ok(())
    }
}

impl EntropySource for SystemEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError> {
        let mut device = self.device.lock().map_err(|_| EntropyError::Close)?;
        device.read_exact(buf).map_err(EntropyError::Read)
    }
}

/// Replays a fixed byte script. Test-only in spirit, but kept in the library
/// so integration tests and the demo binary can share it.
pub struct ScriptedEntropy {
    script: Mutex<(Vec<u8>, usize)>,
}

impl ScriptedEntropy {
    /// Build a source that yields `script` bytes in order, then fails.
    pub fn new(script: Vec<u8>) -> Self {
        Self { script: Mutex::new((script, 0)) }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        let guard = self.script.lock().expect("script mutex poisoned");
        guard.0.len() - guard.1
    }
}

impl EntropySource for ScriptedEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), EntropyError> {
        let mut guard = self.script.lock().expect("script mutex poisoned");
        let (script, pos) = (&guard.0, guard.1);
        if script.len() - pos < buf.len() {
            return Err(EntropyError::Read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "entropy script exhausted",
            )));
        }
        buf.copy_from_slice(&script[pos..pos + buf.len()]);
        guard.1 += buf.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_entropy_fills_and_varies() {
        let src = SystemEntropy::open().expect("open urandom");
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        src.fill(&mut a).unwrap();
        src.fill(&mut b).unwrap();
        // 64 zero bytes (or a repeat) from urandom would be a broken device.
        assert_ne!(a, [0u8; 64]);
        assert_ne!(a, b);
        src.close().unwrap();
    }

    #[test]
    fn scripted_entropy_replays_in_order() {
        let src = ScriptedEntropy::new(vec![1, 2, 3, 4, 5, 6]);
        let mut first = [0u8; 4];
        src.fill(&mut first).unwrap();
        assert_eq!(first, [1, 2, 3, 4]);
        assert_eq!(src.remaining(), 2);

        let mut rest = [0u8; 2];
        src.fill(&mut rest).unwrap();
        assert_eq!(rest, [5, 6]);
    }

    #[test]
    fn scripted_entropy_errors_when_exhausted() {
        let src = ScriptedEntropy::new(vec![9]);
        let mut buf = [0u8; 2];
        assert!(matches!(src.fill(&mut buf), Err(EntropyError::Read(_))));
    }

    #[test]
    fn next_u32_is_big_endian() {
        let src = ScriptedEntropy::new(vec![0x00, 0x00, 0x00, 0x03]);
        assert_eq!(src.next_u32().unwrap(), 3);
    }
}
