//! Block-oriented file encryption, signing and verification
//!
//! Files are processed as a stream of `bits/8`-byte blocks. Every block is
//! arithmetically a big-endian integer in `[0, n)`: it is filled with random
//! bytes first, its top byte is zeroed, and payload lands at offset 8, leaving
//! bytes 1..8 as randomized padding.
//!
//! The first block additionally carries a 33-byte file-info header at offset
//! 8 (flags, size and CRC each twinned with their bitwise complement, a
//! little-endian timestamp and geolocation), so:
//!
//! - first-block payload capacity  = `block_size − 12 − 33`
//! - subsequent payload capacity   = `block_size − 12`
//!
//! Decryption fans blocks out to a pool of worker threads, one condition
//! variable per worker plus a global completion tally, and reassembles
//! plaintext strictly in block order. Private-key exponentiation goes through
//! the CRT split (`m1/m2/h`) unless the caller disables it.
//!
//! Signatures are a single block: SHA-512 digest at offset 8, timestamp and
//! geolocation behind it, raised to the **private** exponent. Verification
//! decrypts with the public exponent and compares digests.

#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Condvar, Mutex};

use num_bigint::BigUint;
use sha2::{Digest, Sha512};

use crate::checksum::Crc32;
use crate::entropy::{EntropyError, EntropySource};
use crate::keygen::{PublicKey, RsaKey};
use crate::numeric::{self, NumericError};
use crate::MAX_WORKERS;

/// Reserved bytes per block (leading zero byte + randomized padding).
pub const BLOCK_PADDING: usize = 12;
/// Payload (and first-block header) offset inside a plaintext block.
const PAYLOAD_OFFSET: usize = 8;

// Signature-block field offsets.
const SIG_DIGEST_OFFSET: usize = 8;
const SIG_TIME_OFFSET: usize = 72;
const SIG_LAT_OFFSET: usize = 80;
const SIG_LON_OFFSET: usize = 84;
const SHA512_BYTES: usize = 64;

/// Block codec failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Zero-length input; there is nothing to seal.
    #[error("input file is empty")]
    EmptyInput,
    /// The input does not fit the header's 32-bit size field.
    #[error("input file is too large for the 32-bit size field")]
    InputTooLarge,
    /// The ciphertext is not block-aligned; decryption is refused.
    #[error("ciphertext length {len} is not a multiple of the {block}-byte block size")]
    RaggedCiphertext {
        /// Observed file length.
        len: u64,
        /// Block size implied by the key.
        block: usize,
    },
    /// The header promised more payload than the blocks delivered.
    #[error("ciphertext ended {missing} payload bytes early")]
    ShortCiphertext {
        /// Payload bytes the header still expected.
        missing: u64,
    },
    /// The first block's header failed its complement self-check.
    #[error("wrong key file or damaged key")]
    KeyError,
    /// The recovered plaintext does not hash to the embedded CRC.
    #[error("output checksum {computed:#010X} differs from embedded {embedded:#010X}")]
    CrcMismatch {
        /// CRC carried in the header.
        embedded: u32,
        /// CRC of the bytes actually written.
        computed: u32,
    },
    /// The decrypted signature digest differs from the file digest.
    #[error("signature digest does not match the file")]
    VerifyFailed,
    /// The randomness source failed.
    #[error(transparent)]
    Entropy(#[from] EntropyError),
    /// A value overflowed its fixed-width field.
    #[error(transparent)]
    Numeric(#[from] NumericError),
    /// File I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Geotag stamped into headers and signatures.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Location {
    /// Degrees north.
    pub latitude: f32,
    /// Degrees east.
    pub longitude: f32,
}

/// The 33-byte record at offset 8 of the first plaintext block.
///
/// `size`/`crc` are big-endian, each followed by its bitwise complement; the
/// complements are the decryptor's key-sanity check. `time` and the geotag
/// are little-endian on the wire regardless of host.
#[derive(Clone, Copy, Debug)]
pub struct FileInfoHeader {
    /// High bit clear = encrypted content, set = signed content.
    pub flags: u8,
    /// Plaintext length in bytes.
    pub size: u32,
    /// CRC-32 of the plaintext.
    pub crc: u32,
    /// Epoch seconds at encryption time.
    pub time: i64,
    /// Where the file was sealed.
    pub location: Location,
}

impl FileInfoHeader {
    /// Serialized width.
    pub const WIRE_BYTES: usize = 33;

    fn write(&self, buf: &mut [u8]) {
        buf[0] = self.flags;
        buf[1..5].copy_from_slice(&self.size.to_be_bytes());
        buf[5..9].copy_from_slice(&(self.size ^ 0xFFFF_FFFF).to_be_bytes());
        buf[9..13].copy_from_slice(&self.crc.to_be_bytes());
        buf[13..17].copy_from_slice(&(self.crc ^ 0xFFFF_FFFF).to_be_bytes());
        buf[17..25].copy_from_slice(&self.time.to_le_bytes());
        buf[25..29].copy_from_slice(&self.location.latitude.to_le_bytes());
        buf[29..33].copy_from_slice(&self.location.longitude.to_le_bytes());
    }

    /// Parse and self-check. A failed complement check means the block did
    /// not decrypt to a header, i.e. the key is wrong or the file damaged.
    fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let size = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        let size_xor = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
        let crc = u32::from_be_bytes([buf[9], buf[10], buf[11], buf[12]]);
        let crc_xor = u32::from_be_bytes([buf[13], buf[14], buf[15], buf[16]]);
        if size != size_xor ^ 0xFFFF_FFFF || crc != crc_xor ^ 0xFFFF_FFFF {
            return Err(CodecError::KeyError);
        }
        let time = i64::from_le_bytes(buf[17..25].try_into().expect("8-byte slice"));
        let latitude = f32::from_le_bytes([buf[25], buf[26], buf[27], buf[28]]);
        let longitude = f32::from_le_bytes([buf[29], buf[30], buf[31], buf[32]]);
        Ok(FileInfoHeader {
            flags: buf[0],
            size,
            crc,
            time,
            location: Location { latitude, longitude },
        })
    }
}

/// What the decryptor reports back alongside the written file.
#[derive(Clone, Copy, Debug)]
pub struct DecryptSummary {
    /// Recovered plaintext length.
    pub size: u32,
    /// Embedded (and re-verified) CRC-32.
    pub crc: u32,
    /// Epoch seconds at encryption time.
    pub time: i64,
    /// Embedded geotag.
    pub location: Location,
}

/// What signature verification reports on success.
#[derive(Clone, Copy, Debug)]
pub struct VerifySummary {
    /// Epoch seconds at signing time.
    pub time: i64,
    /// Embedded geotag.
    pub location: Location,
}

#[inline]
fn block_size_of(bits: usize) -> usize {
    bits / 8
}

#[inline]
fn first_capacity(block_size: usize) -> usize {
    block_size - BLOCK_PADDING - FileInfoHeader::WIRE_BYTES
}

#[inline]
fn block_capacity(block_size: usize) -> usize {
    block_size - BLOCK_PADDING
}

fn sha512_of(path: &Path) -> Result<[u8; SHA512_BYTES], CodecError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha512::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hasher.finalize().into())
}

fn crc32_of(path: &Path) -> Result<(u32, u64), CodecError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut state = Crc32::new();
    let mut total = 0u64;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        state.update(&chunk[..n]);
        total += n as u64;
    }
    Ok((state.finalize(), total))
}

/// Fill `buf` from the reader, tolerating short reads at end of file.
/// Returns the byte count actually read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ============================================================================
// Encryption
// ============================================================================

/// Encrypt `input` into a block stream at `output`.
///
/// The first block embeds the [`FileInfoHeader`]; the block loop always emits
/// the block built from the most recent read and stops after the first short
/// read (a zero-length read included), so a payload that exactly fills its
/// blocks is followed by one all-padding block.
pub fn encrypt_file<E: EntropySource>(
    input: &Path,
    output: &Path,
    key: &PublicKey,
    entropy: &E,
    location: Location,
) -> Result<u64, CodecError> {
    let block_size = block_size_of(key.bits);
    let (crc, len) = crc32_of(input)?;
    if len == 0 {
        return Err(CodecError::EmptyInput);
    }
    let size = u32::try_from(len).map_err(|_| CodecError::InputTooLarge)?;

    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);

    let mut flag_byte = [0u8; 1];
    entropy.fill(&mut flag_byte)?;
    let header = FileInfoHeader {
        flags: flag_byte[0] & 0x7F,
        size,
        crc,
        time: chrono::Utc::now().timestamp(),
        location,
    };

    let mut block = vec![0u8; block_size];
    let mut blocks_written = 0u64;

    // First block: header at offset 8, payload behind it.
    entropy.fill(&mut block)?;
    block[0] = 0;
    header.write(&mut block[PAYLOAD_OFFSET..PAYLOAD_OFFSET + FileInfoHeader::WIRE_BYTES]);
    let payload_start = PAYLOAD_OFFSET + FileInfoHeader::WIRE_BYTES;
    let n = read_up_to(&mut reader, &mut block[payload_start..payload_start + first_capacity(block_size)])?;
    seal_block(&mut writer, &block, key)?;
    blocks_written += 1;

    if n == first_capacity(block_size) {
        loop {
            entropy.fill(&mut block)?;
            block[0] = 0;
            let n = read_up_to(
                &mut reader,
                &mut block[PAYLOAD_OFFSET..PAYLOAD_OFFSET + block_capacity(block_size)],
            )?;
            seal_block(&mut writer, &block, key)?;
            blocks_written += 1;
            if n < block_capacity(block_size) {
                break;
            }
        }
    }

    writer.flush()?;
    tracing::info!(blocks = blocks_written, bytes = len, crc, "file sealed");
    Ok(blocks_written)
}

/// `c = m^e mod n`, serialized right-justified at block width.
fn seal_block<W: Write>(writer: &mut W, block: &[u8], key: &PublicKey) -> Result<(), CodecError> {
    let m = numeric::import_be(block);
    let c = m.modpow(&key.exponent, &key.modulus);
    writer.write_all(&numeric::export_be(&c, block.len())?)?;
    Ok(())
}

// ============================================================================
// Parallel decryption
// ============================================================================

struct WorkerSlot {
    cipher: Vec<u8>,
    plain: Vec<u8>,
    /// 1-based index of the assigned block; meaningful while `sigflag` or the
    /// result is pending collection.
    curblock: u64,
    sigflag: bool,
    runflag: bool,
}

struct Worker {
    slot: Mutex<WorkerSlot>,
    cond: Condvar,
}

impl Worker {
    fn new(block_size: usize) -> Self {
        Self {
            slot: Mutex::new(WorkerSlot {
                cipher: vec![0u8; block_size],
                plain: vec![0u8; block_size],
                curblock: 0,
                sigflag: false,
                runflag: true,
            }),
            cond: Condvar::new(),
        }
    }
}

struct Tally {
    count: Mutex<usize>,
    cond: Condvar,
}

fn worker_thread(worker: &Worker, key: &RsaKey, use_crt: bool, tally: &Tally) {
    loop {
        let mut slot = worker.slot.lock().expect("worker mutex poisoned");
        while !slot.sigflag && slot.runflag {
            slot = worker.cond.wait(slot).expect("worker mutex poisoned");
        }
        if !slot.runflag {
            return;
        }

        let c = numeric::import_be(&slot.cipher);
        let m = if use_crt {
            crt_power(&c, key)
        } else {
            c.modpow(&key.private_exponent, &key.modulus)
        };
        numeric::export_into(&m, &mut slot.plain).expect("plaintext fits the block width");
        slot.sigflag = false;
        drop(slot);

        let mut count = tally.count.lock().expect("tally mutex poisoned");
        *count += 1;
        tally.cond.notify_all();
    }
}

/// CRT private-key power:
/// `m1 = c^dp mod p`, `m2 = c^dq mod q`, `h = qinv·(m1 − m2) mod p`,
/// `m = m2 + h·q`.
fn crt_power(c: &BigUint, key: &RsaKey) -> BigUint {
    let m1 = c.modpow(&key.crt_dp, &key.prime_p);
    let m2 = c.modpow(&key.crt_dq, &key.prime_q);
    let diff = (&m1 + &key.prime_p - (&m2 % &key.prime_p)) % &key.prime_p;
    let h = (&key.crt_qinv * diff) % &key.prime_p;
    &m2 + h * &key.prime_q
}

/// Decrypt the block stream at `input` into `output`.
///
/// Blocks are dispatched to `workers` threads in batches; plaintext is
/// consumed in ascending block order, so the output byte order matches the
/// input file regardless of worker completion order. The first block's header
/// is validated before a single output byte is written.
pub fn decrypt_file(
    input: &Path,
    output: &Path,
    key: &RsaKey,
    workers: usize,
    use_crt: bool,
) -> Result<DecryptSummary, CodecError> {
    let block_size = block_size_of(key.bits);
    let len = std::fs::metadata(input)?.len();
    if len % block_size as u64 != 0 {
        return Err(CodecError::RaggedCiphertext { len, block: block_size });
    }
    let total_blocks = len / block_size as u64;
    if total_blocks == 0 {
        return Err(CodecError::EmptyInput);
    }

    let workers = workers.clamp(1, MAX_WORKERS);
    let pool: Vec<Worker> = (0..workers).map(|_| Worker::new(block_size)).collect();
    let tally = Tally { count: Mutex::new(0), cond: Condvar::new() };

    let mut reader = BufReader::new(File::open(input)?);

    let result = std::thread::scope(|scope| {
        for worker in &pool {
            let tally = &tally;
            scope.spawn(move || worker_thread(worker, key, use_crt, tally));
        }

        let run = drain_blocks(
            &mut reader,
            output,
            &pool,
            &tally,
            total_blocks,
            block_size,
        );

        for worker in &pool {
            let mut slot = worker.slot.lock().expect("worker mutex poisoned");
            slot.runflag = false;
            worker.cond.notify_one();
        }
        run
    })?;

    tracing::info!(blocks = total_blocks, bytes = result.size, crc = result.crc, "file opened");
    Ok(result)
}

/// Orchestrator loop: assign batches, await the tally, consume in order.
fn drain_blocks(
    reader: &mut BufReader<File>,
    output: &Path,
    pool: &[Worker],
    tally: &Tally,
    total_blocks: u64,
    block_size: usize,
) -> Result<DecryptSummary, CodecError> {
    let mut header: Option<FileInfoHeader> = None;
    // Output stays unopened until the first-block header has been validated.
    let mut writer: Option<BufWriter<File>> = None;
    let mut out_crc = Crc32::new();
    let mut written = 0u64;
    let mut next_block = 1u64;

    while next_block <= total_blocks {
        let batch = (total_blocks - next_block + 1).min(pool.len() as u64) as usize;

        for (i, worker) in pool.iter().take(batch).enumerate() {
            let mut slot = worker.slot.lock().expect("worker mutex poisoned");
            reader.read_exact(&mut slot.cipher)?;
            slot.curblock = next_block + i as u64;
            slot.sigflag = true;
            worker.cond.notify_one();
        }

        // Batch barrier: every assigned worker bumps the tally once.
        let mut count = tally.count.lock().expect("tally mutex poisoned");
        while *count < batch {
            count = tally.cond.wait(count).expect("tally mutex poisoned");
        }
        *count = 0;
        drop(count);

        // Workers were assigned ascending block indices, so pool order is
        // ascending curblock order.
        for worker in pool.iter().take(batch) {
            let slot = worker.slot.lock().expect("worker mutex poisoned");
            let plain = &slot.plain;
            if slot.curblock == 1 {
                let info = FileInfoHeader::read(
                    &plain[PAYLOAD_OFFSET..PAYLOAD_OFFSET + FileInfoHeader::WIRE_BYTES],
                )?;
                let mut out = BufWriter::new(File::create(output)?);
                let start = PAYLOAD_OFFSET + FileInfoHeader::WIRE_BYTES;
                let take = (first_capacity(block_size) as u64).min(info.size as u64) as usize;
                out.write_all(&plain[start..start + take])?;
                out_crc.update(&plain[start..start + take]);
                written += take as u64;
                writer = Some(out);
                header = Some(info);
            } else if let (Some(info), Some(out)) = (header.as_ref(), writer.as_mut()) {
                let remaining = info.size as u64 - written;
                if remaining > 0 {
                    let take = (block_capacity(block_size) as u64).min(remaining) as usize;
                    out.write_all(&plain[PAYLOAD_OFFSET..PAYLOAD_OFFSET + take])?;
                    out_crc.update(&plain[PAYLOAD_OFFSET..PAYLOAD_OFFSET + take]);
                    written += take as u64;
                }
            }
        }

        next_block += batch as u64;
    }

    let info = header.ok_or(CodecError::KeyError)?;
    if written < info.size as u64 {
        return Err(CodecError::ShortCiphertext { missing: info.size as u64 - written });
    }
    if let Some(mut out) = writer {
        out.flush()?;
    }

    let computed = out_crc.finalize();
    if computed != info.crc {
        return Err(CodecError::CrcMismatch { embedded: info.crc, computed });
    }

    Ok(DecryptSummary { size: info.size, crc: info.crc, time: info.time, location: info.location })
}

// ============================================================================
// Signatures
// ============================================================================

/// Sign `input`: one block carrying the SHA-512 digest, raised to the
/// private exponent, written to `signature`.
pub fn sign_file<E: EntropySource>(
    input: &Path,
    signature: &Path,
    key: &RsaKey,
    entropy: &E,
    location: Location,
) -> Result<i64, CodecError> {
    let block_size = block_size_of(key.bits);
    let digest = sha512_of(input)?;
    let time = chrono::Utc::now().timestamp();

    let mut block = vec![0u8; block_size];
    entropy.fill(&mut block)?;
    block[0] = 0;
    block[SIG_DIGEST_OFFSET..SIG_DIGEST_OFFSET + SHA512_BYTES].copy_from_slice(&digest);
    block[SIG_TIME_OFFSET..SIG_TIME_OFFSET + 8].copy_from_slice(&time.to_le_bytes());
    block[SIG_LAT_OFFSET..SIG_LAT_OFFSET + 4].copy_from_slice(&location.latitude.to_le_bytes());
    block[SIG_LON_OFFSET..SIG_LON_OFFSET + 4].copy_from_slice(&location.longitude.to_le_bytes());

    let m = numeric::import_be(&block);
    let s = m.modpow(&key.private_exponent, &key.modulus);
    std::fs::write(signature, numeric::export_be(&s, block_size)?)?;
    tracing::info!(signature = %signature.display(), "file signed");
    Ok(time)
}

/// Verify `signature` against `input` with the public key. On success the
/// embedded timestamp and geotag are returned.
pub fn verify_file(
    input: &Path,
    signature: &Path,
    key: &PublicKey,
) -> Result<VerifySummary, CodecError> {
    let block_size = block_size_of(key.bits);
    let raw = std::fs::read(signature)?;
    if raw.len() != block_size {
        return Err(CodecError::RaggedCiphertext { len: raw.len() as u64, block: block_size });
    }

    let s = numeric::import_be(&raw);
    let m = s.modpow(&key.exponent, &key.modulus);
    let block = numeric::export_be(&m, block_size)?;

    let digest = sha512_of(input)?;
    if block[SIG_DIGEST_OFFSET..SIG_DIGEST_OFFSET + SHA512_BYTES] != digest {
        return Err(CodecError::VerifyFailed);
    }

    let time = i64::from_le_bytes(
        block[SIG_TIME_OFFSET..SIG_TIME_OFFSET + 8].try_into().expect("8-byte slice"),
    );
    let latitude = f32::from_le_bytes(
        block[SIG_LAT_OFFSET..SIG_LAT_OFFSET + 4].try_into().expect("4-byte slice"),
    );
    let longitude = f32::from_le_bytes(
        block[SIG_LON_OFFSET..SIG_LON_OFFSET + 4].try_into().expect("4-byte slice"),
    );
    Ok(VerifySummary { time, location: Location { latitude, longitude } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::SystemEntropy;
    use crate::keygen;
    use rand::RngCore;
    use std::sync::OnceLock;

    fn entropy() -> &'static SystemEntropy {
        static SRC: OnceLock<SystemEntropy> = OnceLock::new();
        SRC.get_or_init(|| SystemEntropy::open().expect("open urandom"))
    }

    fn write_random_file(path: &Path, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        std::fs::write(path, &data).unwrap();
        data
    }

    fn round_trip(len: usize, workers: usize, use_crt: bool) {
        let key = keygen::tests::test_key();
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        let sealed = dir.path().join("sealed");
        let opened = dir.path().join("opened");

        let data = write_random_file(&plain, len);
        encrypt_file(&plain, &sealed, &key.public_key(), entropy(), Location::default()).unwrap();

        let sealed_len = std::fs::metadata(&sealed).unwrap().len();
        assert_eq!(sealed_len % (key.bits / 8) as u64, 0);

        let summary = decrypt_file(&sealed, &opened, key, workers, use_crt).unwrap();
        assert_eq!(summary.size as usize, len);
        assert_eq!(std::fs::read(&opened).unwrap(), data);
        assert_eq!(summary.crc, crate::checksum::crc32(&data));
    }

    #[test]
    fn round_trip_small_file() {
        // Fits inside the first block with room to spare.
        round_trip(17, 2, true);
    }

    #[test]
    fn round_trip_multi_block() {
        let block = keygen::tests::test_key().bits / 8;
        round_trip(3 * block + 5, 3, true);
    }

    #[test]
    fn round_trip_exact_first_block_capacity() {
        let block = keygen::tests::test_key().bits / 8;
        // Exactly fills the first block, forcing the all-padding tail block.
        round_trip(first_capacity(block), 2, true);
    }

    #[test]
    fn round_trip_exact_block_boundary() {
        let block = keygen::tests::test_key().bits / 8;
        round_trip(first_capacity(block) + 2 * block_capacity(block), 2, true);
    }

    #[test]
    fn round_trip_without_crt() {
        round_trip(1000, 2, false);
    }

    #[test]
    fn round_trip_spans_several_batches() {
        // More blocks than workers, so the orchestrator runs multiple
        // assign/await/consume cycles.
        let block = keygen::tests::test_key().bits / 8;
        round_trip(10 * block, 3, true);
    }

    #[test]
    fn round_trip_single_worker() {
        round_trip(500, 1, true);
    }

    #[test]
    fn empty_input_is_refused() {
        let key = keygen::tests::test_key();
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        std::fs::write(&plain, b"").unwrap();
        let err = encrypt_file(
            &plain,
            &dir.path().join("sealed"),
            &key.public_key(),
            entropy(),
            Location::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::EmptyInput));
    }

    #[test]
    fn ragged_ciphertext_is_refused() {
        let key = keygen::tests::test_key();
        let dir = tempfile::tempdir().unwrap();
        let sealed = dir.path().join("sealed");
        std::fs::write(&sealed, vec![0u8; key.bits / 8 + 1]).unwrap();
        let err = decrypt_file(&sealed, &dir.path().join("opened"), key, 2, true).unwrap_err();
        assert!(matches!(err, CodecError::RaggedCiphertext { .. }));
    }

    #[test]
    fn first_block_mask_zeroes_the_top_byte() {
        // A block initialized to 0xFF everywhere must come out of first-block
        // construction with byte 0 == 0x00; otherwise the integer could reach
        // the modulus. Exercised through a real encryption: decrypting block 1
        // with the private key must yield a zero top byte.
        let key = keygen::tests::test_key();
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        let sealed = dir.path().join("sealed");
        write_random_file(&plain, 64);
        encrypt_file(&plain, &sealed, &key.public_key(), entropy(), Location::default()).unwrap();

        let block_size = key.bits / 8;
        let raw = std::fs::read(&sealed).unwrap();
        let c = numeric::import_be(&raw[..block_size]);
        let m = c.modpow(&key.private_exponent, &key.modulus);
        let block = numeric::export_be(&m, block_size).unwrap();
        assert_eq!(block[0], 0x00);
    }

    #[test]
    fn corrupt_header_twin_raises_key_error_and_writes_nothing() {
        let key = keygen::tests::test_key();
        let block_size = key.bits / 8;
        let dir = tempfile::tempdir().unwrap();
        let sealed = dir.path().join("sealed");
        let opened = dir.path().join("opened");

        // Hand-build a first block whose size twin is deliberately wrong
        // (size = 42, size_xor = 0), then seal it with the public key.
        let mut block = vec![0u8; block_size];
        entropy().fill(&mut block).unwrap();
        block[0] = 0;
        let header_at = PAYLOAD_OFFSET;
        FileInfoHeader {
            flags: 0,
            size: 42,
            crc: 0,
            time: 0,
            location: Location::default(),
        }
        .write(&mut block[header_at..header_at + FileInfoHeader::WIRE_BYTES]);
        block[header_at + 5..header_at + 9].copy_from_slice(&0u32.to_be_bytes()); // size_xor := 0

        let m = numeric::import_be(&block);
        let c = m.modpow(&key.public_exponent, &key.modulus);
        std::fs::write(&sealed, numeric::export_be(&c, block_size).unwrap()).unwrap();

        let err = decrypt_file(&sealed, &opened, key, 2, true).unwrap_err();
        assert!(matches!(err, CodecError::KeyError));
        assert!(!opened.exists(), "no output may be created on a header failure");
    }

    #[test]
    fn crc_mismatch_is_reported() {
        let key = keygen::tests::test_key();
        let block_size = key.bits / 8;
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        let sealed = dir.path().join("sealed");

        write_random_file(&plain, 100);
        encrypt_file(&plain, &sealed, &key.public_key(), entropy(), Location::default()).unwrap();

        // Flip one payload byte inside the (only) data block: re-seal block 1
        // with a corrupted payload region but intact header twins.
        let raw = std::fs::read(&sealed).unwrap();
        let c = numeric::import_be(&raw[..block_size]);
        let m = c.modpow(&key.private_exponent, &key.modulus);
        let mut block = numeric::export_be(&m, block_size).unwrap();
        block[PAYLOAD_OFFSET + FileInfoHeader::WIRE_BYTES + 3] ^= 0xFF;
        let c = numeric::import_be(&block).modpow(&key.public_exponent, &key.modulus);
        let mut tampered = numeric::export_be(&c, block_size).unwrap();
        tampered.extend_from_slice(&raw[block_size..]);
        std::fs::write(&sealed, tampered).unwrap();

        let err = decrypt_file(&sealed, &dir.path().join("opened"), key, 2, true).unwrap_err();
        assert!(matches!(err, CodecError::CrcMismatch { .. }));
    }

    #[test]
    fn sign_verify_round_trip_with_geotag() {
        let key = keygen::tests::test_key();
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        let sig = dir.path().join("sig");
        write_random_file(&plain, 4096);

        let location = Location { latitude: 37.7750, longitude: -122.4183 };
        let signed_at = sign_file(&plain, &sig, key, entropy(), location).unwrap();

        assert_eq!(std::fs::metadata(&sig).unwrap().len(), (key.bits / 8) as u64);

        let summary = verify_file(&plain, &sig, &key.public_key()).unwrap();
        assert_eq!(summary.time, signed_at);
        assert!((summary.location.latitude - 37.7750).abs() < 0.0001);
        assert!((summary.location.longitude + 122.4183).abs() < 0.0001);
    }

    #[test]
    fn tampered_input_fails_verification() {
        let key = keygen::tests::test_key();
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        let sig = dir.path().join("sig");
        let mut data = write_random_file(&plain, 1024);

        sign_file(&plain, &sig, key, entropy(), Location::default()).unwrap();

        data[512] ^= 0x01;
        std::fs::write(&plain, &data).unwrap();
        let err = verify_file(&plain, &sig, &key.public_key()).unwrap_err();
        assert!(matches!(err, CodecError::VerifyFailed));
    }

    #[test]
    fn header_wire_layout_round_trips() {
        let header = FileInfoHeader {
            flags: 0x2A,
            size: 0xDEAD_BEEF,
            crc: 0xCBF4_3926,
            time: 1_750_000_000,
            location: Location { latitude: 37.7750, longitude: -122.4183 },
        };
        let mut buf = [0u8; FileInfoHeader::WIRE_BYTES];
        header.write(&mut buf);
        // Twins live right behind their fields.
        assert_eq!(&buf[1..5], &0xDEAD_BEEFu32.to_be_bytes());
        assert_eq!(&buf[5..9], &(0xDEAD_BEEFu32 ^ 0xFFFF_FFFF).to_be_bytes());
        // Time and geotag are little-endian on the wire.
        assert_eq!(&buf[17..25], &1_750_000_000i64.to_le_bytes());
        assert_eq!(&buf[25..29], &37.7750f32.to_le_bytes());

        let back = FileInfoHeader::read(&buf).unwrap();
        assert_eq!(back.flags, 0x2A);
        assert_eq!(back.size, header.size);
        assert_eq!(back.crc, header.crc);
        assert_eq!(back.time, header.time);
        assert_eq!(back.location, header.location);
    }
}
