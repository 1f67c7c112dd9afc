//! Chunked streaming AEAD for file payloads.
//!
//! On-disk stream layout for one file:
//!
//! ```text
//! file_salt (16 B)
//! repeated:  nonce (12 B) | ciphertext (<= 64 KiB) | GCM tag (16 B)
//! ```
//!
//! Frames carry no length prefix: every frame holds exactly [`CHUNK_SIZE`]
//! plaintext bytes except the last, which holds the remainder. The reader
//! derives the frame schedule from the entry's plaintext size, so the stored
//! extent of an encrypted entry is a pure function of that size
//! ([`encrypted_len`]). An empty file still produces one zero-length frame,
//! which authenticates the end of the stream.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use std::io::{self, Read, Write};

use crate::crypto::{self, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
use crate::error::{ChinError, Result};

/// Plaintext bytes per AEAD frame.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Per-frame framing cost: inline nonce plus GCM tag.
pub const FRAME_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Number of AEAD frames a plaintext of `plain_size` bytes produces.
pub fn frame_count(plain_size: u64) -> u64 {
    if plain_size == 0 {
        1
    } else {
        plain_size.div_ceil(CHUNK_SIZE as u64)
    }
}

/// Stored length of an encrypted stream for a plaintext of `plain_size` bytes.
pub fn encrypted_len(plain_size: u64) -> u64 {
    SALT_SIZE as u64 + frame_count(plain_size) * FRAME_OVERHEAD as u64 + plain_size
}

/// Encrypt `src` to `dst` as one salted frame stream.
///
/// Generates a fresh file salt, derives the stream key from the master key,
/// and writes `salt || frames`. Returns the total number of bytes written to
/// `dst`, i.e. the stored length of the stream.
pub fn encrypt_stream<R: Read, W: Write>(
    mut src: R,
    mut dst: W,
    master_key: &[u8; KEY_SIZE],
) -> Result<u64> {
    let file_salt = crypto::generate_salt();
    let stream_key = crypto::derive_stream_key(master_key, &file_salt)?;
    let cipher = Aes256Gcm::new_from_slice(&stream_key)
        .map_err(|_| ChinError::Io(io::Error::new(io::ErrorKind::Other, "bad key length")))?;

    dst.write_all(&file_salt)?;
    let mut total = SALT_SIZE as u64;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut first = true;
    loop {
        let n = read_full(&mut src, &mut buf)?;
        if n == 0 && !first {
            break;
        }
        let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
        let ciphertext = cipher
            .encrypt(&nonce, &buf[..n])
            .map_err(|_| ChinError::Io(io::Error::new(io::ErrorKind::Other, "encryption failed")))?;
        dst.write_all(&nonce)?;
        dst.write_all(&ciphertext)?;
        total += (NONCE_SIZE + ciphertext.len()) as u64;
        first = false;
        if n < CHUNK_SIZE {
            break;
        }
    }

    Ok(total)
}

/// Decrypt a salted frame stream of exactly `plain_size` plaintext bytes
/// from `src`, writing plaintext to `dst`.
///
/// Any authentication failure surfaces as [`ChinError::InvalidPassword`];
/// running out of bytes mid-stream is [`ChinError::TruncatedArchive`].
pub fn decrypt_stream<R: Read, W: Write>(
    mut src: R,
    mut dst: W,
    master_key: &[u8; KEY_SIZE],
    plain_size: u64,
) -> Result<()> {
    let mut file_salt = [0u8; SALT_SIZE];
    src.read_exact(&mut file_salt).map_err(eof_is_truncation)?;
    let stream_key = crypto::derive_stream_key(master_key, &file_salt)?;
    let cipher = Aes256Gcm::new_from_slice(&stream_key).map_err(|_| ChinError::InvalidPassword)?;

    let mut remaining = plain_size;
    for _ in 0..frame_count(plain_size) {
        let chunk_len = remaining.min(CHUNK_SIZE as u64) as usize;

        let mut nonce = [0u8; NONCE_SIZE];
        src.read_exact(&mut nonce).map_err(eof_is_truncation)?;
        let mut ciphertext = vec![0u8; chunk_len + TAG_SIZE];
        src.read_exact(&mut ciphertext).map_err(eof_is_truncation)?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| ChinError::InvalidPassword)?;
        dst.write_all(&plaintext)?;
        remaining -= plaintext.len() as u64;
    }

    Ok(())
}

fn eof_is_truncation(err: io::Error) -> ChinError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ChinError::TruncatedArchive("encrypted stream ended early".into())
    } else {
        ChinError::Io(err)
    }
}

/// Read until `buf` is full or the source hits EOF. Returns bytes read.
pub(crate) fn read_full<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
