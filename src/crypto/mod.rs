//! AES-256-GCM encryption and PBKDF2/HKDF key derivation for .chin archives.
//!
//! Key schedule:
//!   master key = PBKDF2-HMAC-SHA256(password, master salt, 100 000 iters)
//!   stream key = HKDF-SHA256(ikm = master key, salt = file salt, info = "chin-stream-v6")
//!
//! PBKDF2 is intentionally slow and runs once per archive; HKDF is cheap and
//! runs once per file, so a leaked stream key does not expose other files.
//!
//! In-memory payload layout (metadata trailer): [ nonce (12 B) | ciphertext | GCM tag (16 B) ]

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::io;

use crate::error::{ChinError, Result};

pub mod stream;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const SALT_SIZE: usize = 16;
pub const TAG_SIZE: usize = 16;

/// PBKDF2 iteration count. A format constant: changing it breaks every
/// existing encrypted archive.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// HKDF info string, fixed for format version 6.
const HKDF_INFO: &[u8] = b"chin-stream-v6";

/// Derive the 32-byte master key from a password and the header salt.
/// CPU intensive to resist brute force; call once per archive.
pub fn derive_master_key(password: &[u8], salt: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Derive a unique per-file stream key from the master key and a file salt.
pub fn derive_stream_key(master_key: &[u8; KEY_SIZE], file_salt: &[u8]) -> Result<[u8; KEY_SIZE]> {
    let hk = Hkdf::<Sha256>::new(Some(file_salt), master_key);
    let mut key = [0u8; KEY_SIZE];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|e| ChinError::Io(io::Error::new(io::ErrorKind::Other, format!("hkdf: {e}"))))?;
    Ok(key)
}

pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Encrypt an in-memory payload with a random nonce.
///
/// Returns `nonce (12 B) || ciphertext || GCM-tag (16 B)`.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| ChinError::Io(io::Error::new(io::ErrorKind::Other, "bad key length")))?;
    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| ChinError::Io(io::Error::new(io::ErrorKind::Other, "encryption failed")))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a payload produced by [`seal`].
///
/// Fails with [`ChinError::InvalidPassword`] on authentication failure; a
/// wrong password and corrupted ciphertext are indistinguishable at the GCM
/// layer.
pub fn open(key: &[u8; KEY_SIZE], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE {
        return Err(ChinError::InvalidFormat(
            "encrypted payload too short for nonce".into(),
        ));
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| ChinError::InvalidPassword)?;
    let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
    cipher
        .decrypt(nonce, &data[NONCE_SIZE..])
        .map_err(|_| ChinError::InvalidPassword)
}
