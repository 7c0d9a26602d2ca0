//! AES-256-GCM payload sealing.
//!
//! # Blob layout
//!
//! ```text
//! ┌────────────┬──────────────────────┬──────────┐
//! │ nonce (12) │ ciphertext (len(pt)) │ tag (16) │
//! └────────────┴──────────────────────┴──────────┘
//! ```
//!
//! Any tampering, a wrong key, or a truncated blob fails authentication.
//! There is no path that returns unauthenticated plaintext.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

use crate::key::SymmetricKey;

/// AES-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Errors from sealing or opening a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// The blob is too short to hold a nonce.
    #[error("ciphertext too short: {len} bytes")]
    Truncated {
        /// Length of the rejected blob.
        len: usize,
    },

    /// Tag verification failed: wrong key, tampering or corruption.
    #[error("authentication failed")]
    Authentication,

    /// Authenticated plaintext is not UTF-8.
    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,

    /// Plaintext exceeds what AES-GCM can seal.
    #[error("encryption failed")]
    Encrypt,
}

/// Seal `plaintext` under `key` with a fresh nonce drawn from `rng`.
///
/// Returns `nonce || ciphertext || tag`.
pub fn encrypt<R: RngCore + CryptoRng>(
    plaintext: &str,
    key: &SymmetricKey,
    rng: &mut R,
) -> Result<Vec<u8>, CipherError> {
    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);
    seal(plaintext, key, nonce)
}

fn seal(
    plaintext: &str,
    key: &SymmetricKey,
    nonce: [u8; NONCE_SIZE],
) -> Result<Vec<u8>, CipherError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| CipherError::Encrypt)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Open a blob produced by [`encrypt`] and return the raw plaintext bytes.
pub fn decrypt_bytes(blob: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CipherError> {
    if blob.len() < NONCE_SIZE {
        return Err(CipherError::Truncated { len: blob.len() });
    }

    let (nonce, sealed) = blob.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher.decrypt(Nonce::from_slice(nonce), sealed).map_err(|_| CipherError::Authentication)
}

/// Open a blob produced by [`encrypt`] and decode it as UTF-8 text.
pub fn decrypt(blob: &[u8], key: &SymmetricKey) -> Result<String, CipherError> {
    let bytes = decrypt_bytes(blob, key)?;
    String::from_utf8(bytes).map_err(|_| CipherError::InvalidUtf8)
}
