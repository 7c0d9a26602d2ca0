//! Chatroom key material.

use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a chatroom key in bytes.
pub const KEY_SIZE: usize = 32;

/// Domain separation for key fingerprints.
const FINGERPRINT_DOMAIN: &[u8] = b"ledgerchat-key-fingerprint-v1";

/// One-way digest identifying a key without revealing it.
pub type KeyFingerprint = [u8; 32];

/// Errors building a key from external input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Input had the wrong number of bytes.
    #[error("key must be {KEY_SIZE} bytes, got {0}")]
    Length(usize),

    /// Input was not valid hex.
    #[error("invalid key hex: {0}")]
    Hex(String),
}

/// Shared 256-bit chatroom key.
///
/// The `Debug` impl never prints key bytes, and the bytes are wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy a key out of a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| KeyError::Length(bytes.len()))?;
        Ok(Self(bytes))
    }

    /// Parse 64 hex digits, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| KeyError::Hex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Raw key bytes.
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Domain-separated SHA-256 of the key.
    pub fn fingerprint(&self) -> KeyFingerprint {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(self.0);
        hasher.finalize().into()
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey(<redacted {KEY_SIZE} bytes>)")
    }
}
