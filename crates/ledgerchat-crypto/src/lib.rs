//! Ledgerchat message encryption.
//!
//! Every chatroom shares one 256-bit key. Message payloads are sealed with
//! AES-256-GCM and stored as `nonce || ciphertext || tag`.
//!
//! # Design
//!
//! [`encrypt`] draws a fresh 12-byte nonce from the RNG it is handed for
//! every message. Callers pass an RNG backed by their `Environment`, so
//! simulations stay reproducible while production still gets OS entropy.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cipher;
pub mod key;

pub use cipher::{CipherError, NONCE_SIZE, TAG_SIZE, decrypt, decrypt_bytes, encrypt};
pub use key::{KEY_SIZE, KeyError, KeyFingerprint, SymmetricKey};
