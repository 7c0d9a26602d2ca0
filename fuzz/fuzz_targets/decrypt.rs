//! Fuzz target for the symmetric cipher
//!
//! Node payloads come from the ledger and may be truncated, corrupted or
//! sealed under another chatroom's key.
//!
//! # Strategy
//!
//! - Arbitrary blobs opened under an arbitrary key
//! - Sealed plaintexts with one byte flipped
//!
//! # Invariants
//!
//! - NEVER panic on any blob length
//! - Blobs shorter than the nonce fail with `Truncated`
//! - Sealed text opens to itself under the same key
//! - Any single flipped byte fails authentication

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ledgerchat_crypto::{CipherError, KEY_SIZE, NONCE_SIZE, SymmetricKey, decrypt, encrypt};
use rand::{SeedableRng, rngs::StdRng};

#[derive(Debug, Arbitrary)]
struct Input {
    key: [u8; KEY_SIZE],
    nonce_seed: u64,
    plaintext: String,
    blob: Vec<u8>,
    flip: Option<(usize, u8)>,
}

fuzz_target!(|input: Input| {
    let key = SymmetricKey::from_bytes(input.key);

    let opened = decrypt(&input.blob, &key);
    if input.blob.len() < NONCE_SIZE {
        assert_eq!(opened, Err(CipherError::Truncated { len: input.blob.len() }));
    }

    let mut rng = StdRng::seed_from_u64(input.nonce_seed);
    let mut sealed = encrypt(&input.plaintext, &key, &mut rng).unwrap();
    assert_eq!(decrypt(&sealed, &key).unwrap(), input.plaintext);

    if let Some((index, mask)) = input.flip {
        if mask != 0 {
            let index = index % sealed.len();
            sealed[index] ^= mask;
            assert_eq!(decrypt(&sealed, &key), Err(CipherError::Authentication));
        }
    }
});
