//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples chain logic from system resources. The
//! production runtime uses the real clock and OS entropy; the simulation
//! harness uses a virtual clock and a seeded RNG so that every interleaving
//! of concurrent writers can be replayed from its seed.
//!
//! # Invariants
//!
//! - Monotonicity: `now()` never goes backwards
//! - Determinism: under simulation, the same seed yields the same random
//!   bytes and the same timestamps
//! - Isolation: implementations share no global state

use std::time::{Duration, Instant};

use rand::{CryptoRng, RngCore};

/// Time, randomness and sleeping.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic time, used for backoff deadlines.
    fn now(&self) -> Instant;

    /// Milliseconds since the Unix epoch, stamped into chain nodes.
    ///
    /// Wall-clock time may jump; never use it for deadlines.
    fn unix_millis(&self) -> u64;

    /// Sleep for `duration`.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    ///
    /// Production implementations must draw from OS entropy: these bytes
    /// become AES-GCM nonces and chatroom keys.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Random fixed-size array, convenient for keys and identifiers.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }

    /// This environment's randomness as a [`RngCore`], for APIs that take one.
    fn rng(&self) -> EnvRng<'_, Self> {
        EnvRng(self)
    }
}

/// [`RngCore`] view of an [`Environment`].
///
/// Marked [`CryptoRng`] because production environments draw from OS
/// entropy; simulated ones are seeded and only ever used in tests.
#[derive(Debug)]
pub struct EnvRng<'a, E>(&'a E);

impl<E: Environment> RngCore for EnvRng<'_, E> {
    fn next_u32(&mut self) -> u32 {
        u32::from_be_bytes(self.0.random_array())
    }

    fn next_u64(&mut self) -> u64 {
        self.0.random_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.random_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.random_bytes(dest);
        Ok(())
    }
}

impl<E: Environment> CryptoRng for EnvRng<'_, E> {}
