//! Production environment: system clocks, tokio timers and OS entropy.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ledgerchat_core::Environment;

/// Production [`Environment`].
///
/// Random bytes come from `getrandom` and are used for AES-GCM nonces and
/// chatroom keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(e) = getrandom::fill(buffer) {
            // Only on unsupported platforms. Zeroed nonces would repeat, so
            // refuse to continue rather than encrypt with them.
            tracing::error!(error = %e, "OS entropy unavailable");
            std::process::abort();
        }
    }
}
