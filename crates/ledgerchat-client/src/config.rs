//! Client configuration.

use std::time::Duration;

use ledgerchat_core::RetryPolicy;

/// Tunables for a [`ChatClient`](crate::ChatClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Retries for ledger reads (tip and node fetches). Only transient
    /// errors are retried.
    pub read_retry: RetryPolicy,
    /// Retries for sends. Append conflicts and transient errors are retried,
    /// each attempt re-reading the tip.
    ///
    /// Retrying a transient append error assumes the ledger failed before
    /// committing. If a ledger can commit and then report failure, a retried
    /// send may store the message twice.
    pub send_retry: RetryPolicy,
    /// Baseline refresh interval for watchers.
    pub poll_interval: Duration,
    /// Walks stop after this many nodes.
    pub max_chain_length: usize,
    /// Decrypted nodes kept in the cache.
    pub cache_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_millis(500),
                deadline: Some(Duration::from_secs(5)),
                jitter: true,
            },
            send_retry: RetryPolicy {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(25),
                max_backoff: Duration::from_secs(1),
                deadline: Some(Duration::from_secs(10)),
                jitter: true,
            },
            poll_interval: Duration::from_secs(3),
            max_chain_length: 10_000,
            cache_capacity: 4_096,
        }
    }
}
