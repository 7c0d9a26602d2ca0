//! Bounded retry with exponential backoff.
//!
//! A policy stops at whichever limit is hit first: the attempt count or the
//! deadline. Backoff doubles from `initial_backoff` up to `max_backoff`. With
//! jitter enabled each sleep is drawn uniformly from `[backoff / 2, backoff]`
//! using the environment's RNG, so simulations stay reproducible.

use std::{future::Future, time::Duration};

use crate::env::Environment;

/// How often and how long to retry an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Sleep before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single sleep.
    pub max_backoff: Duration,
    /// Overall budget measured from the first attempt.
    pub deadline: Option<Duration>,
    /// Randomise sleeps to spread out competing writers.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            deadline: Some(Duration::from_secs(10)),
            jitter: true,
        }
    }
}

/// Why a retried operation finally gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    /// Error from the last attempt.
    pub error: E,
    /// Attempts made, including the failing one.
    pub attempts: u32,
}

impl RetryPolicy {
    /// Try exactly once.
    pub fn once() -> Self {
        Self { max_attempts: 1, deadline: None, ..Self::default() }
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    ///
    /// `attempt` counts completed attempts, starting at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff.saturating_mul(1 << exponent).min(self.max_backoff)
    }

    fn sleep_for<E: Environment>(&self, env: &E, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let half = base / 2;
        let span = u64::try_from((base - half).as_nanos()).unwrap_or(u64::MAX);
        half + Duration::from_nanos(env.random_u64() % span.saturating_add(1))
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects,
    /// or the policy is exhausted.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<E, T, Err, F, Fut>(
        &self,
        env: &E,
        mut op: F,
        retryable: impl Fn(&Err) -> bool,
    ) -> Result<T, RetryFailure<Err>>
    where
        E: Environment,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Err>>,
    {
        let started = env.now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !retryable(&error) || attempt >= max_attempts {
                return Err(RetryFailure { error, attempts: attempt });
            }

            let pause = self.sleep_for(env, attempt);
            if let Some(deadline) = self.deadline {
                let elapsed = env.now().saturating_duration_since(started);
                if elapsed + pause > deadline {
                    tracing::debug!(attempt, ?elapsed, ?deadline, "retry deadline reached");
                    return Err(RetryFailure { error, attempts: attempt });
                }
            }

            tracing::trace!(attempt, ?pause, "retrying");
            env.sleep(pause).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Instant,
    };

    use proptest::prelude::*;

    use super::*;

    /// Virtual clock that advances only when slept on.
    #[derive(Clone)]
    struct TestEnv {
        origin: Instant,
        elapsed_nanos: Arc<AtomicU64>,
        fill: u8,
    }

    impl TestEnv {
        fn new() -> Self {
            Self::with_fill(0xFF)
        }

        /// Every random byte is `fill`.
        fn with_fill(fill: u8) -> Self {
            Self { origin: Instant::now(), elapsed_nanos: Arc::new(AtomicU64::new(0)), fill }
        }

        fn slept(&self) -> Duration {
            Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
        }
    }

    impl Environment for TestEnv {
        fn now(&self) -> Instant {
            self.origin + self.slept()
        }

        fn unix_millis(&self) -> u64 {
            0
        }

        fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
            let nanos = u64::try_from(duration.as_nanos()).unwrap();
            self.elapsed_nanos.fetch_add(nanos, Ordering::SeqCst);
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(self.fill);
        }
    }

    fn policy(max_attempts: u32, deadline: Option<Duration>) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            deadline,
            jitter: false,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(10, None);
        assert_eq!(p.backoff(1), Duration::from_millis(10));
        assert_eq!(p.backoff(2), Duration::from_millis(20));
        assert_eq!(p.backoff(3), Duration::from_millis(40));
        assert_eq!(p.backoff(9), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let env = TestEnv::new();
        let flaky =
            |attempt: u32| async move { if attempt < 3 { Err("flaky") } else { Ok(attempt) } };
        let result = policy(5, None).run(&env, flaky, |_| true).await;

        assert_eq!(result, Ok(3));
        assert_eq!(env.slept(), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn stops_at_attempt_limit() {
        let env = TestEnv::new();
        let result: Result<(), _> =
            policy(3, None).run(&env, |_| async { Err("down") }, |_| true).await;

        assert_eq!(result, Err(RetryFailure { error: "down", attempts: 3 }));
    }

    #[tokio::test]
    async fn stops_at_deadline_before_attempt_limit() {
        let env = TestEnv::new();
        let result: Result<(), _> = policy(100, Some(Duration::from_millis(50)))
            .run(&env, |_| async { Err("down") }, |_| true)
            .await;

        // sleeps 10 + 20, then the next 40ms sleep would overrun 50ms
        assert_eq!(result.unwrap_err().attempts, 3);
        assert_eq!(env.slept(), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let env = TestEnv::new();
        let result: Result<(), _> =
            policy(5, None).run(&env, |_| async { Err("fatal") }, |e| *e != "fatal").await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(env.slept(), Duration::ZERO);
    }

    #[tokio::test]
    async fn jitter_stays_within_half_to_full_backoff() {
        let env = TestEnv::new();
        let mut p = policy(2, None);
        p.jitter = true;

        let _: Result<(), _> = p.run(&env, |_| async { Err(()) }, |_| true).await;
        let slept = env.slept();
        assert!(slept >= Duration::from_millis(5) && slept <= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let env = TestEnv::new();
        let result: Result<(), _> =
            policy(0, None).run(&env, |_| async { Err("down") }, |_| true).await;

        assert_eq!(result.unwrap_err().attempts, 1);
    }

    proptest! {
        #[test]
        fn prop_backoff_never_shrinks_or_exceeds_cap(
            initial_ms in 0u64..1_000,
            max_ms in 0u64..10_000,
            attempt in 1u32..64,
        ) {
            let p = RetryPolicy {
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_millis(max_ms),
                ..policy(10, None)
            };

            prop_assert!(p.backoff(attempt) <= p.max_backoff);
            prop_assert!(p.backoff(attempt) <= p.backoff(attempt + 1));
        }

        #[test]
        fn prop_jittered_sleep_stays_within_half_to_full_backoff(
            initial_ms in 1u64..1_000,
            attempt in 1u32..16,
            fill in any::<u8>(),
        ) {
            let env = TestEnv::with_fill(fill);
            let p = RetryPolicy {
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_secs(60),
                jitter: true,
                ..policy(10, None)
            };

            let base = p.backoff(attempt);
            let pause = p.sleep_for(&env, attempt);
            prop_assert!(pause >= base / 2 && pause <= base, "{pause:?} outside {base:?}");
        }
    }
}
