//! Fault-injecting ledger wrapper.
//!
//! `ChaoticLedger` forwards to an inner ledger but fails a seeded fraction
//! of calls with transient errors before they reach it. A failed call never
//! has a side effect on the inner ledger, so a retried append cannot land
//! twice.
//!
//! Two modes combine:
//!
//! - random: each call fails with probability `failure_rate`
//! - scripted: [`fail_next`](ChaoticLedger::fail_next) fails the next `n`
//!   calls unconditionally

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use ledgerchat_proto::{AppendOutcome, ChatNode, Chatroom, ChatroomId, ChatroomTip, MemberId, NodeId};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{Ledger, LedgerError};

/// Timeout reported by injected `Timeout` failures.
const INJECTED_TIMEOUT: Duration = Duration::from_millis(500);

/// [`Ledger`] wrapper that injects transient failures.
#[derive(Clone)]
pub struct ChaoticLedger<L> {
    inner: L,
    /// `f64` bits, so the rate can change while the ledger is shared.
    failure_rate: Arc<AtomicU64>,
    rng: Arc<Mutex<StdRng>>,
    scripted: Arc<AtomicU32>,
    injected: Arc<AtomicU64>,
}

impl<L: Ledger> ChaoticLedger<L> {
    /// Wrap `inner`, failing each call with probability `failure_rate`.
    ///
    /// The rate is clamped to `0.0..=1.0`.
    pub fn new(inner: L, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            failure_rate: Arc::new(AtomicU64::new(clamp_rate(failure_rate).to_bits())),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            scripted: Arc::new(AtomicU32::new(0)),
            injected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Change the random failure rate, clamped to `0.0..=1.0`.
    pub fn set_failure_rate(&self, failure_rate: f64) {
        self.failure_rate.store(clamp_rate(failure_rate).to_bits(), Ordering::SeqCst);
    }

    /// Current random failure rate.
    pub fn failure_rate(&self) -> f64 {
        f64::from_bits(self.failure_rate.load(Ordering::SeqCst))
    }

    /// Fail the next `n` calls regardless of the random rate.
    pub fn fail_next(&self, n: u32) {
        self.scripted.store(n, Ordering::SeqCst);
    }

    /// Total failures injected so far.
    pub fn injected_failures(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    /// The wrapped ledger.
    pub fn inner(&self) -> &L {
        &self.inner
    }

    fn maybe_fail(&self, operation: &'static str) -> Result<(), LedgerError> {
        let scripted = self
            .scripted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let rate = self.failure_rate();
        let (random, timeout) = match self.rng.lock() {
            Ok(mut rng) => (rng.gen_bool(rate), rng.gen_bool(0.5)),
            Err(_) => return Err(LedgerError::Corrupt("chaos rng lock poisoned".to_string())),
        };

        if !(scripted || random) {
            return Ok(());
        }

        self.injected.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(operation, scripted, "injecting ledger failure");

        if timeout {
            Err(LedgerError::Timeout(INJECTED_TIMEOUT))
        } else {
            Err(LedgerError::Unavailable(format!("injected failure in {operation}")))
        }
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) }
}

#[async_trait]
impl<L: Ledger> Ledger for ChaoticLedger<L> {
    async fn create_chatroom(
        &self,
        creator: MemberId,
        created_at_ms: u64,
    ) -> Result<Chatroom, LedgerError> {
        self.maybe_fail("create_chatroom")?;
        self.inner.create_chatroom(creator, created_at_ms).await
    }

    async fn chatroom(&self, id: ChatroomId) -> Result<Option<Chatroom>, LedgerError> {
        self.maybe_fail("chatroom")?;
        self.inner.chatroom(id).await
    }

    async fn chatroom_tip(&self, id: ChatroomId) -> Result<Option<ChatroomTip>, LedgerError> {
        self.maybe_fail("chatroom_tip")?;
        self.inner.chatroom_tip(id).await
    }

    async fn node(&self, id: NodeId) -> Result<Option<ChatNode>, LedgerError> {
        self.maybe_fail("node")?;
        self.inner.node(id).await
    }

    async fn append_node(
        &self,
        chatroom: ChatroomId,
        expected_tip: NodeId,
        node: ChatNode,
    ) -> Result<AppendOutcome, LedgerError> {
        self.maybe_fail("append_node")?;
        self.inner.append_node(chatroom, expected_tip, node).await
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        self.maybe_fail("ping")?;
        self.inner.ping().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ledgerchat_proto::ID_LEN;

    use super::*;
    use crate::ledger::MemoryLedger;

    fn creator() -> MemberId {
        MemberId::from_bytes([1; ID_LEN])
    }

    #[tokio::test]
    async fn zero_rate_never_fails() {
        let ledger = ChaoticLedger::new(MemoryLedger::new(), 0.0, 1);
        for _ in 0..50 {
            ledger.ping().await.unwrap();
        }
        assert_eq!(ledger.injected_failures(), 0);
    }

    #[tokio::test]
    async fn full_rate_always_fails_transiently() {
        let ledger = ChaoticLedger::new(MemoryLedger::new(), 1.0, 1);
        for _ in 0..10 {
            assert!(ledger.ping().await.unwrap_err().is_transient());
        }
        assert_eq!(ledger.injected_failures(), 10);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed() {
        let ledger = ChaoticLedger::new(MemoryLedger::new(), 0.0, 1);
        ledger.fail_next(2);

        assert!(ledger.ping().await.is_err());
        assert!(ledger.ping().await.is_err());
        assert!(ledger.ping().await.is_ok());
    }

    #[tokio::test]
    async fn failed_create_has_no_side_effect() {
        let ledger = ChaoticLedger::new(MemoryLedger::new(), 0.0, 1);
        ledger.fail_next(1);

        assert!(ledger.create_chatroom(creator(), 0).await.is_err());
        assert_eq!(ledger.inner().chatroom_count(), 0);
    }

    #[tokio::test]
    async fn rate_can_change_while_shared() {
        let ledger = ChaoticLedger::new(MemoryLedger::new(), 0.0, 1);
        let shared = ledger.clone();
        shared.set_failure_rate(1.0);
        assert!(ledger.ping().await.is_err());

        shared.set_failure_rate(7.5);
        assert!((ledger.failure_rate() - 1.0).abs() < f64::EPSILON);
        shared.set_failure_rate(0.0);
        assert!(ledger.ping().await.is_ok());
    }

    #[tokio::test]
    async fn same_seed_same_failures() {
        async fn pattern(seed: u64) -> Vec<bool> {
            let ledger = ChaoticLedger::new(MemoryLedger::new(), 0.3, seed);
            let mut out = Vec::new();
            for _ in 0..40 {
                out.push(ledger.ping().await.is_err());
            }
            out
        }

        assert_eq!(pattern(7).await, pattern(7).await);
        assert_ne!(pattern(7).await, pattern(8).await);
    }
}
