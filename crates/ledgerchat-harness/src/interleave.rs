//! Scheduler-level latency for in-memory ledgers.
//!
//! An in-memory ledger answers without ever suspending, so concurrent
//! writers on one thread would never observe each other between reading the
//! tip and appending. [`InterleavingLedger`] yields to the scheduler a
//! seeded number of times before forwarding each call, which opens exactly
//! those windows and makes append conflicts reproducible from the seed.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ledgerchat_core::{Ledger, LedgerError};
use ledgerchat_proto::{AppendOutcome, ChatNode, Chatroom, ChatroomId, ChatroomTip, MemberId, NodeId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// [`Ledger`] wrapper that yields before every call.
pub struct InterleavingLedger<L> {
    inner: L,
    max_yields: u32,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl<L: Ledger> InterleavingLedger<L> {
    /// Wrap `inner`, yielding up to `max_yields` times per call.
    pub fn new(inner: L, max_yields: u32, seed: u64) -> Self {
        Self { inner, max_yields, rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }

    /// The wrapped ledger.
    pub fn inner(&self) -> &L {
        &self.inner
    }

    async fn delay(&self) {
        let yields = {
            let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            rng.gen_range(0..=self.max_yields)
        };
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl<L: Ledger> Ledger for InterleavingLedger<L> {
    async fn create_chatroom(
        &self,
        creator: MemberId,
        created_at_ms: u64,
    ) -> Result<Chatroom, LedgerError> {
        self.delay().await;
        self.inner.create_chatroom(creator, created_at_ms).await
    }

    async fn chatroom(&self, id: ChatroomId) -> Result<Option<Chatroom>, LedgerError> {
        self.delay().await;
        self.inner.chatroom(id).await
    }

    async fn chatroom_tip(&self, id: ChatroomId) -> Result<Option<ChatroomTip>, LedgerError> {
        self.delay().await;
        self.inner.chatroom_tip(id).await
    }

    async fn node(&self, id: NodeId) -> Result<Option<ChatNode>, LedgerError> {
        self.delay().await;
        self.inner.node(id).await
    }

    async fn append_node(
        &self,
        chatroom: ChatroomId,
        expected_tip: NodeId,
        node: ChatNode,
    ) -> Result<AppendOutcome, LedgerError> {
        self.delay().await;
        self.inner.append_node(chatroom, expected_tip, node).await
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        self.inner.ping().await
    }
}
