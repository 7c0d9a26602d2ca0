//! Health-checked ledger connections.
//!
//! A [`ConnectionManager`] owns at most one open connection. It is built
//! explicitly and handed to whoever needs it; there is no process-wide
//! handle. The connection is opened lazily, pinged before every reuse and
//! reopened when the ping fails.
//!
//! [`PooledLedger`] puts a manager behind the [`Ledger`] trait and drops the
//! cached connection whenever a call fails transiently, so the next call
//! reconnects.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use ledgerchat_proto::{AppendOutcome, ChatNode, Chatroom, ChatroomId, ChatroomTip, MemberId, NodeId};
use tokio::sync::Mutex;

use crate::ledger::{Ledger, LedgerError};

/// Opens ledger connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced.
    type Connection: Ledger + 'static;

    /// Open a fresh connection.
    async fn connect(&self) -> Result<Self::Connection, LedgerError>;
}

/// Lazily opened, health-checked connection slot.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    current: Mutex<Option<Arc<C::Connection>>>,
    opened: AtomicU64,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager. No connection is opened yet.
    pub fn new(connector: C) -> Self {
        Self { connector, current: Mutex::new(None), opened: AtomicU64::new(0) }
    }

    /// A healthy connection, reusing the cached one if it still answers.
    pub async fn get(&self) -> Result<Arc<C::Connection>, LedgerError> {
        let mut slot = self.current.lock().await;

        if let Some(conn) = slot.as_ref() {
            match conn.ping().await {
                Ok(()) => return Ok(Arc::clone(conn)),
                Err(e) => {
                    tracing::warn!(error = %e, "cached ledger connection failed health check");
                    *slot = None;
                },
            }
        }

        let conn = Arc::new(self.connector.connect().await?);
        let opened = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(opened, "ledger connection opened");
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Drop the cached connection; the next [`get`](Self::get) reconnects.
    pub async fn invalidate(&self) {
        if self.current.lock().await.take().is_some() {
            tracing::debug!("ledger connection invalidated");
        }
    }

    /// Connections opened over the manager's lifetime.
    pub fn connections_opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }
}

/// [`Ledger`] backed by a [`ConnectionManager`].
pub struct PooledLedger<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
}

impl<C: Connector> Clone for PooledLedger<C> {
    fn clone(&self) -> Self {
        Self { manager: Arc::clone(&self.manager) }
    }
}

impl<C: Connector> PooledLedger<C> {
    /// Wrap a shared manager.
    pub fn new(manager: Arc<ConnectionManager<C>>) -> Self {
        Self { manager }
    }

    /// The underlying manager.
    pub fn manager(&self) -> &ConnectionManager<C> {
        &self.manager
    }

    async fn settle<T>(&self, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
        if let Err(e) = &result {
            if e.is_transient() {
                self.manager.invalidate().await;
            }
        }
        result
    }
}

#[async_trait]
impl<C: Connector> Ledger for PooledLedger<C> {
    async fn create_chatroom(
        &self,
        creator: MemberId,
        created_at_ms: u64,
    ) -> Result<Chatroom, LedgerError> {
        let conn = self.manager.get().await?;
        let result = conn.create_chatroom(creator, created_at_ms).await;
        self.settle(result).await
    }

    async fn chatroom(&self, id: ChatroomId) -> Result<Option<Chatroom>, LedgerError> {
        let conn = self.manager.get().await?;
        let result = conn.chatroom(id).await;
        self.settle(result).await
    }

    async fn chatroom_tip(&self, id: ChatroomId) -> Result<Option<ChatroomTip>, LedgerError> {
        let conn = self.manager.get().await?;
        let result = conn.chatroom_tip(id).await;
        self.settle(result).await
    }

    async fn node(&self, id: NodeId) -> Result<Option<ChatNode>, LedgerError> {
        let conn = self.manager.get().await?;
        let result = conn.node(id).await;
        self.settle(result).await
    }

    async fn append_node(
        &self,
        chatroom: ChatroomId,
        expected_tip: NodeId,
        node: ChatNode,
    ) -> Result<AppendOutcome, LedgerError> {
        let conn = self.manager.get().await?;
        let result = conn.append_node(chatroom, expected_tip, node).await;
        self.settle(result).await
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        self.manager.get().await.map(|_| ())
    }
}
