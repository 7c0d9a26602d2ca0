//! The authoritative ledger.
//!
//! The ledger is the single source of truth for chatrooms and chain nodes,
//! and the only arbiter of write conflicts: [`Ledger::append_node`] is a
//! conditional update that succeeds only when the writer's observed tip is
//! still current. No client-side locking is involved.
//!
//! # Invariants
//!
//! - A chatroom's tip only ever points at a node that is already stored
//! - `create_chatroom` stores the system marker and points the tip at it in
//!   one step, so an initialised chatroom has exactly one marker
//! - Nodes are immutable once stored

mod chaotic;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
pub use chaotic::ChaoticLedger;
use ledgerchat_proto::{
    AppendOutcome, ChatNode, Chatroom, ChatroomId, ChatroomTip, MemberId, NodeId, WireError,
};
pub use memory::MemoryLedger;
use thiserror::Error;

/// Errors from ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The ledger could not be reached.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger did not answer in time.
    #[error("ledger request timed out after {0:?}")]
    Timeout(Duration),

    /// The ledger refused the request as malformed.
    #[error("ledger rejected request: {0}")]
    Rejected(String),

    /// Stored state is inconsistent.
    #[error("ledger state corrupt: {0}")]
    Corrupt(String),

    /// A record failed to cross the wire boundary.
    #[error("ledger record malformed: {0}")]
    Wire(#[from] WireError),
}

impl LedgerError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) => true,
            Self::Rejected(_) | Self::Corrupt(_) | Self::Wire(_) => false,
        }
    }
}

/// Authoritative store of chatrooms and chain nodes.
///
/// Lookups return `Ok(None)` for ids the ledger does not know; `Err` is
/// reserved for failures to answer.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create a chatroom owned by `creator`, writing its system marker.
    async fn create_chatroom(
        &self,
        creator: MemberId,
        created_at_ms: u64,
    ) -> Result<Chatroom, LedgerError>;

    /// Full chatroom record.
    async fn chatroom(&self, id: ChatroomId) -> Result<Option<Chatroom>, LedgerError>;

    /// Current tip and version.
    async fn chatroom_tip(&self, id: ChatroomId) -> Result<Option<ChatroomTip>, LedgerError>;

    /// A stored node.
    async fn node(&self, id: NodeId) -> Result<Option<ChatNode>, LedgerError>;

    /// Append `node` if the chatroom's tip is still `expected_tip`.
    ///
    /// `node.previous` must equal `expected_tip` and `node.chatroom_id` must
    /// equal `chatroom`; otherwise the request is [`LedgerError::Rejected`].
    /// A stale `expected_tip` is not an error: it yields
    /// [`AppendOutcome::Conflict`] and nothing is stored.
    async fn append_node(
        &self,
        chatroom: ChatroomId,
        expected_tip: NodeId,
        node: ChatNode,
    ) -> Result<AppendOutcome, LedgerError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), LedgerError>;
}

pub(crate) fn check_append(
    chatroom: ChatroomId,
    expected_tip: NodeId,
    node: &ChatNode,
) -> Result<(), LedgerError> {
    if node.chatroom_id != chatroom {
        return Err(LedgerError::Rejected(format!(
            "node belongs to {} but was appended to {chatroom}",
            node.chatroom_id
        )));
    }
    if node.previous != Some(expected_tip) {
        return Err(LedgerError::Rejected(
            "node.previous must reference the expected tip".to_string(),
        ));
    }
    Ok(())
}
