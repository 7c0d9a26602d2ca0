//! Chain writer.
//!
//! One conditional append per call. The writer re-reads the tip right before
//! building the node and never retargets `previous` after a conflict; the
//! caller decides whether and how to retry.

use std::sync::Arc;

use bytes::Bytes;
use ledgerchat_core::{Environment, Ledger};
use ledgerchat_crypto::{SymmetricKey, encrypt};
use ledgerchat_proto::{AppendOutcome, ChatNode, ChatroomId, ChatroomTip, MemberId, NodeId};

use crate::error::ClientError;

/// A message the ledger accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    /// Chatroom appended to.
    pub chatroom: ChatroomId,
    /// Id the ledger assigned; now the chatroom tip.
    pub node_id: NodeId,
    /// Chatroom version after the append.
    pub version: u64,
    /// Timestamp stamped into the node.
    pub timestamp_ms: u64,
}

/// Result of a single append attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The node is the new tip.
    Appended(SentMessage),
    /// Another writer advanced the tip first. Nothing was stored.
    Conflict {
        /// Tip this attempt built on.
        observed: NodeId,
        /// Tip the ledger held instead.
        actual: ChatroomTip,
    },
}

/// Appends encrypted messages on behalf of one member.
pub struct ChainWriter<L, E> {
    ledger: Arc<L>,
    env: E,
    sender: MemberId,
}

impl<L, E: Clone> Clone for ChainWriter<L, E> {
    fn clone(&self) -> Self {
        Self { ledger: Arc::clone(&self.ledger), env: self.env.clone(), sender: self.sender }
    }
}

impl<L, E> ChainWriter<L, E>
where
    L: Ledger + 'static,
    E: Environment,
{
    /// Create a writer sending as `sender`.
    pub fn new(ledger: Arc<L>, env: E, sender: MemberId) -> Self {
        Self { ledger, env, sender }
    }

    /// Member this writer sends as.
    pub fn sender(&self) -> MemberId {
        self.sender
    }

    /// Encrypt `text` and append it after the current tip, once.
    ///
    /// # Errors
    ///
    /// - `ChatroomNotFound` if the ledger has no such chatroom
    /// - `NotInitialized` if the chatroom has no system marker yet
    /// - `Ledger` if a ledger call failed
    pub async fn append_once(
        &self,
        chatroom: ChatroomId,
        key: &SymmetricKey,
        text: &str,
    ) -> Result<WriteOutcome, ClientError> {
        let tip = self
            .ledger
            .chatroom_tip(chatroom)
            .await?
            .ok_or(ClientError::ChatroomNotFound { chatroom })?;
        let observed = tip.tip.ok_or(ClientError::NotInitialized { chatroom })?;

        let payload = encrypt(text, key, &mut self.env.rng())?;
        let timestamp_ms = self.env.unix_millis();

        let node = ChatNode {
            chatroom_id: chatroom,
            sender: self.sender,
            timestamp_ms,
            previous: Some(observed),
            payload: Bytes::from(payload),
        };

        match self.ledger.append_node(chatroom, observed, node).await? {
            AppendOutcome::Appended { node_id, version } => {
                tracing::debug!(%chatroom, node = %node_id, version, "node appended");
                Ok(WriteOutcome::Appended(SentMessage { chatroom, node_id, version, timestamp_ms }))
            },
            AppendOutcome::Conflict { actual } => {
                tracing::debug!(
                    %chatroom,
                    %observed,
                    actual_version = actual.version,
                    "append lost to a concurrent writer"
                );
                Ok(WriteOutcome::Conflict { observed, actual })
            },
        }
    }
}
