//! Chain node and chatroom records.
//!
//! A chatroom's history is a singly linked list of immutable [`ChatNode`]s,
//! newest first. The chatroom record only holds a pointer to the newest node
//! (the tip) and a version that advances on every successful append.
//!
//! # Invariants
//!
//! - Exactly one node per chatroom has `previous == None`: the system marker
//! - The marker payload is plain UTF-8, every other payload is ciphertext
//! - Nodes never change once stored, so they may be cached by id forever

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::ids::{ChatroomId, ID_LEN, MemberId, NodeId};

/// Text stored in the system marker written at chatroom creation.
pub const SYSTEM_MARKER_TEXT: &str = "Chatroom created";

/// Domain separation for content-derived node ids.
const NODE_ID_DOMAIN: &[u8] = b"ledgerchat node v1";

/// Domain separation for chatroom ids.
const CHATROOM_ID_DOMAIN: &[u8] = b"ledgerchat chatroom v1";

/// One message record in a chatroom chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatNode {
    /// Chatroom this node belongs to.
    pub chatroom_id: ChatroomId,
    /// Member who appended the node.
    pub sender: MemberId,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Predecessor in the chain, `None` only for the system marker.
    pub previous: Option<NodeId>,
    /// Ciphertext (`nonce || ciphertext || tag`), or UTF-8 for the marker.
    pub payload: Bytes,
}

impl ChatNode {
    /// Build the system marker that starts every chain.
    pub fn marker(chatroom_id: ChatroomId, creator: MemberId, timestamp_ms: u64) -> Self {
        Self {
            chatroom_id,
            sender: creator,
            timestamp_ms,
            previous: None,
            payload: Bytes::from_static(SYSTEM_MARKER_TEXT.as_bytes()),
        }
    }

    /// Whether this node is the chain's unencrypted system marker.
    pub fn is_marker(&self) -> bool {
        self.previous.is_none()
    }
}

/// Tip pointer and version of a chatroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChatroomTip {
    /// Newest node, `None` while the chatroom is uninitialised.
    pub tip: Option<NodeId>,
    /// Incremented on every successful append.
    pub version: u64,
}

impl ChatroomTip {
    /// Whether the chatroom has at least its system marker.
    pub fn is_initialized(&self) -> bool {
        self.tip.is_some()
    }
}

/// Chatroom metadata as held by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chatroom {
    /// Chatroom identifier.
    pub id: ChatroomId,
    /// Member who created the chatroom.
    pub creator: MemberId,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Current tip.
    pub tip: ChatroomTip,
}

/// Result of a conditional append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The node was stored and is the new tip.
    Appended {
        /// Id the ledger assigned to the node.
        node_id: NodeId,
        /// Chatroom version after the append.
        version: u64,
    },

    /// The tip moved since the writer observed it. Nothing was stored.
    Conflict {
        /// The chatroom's tip at the time of rejection.
        actual: ChatroomTip,
    },
}

/// Derive a node id from its encoded record and the version it lands at.
///
/// The record already contains the predecessor id, so ids chain the same way
/// the nodes do.
pub fn derive_node_id(chatroom_id: &ChatroomId, version: u64, record: &[u8]) -> NodeId {
    let mut hasher = Sha256::new();
    hasher.update(NODE_ID_DOMAIN);
    hasher.update(chatroom_id.as_bytes());
    hasher.update(version.to_be_bytes());
    hasher.update(record);
    NodeId::from_bytes(digest_to_id(hasher))
}

/// Derive a chatroom id from its creator, creation time and a ledger-local
/// sequence number.
pub fn derive_chatroom_id(creator: &MemberId, created_at_ms: u64, sequence: u64) -> ChatroomId {
    let mut hasher = Sha256::new();
    hasher.update(CHATROOM_ID_DOMAIN);
    hasher.update(creator.as_bytes());
    hasher.update(created_at_ms.to_be_bytes());
    hasher.update(sequence.to_be_bytes());
    ChatroomId::from_bytes(digest_to_id(hasher))
}

fn digest_to_id(hasher: Sha256) -> [u8; ID_LEN] {
    hasher.finalize().into()
}
