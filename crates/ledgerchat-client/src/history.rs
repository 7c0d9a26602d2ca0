//! Reconstructed chatroom history.

use std::fmt;

use ledgerchat_proto::{ChatroomId, ChatroomTip, MemberId, NodeId};

/// Placeholder shown for a message that could not be decrypted.
pub const UNAVAILABLE_TEXT: &str = "[message unavailable]";

/// Decoded content of one chain node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// The unencrypted system marker.
    System(String),
    /// A decrypted message.
    Text(String),
    /// The payload failed authentication with the caller's key.
    Unavailable,
}

impl MessageContent {
    /// Display text, with the placeholder for unavailable messages.
    pub fn text(&self) -> &str {
        match self {
            Self::System(text) | Self::Text(text) => text,
            Self::Unavailable => UNAVAILABLE_TEXT,
        }
    }

    /// Whether the content was recovered.
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

/// One message in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Node id on the ledger.
    pub id: NodeId,
    /// Sender.
    pub sender: MemberId,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Decoded content.
    pub content: MessageContent,
}

impl HistoryEntry {
    /// Display text.
    pub fn text(&self) -> &str {
        self.content.text()
    }
}

/// Why a walk ended before reaching the system marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainGap {
    /// A referenced node does not exist on the ledger.
    Missing {
        /// The dangling reference.
        id: NodeId,
    },
    /// A node could not be fetched within the retry budget.
    ReadFailed {
        /// The node that failed.
        id: NodeId,
        /// Last error seen.
        reason: String,
    },
    /// A node belongs to a different chatroom.
    ForeignNode {
        /// The offending node.
        id: NodeId,
        /// The chatroom it claims.
        chatroom: ChatroomId,
    },
    /// The chain loops back on itself.
    Cycle {
        /// First node seen twice.
        id: NodeId,
    },
    /// The walk hit the configured length limit.
    TooLong {
        /// The limit that was hit.
        limit: usize,
    },
}

impl fmt::Display for ChainGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { id } => write!(f, "node {id} is missing"),
            Self::ReadFailed { id, reason } => write!(f, "node {id} could not be read: {reason}"),
            Self::ForeignNode { id, chatroom } => {
                write!(f, "node {id} belongs to chatroom {chatroom}")
            },
            Self::Cycle { id } => write!(f, "chain loops at node {id}"),
            Self::TooLong { limit } => write!(f, "chain longer than {limit} nodes"),
        }
    }
}

/// A chatroom's messages, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatHistory {
    /// Chatroom walked.
    pub chatroom_id: ChatroomId,
    /// Tip the walk started from.
    pub tip: ChatroomTip,
    /// Messages, oldest first. Starts with the system marker when complete.
    pub entries: Vec<HistoryEntry>,
    /// Set when the walk stopped before the marker; `entries` then holds the
    /// newest messages that could be read.
    pub gap: Option<ChainGap>,
}

impl ChatHistory {
    /// Whether the walk reached the system marker.
    pub fn is_complete(&self) -> bool {
        self.gap.is_none()
    }

    /// Display texts in order.
    pub fn texts(&self) -> Vec<&str> {
        self.entries.iter().map(HistoryEntry::text).collect()
    }

    /// Newest entry.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }
}
