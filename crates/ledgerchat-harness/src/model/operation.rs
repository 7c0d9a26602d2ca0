//! Operations for model-based testing.
//!
//! Operations are generated by proptest through `arbitrary` and applied to
//! both the model and the real clients.

use arbitrary::Arbitrary;

/// Client index (0-based).
pub type ClientId = u8;

/// Chatroom index into the chatrooms created so far, taken modulo their
/// count so that generated operations mostly hit existing chatrooms.
pub type ModelRoomId = u8;

/// Actions a member can take.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Create a chatroom and invite the members whose bits are set.
    CreateChatroom {
        /// Creator.
        client_id: ClientId,
        /// Bitmask of invited clients.
        invite: u8,
    },

    /// Send a message.
    SendMessage {
        /// Sender.
        client_id: ClientId,
        /// Target chatroom.
        room: ModelRoomId,
        /// Message content.
        content: SmallMessage,
    },

    /// Read a chatroom's history while the ledger drops some calls.
    ReadHistory {
        /// Reader.
        client_id: ClientId,
        /// Chatroom to read.
        room: ModelRoomId,
        /// Transient ledger failures injected before the read, reduced
        /// below the read retry budget.
        failures: u8,
    },

    /// Remove a member's key for a chatroom.
    Revoke {
        /// Member losing access.
        client_id: ClientId,
        /// Chatroom.
        room: ModelRoomId,
    },
}

/// Compact message content.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallMessage {
    /// First letter offset.
    pub seed: u8,
    /// 0-3 maps to empty, blank, short and long text.
    pub size_class: u8,
}

impl SmallMessage {
    /// Expand to message text.
    pub fn to_text(&self) -> String {
        let len = match self.size_class % 4 {
            0 => return String::new(),
            1 => return "  ".to_string(),
            2 => 4,
            _ => 48,
        };
        (0..len).map(|i: u8| char::from(b'a' + self.seed.wrapping_add(i) % 26)).collect()
    }
}

/// Observable result of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// The operation succeeded.
    Ok,
    /// A read succeeded with these message texts, marker excluded.
    History(Vec<String>),
    /// The operation failed as expected.
    Error(OperationError),
}

/// Expected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// No such client.
    InvalidClient,
    /// No chatroom has been created yet.
    ChatroomNotFound,
    /// The client holds no key for the chatroom.
    NotAuthorized,
    /// The message was empty or blank.
    EmptyMessage,
}

impl OperationResult {
    /// Whether the operation succeeded.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Error(_))
    }
}
