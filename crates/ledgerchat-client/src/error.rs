//! Client error types.

use ledgerchat_core::{LedgerError, MembershipError};
use ledgerchat_crypto::CipherError;
use ledgerchat_proto::{ChatroomId, MemberId};
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The ledger has no such chatroom.
    #[error("chatroom not found: {chatroom}")]
    ChatroomNotFound {
        /// Requested chatroom.
        chatroom: ChatroomId,
    },

    /// The chatroom exists but has no system marker yet.
    #[error("chatroom {chatroom} is not initialised")]
    NotInitialized {
        /// Requested chatroom.
        chatroom: ChatroomId,
    },

    /// The member holds no key for the chatroom.
    #[error("{member} has no access to chatroom {chatroom}")]
    NotAuthorized {
        /// Member that asked.
        member: MemberId,
        /// Requested chatroom.
        chatroom: ChatroomId,
    },

    /// The message is empty or whitespace.
    #[error("message is empty")]
    EmptyMessage,

    /// Every append attempt lost to a concurrent writer.
    #[error("append to {chatroom} kept conflicting after {attempts} attempts")]
    AppendConflict {
        /// Target chatroom.
        chatroom: ChatroomId,
        /// Attempts made.
        attempts: u32,
    },

    /// The chatroom tip could not be read within the retry budget.
    #[error("reading chatroom {chatroom} failed after {attempts} attempts: {source}")]
    ChainRead {
        /// Target chatroom.
        chatroom: ChatroomId,
        /// Attempts made.
        attempts: u32,
        /// Last ledger error.
        #[source]
        source: LedgerError,
    },

    /// A newer `read_latest` of the same chatroom started; this result is
    /// stale.
    #[error("walk of chatroom {chatroom} superseded by a newer one")]
    Superseded {
        /// Walked chatroom.
        chatroom: ChatroomId,
    },

    /// Ledger operation failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Sealing a payload failed.
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// The membership directory failed for a reason other than access.
    #[error("membership error: {0}")]
    Membership(MembershipError),
}

impl From<MembershipError> for ClientError {
    fn from(err: MembershipError) -> Self {
        match err {
            MembershipError::NotAuthorized { member, chatroom } => {
                Self::NotAuthorized { member, chatroom }
            },
            other => Self::Membership(other),
        }
    }
}

impl ClientError {
    /// Returns true if retrying the operation cannot help.
    ///
    /// Transient errors can be recovered by retrying or refreshing later.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ChatroomNotFound { .. }
            | Self::NotAuthorized { .. }
            | Self::EmptyMessage
            | Self::Cipher(_) => true,

            Self::Ledger(e) => !e.is_transient(),
            Self::Membership(e) => !matches!(e, MembershipError::Unavailable(_)),

            Self::NotInitialized { .. }
            | Self::AppendConflict { .. }
            | Self::ChainRead { .. }
            | Self::Superseded { .. } => false,
        }
    }

    /// Text to show the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotAuthorized { .. } => "you don't have access to this conversation",
            Self::AppendConflict { .. } | Self::Ledger(_) | Self::Cipher(_) => {
                "failed to send, tap to retry"
            },
            Self::ChainRead { .. } | Self::Superseded { .. } | Self::Membership(_) => {
                "couldn't load this conversation, pull to refresh"
            },
            Self::ChatroomNotFound { .. } => "this conversation doesn't exist",
            Self::NotInitialized { .. } => "this conversation is still being set up",
            Self::EmptyMessage => "type a message first",
        }
    }
}
