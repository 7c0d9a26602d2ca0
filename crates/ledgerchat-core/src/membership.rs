//! Chatroom key credentials.
//!
//! Membership is modelled as possession of a [`ChatroomKey`]: a credential
//! that binds one member to one chatroom and carries the chatroom's shared
//! symmetric key. The reader and writer never issue or revoke credentials;
//! they only look them up.
//!
//! Revoking a credential removes it from the directory and nothing else.
//! The chatroom key is not rotated, so anyone who kept a copy can still
//! decrypt past messages.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use ledgerchat_crypto::SymmetricKey;
use ledgerchat_proto::{ChatroomId, MemberId, RawChatroomKey, WireError};
use thiserror::Error;

/// Errors from the membership directory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    /// The member holds no key for the chatroom.
    #[error("{member} has no key for chatroom {chatroom}")]
    NotAuthorized {
        /// Member that asked.
        member: MemberId,
        /// Chatroom it asked about.
        chatroom: ChatroomId,
    },

    /// The directory could not be reached.
    #[error("membership directory unavailable: {0}")]
    Unavailable(String),

    /// A key record was malformed.
    #[error("malformed key record: {0}")]
    Wire(#[from] WireError),
}

/// One member's credential for one chatroom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatroomKey {
    /// Member holding the credential.
    pub member: MemberId,
    /// Chatroom the credential opens.
    pub chatroom: ChatroomId,
    /// Shared chatroom key.
    pub key: SymmetricKey,
}

impl ChatroomKey {
    /// Build a credential from a raw ledger key record.
    pub fn from_raw(raw: &RawChatroomKey) -> Result<Self, MembershipError> {
        let record = raw.normalize()?;
        Ok(Self {
            member: record.member,
            chatroom: record.chatroom,
            key: SymmetricKey::from_bytes(record.key),
        })
    }
}

/// Lookup of chatroom keys by member.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// The key `member` holds for `chatroom`, or `NotAuthorized`.
    async fn chatroom_key(
        &self,
        member: MemberId,
        chatroom: ChatroomId,
    ) -> Result<ChatroomKey, MembershipError>;
}

/// Issuance of chatroom keys, used once at chatroom creation.
#[async_trait]
pub trait KeyIssuer: Send + Sync {
    /// Hand `credential` to its member. Returns `false` if the member
    /// already held a key for that chatroom.
    async fn issue(&self, credential: ChatroomKey) -> Result<bool, MembershipError>;
}

/// In-memory directory with shared state.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    keys: Arc<RwLock<HashMap<(MemberId, ChatroomId), SymmetricKey>>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a credential. Returns `false` if the member already held one
    /// for that chatroom, in which case the existing key is kept.
    pub fn grant(&self, credential: ChatroomKey) -> Result<bool, MembershipError> {
        let mut keys = self.keys.write().map_err(|_| poisoned())?;
        let slot = (credential.member, credential.chatroom);
        if keys.contains_key(&slot) {
            return Ok(false);
        }
        keys.insert(slot, credential.key);
        tracing::debug!(
            member = %credential.member,
            chatroom = %credential.chatroom,
            "key granted"
        );
        Ok(true)
    }

    /// Import a raw key record as returned by the ledger.
    pub fn import(&self, raw: &RawChatroomKey) -> Result<bool, MembershipError> {
        self.grant(ChatroomKey::from_raw(raw)?)
    }

    /// Remove a credential. Returns whether one existed.
    pub fn revoke(&self, member: MemberId, chatroom: ChatroomId) -> Result<bool, MembershipError> {
        let removed = self.keys.write().map_err(|_| poisoned())?.remove(&(member, chatroom));
        if removed.is_some() {
            tracing::debug!(member = %member, chatroom = %chatroom, "key revoked");
        }
        Ok(removed.is_some())
    }

    /// Chatrooms `member` holds keys for, in id order.
    pub fn keys_for(&self, member: MemberId) -> Result<Vec<ChatroomId>, MembershipError> {
        let keys = self.keys.read().map_err(|_| poisoned())?;
        let mut rooms: Vec<_> =
            keys.keys().filter(|(m, _)| *m == member).map(|(_, room)| *room).collect();
        rooms.sort();
        Ok(rooms)
    }
}

fn poisoned() -> MembershipError {
    MembershipError::Unavailable("directory lock poisoned".to_string())
}

#[async_trait]
impl MembershipDirectory for MemoryDirectory {
    async fn chatroom_key(
        &self,
        member: MemberId,
        chatroom: ChatroomId,
    ) -> Result<ChatroomKey, MembershipError> {
        let keys = self.keys.read().map_err(|_| poisoned())?;
        keys.get(&(member, chatroom))
            .map(|key| ChatroomKey { member, chatroom, key: key.clone() })
            .ok_or(MembershipError::NotAuthorized { member, chatroom })
    }
}

#[async_trait]
impl KeyIssuer for MemoryDirectory {
    async fn issue(&self, credential: ChatroomKey) -> Result<bool, MembershipError> {
        self.grant(credential)
    }
}
