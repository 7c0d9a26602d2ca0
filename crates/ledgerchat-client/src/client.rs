//! Chat client façade.
//!
//! Ties the reader, writer, membership directory and notification hub
//! together for one member. Reads and sends run under the bounded retry
//! policies from [`ClientConfig`]; a send that keeps losing to concurrent
//! writers re-reads the tip on every attempt.

use std::{collections::HashSet, sync::Arc};

use ledgerchat_core::{
    ChainEvent, ChatroomKey, Environment, KeyIssuer, Ledger, MembershipDirectory,
    NotificationHub,
};
use ledgerchat_crypto::{KEY_SIZE, SymmetricKey};
use ledgerchat_proto::{Chatroom, ChatroomId, ChatroomTip, MemberId, NodeId};

use crate::{
    config::ClientConfig,
    error::ClientError,
    history::ChatHistory,
    reader::ChainReader,
    writer::{ChainWriter, SentMessage, WriteOutcome},
};

/// Why one send attempt did not land.
enum Attempt {
    Conflict { observed: NodeId, actual: ChatroomTip },
    Failed(ClientError),
}

impl Attempt {
    /// Conflicts and transient errors are retried.
    ///
    /// A transient append error is assumed to mean the ledger rejected the
    /// call before committing anything, which is the only failure
    /// `ChaoticLedger` injects. An append that committed but whose reply was
    /// lost would be appended again on the next attempt and show up twice.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Failed(e) => !e.is_fatal(),
        }
    }
}

/// Client for one member.
///
/// Cloning is cheap; clones share the ledger, directory, node cache and walk
/// guard.
pub struct ChatClient<L, D, E> {
    member: MemberId,
    ledger: Arc<L>,
    directory: Arc<D>,
    env: E,
    config: ClientConfig,
    reader: ChainReader<L, E>,
    writer: ChainWriter<L, E>,
    notifications: Option<NotificationHub>,
}

impl<L, D, E: Clone> Clone for ChatClient<L, D, E> {
    fn clone(&self) -> Self {
        Self {
            member: self.member,
            ledger: Arc::clone(&self.ledger),
            directory: Arc::clone(&self.directory),
            env: self.env.clone(),
            config: self.config.clone(),
            reader: self.reader.clone(),
            writer: self.writer.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

impl<L, D, E> ChatClient<L, D, E>
where
    L: Ledger + 'static,
    D: Send + Sync + 'static,
    E: Environment,
{
    /// Create a client acting as `member`.
    pub fn new(
        member: MemberId,
        ledger: Arc<L>,
        directory: Arc<D>,
        env: E,
        config: ClientConfig,
    ) -> Self {
        let reader = ChainReader::new(Arc::clone(&ledger), env.clone(), &config);
        let writer = ChainWriter::new(Arc::clone(&ledger), env.clone(), member);
        Self { member, ledger, directory, env, config, reader, writer, notifications: None }
    }

    /// Publish sends on `hub` and let watchers subscribe to it.
    #[must_use]
    pub fn with_notifications(mut self, hub: NotificationHub) -> Self {
        self.notifications = Some(hub);
        self
    }

    /// Member this client acts as.
    pub fn member(&self) -> MemberId {
        self.member
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// The underlying chain reader.
    pub fn reader(&self) -> &ChainReader<L, E> {
        &self.reader
    }

    /// The notification hub, if one is attached.
    pub fn notifications(&self) -> Option<&NotificationHub> {
        self.notifications.as_ref()
    }

    /// Read the full history of `chatroom`, oldest first.
    ///
    /// Always runs to completion; concurrent reads of the same chatroom do
    /// not supersede each other.
    pub async fn read_chat_history(
        &self,
        chatroom: ChatroomId,
        key: &SymmetricKey,
    ) -> Result<ChatHistory, ClientError> {
        self.reader.read(chatroom, key).await
    }

    /// Send `text` to `chatroom`.
    ///
    /// Retries append conflicts and transient ledger errors under the send
    /// policy, re-reading the tip each time.
    ///
    /// # Errors
    ///
    /// - `EmptyMessage` for empty or whitespace-only text
    /// - `AppendConflict` if every attempt lost to a concurrent writer
    /// - any non-retryable error from the last attempt
    pub async fn send_message(
        &self,
        chatroom: ChatroomId,
        key: &SymmetricKey,
        text: &str,
    ) -> Result<SentMessage, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let attempt = |_: u32| async move {
            match self.writer.append_once(chatroom, key, text).await {
                Ok(WriteOutcome::Appended(sent)) => Ok(sent),
                Ok(WriteOutcome::Conflict { observed, actual }) => {
                    Err(Attempt::Conflict { observed, actual })
                },
                Err(e) => Err(Attempt::Failed(e)),
            }
        };

        let sent = self
            .config
            .send_retry
            .run(&self.env, attempt, Attempt::is_retryable)
            .await
            .map_err(|failure| match failure.error {
                Attempt::Conflict { observed, actual } => {
                    tracing::warn!(
                        %chatroom,
                        %observed,
                        actual_version = actual.version,
                        attempts = failure.attempts,
                        "send gave up after repeated conflicts"
                    );
                    ClientError::AppendConflict { chatroom, attempts: failure.attempts }
                },
                Attempt::Failed(e) => e,
            })?;

        tracing::info!(
            %chatroom,
            node = %sent.node_id,
            version = sent.version,
            member = %self.member,
            "message sent"
        );

        if let Some(hub) = &self.notifications {
            let reached = hub.publish(ChainEvent::Appended {
                chatroom,
                node_id: sent.node_id,
                version: sent.version,
            });
            tracing::trace!(%chatroom, reached, "append notification published");
        }

        Ok(sent)
    }
}

impl<L, D, E> ChatClient<L, D, E>
where
    L: Ledger + 'static,
    D: MembershipDirectory + 'static,
    E: Environment,
{
    /// This member's key for `chatroom`.
    ///
    /// # Errors
    ///
    /// `NotAuthorized` if the member holds no key.
    pub async fn chatroom_key(&self, chatroom: ChatroomId) -> Result<SymmetricKey, ClientError> {
        let credential = self.directory.chatroom_key(self.member, chatroom).await?;
        Ok(credential.key)
    }
}

impl<L, D, E> ChatClient<L, D, E>
where
    L: Ledger + 'static,
    D: KeyIssuer + 'static,
    E: Environment,
{
    /// Create a chatroom and issue its key to this member and `members`.
    ///
    /// The ledger writes the system marker. Duplicate members, including
    /// this member listed again, receive one key.
    pub async fn create_chatroom(&self, members: &[MemberId]) -> Result<Chatroom, ClientError> {
        let chatroom = self.ledger.create_chatroom(self.member, self.env.unix_millis()).await?;
        let key = SymmetricKey::from_bytes(self.env.random_array::<KEY_SIZE>());

        let mut issued = HashSet::new();
        for member in std::iter::once(self.member).chain(members.iter().copied()) {
            if !issued.insert(member) {
                continue;
            }
            let credential = ChatroomKey { member, chatroom: chatroom.id, key: key.clone() };
            self.directory.issue(credential).await?;
        }

        tracing::info!(
            chatroom = %chatroom.id,
            creator = %self.member,
            members = issued.len(),
            "chatroom created"
        );
        Ok(chatroom)
    }
}
