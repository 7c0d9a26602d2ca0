//! Chain reader.
//!
//! Walks a chatroom chain from its tip back to the system marker, decrypting
//! each node, and returns the messages oldest first.
//!
//! # Failure handling
//!
//! A node that fails to decrypt becomes a [`MessageContent::Unavailable`]
//! entry; the walk continues. A node that cannot be fetched ends the walk
//! and the history so far is returned with a [`ChainGap`]. Only a failure to
//! read the tip itself is an error.
//!
//! # Supersession
//!
//! [`ChainReader::read`] always runs to completion, so any number of callers
//! may read the same chatroom at once. [`ChainReader::read_latest`] is for
//! refresh loops that only care about the newest result: it takes a
//! generation from the shared [`WalkGuard`], and when a newer `read_latest`
//! of the same chatroom starts, the older one stops at its next node
//! boundary with [`ClientError::Superseded`].

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use ledgerchat_core::{Environment, Ledger, LedgerError, RetryFailure, RetryPolicy};
use ledgerchat_crypto::{KeyFingerprint, SymmetricKey, decrypt};
use ledgerchat_proto::{ChatNode, ChatroomId, ChatroomTip, NodeId};

use crate::{
    cache::{CachedNode, NodeCache},
    config::ClientConfig,
    error::ClientError,
    history::{ChainGap, ChatHistory, HistoryEntry, MessageContent},
};

/// Per-chatroom walk generations.
#[derive(Debug, Default)]
pub struct WalkGuard {
    generations: Mutex<HashMap<ChatroomId, u64>>,
}

impl WalkGuard {
    /// Create a guard with no walks started.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a walk of `chatroom`, superseding any walk already running.
    pub fn begin(&self, chatroom: ChatroomId) -> u64 {
        let Ok(mut generations) = self.generations.lock() else {
            return 0;
        };
        let generation = generations.entry(chatroom).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Whether `generation` is still the newest walk of `chatroom`.
    pub fn is_current(&self, chatroom: ChatroomId, generation: u64) -> bool {
        self.generations
            .lock()
            .map(|generations| generations.get(&chatroom).copied().unwrap_or(0) == generation)
            .unwrap_or(true)
    }
}

/// Reconstructs chatroom histories from a ledger.
///
/// Clones share the node cache and walk guard.
pub struct ChainReader<L, E> {
    ledger: Arc<L>,
    env: E,
    cache: Arc<NodeCache>,
    guard: Arc<WalkGuard>,
    retry: RetryPolicy,
    max_chain_length: usize,
}

impl<L, E: Clone> Clone for ChainReader<L, E> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            env: self.env.clone(),
            cache: Arc::clone(&self.cache),
            guard: Arc::clone(&self.guard),
            retry: self.retry,
            max_chain_length: self.max_chain_length,
        }
    }
}

impl<L, E> ChainReader<L, E>
where
    L: Ledger + 'static,
    E: Environment,
{
    /// Create a reader with a fresh cache sized by `config`.
    pub fn new(ledger: Arc<L>, env: E, config: &ClientConfig) -> Self {
        Self {
            ledger,
            env,
            cache: Arc::new(NodeCache::new(config.cache_capacity)),
            guard: Arc::new(WalkGuard::new()),
            retry: config.read_retry,
            max_chain_length: config.max_chain_length,
        }
    }

    /// The decoded node cache.
    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    /// The walk guard [`read_latest`](Self::read_latest) uses, shared by
    /// this reader's clones.
    pub fn guard(&self) -> &WalkGuard {
        &self.guard
    }

    /// Read the history of `chatroom`, decrypting with `key`.
    ///
    /// Concurrent reads of the same chatroom do not interfere.
    ///
    /// # Errors
    ///
    /// - `ChatroomNotFound` if the ledger has no such chatroom
    /// - `ChainRead` if the tip could not be read within the retry budget
    pub async fn read(
        &self,
        chatroom: ChatroomId,
        key: &SymmetricKey,
    ) -> Result<ChatHistory, ClientError> {
        self.read_with(chatroom, key, None).await
    }

    /// Like [`read`](Self::read), but abandoned once a newer `read_latest`
    /// of the same chatroom starts.
    ///
    /// # Errors
    ///
    /// As [`read`](Self::read), plus `Superseded` if a newer `read_latest`
    /// started meanwhile.
    pub async fn read_latest(
        &self,
        chatroom: ChatroomId,
        key: &SymmetricKey,
    ) -> Result<ChatHistory, ClientError> {
        let generation = self.guard.begin(chatroom);
        self.read_with(chatroom, key, Some(generation)).await
    }

    async fn read_with(
        &self,
        chatroom: ChatroomId,
        key: &SymmetricKey,
        generation: Option<u64>,
    ) -> Result<ChatHistory, ClientError> {
        let tip = self
            .retry
            .run(&self.env, |_| self.ledger.chatroom_tip(chatroom), LedgerError::is_transient)
            .await
            .map_err(|failure| tip_error(chatroom, failure))?
            .ok_or(ClientError::ChatroomNotFound { chatroom })?;

        let (mut entries, gap) = self.walk(chatroom, tip, key, generation).await?;
        entries.reverse();

        if let Some(gap) = &gap {
            tracing::warn!(%chatroom, %gap, read = entries.len(), "chain walk incomplete");
        } else {
            tracing::debug!(%chatroom, version = tip.version, read = entries.len(), "chain read");
        }

        Ok(ChatHistory { chatroom_id: chatroom, tip, entries, gap })
    }

    /// Collect entries newest first.
    async fn walk(
        &self,
        chatroom: ChatroomId,
        tip: ChatroomTip,
        key: &SymmetricKey,
        generation: Option<u64>,
    ) -> Result<(Vec<HistoryEntry>, Option<ChainGap>), ClientError> {
        let fingerprint: KeyFingerprint = key.fingerprint();
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = tip.tip;

        while let Some(id) = cursor {
            if let Some(generation) = generation
                && !self.guard.is_current(chatroom, generation)
            {
                tracing::debug!(%chatroom, generation, "walk superseded");
                return Err(ClientError::Superseded { chatroom });
            }
            if entries.len() >= self.max_chain_length {
                return Ok((entries, Some(ChainGap::TooLong { limit: self.max_chain_length })));
            }
            if !seen.insert(id) {
                return Ok((entries, Some(ChainGap::Cycle { id })));
            }

            let cached = match self.cache.get(&fingerprint, id) {
                Some(cached) => cached,
                None => match self.fetch(id).await {
                    Ok(Some(node)) => {
                        if node.chatroom_id != chatroom {
                            let gap = ChainGap::ForeignNode { id, chatroom: node.chatroom_id };
                            return Ok((entries, Some(gap)));
                        }
                        let cached = decode(id, &node, key);
                        self.cache.insert(&fingerprint, id, cached.clone());
                        cached
                    },
                    Ok(None) => return Ok((entries, Some(ChainGap::Missing { id }))),
                    Err(reason) => {
                        return Ok((entries, Some(ChainGap::ReadFailed { id, reason })));
                    },
                },
            };

            if cached.chatroom != chatroom {
                let gap = ChainGap::ForeignNode { id, chatroom: cached.chatroom };
                return Ok((entries, Some(gap)));
            }

            cursor = cached.previous;
            entries.push(cached.entry);
        }

        Ok((entries, None))
    }

    async fn fetch(&self, id: NodeId) -> Result<Option<ChatNode>, String> {
        self.retry
            .run(&self.env, |_| self.ledger.node(id), LedgerError::is_transient)
            .await
            .map_err(|failure| {
                tracing::warn!(
                    node = %id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "node fetch failed"
                );
                failure.error.to_string()
            })
    }
}

fn tip_error(chatroom: ChatroomId, failure: RetryFailure<LedgerError>) -> ClientError {
    if failure.error.is_transient() {
        ClientError::ChainRead { chatroom, attempts: failure.attempts, source: failure.error }
    } else {
        ClientError::Ledger(failure.error)
    }
}

/// The marker is plain UTF-8 and never goes through authenticated decryption.
fn decode(id: NodeId, node: &ChatNode, key: &SymmetricKey) -> CachedNode {
    let content = if node.is_marker() {
        MessageContent::System(String::from_utf8_lossy(&node.payload).into_owned())
    } else {
        match decrypt(&node.payload, key) {
            Ok(text) => MessageContent::Text(text),
            Err(e) => {
                tracing::warn!(node = %id, error = %e, "message could not be decrypted");
                MessageContent::Unavailable
            },
        }
    };

    CachedNode {
        chatroom: node.chatroom_id,
        previous: node.previous,
        entry: HistoryEntry {
            id,
            sender: node.sender,
            timestamp_ms: node.timestamp_ms,
            content,
        },
    }
}
