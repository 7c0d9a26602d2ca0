//! Decrypted node cache.
//!
//! Nodes are immutable once stored, so a decoded entry never goes stale.
//! Entries are keyed by the fingerprint of the key that decrypted them as
//! well as the node id: a walk under a different key never sees plaintext
//! recovered with another one. Only recovered content is cached; an
//! unavailable entry is retried on the next walk. Eviction is first-in
//! first-out once `capacity` is reached.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use ledgerchat_crypto::{KeyFingerprint, SymmetricKey};
use ledgerchat_proto::{ChatroomId, NodeId};

use crate::history::HistoryEntry;

/// A decoded node as the reader needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedNode {
    pub(crate) chatroom: ChatroomId,
    pub(crate) previous: Option<NodeId>,
    pub(crate) entry: HistoryEntry,
}

type Slot = (KeyFingerprint, NodeId);

#[derive(Default)]
struct Inner {
    nodes: HashMap<Slot, CachedNode>,
    order: VecDeque<Slot>,
}

/// Bounded cache of decoded nodes keyed by key fingerprint and node id.
pub struct NodeCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl NodeCache {
    /// Create a cache holding at most `capacity` nodes. Zero disables it.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, inner: Mutex::new(Inner::default()) }
    }

    /// Number of cached nodes.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.nodes.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is cached as decrypted under `key`.
    pub fn contains(&self, key: &SymmetricKey, id: NodeId) -> bool {
        let slot = (key.fingerprint(), id);
        self.inner.lock().map(|inner| inner.nodes.contains_key(&slot)).unwrap_or(false)
    }

    /// Drop everything.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.nodes.clear();
            inner.order.clear();
        }
    }

    pub(crate) fn get(&self, key: &KeyFingerprint, id: NodeId) -> Option<CachedNode> {
        self.inner.lock().ok()?.nodes.get(&(*key, id)).cloned()
    }

    pub(crate) fn insert(&self, key: &KeyFingerprint, id: NodeId, node: CachedNode) {
        if self.capacity == 0 || !node.entry.content.is_available() {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let slot = (*key, id);
        if inner.nodes.contains_key(&slot) {
            return;
        }
        while inner.nodes.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.nodes.remove(&oldest);
        }
        inner.order.push_back(slot);
        inner.nodes.insert(slot, node);
    }
}
