//! Advisory new-message notifications.
//!
//! Notifications only shorten the time until a reader looks at the ledger
//! again. They may be dropped, duplicated or arrive late; readers must still
//! poll the tip on their own schedule, and nothing treats a missing
//! notification as an error.

use ledgerchat_proto::{ChatroomId, NodeId};
use tokio::sync::broadcast;

/// Default per-subscriber backlog before old events are dropped.
const DEFAULT_CAPACITY: usize = 256;

/// A chain changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEvent {
    /// A node was appended and is now the tip.
    Appended {
        /// Chatroom that grew.
        chatroom: ChatroomId,
        /// The new tip.
        node_id: NodeId,
        /// Chatroom version after the append.
        version: u64,
    },
}

impl ChainEvent {
    /// Chatroom the event concerns.
    pub fn chatroom(&self) -> ChatroomId {
        match self {
            Self::Appended { chatroom, .. } => *chatroom,
        }
    }
}

/// Best-effort fan-out of [`ChainEvent`]s.
///
/// Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<ChainEvent>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NotificationHub {
    /// Create a hub whose subscribers each buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Returns how many subscribers it reached; zero is
    /// not a failure.
    pub fn publish(&self, event: ChainEvent) -> usize {
        match self.sender.send(event) {
            Ok(reached) => reached,
            Err(_) => {
                tracing::debug!(chatroom = %event.chatroom(), "no notification subscribers");
                0
            },
        }
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.sender.subscribe()
    }
}
