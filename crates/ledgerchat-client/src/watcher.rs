//! Chatroom watcher.
//!
//! Keeps one chatroom's history fresh. The baseline is a fixed-interval poll
//! of the ledger; append notifications only bring the next refresh forward.
//! A lost notification delays a refresh until the next poll and is never an
//! error. Notifications that pile up during a walk collapse into a single
//! follow-up refresh.
//!
//! Refreshes go through [`ChainReader::read_latest`], so a refresh overtaken
//! by a newer one is dropped rather than published out of order.
//!
//! [`ChainReader::read_latest`]: crate::ChainReader::read_latest

use std::time::{Duration, Instant};

use ledgerchat_core::{ChainEvent, Environment, Ledger, NotificationHub};
use ledgerchat_crypto::SymmetricKey;
use ledgerchat_proto::ChatroomId;
use tokio::sync::{
    broadcast::{self, error::RecvError, error::TryRecvError},
    watch,
};

use crate::{client::ChatClient, error::ClientError, history::ChatHistory};

/// What woke the loop.
enum Wake {
    Poll,
    Notified,
    /// `true` if the shutdown sender was dropped.
    ShutdownChanged(bool),
    Ignored,
    NotificationsClosed,
    Stop,
}

/// Polls one chatroom and publishes its history on change.
pub struct ChatroomWatcher<L, D, E> {
    client: ChatClient<L, D, E>,
    chatroom: ChatroomId,
    key: SymmetricKey,
    notifications: Option<broadcast::Receiver<ChainEvent>>,
    updates: watch::Sender<Option<ChatHistory>>,
    last: Option<ChatHistory>,
}

impl<L, D, E> ChatroomWatcher<L, D, E>
where
    L: Ledger + 'static,
    D: Send + Sync + 'static,
    E: Environment,
{
    /// Create a watcher and the receiver its histories are published on.
    ///
    /// Subscribes to the client's notification hub if it has one.
    pub fn new(
        client: ChatClient<L, D, E>,
        chatroom: ChatroomId,
        key: SymmetricKey,
    ) -> (Self, watch::Receiver<Option<ChatHistory>>) {
        let (updates, receiver) = watch::channel(None);
        let notifications = client.notifications().map(NotificationHub::subscribe);
        let watcher = Self { client, chatroom, key, notifications, updates, last: None };
        (watcher, receiver)
    }

    /// Run until `shutdown` turns true or every receiver is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.client.config().poll_interval;
        let chatroom = self.chatroom;
        tracing::debug!(%chatroom, ?interval, "watcher started");

        let env = self.client.env().clone();
        self.refresh().await;
        let mut next_poll = env.now() + interval;

        loop {
            let wake = {
                let sleep = env.sleep(next_poll.saturating_duration_since(env.now()));
                tokio::pin!(sleep);

                tokio::select! {
                    () = &mut sleep => Wake::Poll,
                    changed = shutdown.changed() => Wake::ShutdownChanged(changed.is_err()),
                    event = next_event(&mut self.notifications) => match event {
                        Ok(event) if event.chatroom() == chatroom => Wake::Notified,
                        Ok(_) => Wake::Ignored,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(%chatroom, skipped, "notifications lagged");
                            Wake::Notified
                        },
                        Err(RecvError::Closed) => Wake::NotificationsClosed,
                    },
                    () = self.updates.closed() => Wake::Stop,
                }
            };

            match wake {
                Wake::Poll => {
                    self.refresh().await;
                    next_poll = next_deadline(env.now(), next_poll, interval);
                },
                Wake::Notified => {
                    self.drain_notifications();
                    self.refresh().await;
                },
                Wake::Ignored => {},
                Wake::NotificationsClosed => {
                    tracing::debug!(%chatroom, "notification hub closed, polling only");
                    self.notifications = None;
                },
                Wake::ShutdownChanged(closed) => {
                    if closed || *shutdown.borrow() {
                        break;
                    }
                },
                Wake::Stop => break,
            }
        }

        tracing::debug!(%chatroom, "watcher stopped");
    }

    /// Discard queued notifications; the refresh that follows covers them.
    fn drain_notifications(&mut self) {
        let Some(receiver) = &mut self.notifications else {
            return;
        };
        loop {
            match receiver.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => {},
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    async fn refresh(&mut self) {
        let chatroom = self.chatroom;
        match self.client.reader().read_latest(chatroom, &self.key).await {
            Ok(history) => {
                if self.last.as_ref() == Some(&history) {
                    return;
                }
                tracing::debug!(
                    %chatroom,
                    version = history.tip.version,
                    entries = history.entries.len(),
                    "history changed"
                );
                self.last = Some(history.clone());
                self.updates.send_replace(Some(history));
            },
            Err(ClientError::Superseded { .. }) => {
                tracing::debug!(%chatroom, "refresh superseded");
            },
            Err(e) => {
                tracing::warn!(%chatroom, error = %e, "refresh failed, retrying at next poll");
            },
        }
    }
}

/// Next poll deadline. Skips missed ticks instead of bursting to catch up.
fn next_deadline(now: Instant, previous: Instant, interval: Duration) -> Instant {
    let next = previous + interval;
    if next > now { next } else { now + interval }
}

async fn next_event(
    receiver: &mut Option<broadcast::Receiver<ChainEvent>>,
) -> Result<ChainEvent, RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
