//! Ledgerchat simulation runner.
//!
//! Spins up several members sharing one chatroom on an in-process ledger that
//! injects transient failures, lets them all send at once, and logs the
//! conversation as a watching member sees it and as it finally reads.
//!
//! ```text
//! ledgerchat
//!   ├─ SystemEnv           (wall clock, tokio timers, OS randomness)
//!   ├─ ChaoticLedger       (fault injection over MemoryLedger)
//!   ├─ MemoryDirectory     (chatroom keys)
//!   ├─ NotificationHub     (append notifications)
//!   ├─ writer tasks        (one ChatClient each)
//!   └─ ChatroomWatcher     (creator's live view)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use ledgerchat_client::{
    ChatClient, ChatHistory, ChatroomWatcher, ClientConfig, ClientError, SystemEnv,
};
use ledgerchat_core::{ChaoticLedger, Environment, MemoryDirectory, MemoryLedger, NotificationHub};
use ledgerchat_crypto::SymmetricKey;
use ledgerchat_proto::{ChatroomId, ID_LEN, MemberId};
use thiserror::Error;
use tokio::{
    sync::watch,
    task::{JoinError, JoinSet},
};

type SimulatedClient = ChatClient<ChaoticLedger<MemoryLedger>, MemoryDirectory, SystemEnv>;

/// Simulation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Members writing concurrently.
    pub writers: u8,
    /// Messages each member sends.
    pub messages_per_writer: usize,
    /// Probability that a ledger call fails transiently while writers run.
    pub failure_rate: f64,
    /// Fault injection seed; drawn from the OS when absent.
    pub seed: Option<u64>,
    /// Run a watcher that logs every history it observes.
    pub watch: bool,
    /// Settings shared by every member's client.
    pub client: ClientConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            writers: 3,
            messages_per_writer: 5,
            failure_rate: 0.05,
            seed: None,
            watch: true,
            client: ClientConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.writers == 0 {
            return Err(SimulationError::InvalidConfig("at least one writer is required".into()));
        }
        if !(0.0..1.0).contains(&self.failure_rate) {
            return Err(SimulationError::InvalidConfig(format!(
                "failure rate must be in [0, 1), got {}",
                self.failure_rate
            )));
        }
        Ok(())
    }
}

/// Errors that abort a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The configuration cannot run.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Setting up the chatroom or the final read failed.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// A writer or watcher task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] JoinError),
}

/// What a simulation produced.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Chatroom the members wrote to.
    pub chatroom: ChatroomId,
    /// Seed used for fault injection.
    pub seed: u64,
    /// Sends the ledger accepted.
    pub delivered: usize,
    /// Sends that gave up, with the writer's member id.
    pub failed: Vec<(MemberId, ClientError)>,
    /// Final history read after every writer finished.
    pub history: ChatHistory,
    /// Transient failures the ledger injected.
    pub injected_failures: u64,
    /// Histories the watcher published.
    pub watcher_updates: usize,
}

/// Run one simulation on the current tokio runtime.
pub async fn run_simulation(config: &SimulationConfig) -> Result<SimulationReport, SimulationError> {
    config.validate()?;

    let env = SystemEnv::new();
    let seed = config.seed.unwrap_or_else(|| env.random_u64());
    tracing::info!(
        seed,
        writers = config.writers,
        messages_per_writer = config.messages_per_writer,
        failure_rate = config.failure_rate,
        "simulation starting"
    );

    let ledger = Arc::new(ChaoticLedger::new(MemoryLedger::new(), 0.0, seed));
    let directory = Arc::new(MemoryDirectory::new());
    let hub = NotificationHub::default();

    let clients: Vec<SimulatedClient> = (0..config.writers)
        .map(|_| {
            let member = MemberId::from_bytes(env.random_array::<ID_LEN>());
            ChatClient::new(
                member,
                Arc::clone(&ledger),
                Arc::clone(&directory),
                env,
                config.client.clone(),
            )
            .with_notifications(hub.clone())
        })
        .collect();

    let Some(creator) = clients.first() else {
        return Err(SimulationError::InvalidConfig("at least one writer is required".into()));
    };
    let members: Vec<_> = clients.iter().map(ChatClient::member).collect();
    let chatroom = creator.create_chatroom(&members).await?.id;
    let key = creator.chatroom_key(chatroom).await?;

    let watcher = config.watch.then(|| spawn_watcher(creator.clone(), chatroom, key.clone()));

    ledger.set_failure_rate(config.failure_rate);

    let mut writers = JoinSet::new();
    for (index, client) in clients.iter().cloned().enumerate() {
        let key = client.chatroom_key(chatroom).await?;
        let count = config.messages_per_writer;
        writers.spawn(async move {
            let member = client.member();
            let mut delivered = 0;
            let mut failed = Vec::new();
            for n in 0..count {
                let text = format!("message {n} from writer {index}");
                match client.send_message(chatroom, &key, &text).await {
                    Ok(sent) => {
                        delivered += 1;
                        tracing::debug!(writer = index, version = sent.version, "sent");
                    },
                    Err(e) => {
                        tracing::warn!(writer = index, error = %e, hint = e.user_message(), "send failed");
                        failed.push((member, e));
                    },
                }
            }
            (delivered, failed)
        });
    }

    let mut delivered = 0;
    let mut failed = Vec::new();
    while let Some(joined) = writers.join_next().await {
        let (sent, errors) = joined?;
        delivered += sent;
        failed.extend(errors);
    }

    ledger.set_failure_rate(0.0);
    let history = creator.read_chat_history(chatroom, &key).await?;

    let watcher_updates = match watcher {
        Some(watcher) => watcher.stop().await?,
        None => 0,
    };

    log_history(&history);
    tracing::info!(
        delivered,
        failed = failed.len(),
        injected_failures = ledger.injected_failures(),
        watcher_updates,
        "simulation finished"
    );

    Ok(SimulationReport {
        chatroom,
        seed,
        delivered,
        failed,
        history,
        injected_failures: ledger.injected_failures(),
        watcher_updates,
    })
}

/// Watcher task plus the task logging what it publishes.
struct RunningWatcher {
    shutdown: watch::Sender<bool>,
    watcher: tokio::task::JoinHandle<()>,
    logger: tokio::task::JoinHandle<usize>,
}

impl RunningWatcher {
    /// Stop the watcher and return how many histories it published.
    async fn stop(self) -> Result<usize, JoinError> {
        drop(self.shutdown);
        self.watcher.await?;
        self.logger.await
    }
}

fn spawn_watcher(
    client: SimulatedClient,
    chatroom: ChatroomId,
    key: SymmetricKey,
) -> RunningWatcher {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (watcher, mut updates) = ChatroomWatcher::new(client, chatroom, key);
    let watcher = tokio::spawn(watcher.run(shutdown_rx));

    let logger = tokio::spawn(async move {
        let mut published = 0;
        while updates.changed().await.is_ok() {
            let latest = updates
                .borrow_and_update()
                .as_ref()
                .map(|h| (h.entries.len(), h.latest().map(|e| e.text().to_string())));
            if let Some((entries, text)) = latest {
                published += 1;
                tracing::info!(%chatroom, entries, latest = text.as_deref().unwrap_or(""), "conversation updated");
            }
        }
        published
    });

    RunningWatcher { shutdown, watcher, logger }
}

fn log_history(history: &ChatHistory) {
    for entry in &history.entries {
        tracing::info!(sender = %entry.sender, at = entry.timestamp_ms, "{}", entry.text());
    }
    if let Some(gap) = &history.gap {
        tracing::warn!(%gap, "history incomplete");
    }
}
