//! Concurrent writer scenario.
//!
//! Several members append to one chatroom at the same time through a ledger
//! that both interleaves calls and injects transient failures. Each writer
//! sends its messages in order and records what the ledger accepted. The
//! outcome is fully determined by the seed.
//!
//! # Oracle
//!
//! [`ScenarioOutcome::check`] verifies what the chain must guarantee no
//! matter how the writers raced:
//!
//! - the history is complete and starts with the system marker
//! - every accepted message appears exactly once, every rejected one never
//! - versions are consecutive, so no append was lost or forked
//! - each writer's messages appear in the order it sent them

use std::{collections::HashMap, sync::Arc, time::Duration};

use ledgerchat_client::{
    ChatClient, ChatHistory, ClientConfig, ClientError, MessageContent, SentMessage,
};
use ledgerchat_core::{ChaoticLedger, MemoryDirectory, MemoryLedger, RetryPolicy};
use ledgerchat_proto::{ChatroomId, ID_LEN, MemberId, NodeId};
use tokio::task::JoinSet;

use crate::{interleave::InterleavingLedger, sim_env::SimEnv};

/// Ledger stack used by scenarios.
pub type SimLedger = ChaoticLedger<InterleavingLedger<MemoryLedger>>;

/// Client type used by scenarios.
pub type SimClient = ChatClient<SimLedger, MemoryDirectory, SimEnv>;

/// Scenario parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterScenario {
    /// Concurrent writers, at least one.
    pub writers: u8,
    /// Messages each writer sends.
    pub messages_per_writer: usize,
    /// Probability that a ledger call fails transiently.
    pub failure_rate: f64,
    /// Maximum scheduler yields before each ledger call.
    pub max_yields: u32,
    /// Seed for the environment, interleaving and failures.
    pub seed: u64,
    /// Retries for sends.
    pub send_retry: RetryPolicy,
}

impl Default for WriterScenario {
    fn default() -> Self {
        Self {
            writers: 3,
            messages_per_writer: 5,
            failure_rate: 0.0,
            max_yields: 3,
            seed: 0,
            send_retry: RetryPolicy {
                max_attempts: 12,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(200),
                deadline: None,
                jitter: true,
            },
        }
    }
}

/// One send and what became of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRecord {
    /// Writer index.
    pub writer: u8,
    /// Text sent.
    pub text: String,
    /// Accepted append, or the error the send gave up with.
    pub result: Result<SentMessage, ClientError>,
}

/// Everything a scenario run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOutcome {
    /// Chatroom written to.
    pub chatroom: ChatroomId,
    /// Sends in completion order.
    pub sends: Vec<SendRecord>,
    /// History read after every writer finished.
    pub history: ChatHistory,
    /// Transient failures the ledger injected.
    pub injected_failures: u64,
    /// Virtual time the run took.
    pub elapsed: Duration,
}

impl ScenarioOutcome {
    /// Sends the ledger accepted.
    pub fn accepted(&self) -> impl Iterator<Item = (&SendRecord, &SentMessage)> {
        self.sends.iter().filter_map(|s| s.result.as_ref().ok().map(|sent| (s, sent)))
    }

    /// Check the chain guarantees, returning the first violation.
    pub fn check(&self) -> Result<(), String> {
        if let Some(gap) = &self.history.gap {
            return Err(format!("history incomplete: {gap}"));
        }
        let Some((marker, messages)) = self.history.entries.split_first() else {
            return Err("history is empty".to_string());
        };
        if !matches!(marker.content, MessageContent::System(_)) {
            return Err("first entry is not the system marker".to_string());
        }

        let positions: HashMap<NodeId, usize> =
            messages.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        if positions.len() != messages.len() {
            return Err("a node appears twice".to_string());
        }

        let accepted: Vec<_> = self.accepted().collect();
        if accepted.len() != messages.len() {
            return Err(format!(
                "{} sends accepted but {} messages in history",
                accepted.len(),
                messages.len()
            ));
        }

        let mut last_position: HashMap<u8, usize> = HashMap::new();
        for (record, sent) in &accepted {
            let Some(&position) = positions.get(&sent.node_id) else {
                return Err(format!("accepted node {} missing from history", sent.node_id));
            };
            if messages[position].text() != record.text {
                return Err(format!("node {} holds the wrong text", sent.node_id));
            }
            if last_position.get(&record.writer).is_some_and(|&last| last >= position) {
                return Err(format!("writer {} messages out of order", record.writer));
            }
            last_position.insert(record.writer, position);
        }

        let expected_version = u64::try_from(self.history.entries.len()).unwrap_or(u64::MAX);
        if self.history.tip.version != expected_version {
            return Err(format!(
                "version {} after {} nodes",
                self.history.tip.version, expected_version
            ));
        }

        Ok(())
    }
}

impl WriterScenario {
    /// Run the scenario on the current (single-threaded) runtime.
    pub async fn run(&self) -> Result<ScenarioOutcome, ClientError> {
        let env = SimEnv::with_seed(self.seed);
        let ledger = Arc::new(ChaoticLedger::new(
            InterleavingLedger::new(MemoryLedger::new(), self.max_yields, self.seed),
            0.0,
            self.seed,
        ));
        let directory = Arc::new(MemoryDirectory::new());
        let config = ClientConfig { send_retry: self.send_retry, ..ClientConfig::default() };

        let writers: Vec<SimClient> = (0..self.writers.max(1))
            .map(|i| {
                ChatClient::new(
                    writer_id(i),
                    Arc::clone(&ledger),
                    Arc::clone(&directory),
                    env.clone(),
                    config.clone(),
                )
            })
            .collect();

        let invited: Vec<_> = writers.iter().map(ChatClient::member).collect();
        let chatroom = writers[0].create_chatroom(&invited).await?.id;

        let mut tasks = JoinSet::new();
        ledger.set_failure_rate(self.failure_rate);
        for (index, client) in (0u8..).zip(writers.iter().cloned()) {
            let key = client.chatroom_key(chatroom).await?;
            let count = self.messages_per_writer;
            tasks.spawn(async move {
                let mut records = Vec::with_capacity(count);
                for n in 0..count {
                    let text = format!("writer {index} message {n}");
                    let result = client.send_message(chatroom, &key, &text).await;
                    records.push(SendRecord { writer: index, text, result });
                }
                records
            });
        }

        let mut sends = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(records) => sends.extend(records),
                Err(e) => tracing::error!(error = %e, "writer task failed"),
            }
        }

        ledger.set_failure_rate(0.0);

        let key = writers[0].chatroom_key(chatroom).await?;
        let history = writers[0].read_chat_history(chatroom, &key).await?;

        Ok(ScenarioOutcome {
            chatroom,
            sends,
            history,
            injected_failures: ledger.injected_failures(),
            elapsed: env.elapsed(),
        })
    }
}

/// Member id of writer `index`.
pub fn writer_id(index: u8) -> MemberId {
    let mut bytes = [0u8; ID_LEN];
    bytes[0] = 0xAA;
    bytes[ID_LEN - 1] = index;
    MemberId::from_bytes(bytes)
}
