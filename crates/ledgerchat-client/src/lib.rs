//! Ledgerchat client.
//!
//! Reconstructs and extends encrypted chatroom histories stored as
//! hash-linked chains on a [`Ledger`](ledgerchat_core::Ledger).
//!
//! # Components
//!
//! - [`ChainReader`]: walks a chain from its tip back to the system marker
//!   and decrypts each node
//! - [`ChainWriter`]: one conditional append against an observed tip
//! - [`ChatClient`]: façade tying reader, writer, membership and
//!   notifications together, with bounded retries
//! - [`ChatroomWatcher`]: keeps a history fresh by polling, refreshing
//!   early on notifications
//! - [`SystemEnv`]: production [`Environment`](ledgerchat_core::Environment)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cache;
mod client;
mod config;
mod error;
mod history;
mod reader;
mod system_env;
mod watcher;
mod writer;

pub use cache::NodeCache;
pub use client::ChatClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use history::{ChainGap, ChatHistory, HistoryEntry, MessageContent, UNAVAILABLE_TEXT};
pub use reader::{ChainReader, WalkGuard};
pub use system_env::SystemEnv;
pub use watcher::ChatroomWatcher;
pub use writer::{ChainWriter, SentMessage, WriteOutcome};
