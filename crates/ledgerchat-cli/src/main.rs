//! Ledgerchat simulation binary.
//!
//! # Usage
//!
//! ```bash
//! # Three writers, five messages each, 5% injected ledger failures
//! ledgerchat
//!
//! # Reproducible run with heavier faults and debug logs
//! ledgerchat --writers 8 --failure-rate 0.3 --seed 42 --log-level debug
//! ```

use std::time::Duration;

use clap::Parser;
use ledgerchat_cli::{SimulationConfig, run_simulation};
use ledgerchat_client::ClientConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Concurrent writers on one encrypted chatroom chain
#[derive(Parser, Debug)]
#[command(name = "ledgerchat")]
#[command(about = "Simulate concurrent members appending to a ledgerchat chatroom")]
#[command(version)]
struct Args {
    /// Members writing concurrently
    #[arg(short, long, default_value = "3")]
    writers: u8,

    /// Messages each member sends
    #[arg(short, long, default_value = "5")]
    messages: usize,

    /// Probability that a ledger call fails transiently
    #[arg(long, default_value = "0.05")]
    failure_rate: f64,

    /// Fault injection seed (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Do not run a watcher
    #[arg(long)]
    no_watch: bool,

    /// Watcher poll interval in milliseconds
    #[arg(long, default_value = "3000")]
    poll_interval_ms: u64,

    /// Append attempts per message before giving up
    #[arg(long, default_value = "5")]
    send_attempts: u32,

    /// Longest chain a read will walk
    #[arg(long, default_value = "10000")]
    max_chain_length: usize,

    /// Decrypted nodes kept per member
    #[arg(long, default_value = "4096")]
    cache_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn simulation_config(&self) -> SimulationConfig {
        let defaults = ClientConfig::default();
        let client = ClientConfig {
            send_retry: ledgerchat_core::RetryPolicy {
                max_attempts: self.send_attempts,
                ..defaults.send_retry
            },
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_chain_length: self.max_chain_length,
            cache_capacity: self.cache_capacity,
            ..defaults
        };

        SimulationConfig {
            writers: self.writers,
            messages_per_writer: self.messages,
            failure_rate: self.failure_rate,
            seed: self.seed,
            watch: !self.no_watch,
            client,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.simulation_config();
    let report = run_simulation(&config).await?;

    tracing::info!(
        chatroom = %report.chatroom,
        seed = report.seed,
        delivered = report.delivered,
        failed = report.failed.len(),
        "done"
    );

    Ok(())
}
