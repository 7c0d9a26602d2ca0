//! Deterministic simulation harness for ledgerchat.
//!
//! [`SimEnv`] replaces the system clock and OS entropy with a virtual clock
//! and a seeded RNG. [`InterleavingLedger`] makes an in-memory ledger yield
//! between calls so that concurrent writers actually race. Together they let
//! every interleaving be replayed from a single seed.
//!
//! # Model-Based Testing
//!
//! The `model` module is a reference implementation of what members
//! observe. Operations are applied to the model and to real clients and the
//! results compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod interleave;
pub mod model;
pub mod scenario;
pub mod sim_env;

pub use interleave::InterleavingLedger;
pub use model::{
    ClientId, ModelRoomId, ModelWorld, Operation, OperationError, OperationResult, SmallMessage,
};
pub use scenario::{ScenarioOutcome, SendRecord, SimClient, SimLedger, WriterScenario, writer_id};
pub use sim_env::{SIM_EPOCH_MS, SimEnv};
