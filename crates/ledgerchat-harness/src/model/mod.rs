//! Reference model for model-based testing.
//!
//! The model captures what members observe: who may read and write which
//! chatroom, and the order messages appear in. Real clients run the same
//! operations against a fault-injecting ledger and must agree with it.

pub mod operation;
mod world;

pub use operation::{
    ClientId, ModelRoomId, Operation, OperationError, OperationResult, SmallMessage,
};
pub use world::ModelWorld;
