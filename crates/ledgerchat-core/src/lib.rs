//! Ledgerchat core abstractions.
//!
//! Everything the chain protocol consumes from the outside world sits behind
//! a trait here, so the reader and writer never touch a concrete runtime or
//! backend:
//!
//! ```text
//! ledgerchat-core
//!   ├─ Environment          (time, sleep, randomness)
//!   ├─ Ledger               (authoritative chatroom + node store)
//!   │    ├─ MemoryLedger    (in-process, CBOR records)
//!   │    ├─ ChaoticLedger   (seeded fault injection)
//!   │    └─ PooledLedger    (health-checked connection)
//!   ├─ MembershipDirectory  (chatroom key credentials)
//!   ├─ RetryPolicy          (bounded backoff)
//!   └─ NotificationHub      (advisory new-message events)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod env;
pub mod ledger;
pub mod membership;
pub mod notify;
pub mod retry;

pub use connection::{ConnectionManager, Connector, PooledLedger};
pub use env::{EnvRng, Environment};
pub use ledger::{ChaoticLedger, Ledger, LedgerError, MemoryLedger};
pub use membership::{
    ChatroomKey, KeyIssuer, MemoryDirectory, MembershipDirectory, MembershipError,
};
pub use notify::{ChainEvent, NotificationHub};
pub use retry::{RetryFailure, RetryPolicy};
