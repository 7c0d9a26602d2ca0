//! Ledgerchat protocol records.
//!
//! Types shared by every ledgerchat crate: the 32-byte ledger identifiers,
//! the chain node and chatroom records, and the raw wire shapes a ledger
//! hands back before they are normalised.
//!
//! # Chain layout
//!
//! ```text
//! chatroom.tip ──▶ n3 ──▶ n2 ──▶ n1 ──▶ n0 (system marker, previous = None)
//! ```
//!
//! Every node except the marker carries an AES-256-GCM payload. The marker
//! payload is plain UTF-8.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod ids;
pub mod node;
pub mod wire;

pub use error::{IdError, WireError};
pub use ids::{ChatroomId, ID_LEN, MemberId, NodeId};
pub use node::{
    AppendOutcome, ChatNode, Chatroom, ChatroomTip, SYSTEM_MARKER_TEXT, derive_chatroom_id,
    derive_node_id,
};
pub use wire::{
    KeyRecord, RawBytes, RawChatNode, RawChatroom, RawChatroomKey, RawIdField, RawNumber,
    RawObjectRef, decode_record, encode_record,
};
