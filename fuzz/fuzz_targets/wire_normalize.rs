//! Fuzz target for the ledger record adapter
//!
//! Ledger responses are untrusted input: every byte sequence must either
//! normalise into a typed record or fail with a `WireError`.
//!
//! # Strategy
//!
//! - Raw CBOR bytes decoded as each record shape
//! - Structured nodes built from arbitrary fields, encoded and decoded back
//!
//! # Invariants
//!
//! - NEVER panic on malformed CBOR, bad hex, short ids or huge numbers
//! - A normalised record re-encodes to the same typed record
//! - `is_marker()` iff the node has no predecessor

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ledgerchat_proto::{
    ChatNode, ChatroomId, MemberId, NodeId, RawChatNode, RawChatroom, RawChatroomKey,
    decode_record, encode_record,
};

#[derive(Debug, Arbitrary)]
enum Input {
    /// Bytes straight off the ledger.
    Raw(Vec<u8>),
    /// A well-formed node pushed through the adapter.
    Node {
        chatroom: [u8; 32],
        sender: [u8; 32],
        timestamp_ms: u64,
        previous: Option<[u8; 32]>,
        payload: Vec<u8>,
    },
}

fuzz_target!(|input: Input| {
    match input {
        Input::Raw(bytes) => {
            if let Ok(raw) = decode_record::<RawChatNode>(&bytes) {
                if let Ok(node) = raw.normalize() {
                    assert_eq!(node.is_marker(), node.previous.is_none());
                    let again = RawChatNode::from_node(&node).normalize().unwrap();
                    assert_eq!(again, node);
                }
            }
            if let Ok(raw) = decode_record::<RawChatroom>(&bytes) {
                if let Ok(chatroom) = raw.normalize() {
                    let again = RawChatroom::from_chatroom(&chatroom).normalize().unwrap();
                    assert_eq!(again, chatroom);
                }
            }
            if let Ok(raw) = decode_record::<RawChatroomKey>(&bytes) {
                let _ = raw.normalize();
            }
        },
        Input::Node { chatroom, sender, timestamp_ms, previous, payload } => {
            let node = ChatNode {
                chatroom_id: ChatroomId::from_bytes(chatroom),
                sender: MemberId::from_bytes(sender),
                timestamp_ms,
                previous: previous.map(NodeId::from_bytes),
                payload: payload.into(),
            };
            let bytes = encode_record(&RawChatNode::from_node(&node)).unwrap();
            let decoded = decode_record::<RawChatNode>(&bytes).unwrap().normalize().unwrap();
            assert_eq!(decoded, node);
        },
    }
});
