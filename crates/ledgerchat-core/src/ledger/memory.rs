//! In-process ledger.
//!
//! Records are kept as CBOR bytes of their raw wire shape, so every read goes
//! through the same normalisation a remote ledger response would. Node ids
//! are derived from the encoded record and the version it lands at.
//!
//! Cloning a `MemoryLedger` shares the underlying state, which is how tests
//! give several clients one ledger.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use ledgerchat_proto::{
    AppendOutcome, ChatNode, Chatroom, ChatroomId, ChatroomTip, MemberId, NodeId, RawChatNode,
    RawChatroom, decode_record, derive_chatroom_id, derive_node_id, encode_record,
};

use super::{Ledger, LedgerError, check_append};

#[derive(Default)]
struct State {
    chatrooms: HashMap<ChatroomId, Vec<u8>>,
    nodes: HashMap<NodeId, Vec<u8>>,
    next_sequence: u64,
}

impl State {
    fn load_chatroom(&self, id: ChatroomId) -> Result<Option<Chatroom>, LedgerError> {
        self.chatrooms
            .get(&id)
            .map(|bytes| Ok(decode_record::<RawChatroom>(bytes)?.normalize()?))
            .transpose()
    }

    fn store_chatroom(&mut self, chatroom: &Chatroom) -> Result<(), LedgerError> {
        let bytes = encode_record(&RawChatroom::from_chatroom(chatroom))?;
        self.chatrooms.insert(chatroom.id, bytes);
        Ok(())
    }

    fn store_node(
        &mut self,
        chatroom: ChatroomId,
        version: u64,
        node: &ChatNode,
    ) -> Result<NodeId, LedgerError> {
        let bytes = encode_record(&RawChatNode::from_node(node))?;
        let id = derive_node_id(&chatroom, version, &bytes);
        if self.nodes.contains_key(&id) {
            return Err(LedgerError::Corrupt(format!("node id collision at {id}")));
        }
        self.nodes.insert(id, bytes);
        Ok(id)
    }
}

/// In-memory [`Ledger`] with shared state.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<RwLock<State>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes across all chatrooms.
    pub fn node_count(&self) -> usize {
        self.read().map(|s| s.nodes.len()).unwrap_or(0)
    }

    /// Number of chatrooms.
    pub fn chatroom_count(&self) -> usize {
        self.read().map(|s| s.chatrooms.len()).unwrap_or(0)
    }

    /// Drop a stored node, leaving any references to it dangling.
    ///
    /// Used to model an inconsistent or pruned ledger.
    pub fn remove_node(&self, id: NodeId) -> bool {
        self.write().map(|mut s| s.nodes.remove(&id).is_some()).unwrap_or(false)
    }

    /// Store `node` under an arbitrary id, bypassing every append check.
    ///
    /// Used to model forked, cyclic or cross-linked chains.
    pub fn put_node_unchecked(&self, id: NodeId, node: &ChatNode) -> Result<(), LedgerError> {
        let bytes = encode_record(&RawChatNode::from_node(node))?;
        self.write()?.nodes.insert(id, bytes);
        Ok(())
    }

    /// Overwrite a chatroom's tip, bypassing the conditional append.
    pub fn set_tip_unchecked(&self, id: ChatroomId, tip: ChatroomTip) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        let mut chatroom = state
            .load_chatroom(id)?
            .ok_or_else(|| LedgerError::Rejected(format!("unknown chatroom {id}")))?;
        chatroom.tip = tip;
        state.store_chatroom(&chatroom)
    }

    /// Replace a stored node's bytes verbatim.
    pub fn put_raw_node(&self, id: NodeId, bytes: Vec<u8>) -> Result<(), LedgerError> {
        self.write()?.nodes.insert(id, bytes);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, LedgerError> {
        self.state.read().map_err(|_| LedgerError::Corrupt("ledger lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, LedgerError> {
        self.state.write().map_err(|_| LedgerError::Corrupt("ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_chatroom(
        &self,
        creator: MemberId,
        created_at_ms: u64,
    ) -> Result<Chatroom, LedgerError> {
        let mut state = self.write()?;

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let id = derive_chatroom_id(&creator, created_at_ms, sequence);

        let marker = ChatNode::marker(id, creator, created_at_ms);
        let marker_id = state.store_node(id, 1, &marker)?;

        let chatroom = Chatroom {
            id,
            creator,
            created_at_ms,
            tip: ChatroomTip { tip: Some(marker_id), version: 1 },
        };
        state.store_chatroom(&chatroom)?;

        tracing::debug!(chatroom = %id, creator = %creator, marker = %marker_id, "chatroom created");
        Ok(chatroom)
    }

    async fn chatroom(&self, id: ChatroomId) -> Result<Option<Chatroom>, LedgerError> {
        self.read()?.load_chatroom(id)
    }

    async fn chatroom_tip(&self, id: ChatroomId) -> Result<Option<ChatroomTip>, LedgerError> {
        Ok(self.read()?.load_chatroom(id)?.map(|c| c.tip))
    }

    async fn node(&self, id: NodeId) -> Result<Option<ChatNode>, LedgerError> {
        let state = self.read()?;
        state
            .nodes
            .get(&id)
            .map(|bytes| Ok(decode_record::<RawChatNode>(bytes)?.normalize()?))
            .transpose()
    }

    async fn append_node(
        &self,
        chatroom: ChatroomId,
        expected_tip: NodeId,
        node: ChatNode,
    ) -> Result<AppendOutcome, LedgerError> {
        check_append(chatroom, expected_tip, &node)?;

        let mut state = self.write()?;
        let mut record = state
            .load_chatroom(chatroom)?
            .ok_or_else(|| LedgerError::Rejected(format!("unknown chatroom {chatroom}")))?;

        let Some(current) = record.tip.tip else {
            return Err(LedgerError::Rejected(format!("chatroom {chatroom} is not initialised")));
        };

        if current != expected_tip {
            tracing::debug!(
                chatroom = %chatroom,
                expected = %expected_tip,
                actual = %current,
                "append conflict"
            );
            return Ok(AppendOutcome::Conflict { actual: record.tip });
        }

        let version = record.tip.version + 1;
        let node_id = state.store_node(chatroom, version, &node)?;
        record.tip = ChatroomTip { tip: Some(node_id), version };
        state.store_chatroom(&record)?;

        Ok(AppendOutcome::Appended { node_id, version })
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;
    use ledgerchat_proto::ID_LEN;

    use super::*;

    fn member(byte: u8) -> MemberId {
        MemberId::from_bytes([byte; ID_LEN])
    }

    fn message(chatroom: ChatroomId, previous: NodeId, text: &'static str) -> ChatNode {
        ChatNode {
            chatroom_id: chatroom,
            sender: member(1),
            timestamp_ms: 10,
            previous: Some(previous),
            payload: Bytes::from_static(text.as_bytes()),
        }
    }

    #[tokio::test]
    async fn create_writes_marker_as_tip() {
        let ledger = MemoryLedger::new();
        let room = ledger.create_chatroom(member(1), 100).await.unwrap();

        let tip = room.tip.tip.unwrap();
        let marker = ledger.node(tip).await.unwrap().unwrap();
        assert!(marker.is_marker());
        assert_eq!(marker.chatroom_id, room.id);
        assert_eq!(room.tip.version, 1);
        assert_eq!(ledger.node_count(), 1);
    }

    #[tokio::test]
    async fn same_creator_same_time_gets_distinct_rooms() {
        let ledger = MemoryLedger::new();
        let a = ledger.create_chatroom(member(1), 100).await.unwrap();
        let b = ledger.create_chatroom(member(1), 100).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.tip.tip, b.tip.tip);
    }

    #[tokio::test]
    async fn append_advances_tip_and_version() {
        let ledger = MemoryLedger::new();
        let room = ledger.create_chatroom(member(1), 0).await.unwrap();
        let marker = room.tip.tip.unwrap();

        let outcome = ledger.append_node(room.id, marker, message(room.id, marker, "a")).await;
        let AppendOutcome::Appended { node_id, version } = outcome.unwrap() else {
            panic!("expected append");
        };

        assert_eq!(version, 2);
        let tip = ledger.chatroom_tip(room.id).await.unwrap().unwrap();
        assert_eq!(tip, ChatroomTip { tip: Some(node_id), version: 2 });
        assert_eq!(ledger.node(node_id).await.unwrap().unwrap().previous, Some(marker));
    }

    #[tokio::test]
    async fn stale_tip_conflicts_and_stores_nothing() {
        let ledger = MemoryLedger::new();
        let room = ledger.create_chatroom(member(1), 0).await.unwrap();
        let marker = room.tip.tip.unwrap();

        ledger.append_node(room.id, marker, message(room.id, marker, "first")).await.unwrap();
        let before = ledger.node_count();

        let outcome =
            ledger.append_node(room.id, marker, message(room.id, marker, "late")).await.unwrap();

        let AppendOutcome::Conflict { actual } = outcome else {
            panic!("expected conflict");
        };
        assert_eq!(actual.version, 2);
        assert_ne!(actual.tip, Some(marker));
        assert_eq!(ledger.node_count(), before);
    }

    #[tokio::test]
    async fn previous_must_match_expected_tip() {
        let ledger = MemoryLedger::new();
        let room = ledger.create_chatroom(member(1), 0).await.unwrap();
        let marker = room.tip.tip.unwrap();
        let other = NodeId::from_bytes([0xEE; ID_LEN]);

        let err =
            ledger.append_node(room.id, marker, message(room.id, other, "x")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
    }

    #[tokio::test]
    async fn node_from_other_chatroom_rejected() {
        let ledger = MemoryLedger::new();
        let a = ledger.create_chatroom(member(1), 0).await.unwrap();
        let b = ledger.create_chatroom(member(2), 0).await.unwrap();
        let tip = a.tip.tip.unwrap();

        let err = ledger.append_node(a.id, tip, message(b.id, tip, "x")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
    }

    #[tokio::test]
    async fn unknown_chatroom_is_none_and_rejects_appends() {
        let ledger = MemoryLedger::new();
        let ghost = ChatroomId::from_bytes([7; ID_LEN]);
        let tip = NodeId::from_bytes([8; ID_LEN]);

        assert_eq!(ledger.chatroom_tip(ghost).await.unwrap(), None);
        let err = ledger.append_node(ghost, tip, message(ghost, tip, "x")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
    }

    #[tokio::test]
    async fn uninitialised_chatroom_rejects_appends() {
        let ledger = MemoryLedger::new();
        let room = ledger.create_chatroom(member(1), 0).await.unwrap();
        let marker = room.tip.tip.unwrap();
        ledger.set_tip_unchecked(room.id, ChatroomTip::default()).unwrap();

        let err =
            ledger.append_node(room.id, marker, message(room.id, marker, "x")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
    }

    #[tokio::test]
    async fn corrupt_record_surfaces_as_wire_error() {
        let ledger = MemoryLedger::new();
        let id = NodeId::from_bytes([3; ID_LEN]);
        ledger.put_raw_node(id, vec![0xff, 0xff]).unwrap();

        let err = ledger.node(id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Wire(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let ledger = MemoryLedger::new();
        let other = ledger.clone();
        ledger.create_chatroom(member(1), 0).await.unwrap();
        assert_eq!(other.chatroom_count(), 1);
    }
}
