//! Chain read and write tests against an in-memory ledger.
//!
//! Covers:
//! - history order and the hello/world round trip
//! - placeholders for undecryptable messages
//! - truncation on missing, foreign, cyclic and over-long chains
//! - conflict rejection and bounded send retries
//! - tip read failures, concurrent reads and refresh supersession
//! - cache entries bound to the decrypting key
//! - a fresh nonce for every send

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use ledgerchat_client::{
    ChainGap, ChainReader, ChainWriter, ChatClient, ClientConfig, ClientError, MessageContent,
    SystemEnv, UNAVAILABLE_TEXT, WriteOutcome,
};
use ledgerchat_core::{
    ChainEvent, ChaoticLedger, Environment, Ledger, LedgerError, MemoryDirectory, MemoryLedger,
    NotificationHub, RetryPolicy,
};
use ledgerchat_crypto::{SymmetricKey, encrypt};
use ledgerchat_proto::{
    AppendOutcome, ChatNode, Chatroom, ChatroomId, ChatroomTip, ID_LEN, MemberId, NodeId,
    SYSTEM_MARKER_TEXT,
};
use proptest::prelude::*;

type Client<L = MemoryLedger> = ChatClient<L, MemoryDirectory, SystemEnv>;

fn member(byte: u8) -> MemberId {
    MemberId::from_bytes([byte; ID_LEN])
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        deadline: None,
        jitter: true,
    }
}

fn fast_config() -> ClientConfig {
    ClientConfig { read_retry: fast_retry(3), send_retry: fast_retry(5), ..ClientConfig::default() }
}

fn client_on<L: Ledger + 'static>(ledger: Arc<L>, directory: &MemoryDirectory) -> Client<L> {
    ChatClient::new(member(1), ledger, Arc::new(directory.clone()), SystemEnv, fast_config())
}

/// A chatroom created by member 1 with its key.
async fn chatroom<L: Ledger + 'static>(client: &Client<L>) -> (ChatroomId, SymmetricKey) {
    let room = client.create_chatroom(&[]).await.unwrap();
    let key = client.chatroom_key(room.id).await.unwrap();
    (room.id, key)
}

fn sealed(room: ChatroomId, previous: NodeId, key: &SymmetricKey, text: &str) -> ChatNode {
    ChatNode {
        chatroom_id: room,
        sender: member(1),
        timestamp_ms: 0,
        previous: Some(previous),
        payload: Bytes::from(encrypt(text, key, &mut SystemEnv.rng()).unwrap()),
    }
}

/// Memory ledger with switchable misbehaviour.
#[derive(Default)]
struct TestLedger {
    inner: MemoryLedger,
    always_conflict: AtomicBool,
    broken_node: Mutex<Option<NodeId>>,
    on_node: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

#[async_trait]
impl Ledger for TestLedger {
    async fn create_chatroom(
        &self,
        creator: MemberId,
        created_at_ms: u64,
    ) -> Result<Chatroom, LedgerError> {
        self.inner.create_chatroom(creator, created_at_ms).await
    }

    async fn chatroom(&self, id: ChatroomId) -> Result<Option<Chatroom>, LedgerError> {
        self.inner.chatroom(id).await
    }

    async fn chatroom_tip(&self, id: ChatroomId) -> Result<Option<ChatroomTip>, LedgerError> {
        self.inner.chatroom_tip(id).await
    }

    async fn node(&self, id: NodeId) -> Result<Option<ChatNode>, LedgerError> {
        if let Some(hook) = self.on_node.lock().unwrap().as_ref() {
            hook();
        }
        tokio::task::yield_now().await;
        if *self.broken_node.lock().unwrap() == Some(id) {
            return Err(LedgerError::Unavailable("node shard down".to_string()));
        }
        self.inner.node(id).await
    }

    async fn append_node(
        &self,
        chatroom: ChatroomId,
        expected_tip: NodeId,
        node: ChatNode,
    ) -> Result<AppendOutcome, LedgerError> {
        if self.always_conflict.load(Ordering::SeqCst) {
            let actual = self.inner.chatroom_tip(chatroom).await?.unwrap_or_default();
            return Ok(AppendOutcome::Conflict { actual });
        }
        self.inner.append_node(chatroom, expected_tip, node).await
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[tokio::test]
async fn hello_world_round_trip() {
    let ledger = MemoryLedger::new();
    let client = client_on(Arc::new(ledger.clone()), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    let hello = client.send_message(room, &key, "hello").await.unwrap();
    let world = client.send_message(room, &key, "world").await.unwrap();

    let world_node = ledger.node(world.node_id).await.unwrap().unwrap();
    assert_eq!(world_node.previous, Some(hello.node_id));

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert!(history.is_complete());
    assert_eq!(history.texts(), vec![SYSTEM_MARKER_TEXT, "hello", "world"]);
    assert_eq!(history.tip.tip, Some(world.node_id));
    assert_eq!(history.tip.version, 3);
    assert_eq!(history.entries[0].content, MessageContent::System(SYSTEM_MARKER_TEXT.into()));
    assert_eq!(history.entries[1].sender, member(1));
}

#[tokio::test]
async fn new_chatroom_holds_only_the_marker() {
    let client = client_on(Arc::new(MemoryLedger::new()), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.entries.len(), 1);
    assert_eq!(history.tip.version, 1);
    assert!(matches!(&history.entries[0].content, MessageContent::System(_)));
}

#[tokio::test]
async fn undecryptable_message_becomes_placeholder() {
    let ledger = Arc::new(MemoryLedger::new());
    let client = client_on(Arc::clone(&ledger), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    client.send_message(room, &key, "one").await.unwrap();

    let stranger_key = SymmetricKey::from_bytes([0x42; 32]);
    let stranger = ChainWriter::new(Arc::clone(&ledger), SystemEnv, member(9));
    let outcome = stranger.append_once(room, &stranger_key, "two").await.unwrap();
    assert!(matches!(outcome, WriteOutcome::Appended(_)));

    client.send_message(room, &key, "three").await.unwrap();

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert!(history.is_complete());
    assert_eq!(history.texts(), vec![SYSTEM_MARKER_TEXT, "one", UNAVAILABLE_TEXT, "three"]);
    assert_eq!(history.entries[2].content, MessageContent::Unavailable);
    assert_eq!(history.entries[2].sender, member(9));
}

#[tokio::test]
async fn placeholders_are_not_cached() {
    let ledger = Arc::new(MemoryLedger::new());
    let client = client_on(Arc::clone(&ledger), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    let stranger = ChainWriter::new(Arc::clone(&ledger), SystemEnv, member(9));
    stranger.append_once(room, &SymmetricKey::from_bytes([0x42; 32]), "x").await.unwrap();

    client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(client.reader().cache().len(), 1);
}

#[tokio::test]
async fn cached_nodes_survive_ledger_loss() {
    let ledger = MemoryLedger::new();
    let client = client_on(Arc::new(ledger.clone()), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;
    let sent = client.send_message(room, &key, "kept").await.unwrap();

    client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(client.reader().cache().len(), 2);
    assert!(ledger.remove_node(sent.node_id));

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert!(history.is_complete());
    assert_eq!(history.texts(), vec![SYSTEM_MARKER_TEXT, "kept"]);
}

#[tokio::test]
async fn missing_node_truncates_history() {
    let ledger = MemoryLedger::new();
    let client = client_on(Arc::new(ledger.clone()), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    client.send_message(room, &key, "a").await.unwrap();
    let b = client.send_message(room, &key, "b").await.unwrap();
    client.send_message(room, &key, "c").await.unwrap();
    assert!(ledger.remove_node(b.node_id));

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.texts(), vec!["c"]);
    assert_eq!(history.gap, Some(ChainGap::Missing { id: b.node_id }));
}

#[tokio::test]
async fn foreign_node_stops_walk() {
    let ledger = MemoryLedger::new();
    let client = client_on(Arc::new(ledger.clone()), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;
    let (other, _) = chatroom(&client).await;
    let other_marker = ledger.chatroom_tip(other).await.unwrap().unwrap().tip.unwrap();

    let forged = NodeId::from_bytes([0xF0; ID_LEN]);
    ledger.put_node_unchecked(forged, &sealed(room, other_marker, &key, "forged")).unwrap();
    ledger.set_tip_unchecked(room, ChatroomTip { tip: Some(forged), version: 9 }).unwrap();

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.texts(), vec!["forged"]);
    assert_eq!(history.gap, Some(ChainGap::ForeignNode { id: other_marker, chatroom: other }));
}

#[tokio::test]
async fn cyclic_chain_stops_walk() {
    let ledger = MemoryLedger::new();
    let client = client_on(Arc::new(ledger.clone()), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    let a = NodeId::from_bytes([0xA0; ID_LEN]);
    let b = NodeId::from_bytes([0xB0; ID_LEN]);
    ledger.put_node_unchecked(a, &sealed(room, b, &key, "a")).unwrap();
    ledger.put_node_unchecked(b, &sealed(room, a, &key, "b")).unwrap();
    ledger.set_tip_unchecked(room, ChatroomTip { tip: Some(a), version: 7 }).unwrap();

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.texts(), vec!["b", "a"]);
    assert_eq!(history.gap, Some(ChainGap::Cycle { id: a }));
}

#[tokio::test]
async fn walk_stops_at_length_limit() {
    let config = ClientConfig { max_chain_length: 2, ..fast_config() };
    let client = ChatClient::new(
        member(1),
        Arc::new(MemoryLedger::new()),
        Arc::new(MemoryDirectory::new()),
        SystemEnv,
        config,
    );
    let room = client.create_chatroom(&[]).await.unwrap().id;
    let key = client.chatroom_key(room).await.unwrap();
    for text in ["1", "2", "3"] {
        client.send_message(room, &key, text).await.unwrap();
    }

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.texts(), vec!["2", "3"]);
    assert_eq!(history.gap, Some(ChainGap::TooLong { limit: 2 }));
}

#[tokio::test]
async fn stale_tip_append_is_rejected() {
    let ledger = MemoryLedger::new();
    let client = client_on(Arc::new(ledger.clone()), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    let observed = ledger.chatroom_tip(room).await.unwrap().unwrap();
    let winner = client.send_message(room, &key, "first").await.unwrap();

    let stale = sealed(room, observed.tip.unwrap(), &key, "late");
    let outcome = ledger.append_node(room, observed.tip.unwrap(), stale).await.unwrap();
    assert_eq!(
        outcome,
        AppendOutcome::Conflict { actual: ChatroomTip { tip: Some(winner.node_id), version: 2 } }
    );

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.texts(), vec![SYSTEM_MARKER_TEXT, "first"]);
}

#[tokio::test]
async fn send_gives_up_after_repeated_conflicts() {
    let ledger = Arc::new(TestLedger::default());
    let client = client_on(Arc::clone(&ledger), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;
    ledger.always_conflict.store(true, Ordering::SeqCst);

    let err = client.send_message(room, &key, "never lands").await.unwrap_err();
    assert_eq!(err, ClientError::AppendConflict { chatroom: room, attempts: 5 });
    assert_eq!(err.user_message(), "failed to send, tap to retry");
    assert_eq!(ledger.inner.node_count(), 1);
}

#[tokio::test]
async fn send_retries_transient_failures() {
    let ledger = Arc::new(ChaoticLedger::new(MemoryLedger::new(), 0.0, 7));
    let client = client_on(Arc::clone(&ledger), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    ledger.fail_next(2);
    client.send_message(room, &key, "eventually").await.unwrap();
    assert_eq!(ledger.injected_failures(), 2);

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.texts(), vec![SYSTEM_MARKER_TEXT, "eventually"]);
}

#[tokio::test]
async fn tip_read_failure_surfaces_after_retries() {
    let ledger = Arc::new(ChaoticLedger::new(MemoryLedger::new(), 0.0, 7));
    let client = client_on(Arc::clone(&ledger), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    ledger.fail_next(3);
    let err = client.read_chat_history(room, &key).await.unwrap_err();
    assert!(matches!(err, ClientError::ChainRead { chatroom, attempts: 3, .. } if chatroom == room));
    assert!(!err.is_fatal());

    assert!(client.read_chat_history(room, &key).await.unwrap().is_complete());
}

#[tokio::test]
async fn node_read_failure_keeps_partial_history() {
    let ledger = Arc::new(TestLedger::default());
    let client = client_on(Arc::clone(&ledger), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    let a = client.send_message(room, &key, "a").await.unwrap();
    client.send_message(room, &key, "b").await.unwrap();
    *ledger.broken_node.lock().unwrap() = Some(a.node_id);

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.texts(), vec!["b"]);
    assert!(matches!(history.gap, Some(ChainGap::ReadFailed { id, .. }) if id == a.node_id));
}

#[tokio::test]
async fn newer_refresh_supersedes_older() {
    let ledger = Arc::new(TestLedger::default());
    let client = client_on(Arc::clone(&ledger), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;
    client.send_message(room, &key, "a").await.unwrap();

    let reader: ChainReader<TestLedger, SystemEnv> = client.reader().clone();
    *ledger.on_node.lock().unwrap() = Some(Box::new(move || {
        reader.guard().begin(room);
    }));

    let err = client.reader().read_latest(room, &key).await.unwrap_err();
    assert_eq!(err, ClientError::Superseded { chatroom: room });

    // plain reads ignore the guard
    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.texts(), vec![SYSTEM_MARKER_TEXT, "a"]);

    *ledger.on_node.lock().unwrap() = None;
    assert!(client.reader().read_latest(room, &key).await.unwrap().is_complete());
}

#[tokio::test]
async fn concurrent_reads_both_complete() {
    let ledger = Arc::new(TestLedger::default());
    let client = client_on(Arc::clone(&ledger), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;
    for text in ["a", "b", "c"] {
        client.send_message(room, &key, text).await.unwrap();
    }
    client.reader().cache().clear();

    let other = client.clone();
    let (first, second) =
        tokio::join!(client.read_chat_history(room, &key), other.read_chat_history(room, &key));

    let expected = vec![SYSTEM_MARKER_TEXT, "a", "b", "c"];
    assert_eq!(first.unwrap().texts(), expected);
    assert_eq!(second.unwrap().texts(), expected);
}

#[tokio::test]
async fn cached_plaintext_is_not_served_to_another_key() {
    let ledger = Arc::new(MemoryLedger::new());
    let client = client_on(Arc::clone(&ledger), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;
    let sent = client.send_message(room, &key, "secret").await.unwrap();

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.entries[1].content, MessageContent::Text("secret".into()));
    assert!(client.reader().cache().contains(&key, sent.node_id));

    let wrong = SymmetricKey::from_bytes([0x42; 32]);
    let history = client.read_chat_history(room, &wrong).await.unwrap();
    assert_eq!(history.entries[1].content, MessageContent::Unavailable);
    assert_eq!(history.entries[0].content, MessageContent::System(SYSTEM_MARKER_TEXT.into()));
    assert!(!client.reader().cache().contains(&wrong, sent.node_id));
}

#[tokio::test]
async fn repeated_text_is_sealed_under_fresh_nonces() {
    let ledger = Arc::new(MemoryLedger::new());
    let client = client_on(Arc::clone(&ledger), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    let first = client.send_message(room, &key, "same").await.unwrap();
    let second = client.send_message(room, &key, "same").await.unwrap();

    let first = ledger.node(first.node_id).await.unwrap().unwrap();
    let second = ledger.node(second.node_id).await.unwrap().unwrap();
    assert_ne!(first.payload[..12], second.payload[..12]);
    assert_ne!(first.payload, second.payload);

    let writer = ChainWriter::new(Arc::clone(&ledger), SystemEnv, member(2));
    let outcome = writer.append_once(room, &key, "same").await.unwrap();
    assert!(matches!(outcome, WriteOutcome::Appended(_)));
    let tip = ledger.chatroom_tip(room).await.unwrap().unwrap().tip.unwrap();
    let third = ledger.node(tip).await.unwrap().unwrap();
    assert_ne!(third.payload, second.payload);

    let history = client.read_chat_history(room, &key).await.unwrap();
    assert_eq!(history.texts(), vec![SYSTEM_MARKER_TEXT, "same", "same", "same"]);
}

#[tokio::test]
async fn unknown_chatroom_is_not_found() {
    let client = client_on(Arc::new(MemoryLedger::new()), &MemoryDirectory::new());
    let room = ChatroomId::from_bytes([0xEE; ID_LEN]);
    let key = SymmetricKey::from_bytes([1; 32]);

    let err = client.read_chat_history(room, &key).await.unwrap_err();
    assert_eq!(err, ClientError::ChatroomNotFound { chatroom: room });

    let err = client.send_message(room, &key, "hi").await.unwrap_err();
    assert_eq!(err, ClientError::ChatroomNotFound { chatroom: room });
}

#[tokio::test]
async fn blank_messages_are_rejected() {
    let ledger = MemoryLedger::new();
    let client = client_on(Arc::new(ledger.clone()), &MemoryDirectory::new());
    let (room, key) = chatroom(&client).await;

    for text in ["", "   ", "\n\t"] {
        assert_eq!(client.send_message(room, &key, text).await, Err(ClientError::EmptyMessage));
    }
    assert_eq!(ledger.node_count(), 1);
}

#[tokio::test]
async fn create_chatroom_issues_keys_once_per_member() {
    let directory = MemoryDirectory::new();
    let client = client_on(Arc::new(MemoryLedger::new()), &directory);

    let room = client.create_chatroom(&[member(2), member(3), member(2), member(1)]).await.unwrap();

    assert_eq!(room.creator, member(1));
    for m in [1, 2, 3] {
        assert_eq!(directory.keys_for(member(m)).unwrap(), vec![room.id]);
    }
    assert!(directory.keys_for(member(4)).unwrap().is_empty());

    let outsider = ChatClient::new(
        member(4),
        Arc::new(MemoryLedger::new()),
        Arc::new(directory.clone()),
        SystemEnv,
        fast_config(),
    );
    let err = outsider.chatroom_key(room.id).await.unwrap_err();
    assert_eq!(err, ClientError::NotAuthorized { member: member(4), chatroom: room.id });
    assert_eq!(err.user_message(), "you don't have access to this conversation");
}

#[tokio::test]
async fn members_share_one_key() {
    let ledger = Arc::new(MemoryLedger::new());
    let directory = MemoryDirectory::new();
    let alice = client_on(Arc::clone(&ledger), &directory);
    let bob = ChatClient::new(
        member(2),
        Arc::clone(&ledger),
        Arc::new(directory.clone()),
        SystemEnv,
        fast_config(),
    );

    let room = alice.create_chatroom(&[member(2)]).await.unwrap().id;
    let alice_key = alice.chatroom_key(room).await.unwrap();
    let bob_key = bob.chatroom_key(room).await.unwrap();
    assert_eq!(alice_key, bob_key);

    alice.send_message(room, &alice_key, "hi bob").await.unwrap();
    bob.send_message(room, &bob_key, "hi alice").await.unwrap();

    let history = bob.read_chat_history(room, &bob_key).await.unwrap();
    assert_eq!(history.texts(), vec![SYSTEM_MARKER_TEXT, "hi bob", "hi alice"]);
    assert_eq!(history.entries[2].sender, member(2));
}

#[tokio::test]
async fn send_publishes_notification() {
    let hub = NotificationHub::default();
    let mut events = hub.subscribe();
    let client =
        client_on(Arc::new(MemoryLedger::new()), &MemoryDirectory::new()).with_notifications(hub);
    let (room, key) = chatroom(&client).await;

    let sent = client.send_message(room, &key, "ping").await.unwrap();
    let event = events.recv().await.unwrap();
    assert_eq!(
        event,
        ChainEvent::Appended { chatroom: room, node_id: sent.node_id, version: sent.version }
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn history_preserves_send_order(messages in prop::collection::vec("[a-z ]{0,8}[a-z]", 1..8)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        let history = runtime.block_on(async {
            let client = client_on(Arc::new(MemoryLedger::new()), &MemoryDirectory::new());
            let (room, key) = chatroom(&client).await;
            for text in &messages {
                client.send_message(room, &key, text).await.unwrap();
            }
            client.read_chat_history(room, &key).await.unwrap()
        });

        prop_assert!(history.is_complete());
        prop_assert_eq!(history.entries.len(), messages.len() + 1);
        prop_assert_eq!(history.texts()[0], SYSTEM_MARKER_TEXT);
        for (entry, sent) in history.entries[1..].iter().zip(&messages) {
            prop_assert_eq!(entry.text(), sent.as_str());
        }
    }
}
