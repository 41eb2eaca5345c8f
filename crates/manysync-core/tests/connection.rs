//! Multi-document connection behaviour against the in-memory store.

use manysync_core::memory::{MemoryChange, MemoryDoc, MemoryEngine, MemoryOp, MemoryStore};
use manysync_core::sink::Mailbox;
use manysync_core::{
    Connection, DocMessage, ErrorCode, Message, StoreError, SyncError, VectorClock,
};
use serde_json::{Value, json};

type Outbox = Mailbox<DocMessage<MemoryChange>>;
type TestConnection = Connection<MemoryEngine, MemoryStore<MemoryDoc>, Outbox>;

fn connection(actor: &str, docs: Vec<(&str, MemoryDoc)>) -> (TestConnection, Outbox) {
    let outbox = Outbox::new();
    let conn = Connection::new(
        MemoryEngine::new(actor),
        MemoryStore::with_docs(docs),
        outbox.clone(),
    );
    (conn, outbox)
}

fn only(outbox: &Outbox) -> DocMessage<MemoryChange> {
    let mut sent = outbox.drain();
    assert_eq!(sent.len(), 1, "expected exactly one message");
    sent.remove(0).message
}

#[test]
fn doc_changed_sends_initial_changes() {
    let alpha = MemoryDoc::from_pairs("alice", [("name", json!("alpha"))]);
    let (mut conn, outbox) = connection("alice", vec![("alpha", alpha.clone())]);
    conn.add_peer("my-peer").expect("register");

    conn.doc_changed("alpha", &alpha).expect("fresh doc");
    let msg = only(&outbox);

    let wire: Value = serde_json::to_value(&msg).expect("encode");
    let keys: Vec<&str> = wire
        .as_object()
        .expect("object")
        .keys()
        .map(String::as_str)
        .collect();
    // serde_json's default map sorts keys; the byte order is checked in the
    // message module.
    assert_eq!(keys.len(), 3);
    assert_eq!(wire["docId"], json!("alpha"));
    assert_eq!(wire["changes"][0]["seq"], json!(1));
    assert_eq!(wire["clock"].as_object().map(serde_json::Map::len), Some(1));

    assert_eq!(conn.our_clock("alpha"), Some(alpha.clock()));
    assert_eq!(conn.their_clock("my-peer", "alpha"), Some(alpha.clock()));
}

#[test]
fn unchanged_document_is_not_announced_twice() {
    let alpha = MemoryDoc::from_pairs("alice", [("name", json!("alpha"))]);
    let (mut conn, outbox) = connection("alice", vec![("alpha", alpha.clone())]);
    conn.add_peer("my-peer").expect("register");

    conn.doc_changed("alpha", &alpha).expect("first");
    conn.doc_changed("alpha", &alpha).expect("second");
    assert_eq!(outbox.len(), 1);
}

#[tokio::test]
async fn empty_clock_for_a_known_doc_sends_history() {
    let alpha = MemoryDoc::from_pairs("alice", [("name", json!("alice"))]);
    let (mut conn, outbox) = connection("alice", vec![("alpha", alpha.clone())]);
    conn.add_peer("my-peer").expect("register");

    let doc = conn
        .receive_msg("my-peer", DocMessage::request("alpha"))
        .await
        .expect("receive");
    assert_eq!(doc.as_ref(), Some(&alpha));

    let msg = only(&outbox);
    let changes = msg.message.changes().expect("history");
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes[0].ops[0],
        MemoryOp::Set {
            key: "name".into(),
            value: json!("alice"),
        }
    );
}

#[tokio::test]
async fn new_document_announcement_round_trip() {
    let remote_doc = MemoryDoc::from_pairs("remote", [("name", json!("hey"))]);
    let (mut remote, remote_out) = connection("remote", vec![("some-doc", remote_doc.clone())]);
    let (mut local, local_out) = connection("local", vec![]);
    remote.add_peer("local").expect("register");
    local.add_peer("remote").expect("register");

    // The remote side announces its clock without changes.
    let announcement = DocMessage::new("some-doc", Message::clock_only(remote_doc.clock().clone()));
    let result = local
        .receive_msg("remote", announcement)
        .await
        .expect("receive announcement");
    assert!(result.is_none());

    // We have never heard of the document, so we ask with an empty clock.
    let request = only(&local_out);
    assert_eq!(request.doc_id, "some-doc");
    assert_eq!(request.message, Message::clock_only(VectorClock::new()));
    assert_eq!(local.our_clock("some-doc"), Some(&VectorClock::new()));

    // The remote answers with history starting at seq 1.
    remote
        .receive_msg("local", request)
        .await
        .expect("receive request");
    let history = only(&remote_out);
    assert_eq!(history.message.changes().map(|c| c[0].seq), Some(1));

    let persisted = local
        .receive_msg("remote", history)
        .await
        .expect("receive history")
        .expect("changes applied");
    assert_eq!(persisted, remote_doc);
    assert_eq!(local.store().writes(), 1);
    assert_eq!(local.their_clock("remote", "some-doc"), Some(remote_doc.clock()));

    // Announcing the result only acknowledges the new clock.
    local.doc_changed("some-doc", &persisted).expect("fresh");
    let ack = only(&local_out);
    assert_eq!(ack.message, Message::clock_only(remote_doc.clock().clone()));
    assert_eq!(local.our_clock("some-doc"), Some(remote_doc.clock()));

    // The remote already announced that clock, so the exchange ends there.
    remote.receive_msg("local", ack).await.expect("receive ack");
    assert!(remote_out.is_empty());

    local.doc_changed("some-doc", &persisted).expect("unchanged");
    assert!(local_out.is_empty());
}

#[tokio::test]
async fn repeated_announcements_for_an_unknown_doc_request_once() {
    let (mut conn, outbox) = connection("local", vec![]);
    conn.add_peer("remote").expect("register");
    let clock: VectorClock = [("remote", 2_u64)].into_iter().collect();

    for _ in 0..3 {
        let msg = DocMessage::new("ghost", Message::clock_only(clock.clone()));
        assert!(conn.receive_msg("remote", msg).await.expect("receive").is_none());
    }
    assert_eq!(outbox.len(), 1);
}

#[tokio::test]
async fn unregistered_peers_are_rejected_before_anything_happens() {
    let (mut conn, outbox) = connection("local", vec![]);

    let err = conn
        .receive_msg("stranger", DocMessage::request("alpha"))
        .await
        .expect_err("unknown peer");
    assert!(matches!(err, SyncError::UnknownPeer { ref peer_id } if peer_id == "stranger"));
    assert_eq!(err.code(), ErrorCode::UnknownPeer);
    assert!(outbox.is_empty());
    assert_eq!(conn.store().reads(), 0);
    assert!(conn.our_clock("alpha").is_none());

    let err = conn
        .receive_msg("", DocMessage::request("alpha"))
        .await
        .expect_err("empty id");
    assert!(matches!(err, SyncError::InvalidPeerId));
    assert!(matches!(conn.add_peer(""), Err(SyncError::InvalidPeerId)));
}

#[tokio::test]
async fn removed_peers_are_unknown_again() {
    let (mut conn, _outbox) = connection("local", vec![]);
    conn.add_peer("remote").expect("register");
    conn.add_peer("remote").expect("idempotent");
    assert_eq!(conn.peer_ids(), vec!["remote".to_owned()]);

    assert!(conn.remove_peer("remote"));
    let err = conn
        .receive_msg("remote", DocMessage::request("alpha"))
        .await
        .expect_err("removed");
    assert!(matches!(err, SyncError::UnknownPeer { .. }));
}

#[test]
fn stale_snapshots_are_refused() {
    let v1 = MemoryDoc::from_pairs("alice", [("n", json!(1))]);
    let v2 = v1.set("n", json!(2));
    let (mut conn, outbox) = connection("alice", vec![]);
    conn.add_peer("bob").expect("register");

    conn.doc_changed("notes", &v2).expect("current");
    let sent = outbox.len();

    let err = conn.doc_changed("notes", &v1).expect_err("stale");
    match err {
        SyncError::StaleDocument {
            ref doc_id,
            ref recorded,
            ref offered,
        } => {
            assert_eq!(doc_id, "notes");
            assert_eq!(recorded, v2.clock());
            assert_eq!(offered, v1.clock());
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(outbox.len(), sent);
}

#[tokio::test]
async fn received_changes_do_not_open_the_door_to_older_snapshots() {
    let (mut conn, outbox) = connection("alice", vec![]);
    conn.add_peer("bob").expect("register");
    let source = MemoryDoc::from_pairs("bob", [("k", json!(1))]);
    let msg = DocMessage::new(
        "notes",
        Message::from_parts(source.clock().clone(), source.history().to_vec()),
    );

    let persisted = conn
        .receive_msg("bob", msg)
        .await
        .expect("receive")
        .expect("changes applied");
    assert!(conn.our_clock("notes").is_none());

    // An empty snapshot tells bob nothing he lacks and nothing new.
    conn.doc_changed("notes", &MemoryDoc::new("alice")).expect("empty");
    assert!(outbox.is_empty());

    // Announcing the persisted document advances the belief clock.
    conn.doc_changed("notes", &persisted).expect("fresh");
    assert_eq!(only(&outbox).message, Message::clock_only(source.clock().clone()));
    assert_eq!(conn.our_clock("notes"), Some(source.clock()));

    let err = conn
        .doc_changed("notes", &MemoryDoc::new("alice"))
        .expect_err("older than what was announced");
    assert!(matches!(err, SyncError::StaleDocument { .. }));
    assert!(outbox.is_empty());
}

#[tokio::test]
async fn store_failures_surface_unchanged() {
    let (mut conn, _outbox) = connection("local", vec![]);
    conn.add_peer("remote").expect("register");
    let source = MemoryDoc::from_pairs("remote", [("k", json!(true))]);
    let msg = DocMessage::new(
        "alpha",
        Message::from_parts(source.clock().clone(), source.history().to_vec()),
    );

    conn.store().set_failing(true);
    let err = conn
        .receive_msg("remote", msg.clone())
        .await
        .expect_err("store is down");
    assert!(matches!(err, SyncError::Store(StoreError::Unavailable { .. })));
    assert_eq!(err.code(), ErrorCode::StoreUnavailable);

    conn.store().set_failing(false);
    let doc = conn
        .receive_msg("remote", msg)
        .await
        .expect("retry succeeds")
        .expect("changes applied");
    assert_eq!(doc, source);
}

#[tokio::test]
async fn only_change_carrying_messages_write() {
    let alpha = MemoryDoc::from_pairs("alice", [("k", json!(1))]);
    let (mut conn, _outbox) = connection("alice", vec![("alpha", alpha.clone())]);
    conn.add_peer("bob").expect("register");

    conn.receive_msg("bob", DocMessage::new("alpha", Message::clock_only(alpha.clock().clone())))
        .await
        .expect("clock only");
    assert_eq!(conn.store().writes(), 0);

    let edit = alpha.with_actor("bob").set("k", json!(2));
    let changes = edit.history()[1..].to_vec();
    conn.receive_msg("bob", DocMessage::new("alpha", Message::from_parts(edit.clock().clone(), changes)))
        .await
        .expect("with changes");
    assert_eq!(conn.store().writes(), 1);
    assert_eq!(
        conn.store().snapshot("alpha").await.and_then(|d| d.get("k").cloned()),
        Some(json!(2))
    );
}

#[tokio::test]
async fn two_connections_converge_on_concurrent_edits() {
    let (mut left, left_out) = connection("left", vec![(
        "notes",
        MemoryDoc::from_pairs("left", [("title", json!("left"))]),
    )]);
    let (mut right, right_out) = connection("right", vec![(
        "notes",
        MemoryDoc::from_pairs("right", [("body", json!("right"))]),
    )]);
    left.add_peer("right").expect("register");
    right.add_peer("left").expect("register");

    let left_doc = left.store().snapshot("notes").await.expect("seeded");
    let right_doc = right.store().snapshot("notes").await.expect("seeded");
    left.doc_changed("notes", &left_doc).expect("fresh");
    right.doc_changed("notes", &right_doc).expect("fresh");

    for _ in 0..10 {
        let to_right = left_out.drain();
        let to_left = right_out.drain();
        if to_right.is_empty() && to_left.is_empty() {
            break;
        }
        for out in to_right {
            if let Some(doc) = right.receive_msg("left", out.message).await.expect("right receive") {
                right.doc_changed("notes", &doc).expect("fresh");
            }
        }
        for out in to_left {
            if let Some(doc) = left.receive_msg("right", out.message).await.expect("left receive") {
                left.doc_changed("notes", &doc).expect("fresh");
            }
        }
    }

    assert!(left_out.is_empty() && right_out.is_empty());
    let left_doc = left.store().snapshot("notes").await.expect("left doc");
    let right_doc = right.store().snapshot("notes").await.expect("right doc");
    assert_eq!(left_doc, right_doc);
    assert_eq!(left_doc.state().len(), 2);
}
