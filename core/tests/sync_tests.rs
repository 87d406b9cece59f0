/// Chat synchronization tests
/// End-to-end scenarios over the message log, snapshot mirror, unread
/// counters, live feeds, and the inbox builder
use classline_core::chat_service::ChatService;
use classline_core::inbox::{InboxBuilder, InboxFilter};
use classline_core::message::{conversation_key, OutgoingMessage, DELETED_PLACEHOLDER};
use classline_core::prefs::PrefsStore;
use classline_core::store::StoreClient;
use classline_core::{ChatError, Role};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _tmp: TempDir,
    store: Arc<StoreClient>,
    chat: ChatService,
}

/// One parent account plus two teachers and a child, with role tables
fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(StoreClient::new(tmp.path()).unwrap());

    store
        .set("Accounts/acc-parent", &json!({"name": "Pat", "role": "parent"}))
        .unwrap();
    store
        .set("Accounts/acc-t1", &json!({"name": "Mrs Hartley", "role": "teacher"}))
        .unwrap();
    store
        .set("Accounts/acc-t2", &json!({"name": "Mr Ibarra", "role": "teacher"}))
        .unwrap();
    store
        .set("Accounts/acc-s1", &json!({"name": "Sam", "role": "student"}))
        .unwrap();

    store
        .set(
            "Parents/rec-p1",
            &json!({"role": "parent", "account": "acc-parent"}),
        )
        .unwrap();
    store
        .set(
            "Teachers/rec-t1",
            &json!({"role": "teacher", "account": "acc-t1", "subject": "Mathematics"}),
        )
        .unwrap();
    store
        .set(
            "Teachers/rec-t2",
            &json!({"role": "teacher", "account": "acc-t2", "subject": "History"}),
        )
        .unwrap();
    store
        .set(
            "Students/rec-s1",
            &json!({"role": "student", "account": "acc-s1", "grade": "5", "section": "B"}),
        )
        .unwrap();

    let chat = ChatService::new(store.clone());
    Fixture {
        _tmp: tmp,
        store,
        chat,
    }
}

#[test]
fn send_updates_snapshot_counters_and_both_rows() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    f.chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "hi"))
        .unwrap();

    // Receiver unread 1, sender unread 0
    assert_eq!(f.chat.unread(&key, "acc-t1").unwrap(), 1);
    assert_eq!(f.chat.unread(&key, "acc-parent").unwrap(), 0);

    // Canonical snapshot
    let last = f.chat.last_message(&key).unwrap().unwrap();
    assert_eq!(last.text, "hi");
    assert_eq!(last.sender, "acc-parent");
    assert!(!last.seen);

    // Both inbox rows carry identical last-message content
    let row_parent = f
        .store
        .get(&format!("Inbox/acc-parent/{}", key))
        .unwrap()
        .unwrap();
    let row_teacher = f
        .store
        .get(&format!("Inbox/acc-t1/{}", key))
        .unwrap()
        .unwrap();
    assert_eq!(row_parent["lastMessage"], row_teacher["lastMessage"]);
    assert_eq!(row_parent["lastMessage"]["text"], "hi");
    assert_eq!(row_parent["unread"], 0);
    assert_eq!(row_teacher["unread"], 1);
    assert_eq!(row_parent["counterpart"], "acc-t1");
    assert_eq!(row_teacher["counterpart"], "acc-parent");
}

#[test]
fn list_is_ordered_and_complete() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    for i in 0..10 {
        let (from, to) = if i % 2 == 0 {
            ("acc-parent", "acc-t1")
        } else {
            ("acc-t1", "acc-parent")
        };
        f.chat
            .append(&key, OutgoingMessage::text(from, to, &format!("msg {}", i)))
            .unwrap();
    }

    let log = f.chat.list(&key).unwrap();
    assert_eq!(log.len(), 10);
    for pair in log.windows(2) {
        assert!(pair[0].time_stamp <= pair[1].time_stamp);
        assert!(pair[0].id < pair[1].id);
    }
}

#[test]
fn two_rapid_sends_count_two_unread() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    f.chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "one"))
        .unwrap();
    f.chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "two"))
        .unwrap();

    assert_eq!(f.chat.unread(&key, "acc-t1").unwrap(), 2);
}

#[test]
fn mark_read_zeroes_counter_and_flips_read_receipt() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    f.chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "hi"))
        .unwrap();

    f.chat.mark_read(&key, "acc-t1").unwrap();

    assert_eq!(f.chat.unread(&key, "acc-t1").unwrap(), 0);
    // Sender-side read receipt
    let last = f.chat.last_message(&key).unwrap().unwrap();
    assert!(last.seen);
    // Mirrored into the sender's row too
    let row = f
        .store
        .get(&format!("Inbox/acc-parent/{}", key))
        .unwrap()
        .unwrap();
    assert_eq!(row["lastMessage"]["seen"], true);
    // Sender unread stays 0
    assert_eq!(f.chat.unread(&key, "acc-parent").unwrap(), 0);

    // Stays 0 until the next receive
    f.chat.mark_read(&key, "acc-t1").unwrap();
    assert_eq!(f.chat.unread(&key, "acc-t1").unwrap(), 0);
    f.chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "again"))
        .unwrap();
    assert_eq!(f.chat.unread(&key, "acc-t1").unwrap(), 1);
}

#[test]
fn sending_zeroes_the_senders_own_unread() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    f.chat
        .append(&key, OutgoingMessage::text("acc-t1", "acc-parent", "note home"))
        .unwrap();
    assert_eq!(f.chat.unread(&key, "acc-parent").unwrap(), 1);

    // Replying implies the parent has seen the conversation
    f.chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "thanks"))
        .unwrap();
    assert_eq!(f.chat.unread(&key, "acc-parent").unwrap(), 0);
    assert_eq!(f.chat.unread(&key, "acc-t1").unwrap(), 1);
}

#[test]
fn edit_keeps_timestamp_and_refreshes_both_rows() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    let id = f
        .chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "hi"))
        .unwrap();
    let before = f.chat.list(&key).unwrap()[0].time_stamp;

    f.chat.edit(&key, "acc-parent", &id, "hello").unwrap();

    let log = f.chat.list(&key).unwrap();
    assert_eq!(log[0].text, "hello");
    assert!(log[0].edited);
    // Edit must not re-sort recency
    assert_eq!(log[0].time_stamp, before);

    for viewer in ["acc-parent", "acc-t1"] {
        let row = f
            .store
            .get(&format!("Inbox/{}/{}", viewer, key))
            .unwrap()
            .unwrap();
        assert_eq!(row["lastMessage"]["text"], "hello");
    }
}

#[test]
fn edit_of_non_latest_message_leaves_snapshot_alone() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    let first = f
        .chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "first"))
        .unwrap();
    f.chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "second"))
        .unwrap();

    f.chat.edit(&key, "acc-parent", &first, "first (fixed)").unwrap();

    let last = f.chat.last_message(&key).unwrap().unwrap();
    assert_eq!(last.text, "second");
}

#[test]
fn soft_delete_latest_writes_placeholder_everywhere() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    let id = f
        .chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "typo"))
        .unwrap();
    f.chat.soft_delete(&key, "acc-parent", &id).unwrap();

    let log = f.chat.list(&key).unwrap();
    assert_eq!(log.len(), 1); // retained for ordering
    assert!(log[0].deleted);
    assert!(log[0].text.is_empty());

    assert_eq!(
        f.chat.last_message(&key).unwrap().unwrap().text,
        DELETED_PLACEHOLDER
    );
    for viewer in ["acc-parent", "acc-t1"] {
        let row = f
            .store
            .get(&format!("Inbox/{}/{}", viewer, key))
            .unwrap()
            .unwrap();
        assert_eq!(row["lastMessage"]["text"], DELETED_PLACEHOLDER);
    }
}

#[test]
fn soft_delete_non_latest_leaves_snapshot_alone() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    let first = f
        .chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "first"))
        .unwrap();
    f.chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "second"))
        .unwrap();

    f.chat.soft_delete(&key, "acc-parent", &first).unwrap();
    assert_eq!(f.chat.last_message(&key).unwrap().unwrap().text, "second");
}

#[test]
fn mutations_by_non_sender_are_rejected() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    let id = f
        .chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "hi"))
        .unwrap();

    assert!(matches!(
        f.chat.edit(&key, "acc-t1", &id, "x"),
        Err(ChatError::PermissionDenied(_))
    ));
    assert!(matches!(
        f.chat.soft_delete(&key, "acc-t1", &id),
        Err(ChatError::PermissionDenied(_))
    ));
    // Missing message surfaces as NotFound, not a crash
    assert!(matches!(
        f.chat.edit(&key, "acc-parent", "no-such-id", "x"),
        Err(ChatError::NotFound(_))
    ));
}

#[tokio::test]
async fn watch_messages_re_emits_full_ordered_log() {
    let f = fixture();
    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    let mut feed = f.chat.watch_messages(&key);
    assert!(feed.next().await.unwrap().is_empty()); // initial, empty log

    f.chat
        .append(&key, OutgoingMessage::text("acc-parent", "acc-t1", "one"))
        .unwrap();
    let log = feed.next().await.unwrap();
    assert_eq!(log.len(), 1);

    f.chat
        .append(&key, OutgoingMessage::text("acc-t1", "acc-parent", "two"))
        .unwrap();
    let log = feed.next().await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].text, "one");
    assert_eq!(log[1].text, "two");

    feed.unsubscribe();
    feed.unsubscribe(); // idempotent
}

#[tokio::test]
async fn inbox_lists_filters_and_sorts() {
    let f = fixture();
    let builder = InboxBuilder::new(f.store.clone(), 8);

    let key_t1 = conversation_key("acc-parent", "acc-t1").unwrap();
    f.chat
        .append(&key_t1, OutgoingMessage::text("acc-t1", "acc-parent", "homework"))
        .unwrap();

    // Teachers tab: both teachers listed, the one with activity first
    let rows = builder
        .build("acc-parent", &InboxFilter::role(Role::Teacher), &HashSet::new())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].counterpart.id, "acc-t1");
    assert_eq!(rows[0].unread, 1);
    assert_eq!(rows[1].counterpart.id, "acc-t2");
    assert!(rows[1].last_message.is_none());

    // Pinning the idle teacher hoists them above recency
    let mut pinned = HashSet::new();
    pinned.insert(conversation_key("acc-parent", "acc-t2").unwrap());
    let rows = builder
        .build("acc-parent", &InboxFilter::role(Role::Teacher), &pinned)
        .await
        .unwrap();
    assert_eq!(rows[0].counterpart.id, "acc-t2");
    assert!(rows[0].pinned);

    // Search hits the subject descriptor
    let rows = builder
        .build(
            "acc-parent",
            &InboxFilter::role(Role::Teacher).with_search("mathem"),
            &HashSet::new(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].counterpart.id, "acc-t1");

    // Search hits last-message text
    let rows = builder
        .build(
            "acc-parent",
            &InboxFilter::default().with_search("homework"),
            &HashSet::new(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, key_t1);
}

#[tokio::test]
async fn unfiltered_inbox_excludes_viewer() {
    let f = fixture();
    let builder = InboxBuilder::new(f.store.clone(), 8);

    let rows = builder
        .build("acc-parent", &InboxFilter::default(), &HashSet::new())
        .await
        .unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r.counterpart.id.as_str()).collect();
    assert!(!ids.contains(&"acc-parent"));
    assert_eq!(ids.len(), 3); // child + two teachers
}

#[tokio::test]
async fn client_end_to_end_image_message_and_live_inbox_row() {
    let tmp = TempDir::new().unwrap();
    let config = classline_core::Config {
        data_dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let client = classline_core::ChatClient::open(config).unwrap();

    client
        .store
        .set("Accounts/acc-parent", &json!({"name": "Pat", "role": "parent"}))
        .unwrap();
    client
        .store
        .set("Accounts/acc-t1", &json!({"name": "Mrs Hartley", "role": "teacher"}))
        .unwrap();
    client
        .store
        .set(
            "Teachers/rec-t1",
            &json!({"role": "teacher", "account": "acc-t1", "subject": "Mathematics"}),
        )
        .unwrap();

    let key = conversation_key("acc-parent", "acc-t1").unwrap();

    // Watch the teacher's inbox row the way the messages screen does
    let row_path = format!("Inbox/acc-t1/{}", key);
    let mut scope = client.subscriptions.attach("inbox:acc-t1", &[row_path]);
    assert!(scope.next().await.unwrap().snapshot.is_none()); // initial

    // Image message: upload first, then send the URL
    let url = client.blobs.upload(b"jpeg bytes".to_vec()).unwrap();
    client
        .chat
        .append(&key, OutgoingMessage::image("acc-parent", "acc-t1", &url))
        .unwrap();

    let event = scope.next().await.unwrap();
    let snapshot = event.snapshot.unwrap();
    assert_eq!(snapshot["unread"], 1);
    assert_eq!(snapshot["lastMessage"]["type"], "image");

    let log = client.chat.list(&key).unwrap();
    assert_eq!(log[0].attachment.as_deref(), Some(url.as_str()));
    assert!(client.blobs.fetch(&url).unwrap().is_some());

    // Re-derive the rendered row from the stored mirror
    let row = client
        .inbox
        .refresh_row("acc-t1", &key, false)
        .unwrap()
        .unwrap();
    assert_eq!(row.counterpart.id, "acc-parent");
    assert_eq!(row.unread, 1);

    client.close();
}

#[test]
fn pins_survive_restart() {
    let tmp = TempDir::new().unwrap();
    {
        let prefs = PrefsStore::new(tmp.path()).unwrap();
        prefs.pin("acc-parent", "acc-parent_acc-t1").unwrap();
    }
    let prefs = PrefsStore::new(tmp.path()).unwrap();
    assert!(prefs
        .pinned("acc-parent")
        .unwrap()
        .contains("acc-parent_acc-t1"));
}
