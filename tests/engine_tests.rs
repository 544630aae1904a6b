//! Integration tests against a fully assembled `Engine`, using isolated
//! on-disk SQLite databases per test via `tempfile::TempDir`.

use std::time::Duration;

use chatstore::config::EngineConfig;
use chatstore::model::{ConnectionType, CreateSessionRequest, PostMessageRequest};
use chatstore::{Engine, StoreError};

fn test_config(dir: &tempfile::TempDir) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.db_path = dir.path().join("chatstore.sqlite3");
    config.snapshot_interval = Duration::from_millis(50);
    config.flush_interval = Duration::from_millis(50);
    config.hard_delete_after_days = 7;
    config
}

fn post_req(channel_id: i64, author: Option<i64>, nickname: &str, content: &str) -> PostMessageRequest {
    PostMessageRequest {
        channel_id,
        subchannel_id: None,
        parent_id: None,
        author_user_id: author,
        author_nickname: nickname.to_string(),
        content: content.to_string(),
    }
}

#[tokio::test]
async fn recovers_live_messages_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    let engine = Engine::open(config.clone()).await.unwrap();
    let general = engine.get_channel_by_name("general").unwrap();
    let posted = engine.post_message(post_req(general.id, Some(1), "alice", "hello")).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.close().await;

    let engine = Engine::open(config).await.unwrap();
    let recovered = engine.get_message(posted.id).unwrap();
    assert_eq!(recovered.content, "hello");
    engine.close().await;
}

#[tokio::test]
async fn retention_sweep_hard_deletes_old_soft_deleted_messages() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.hard_delete_after_days = 0; // any soft-delete is immediately eligible

    let engine = Engine::open(config).await.unwrap();
    let general = engine.get_channel_by_name("general").unwrap();
    let posted = engine.post_message(post_req(general.id, Some(1), "alice", "bye")).unwrap();
    engine.soft_delete_message(posted.id, "alice").unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(matches!(
        engine.get_message(posted.id),
        Err(StoreError::NotFound(_, _))
    ));
    engine.close().await;
}

#[tokio::test]
async fn reply_count_is_recomputed_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    let engine = Engine::open(config.clone()).await.unwrap();
    let general = engine.get_channel_by_name("general").unwrap();
    let root = engine.post_message(post_req(general.id, Some(1), "alice", "root")).unwrap();

    let mut reply = post_req(general.id, Some(2), "bob", "reply 1");
    reply.parent_id = Some(root.id);
    engine.post_message(reply.clone()).unwrap();
    reply.content = "reply 2".into();
    engine.post_message(reply).unwrap();

    assert_eq!(engine.count_replies(root.id).unwrap(), 2);
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.close().await;

    let engine = Engine::open(config).await.unwrap();
    assert_eq!(engine.count_replies(root.id).unwrap(), 2);
    engine.close().await;
}

#[tokio::test]
async fn nested_replies_share_one_thread_root() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(test_config(&dir)).await.unwrap();
    let general = engine.get_channel_by_name("general").unwrap();

    let root = engine.post_message(post_req(general.id, Some(1), "alice", "root")).unwrap();
    let mut child = post_req(general.id, Some(2), "bob", "child");
    child.parent_id = Some(root.id);
    let child = engine.post_message(child).unwrap();
    assert_eq!(child.thread_root_id, Some(root.id));

    let mut grandchild = post_req(general.id, Some(3), "carol", "grandchild");
    grandchild.parent_id = Some(child.id);
    let grandchild = engine.post_message(grandchild).unwrap();
    assert_eq!(grandchild.thread_root_id, Some(root.id));

    let thread = engine.get_thread_messages(root.id);
    assert_eq!(thread.len(), 2);
    engine.close().await;
}

#[tokio::test]
async fn batch_snapshot_flushes_thousands_of_messages() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let engine = Engine::open(config).await.unwrap();
    let general = engine.get_channel_by_name("general").unwrap();

    for i in 0..5_000 {
        engine
            .post_message(post_req(general.id, Some(1), "alice", &format!("msg {i}")))
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    let durable = engine.durable();
    assert_eq!(durable.scan_live_messages().unwrap().len(), 5_000);
    engine.close().await;
}

#[tokio::test]
async fn ownership_is_enforced_on_edit_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(test_config(&dir)).await.unwrap();
    let general = engine.get_channel_by_name("general").unwrap();

    let owned = engine.post_message(post_req(general.id, Some(1), "alice", "mine")).unwrap();
    assert!(matches!(
        engine.update_message(owned.id, Some(2), "hijacked".into()),
        Err(StoreError::NotOwned(_))
    ));
    assert!(engine.update_message(owned.id, Some(1), "edited".into()).is_ok());

    let anonymous = engine.post_message(post_req(general.id, None, "anon", "anon msg")).unwrap();
    assert!(matches!(
        engine.update_message(anonymous.id, None, "x".into()),
        Err(StoreError::CannotEditAnonymous)
    ));

    engine.soft_delete_message(owned.id, "alice").unwrap();
    assert!(matches!(
        engine.soft_delete_message(owned.id, "alice"),
        Err(StoreError::AlreadyDeleted(_))
    ));
    assert!(matches!(
        engine.update_message(owned.id, Some(1), "y".into()),
        Err(StoreError::CannotEditDeleted)
    ));

    engine.close().await;
}

#[tokio::test]
async fn migrations_are_idempotent_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    let engine = Engine::open(config.clone()).await.unwrap();
    let (v1, latest1, pending1) = engine.durable().migration_status().unwrap();
    engine.close().await;

    let engine = Engine::open(config).await.unwrap();
    let (v2, latest2, pending2) = engine.durable().migration_status().unwrap();

    assert_eq!(v1, v2);
    assert_eq!(latest1, latest2);
    assert!(pending1.is_empty());
    assert!(pending2.is_empty());
    engine.close().await;
}

#[tokio::test]
async fn sessions_round_trip_through_the_direct_path() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(test_config(&dir)).await.unwrap();

    let session = engine.create_session(CreateSessionRequest {
        user_id: Some(42),
        nickname: "dave".into(),
        connection_type: ConnectionType::Ssh,
    });

    let fetched = engine.get_session(session.id).unwrap();
    assert_eq!(fetched.nickname, "dave");
    assert_eq!(engine.get_active_sessions(3600).len(), 1);

    engine.close().await;
}

#[tokio::test]
async fn sessions_round_trip_through_the_buffered_path() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(test_config(&dir)).await.unwrap();

    let session = engine
        .create_session_buffered(CreateSessionRequest {
            user_id: Some(7),
            nickname: "erin".into(),
            connection_type: ConnectionType::Tcp,
        })
        .await
        .unwrap();

    let fetched = engine.get_session(session.id).unwrap();
    assert_eq!(fetched.nickname, "erin");

    engine.update_session_nickname(session.id, "erin2".into()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.get_session(session.id).unwrap().nickname, "erin2");

    engine.close().await;
}

#[tokio::test]
async fn posting_a_reply_to_a_missing_parent_fails() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(test_config(&dir)).await.unwrap();
    let general = engine.get_channel_by_name("general").unwrap();

    let mut req = post_req(general.id, Some(1), "alice", "orphan");
    req.parent_id = Some(999_999);
    assert!(matches!(
        engine.post_message(req),
        Err(StoreError::ParentNotFound(999_999))
    ));

    engine.close().await;
}
