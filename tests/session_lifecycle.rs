// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Integration tests for session creation, eviction, deletion and persistence.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use colloquy::context::ModelProfile;
use colloquy::error::SessionError;
use colloquy::formatter::ChatCompletionsFormatter;
use colloquy::session::{SessionConfig, SessionManager};
use colloquy::storage::{HistoryStore, MemoryStore, SqliteStore};
use colloquy::tokenizer::ApproximateTokenizer;
use colloquy::types::Message;

fn profile() -> ModelProfile {
    ModelProfile::new(
        32_000,
        Arc::new(ApproximateTokenizer::default()),
        Arc::new(ChatCompletionsFormatter::new()),
    )
    .with_model("test-model")
}

fn shared_manager(max_sessions: usize) -> (SessionManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = SessionManager::new(store.clone(), store.clone(), profile())
        .with_config(SessionConfig { max_sessions });
    (manager, store)
}

async fn create(manager: &SessionManager, id: &str) {
    manager.create_session(Some(id.to_string())).await.unwrap();
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn test_delete_current_fails_and_other_succeeds() {
    let (manager, _store) = shared_manager(4);
    create(&manager, "current").await;
    create(&manager, "other").await;
    manager.load_session("current").await.unwrap();

    let err = manager.delete_session("current").await.unwrap_err();
    assert!(matches!(err, SessionError::CurrentSession(_)));
    assert_eq!(err.code(), "SESSION_IS_CURRENT");
    assert!(manager.get_session_metadata("current").await.unwrap().is_some());

    manager.delete_session("other").await.unwrap();
    assert!(manager.get_session_metadata("other").await.unwrap().is_none());
    assert_eq!(manager.resident_session_ids().await, vec!["current".to_string()]);

    let err = manager.delete_session("other").await.unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_delete_removes_history() {
    let (manager, store) = shared_manager(4);
    create(&manager, "doomed").await;
    let context = manager.get_session("doomed").await.unwrap();
    context.add_user_message("bye", vec![]).await.unwrap();

    manager.delete_session("doomed").await.unwrap();

    assert!(store.get_history("doomed").await.unwrap().is_empty());
    let err = manager.load_session("doomed").await.unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");
}

// ============================================================================
// Eviction
// ============================================================================

#[tokio::test]
async fn test_new_session_evicts_idle_one() {
    let (manager, store) = shared_manager(3);
    create(&manager, "a").await;
    create(&manager, "b").await;
    create(&manager, "c").await;

    let idle = manager.get_session("a").await.unwrap();
    idle.add_user_message("remember me", vec![]).await.unwrap();

    // "b" is now the least recently active
    manager.load_session("a").await.unwrap();
    manager
        .get_session("c")
        .await
        .unwrap()
        .add_user_message("busy", vec![])
        .await
        .unwrap();

    create(&manager, "d").await;

    let resident = manager.resident_session_ids().await;
    assert_eq!(resident, vec!["a", "c", "d"]);
    assert_eq!(manager.stats().await.evictions, 1);

    // Unloaded, not deleted
    assert!(manager.get_session_metadata("b").await.unwrap().is_some());

    // Rehydrating "b" evicts the next idle session and keeps its history
    manager
        .get_session("b")
        .await
        .unwrap()
        .add_user_message("back", vec![])
        .await
        .unwrap();
    let stats = manager.stats().await;
    assert_eq!(stats.resident, 3);
    assert_eq!(stats.evictions, 2);
    assert_eq!(store.get_history("b").await.unwrap(), vec![Message::user("back")]);
    assert_eq!(
        store.get_history("a").await.unwrap(),
        vec![Message::user("remember me")]
    );
}

#[tokio::test]
async fn test_resident_count_never_exceeds_cap() {
    let (manager, _store) = shared_manager(2);
    for i in 0..6 {
        create(&manager, &format!("s{}", i)).await;
        assert!(manager.stats().await.resident <= 2);
    }
    assert_eq!(manager.stats().await.evictions, 4);
    assert_eq!(manager.list_sessions().await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_in_flight_session_is_not_evicted() {
    let (manager, _store) = shared_manager(2);
    create(&manager, "busy").await;
    create(&manager, "idle").await;
    manager.load_session("idle").await.unwrap();

    let turn = manager.begin_turn("busy").await.unwrap();

    // Only candidate is mid-turn and the other is current
    let err = manager.create_session(Some("third".to_string())).await.unwrap_err();
    assert!(matches!(err, SessionError::MaxSessionsExceeded { max: 2 }));
    assert_eq!(err.code(), "SESSION_MAX_SESSIONS_EXCEEDED");

    turn.add_user_message("done", vec![]).await.unwrap();
    drop(turn);

    create(&manager, "third").await;
    assert_eq!(manager.resident_session_ids().await, vec!["idle", "third"]);
}

#[tokio::test]
async fn test_begin_turn_serializes_turns() {
    let (manager, _store) = shared_manager(2);
    create(&manager, "s").await;
    let manager = Arc::new(manager);

    let first = manager.begin_turn("s").await.unwrap();
    assert_eq!(first.session_id(), "s");

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let turn = manager.begin_turn("s").await.unwrap();
            turn.add_user_message("second", vec![]).await.unwrap();
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    first.add_user_message("first", vec![]).await.unwrap();
    drop(first);
    waiter.await.unwrap();

    let history = manager.get_session("s").await.unwrap().get_history().await.unwrap();
    assert_eq!(history, vec![Message::user("first"), Message::user("second")]);
}

// ============================================================================
// Metadata
// ============================================================================

#[tokio::test]
async fn test_message_count_tracks_appends_and_resets() {
    let (manager, _store) = shared_manager(4);
    let created = manager.create_session(Some("s".to_string())).await.unwrap();
    let context = manager.load_session("s").await.unwrap();

    context.add_user_message("one", vec![]).await.unwrap();
    assert!(context.add_assistant_message(None, vec![]).await.is_err());
    context.add_assistant_message(Some("two".to_string()), vec![]).await.unwrap();

    let meta = manager.get_session_metadata("s").await.unwrap().unwrap();
    assert_eq!(meta.message_count, 2);
    assert!(meta.last_activity > created.last_activity);

    manager.reset_session("s").await.unwrap();
    manager.reset_session("s").await.unwrap();

    let meta = manager.get_session_metadata("s").await.unwrap().unwrap();
    assert_eq!(meta.message_count, 0);
    assert_eq!(meta.created_at, created.created_at);
    assert!(context.get_history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_sessions_most_recent_first() {
    let (manager, _store) = shared_manager(4);
    create(&manager, "old").await;
    create(&manager, "new").await;
    manager.load_session("old").await.unwrap();

    let ids: Vec<String> = manager
        .list_sessions()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["old", "new"]);
    assert_eq!(manager.default_session_id().await.unwrap().as_deref(), Some("old"));
}

#[tokio::test]
async fn test_switch_model_updates_residents_and_metadata() {
    let (manager, _store) = shared_manager(4);
    create(&manager, "s").await;
    let context = manager.get_session("s").await.unwrap();

    let next = ModelProfile::new(
        4_000,
        Arc::new(ApproximateTokenizer::new(3.0)),
        Arc::new(ChatCompletionsFormatter::new()),
    )
    .with_model("small-model");
    manager.switch_model(next).await.unwrap();

    assert_eq!(context.max_tokens().await, 4_000);
    let meta = manager.get_session_metadata("s").await.unwrap().unwrap();
    assert_eq!(meta.model.as_deref(), Some("small-model"));

    let created = manager.create_session(Some("t".to_string())).await.unwrap();
    assert_eq!(created.model.as_deref(), Some("small-model"));
}

// ============================================================================
// Durable storage
// ============================================================================

#[tokio::test]
async fn test_sessions_survive_restart_with_sqlite() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("sessions.db");

    {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let manager = SessionManager::new(store.clone(), store, profile());
        create(&manager, "persisted").await;
        let context = manager.load_session("persisted").await.unwrap();
        context.add_user_message("first run", vec![]).await.unwrap();
        context
            .add_assistant_message(Some("noted".to_string()), vec![])
            .await
            .unwrap();
    }

    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let manager = SessionManager::new(store.clone(), store, profile());

    assert_eq!(
        manager.default_session_id().await.unwrap().as_deref(),
        Some("persisted")
    );
    let context = manager.load_session("persisted").await.unwrap();
    assert_eq!(
        context.get_history().await.unwrap(),
        vec![Message::user("first run"), Message::assistant("noted")]
    );
    let meta = manager.get_session_metadata("persisted").await.unwrap().unwrap();
    assert_eq!(meta.message_count, 2);
}

#[tokio::test]
async fn test_rehydrate_repairs_message_count() {
    let (manager, store) = shared_manager(4);
    create(&manager, "drift").await;

    // Written behind the manager's back
    store.save_message("drift", &Message::user("one")).await.unwrap();
    store.save_message("drift", &Message::user("two")).await.unwrap();

    let fresh = SessionManager::new(store.clone(), store.clone(), profile());
    fresh.load_session("drift").await.unwrap();

    let meta = fresh.get_session_metadata("drift").await.unwrap().unwrap();
    assert_eq!(meta.message_count, 2);
}
