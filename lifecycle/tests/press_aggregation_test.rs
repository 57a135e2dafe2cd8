//! Press aggregation integration tests
//!
//! Tests verify:
//! - Presses coalesce into one open session per button
//! - Concurrent presses on one button never split a session or lose a count
//! - Buttons are isolated from one another
//! - The alert cadence (1, 3, multiples of 5)
//! - A responded-to session is never reused by a later press

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lifecycle::state::SessionStore;
use lifecycle::{
    Button, EngineConfig, EngineError, Installation, LifecycleEngine, LockScope, MemoryStore,
    PressGesture, RecordingMessenger, SessionState, ShutdownMode,
};

const RESPONDER: &str = "+15550000001";
const FALLBACK: &str = "+15550000002";

fn installation(id: &str) -> Installation {
    Installation {
        id: id.to_string(),
        name: format!("Installation {}", id),
        responder_phone_number: RESPONDER.to_string(),
        fallback_phone_number: FALLBACK.to_string(),
        incident_categories: vec!["Accidental".into(), "Overdose".into()],
        created_at: Utc::now(),
    }
}

fn button(button_id: &str, unit: &str, phone_number: &str) -> Button {
    Button {
        button_id: button_id.to_string(),
        installation_id: "inst-1".to_string(),
        unit: unit.to_string(),
        phone_number: phone_number.to_string(),
    }
}

fn seeded_store(latency: Option<Duration>) -> Arc<MemoryStore> {
    let mut store = MemoryStore::new();
    if let Some(latency) = latency {
        store = store.with_latency(latency);
    }
    let store = store.shared();
    store.insert_installation(installation("inst-1")).unwrap();
    store.insert_button(button("111", "1", "+15559990001")).unwrap();
    store.insert_button(button("222", "2", "+15559990002")).unwrap();
    store
}

fn engine_with(
    store: &Arc<MemoryStore>,
    messenger: &Arc<RecordingMessenger>,
    scope: LockScope,
) -> LifecycleEngine {
    LifecycleEngine::new(
        store.clone(),
        messenger.clone(),
        EngineConfig::default().with_lock_scope(scope),
    )
    .unwrap()
}

// ── Coalescing ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_press_opens_session_and_alerts() {
    let store = seeded_store(None);
    let messenger = RecordingMessenger::new().shared();
    let engine = engine_with(&store, &messenger, LockScope::PerButton);

    let outcome = engine.ingest_press("111", 1).await.unwrap();
    assert!(outcome.created);
    assert_eq!(outcome.session.state, SessionState::Started);
    assert_eq!(outcome.session.num_presses, 1);
    assert_eq!(outcome.session.unit, "1");
    assert_eq!(outcome.session.phone_number, "+15559990001");
    assert_eq!(engine.armed_timers(), 1);

    let sent = messenger.sent_to(RESPONDER);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].from, "+15559990001");
    assert_eq!(
        sent[0].body,
        "There has been a request for help from Unit 1. Please respond \"Ok\" when you have followed up on the call."
    );

    engine.shutdown(ShutdownMode::Cancel).await;
}

#[tokio::test]
async fn test_repeated_presses_coalesce() {
    let store = seeded_store(None);
    let messenger = RecordingMessenger::new().shared();
    let engine = engine_with(&store, &messenger, LockScope::PerButton);

    let first = engine.ingest_press("111", 1).await.unwrap();
    let second = engine.ingest_gesture("111", PressGesture::DoubleClick).await.unwrap();

    assert!(!second.created);
    assert_eq!(second.session.id, first.session.id);
    assert_eq!(second.session.num_presses, 3);
    assert_eq!(store.session_count().unwrap(), 1);

    engine.shutdown(ShutdownMode::Cancel).await;
}

#[tokio::test]
async fn test_cadence_sequence() {
    let store = seeded_store(None);
    let messenger = RecordingMessenger::new().shared();
    let engine = engine_with(&store, &messenger, LockScope::PerButton);

    let mut alerted_at = Vec::new();
    for press in 1..=11u32 {
        let outcome = engine.ingest_press("111", 1).await.unwrap();
        assert_eq!(outcome.session.num_presses, press);
        if outcome.alert.is_some() {
            alerted_at.push(press);
        }
    }
    assert_eq!(alerted_at, vec![1, 3, 5, 10]);

    let bodies: Vec<String> = messenger
        .sent_to(RESPONDER)
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert_eq!(bodies.len(), 4);
    assert!(bodies[0].starts_with("There has been a request for help from Unit 1."));
    assert_eq!(
        bodies[3],
        "This is an urgent request. The button has been pressed 10 times. Please respond \"Ok\" when you have followed up on the call."
    );

    // Only the first press arms timers
    assert_eq!(engine.armed_timers(), 1);
    engine.shutdown(ShutdownMode::Cancel).await;
}

#[tokio::test]
async fn test_double_click_first_gesture_is_silent() {
    let store = seeded_store(None);
    let messenger = RecordingMessenger::new().shared();
    let engine = engine_with(&store, &messenger, LockScope::PerButton);

    let outcome = engine
        .ingest_gesture("111", PressGesture::DoubleClick)
        .await
        .unwrap();
    assert!(outcome.created);
    assert_eq!(outcome.session.num_presses, 2);
    assert!(outcome.alert.is_none());
    assert!(messenger.sent().is_empty());
    assert_eq!(engine.armed_timers(), 0);

    // Third press reaches the urgent threshold
    let outcome = engine.ingest_gesture("111", PressGesture::Hold).await.unwrap();
    assert_eq!(outcome.session.num_presses, 3);
    assert!(outcome.alert.is_some());
}

#[tokio::test]
async fn test_press_after_response_opens_new_session() {
    let store = seeded_store(None);
    let messenger = RecordingMessenger::new().shared();
    let engine = engine_with(&store, &messenger, LockScope::PerButton);

    let first = engine.ingest_press("111", 1).await.unwrap();
    engine
        .handle_reply(RESPONDER, &first.session.phone_number, "Ok")
        .await
        .unwrap();

    let second = engine.ingest_press("111", 1).await.unwrap();
    assert!(second.created);
    assert_ne!(second.session.id, first.session.id);
    assert_eq!(second.session.num_presses, 1);

    let old = store.get_session_by_id(&first.session.id).await.unwrap().unwrap();
    assert_eq!(old.state, SessionState::WaitingForCategory);
    assert_eq!(old.num_presses, 1);

    engine.shutdown(ShutdownMode::Cancel).await;
}

// ── Rejections ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_button_rejected() {
    let store = seeded_store(None);
    let messenger = RecordingMessenger::new().shared();
    let engine = engine_with(&store, &messenger, LockScope::PerButton);

    let err = engine.ingest_press("999", 1).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownButton { ref button_id } if button_id == "999"));
    assert_eq!(store.session_count().unwrap(), 0);
    assert!(messenger.sent().is_empty());
}

#[tokio::test]
async fn test_zero_press_count_rejected() {
    let store = seeded_store(None);
    let messenger = RecordingMessenger::new().shared();
    let engine = engine_with(&store, &messenger, LockScope::PerButton);

    let err = engine.ingest_press("111", 0).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidPressCount));
    assert_eq!(store.session_count().unwrap(), 0);
}

#[tokio::test]
async fn test_missing_installation_leaves_store_untouched() {
    let store = MemoryStore::new().shared();
    store
        .insert_button(Button {
            button_id: "orphan".into(),
            installation_id: "gone".into(),
            unit: "9".into(),
            phone_number: "+15559990009".into(),
        })
        .unwrap();
    let messenger = RecordingMessenger::new().shared();
    let engine = engine_with(&store, &messenger, LockScope::PerButton);

    let err = engine.ingest_press("orphan", 1).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert_eq!(store.session_count().unwrap(), 0);
    assert_eq!(engine.armed_timers(), 0);
}

// ── Concurrency ─────────────────────────────────────────────────────

async fn concurrent_presses(scope: LockScope) {
    let store = seeded_store(Some(Duration::from_millis(2)));
    let messenger = RecordingMessenger::new().shared();
    let engine = engine_with(&store, &messenger, scope);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.ingest_press("111", 1).await })
        })
        .collect();

    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.created).count(), 1);
    let sessions = store.sessions_for_button("111").await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].num_presses, 20);

    // Each count was observed exactly once, so each alert went out once
    let mut counts: Vec<u32> = outcomes.iter().map(|o| o.session.num_presses).collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=20).collect::<Vec<_>>());
    assert_eq!(messenger.sent_to(RESPONDER).len(), 6); // 1, 3, 5, 10, 15, 20

    engine.shutdown(ShutdownMode::Cancel).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_presses_per_button_scope() {
    concurrent_presses(LockScope::PerButton).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_presses_global_scope() {
    concurrent_presses(LockScope::Global).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_buttons_are_isolated() {
    let store = seeded_store(Some(Duration::from_millis(1)));
    let messenger = RecordingMessenger::new().shared();
    let engine = engine_with(&store, &messenger, LockScope::PerButton);

    let handles: Vec<_> = (0..10)
        .flat_map(|_| ["111", "222"])
        .map(|button_id| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.ingest_press(button_id, 1).await })
        })
        .collect();
    for joined in futures::future::join_all(handles).await {
        joined.unwrap().unwrap();
    }

    for button_id in ["111", "222"] {
        let sessions = store.sessions_for_button(button_id).await.unwrap();
        assert_eq!(sessions.len(), 1, "button {}", button_id);
        assert_eq!(sessions[0].num_presses, 10);
        assert_eq!(sessions[0].button_id, button_id);
    }
    assert_eq!(engine.armed_timers(), 2);

    engine.shutdown(ShutdownMode::Cancel).await;
}
