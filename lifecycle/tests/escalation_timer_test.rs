//! Escalation timer integration tests
//!
//! All tests run on a paused Tokio clock, so the five and seven minute
//! deadlines elapse instantly and deterministically.
//!
//! Tests verify:
//! - The reminder moves an unanswered session to WaitingForReply
//! - The fallback alerts the fallback number and records the delivery status
//! - A responder reply cancels both timers
//! - Transport failures leave the fallback status unset
//! - Shutdown drains or cancels outstanding timers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lifecycle::events::{AlertKind, TimerKind};
use lifecycle::state::SessionStore;
use lifecycle::{
    Button, DeliveryStatus, EngineConfig, Installation, LifecycleEngine, LifecycleEvent,
    MemoryStore, Messenger, MessagingError, RecordingMessenger, SessionState, ShutdownMode,
};
use mockall::mock;

const RESPONDER: &str = "+15550000001";
const FALLBACK: &str = "+15550000002";
const BUTTON_PHONE: &str = "+15559990001";

mock! {
    pub Transport {}

    #[async_trait]
    impl Messenger for Transport {
        async fn send_message(
            &self,
            from: &str,
            to: &str,
            body: &str,
        ) -> Result<DeliveryStatus, MessagingError>;
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new().shared();
    store
        .insert_installation(Installation {
            id: "inst-1".into(),
            name: "Test".into(),
            responder_phone_number: RESPONDER.into(),
            fallback_phone_number: FALLBACK.into(),
            incident_categories: vec!["Accidental".into(), "Overdose".into()],
            created_at: Utc::now(),
        })
        .unwrap();
    store
        .insert_button(Button {
            button_id: "111".into(),
            installation_id: "inst-1".into(),
            unit: "7".into(),
            phone_number: BUTTON_PHONE.into(),
        })
        .unwrap();
    store
}

fn engine(store: &Arc<MemoryStore>, messenger: Arc<dyn Messenger>) -> LifecycleEngine {
    LifecycleEngine::new(store.clone(), messenger, EngineConfig::default()).unwrap()
}

async fn state_of(store: &MemoryStore, session_id: &str) -> SessionState {
    store
        .get_session_by_id(session_id)
        .await
        .unwrap()
        .unwrap()
        .state
}

#[tokio::test(start_paused = true)]
async fn test_reminder_then_fallback() {
    init_tracing();
    let store = seeded_store();
    let messenger = RecordingMessenger::new().shared();
    let engine = engine(&store, messenger.clone());

    let session = engine.ingest_press("111", 1).await.unwrap().session;

    tokio::time::sleep(Duration::from_secs(299)).await;
    assert_eq!(state_of(&store, &session.id).await, SessionState::Started);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(state_of(&store, &session.id).await, SessionState::WaitingForReply);

    let to_responder = messenger.sent_to(RESPONDER);
    assert_eq!(to_responder.len(), 2);
    assert_eq!(
        to_responder[1].body,
        "Please respond \"Ok\" if you have followed up on your call. If you do not respond within 2 minutes an emergency alert will be issued to staff."
    );
    assert!(messenger.sent_to(FALLBACK).is_empty());

    tokio::time::sleep(Duration::from_secs(120)).await;
    let to_fallback = messenger.sent_to(FALLBACK);
    assert_eq!(to_fallback.len(), 1);
    assert_eq!(to_fallback[0].from, BUTTON_PHONE);
    assert_eq!(to_fallback[0].body, "There has been an unresponded request at unit 7");

    let stored = store.get_session_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.state, SessionState::WaitingForReply);
    assert_eq!(stored.fallback_alert_status.as_deref(), Some("queued"));
    assert_eq!(engine.armed_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadlines_count_from_first_press() {
    let store = seeded_store();
    let messenger = RecordingMessenger::new().shared();
    let engine = engine(&store, messenger.clone());

    let session = engine.ingest_press("111", 1).await.unwrap().session;
    tokio::time::sleep(Duration::from_secs(200)).await;
    engine.ingest_press("111", 1).await.unwrap();

    // Later presses neither re-arm nor push back the reminder
    tokio::time::sleep(Duration::from_secs(101)).await;
    assert_eq!(state_of(&store, &session.id).await, SessionState::WaitingForReply);
}

#[tokio::test(start_paused = true)]
async fn test_reply_before_reminder_cancels_timers() {
    let store = seeded_store();
    let messenger = RecordingMessenger::new().shared();
    let engine = engine(&store, messenger.clone());
    let mut events = engine.events().subscribe();

    let session = engine.ingest_press("111", 1).await.unwrap().session;
    tokio::time::sleep(Duration::from_secs(10)).await;
    engine
        .handle_reply(RESPONDER, BUTTON_PHONE, "Ok")
        .await
        .unwrap();
    assert_eq!(engine.armed_timers(), 0);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(
        state_of(&store, &session.id).await,
        SessionState::WaitingForCategory
    );
    assert!(messenger.sent_to(FALLBACK).is_empty());
    // Initial alert and the category prompt only
    assert_eq!(messenger.sent_to(RESPONDER).len(), 2);

    let mut cancelled = false;
    while let Ok(event) = events.try_recv() {
        if let LifecycleEvent::AlertSent { kind, .. } = &event {
            assert_eq!(*kind, AlertKind::Initial);
        }
        cancelled |= matches!(event, LifecycleEvent::TimersCancelled { .. });
    }
    assert!(cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_reply_after_reminder_prevents_fallback() {
    let store = seeded_store();
    let messenger = RecordingMessenger::new().shared();
    let engine = engine(&store, messenger.clone());

    let session = engine.ingest_press("111", 1).await.unwrap().session;
    tokio::time::sleep(Duration::from_secs(360)).await;
    assert_eq!(state_of(&store, &session.id).await, SessionState::WaitingForReply);

    engine
        .handle_reply(RESPONDER, BUTTON_PHONE, "Ok")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    let stored = store.get_session_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.state, SessionState::WaitingForCategory);
    assert!(stored.fallback_alert_status.is_none());
    assert!(messenger.sent_to(FALLBACK).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fallback_transport_error_leaves_status_unset() {
    init_tracing();
    let store = seeded_store();
    let mut transport = MockTransport::new();
    transport.expect_send_message().returning(|_, to, _| {
        if to == FALLBACK {
            Err(MessagingError::Unavailable("connection refused".into()))
        } else {
            Ok(DeliveryStatus::queued())
        }
    });
    let engine = engine(&store, Arc::new(transport));

    let session = engine.ingest_press("111", 1).await.unwrap().session;
    tokio::time::sleep(Duration::from_secs(421)).await;

    let stored = store.get_session_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.state, SessionState::WaitingForReply);
    assert!(stored.fallback_alert_status.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_delivery_status_is_recorded() {
    let store = seeded_store();
    let messenger = RecordingMessenger::with_status(DeliveryStatus::new("undelivered")).shared();
    let engine = engine(&store, messenger.clone());

    let session = engine.ingest_press("111", 1).await.unwrap().session;
    tokio::time::sleep(Duration::from_secs(421)).await;

    let stored = store.get_session_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.fallback_alert_status.as_deref(), Some("undelivered"));
}

#[tokio::test(start_paused = true)]
async fn test_timer_skipped_when_session_advanced_elsewhere() {
    let store = seeded_store();
    let messenger = RecordingMessenger::new().shared();
    let engine = engine(&store, messenger.clone());
    let mut events = engine.events().subscribe();

    let mut session = engine.ingest_press("111", 1).await.unwrap().session;

    // A write that bypasses the engine leaves the timers armed
    session.state = SessionState::WaitingForDetails;
    store.save_session(&session).await.unwrap();

    tokio::time::sleep(Duration::from_secs(421)).await;
    assert_eq!(
        state_of(&store, &session.id).await,
        SessionState::WaitingForDetails
    );
    assert_eq!(messenger.sent_to(RESPONDER).len(), 1);
    assert!(messenger.sent_to(FALLBACK).is_empty());

    let mut skipped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let LifecycleEvent::TimerSkipped { timer, .. } = event {
            skipped.push(timer);
        }
    }
    assert_eq!(skipped, vec![TimerKind::Reminder, TimerKind::Fallback]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drain_runs_timers() {
    let store = seeded_store();
    let messenger = RecordingMessenger::new().shared();
    let engine = engine(&store, messenger.clone());

    let session = engine.ingest_press("111", 1).await.unwrap().session;
    engine.shutdown(ShutdownMode::Drain).await;

    let stored = store.get_session_by_id(&session.id).await.unwrap().unwrap();
    assert_eq!(stored.state, SessionState::WaitingForReply);
    assert_eq!(stored.fallback_alert_status.as_deref(), Some("queued"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancel_stops_timers() {
    let store = seeded_store();
    let messenger = RecordingMessenger::new().shared();
    let engine = engine(&store, messenger.clone());

    let session = engine.ingest_press("111", 1).await.unwrap().session;
    engine.shutdown(ShutdownMode::Cancel).await;
    assert_eq!(engine.armed_timers(), 0);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(state_of(&store, &session.id).await, SessionState::Started);
    assert_eq!(messenger.sent().len(), 1);
}
