//! Lifecycle engine: the entry point for button presses and responder SMS
//!
//! ```text
//! button press ──▶ ingest_press ──▶ [section: button] find/create/coalesce ──▶ alert
//! responder SMS ─▶ handle_reply ──▶ [section: button] advance_session ─────▶ reply
//! timers ────────▶ reminder / fallback ──▶ [section: button] state check ──▶ alert
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::aggregator::{self, PressGesture, PressOutcome};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::escalation::scheduler::TimerRegistry;
use crate::events::{EventBus, LifecycleEvent, SharedEventBus};
use crate::lock::{CriticalSection, LockScope, SectionGuard};
use crate::messaging::{deliver, SharedMessenger};
use crate::state::{Installation, Session, SessionId, SessionState, SharedSessionStore, StoreError};
use crate::state_machine::{advance_session, replies};

/// Re-resolutions attempted when the reply target moves to another button
/// between the unlocked lookup and entering its critical section
const MAX_RESOLVE_ATTEMPTS: usize = 3;

/// Shared state for every engine path and timer task
pub(crate) struct EngineContext {
    pub(crate) store: SharedSessionStore,
    pub(crate) messenger: SharedMessenger,
    pub(crate) section: CriticalSection,
    pub(crate) events: SharedEventBus,
    pub(crate) config: EngineConfig,
    pub(crate) timers: TimerRegistry,
}

/// Result of handling one inbound SMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The reply was applied and answered
    Advanced {
        session: Session,
        previous_state: SessionState,
        reply: String,
    },
    /// No incomplete session exists for the virtual number; nothing was sent
    NoActiveSession,
    /// The sender is not the installation's responder; nothing was sent
    RejectedSender { session_id: SessionId },
    /// The target row could not be decoded; the responder got a generic error
    CorruptSession { session_id: SessionId },
}

/// What to do with armed timers on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Let every armed timer run to its deadline
    Drain,
    /// Cancel armed timers and return once their tasks have exited
    #[default]
    Cancel,
}

/// Session lifecycle engine
///
/// Cheap to clone; clones share the store, messenger, critical section and
/// timers.
#[derive(Clone)]
pub struct LifecycleEngine {
    ctx: Arc<EngineContext>,
}

impl LifecycleEngine {
    pub fn new(
        store: SharedSessionStore,
        messenger: SharedMessenger,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        Self::with_event_bus(store, messenger, config, EventBus::new().shared())
    }

    /// Create an engine publishing to an existing event bus
    pub fn with_event_bus(
        store: SharedSessionStore,
        messenger: SharedMessenger,
        config: EngineConfig,
        events: SharedEventBus,
    ) -> EngineResult<Self> {
        config.validate()?;
        info!(
            reminder = ?config.reminder_delay,
            fallback = ?config.fallback_delay,
            lock_scope = ?config.lock_scope,
            "Lifecycle engine ready"
        );
        Ok(Self {
            ctx: Arc::new(EngineContext {
                store,
                messenger,
                section: CriticalSection::new(config.lock_scope),
                events,
                config,
                timers: TimerRegistry::new(),
            }),
        })
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.ctx.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn store(&self) -> &SharedSessionStore {
        &self.ctx.store
    }

    /// Record `press_count` presses from `button_id`.
    ///
    /// Opens a session or coalesces into the button's unresolved one, then
    /// sends whatever alert the cadence calls for.
    pub async fn ingest_press(&self, button_id: &str, press_count: u32) -> EngineResult<PressOutcome> {
        let button = self
            .ctx
            .store
            .get_button_by_id(button_id)
            .await?
            .ok_or_else(|| EngineError::UnknownButton {
                button_id: button_id.to_string(),
            })?;
        aggregator::ingest_press(&self.ctx, &button, press_count).await
    }

    pub async fn ingest_gesture(&self, button_id: &str, gesture: PressGesture) -> EngineResult<PressOutcome> {
        self.ingest_press(button_id, gesture.press_count()).await
    }

    /// Apply an SMS from `from` sent to the virtual number `to`.
    pub async fn handle_reply(&self, from: &str, to: &str, body: &str) -> EngineResult<ReplyOutcome> {
        match self.resolve_and_apply(from, to, body).await {
            Err(EngineError::Store(StoreError::Corrupt {
                id,
                installation_id,
                reason,
            })) => {
                error!(session_id = %id, reason = %reason, "Stored session is unreadable");
                self.answer_corrupt(from, to, id, &installation_id).await
            }
            other => other,
        }
    }

    /// Only the installation's responder is told about an unreadable session.
    async fn answer_corrupt(
        &self,
        from: &str,
        to: &str,
        session_id: SessionId,
        installation_id: &str,
    ) -> EngineResult<ReplyOutcome> {
        let installation = self.ctx.store.get_installation_by_id(installation_id).await?;
        if from != installation.responder_phone_number {
            warn!(
                session_id = %session_id,
                from,
                "Ignoring SMS from a number other than the responder"
            );
            return Ok(ReplyOutcome::RejectedSender { session_id });
        }
        deliver(self.ctx.messenger.as_ref(), to, from, replies::INTERNAL_ERROR).await;
        Ok(ReplyOutcome::CorruptSession { session_id })
    }

    async fn resolve_and_apply(&self, from: &str, to: &str, body: &str) -> EngineResult<ReplyOutcome> {
        let store = &self.ctx.store;

        let Some(mut candidate) = store.find_most_recent_incomplete_session_for_phone_number(to).await? else {
            return Ok(no_active_session(from, to));
        };

        for attempt in 1..=MAX_RESOLVE_ATTEMPTS {
            let guard = self.ctx.section.enter(&candidate.button_id).await;

            let Some(current) = store.find_most_recent_incomplete_session_for_phone_number(to).await? else {
                drop(guard);
                return Ok(no_active_session(from, to));
            };

            if self.ctx.section.scope() == LockScope::Global || current.button_id == candidate.button_id {
                return self.apply_reply(guard, current, from, body).await;
            }

            warn!(
                phone_number = to,
                attempt,
                expected = %candidate.button_id,
                found = %current.button_id,
                "Reply target moved to another button, retrying"
            );
            drop(guard);
            candidate = current;
        }

        Err(EngineError::ReplyTargetUnstable {
            phone_number: to.to_string(),
        })
    }

    async fn apply_reply(
        &self,
        guard: SectionGuard,
        session: Session,
        from: &str,
        body: &str,
    ) -> EngineResult<ReplyOutcome> {
        let installation = self
            .ctx
            .store
            .get_installation_by_id(&session.installation_id)
            .await?;

        if from != installation.responder_phone_number {
            warn!(
                session_id = %session.id,
                from,
                "Ignoring SMS from a number other than the responder"
            );
            return Ok(ReplyOutcome::RejectedSender {
                session_id: session.id,
            });
        }

        let transition = advance_session(&session, &installation, body);
        self.ctx.store.save_session(&transition.session).await?;

        let cancelled = session.state.is_pre_response()
            && !transition.session.state.is_pre_response()
            && self.ctx.timers.cancel(&session.id);
        drop(guard);

        let now = Utc::now();
        if cancelled {
            self.ctx.events.publish(LifecycleEvent::TimersCancelled {
                session_id: session.id.clone(),
                timestamp: now,
            });
        }
        if transition.changed_state(&session) {
            info!(
                session_id = %session.id,
                from = %session.state,
                to = %transition.session.state,
                "Session advanced"
            );
            self.ctx.events.publish(LifecycleEvent::SessionAdvanced {
                session_id: session.id.clone(),
                from: session.state,
                to: transition.session.state,
                timestamp: now,
            });
        }

        deliver(
            self.ctx.messenger.as_ref(),
            &session.phone_number,
            &installation.responder_phone_number,
            &transition.reply,
        )
        .await;

        Ok(ReplyOutcome::Advanced {
            session: transition.session,
            previous_state: session.state,
            reply: transition.reply,
        })
    }

    /// Newest sessions of an installation, capped by the configured limit
    pub async fn recent_sessions(&self, installation_id: &str) -> EngineResult<Vec<Session>> {
        Ok(self
            .ctx
            .store
            .recent_sessions_for_installation(installation_id, self.ctx.config.recent_sessions_limit)
            .await?)
    }

    pub async fn installations(&self) -> EngineResult<Vec<Installation>> {
        Ok(self.ctx.store.list_installations().await?)
    }

    /// Sessions whose timers are still outstanding
    pub fn armed_timers(&self) -> usize {
        self.ctx.timers.armed_count()
    }

    /// Cancel the timers of one session. Returns whether any were armed.
    pub fn cancel_timers(&self, session_id: &str) -> bool {
        let cancelled = self.ctx.timers.cancel(session_id);
        if cancelled {
            self.ctx.events.publish(LifecycleEvent::TimersCancelled {
                session_id: session_id.to_string(),
                timestamp: Utc::now(),
            });
        }
        cancelled
    }

    /// Stop the timer machinery. After [`ShutdownMode::Cancel`] newly armed
    /// timers are cancelled on arrival.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        info!(?mode, armed = self.armed_timers(), "Shutting down lifecycle engine");
        match mode {
            ShutdownMode::Drain => self.ctx.timers.drain().await,
            ShutdownMode::Cancel => self.ctx.timers.cancel_all().await,
        }
    }
}

fn no_active_session(from: &str, to: &str) -> ReplyOutcome {
    info!(phone_number = to, from, "SMS with no corresponding open session");
    ReplyOutcome::NoActiveSession
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::scheduler::{self, TimerOutcome};
    use crate::messaging::RecordingMessenger;
    use crate::state::{Button, MemoryStore, SessionStore};
    use std::time::Duration;

    fn engine() -> (Arc<MemoryStore>, LifecycleEngine) {
        let store = MemoryStore::new().shared();
        store
            .insert_installation(Installation {
                id: "inst".into(),
                name: "Test".into(),
                responder_phone_number: "+1000".into(),
                fallback_phone_number: "+2000".into(),
                incident_categories: vec!["Other".into()],
                created_at: Utc::now(),
            })
            .unwrap();
        store
            .insert_button(Button {
                button_id: "b1".into(),
                installation_id: "inst".into(),
                unit: "1".into(),
                phone_number: "+3000".into(),
            })
            .unwrap();
        let engine = LifecycleEngine::new(
            store.clone(),
            RecordingMessenger::new().shared(),
            EngineConfig::default(),
        )
        .unwrap();
        (store, engine)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig::default()
            .with_delays(Duration::from_secs(60), Duration::from_secs(30));
        let result = LifecycleEngine::new(
            MemoryStore::new().shared(),
            RecordingMessenger::new().shared(),
            config,
        );
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_cancel_timers() {
        let (_store, engine) = engine();
        let session = engine.ingest_press("b1", 1).await.unwrap().session;

        assert!(engine.cancel_timers(&session.id));
        assert!(!engine.cancel_timers(&session.id));
        assert_eq!(engine.armed_timers(), 0);
    }

    #[tokio::test]
    async fn test_fire_for_missing_session() {
        let (_store, engine) = engine();
        let outcome = scheduler::fire_reminder(&engine.ctx, "nope", "b1").await.unwrap();
        assert_eq!(outcome, TimerOutcome::Missing);
        let outcome = scheduler::fire_fallback(&engine.ctx, "nope", "b1").await.unwrap();
        assert_eq!(outcome, TimerOutcome::Missing);
    }

    #[tokio::test]
    async fn test_fallback_skipped_before_reminder() {
        let (store, engine) = engine();
        let session = engine.ingest_press("b1", 1).await.unwrap().session;

        let outcome = scheduler::fire_fallback(&engine.ctx, &session.id, "b1")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TimerOutcome::Skipped {
                state: SessionState::Started
            }
        );

        let outcome = scheduler::fire_reminder(&engine.ctx, &session.id, "b1")
            .await
            .unwrap();
        assert_eq!(outcome, TimerOutcome::Fired);
        let stored = store.get_session_by_id(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::WaitingForReply);

        engine.shutdown(ShutdownMode::Cancel).await;
    }
}
