//! Escalation scheduler: reminder and fallback timers per session
//!
//! ```text
//! first press ──┬── reminder_delay ──▶ still Started?         ──▶ WaitingForReply + reminder SMS
//!               │                       otherwise              ──▶ no-op
//!               └── fallback_delay ──▶ still WaitingForReply? ──▶ fallback SMS, status recorded
//!                                       otherwise              ──▶ no-op
//! ```
//!
//! Both timers are one-shot tasks armed only by the first press of a
//! session, with deadlines measured from that press. A responder reply that
//! moves the session out of the pre-response states cancels them; the
//! state check at fire time stays in place regardless, under the same
//! critical section as every other mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::cadence;
use crate::engine::EngineContext;
use crate::error::EngineResult;
use crate::events::{AlertKind, LifecycleEvent, TimerKind};
use crate::messaging::deliver;
use crate::state::{Session, SessionId, SessionState};

/// What a timer did when it fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerOutcome {
    /// The escalation step ran
    Fired,
    /// The session had already moved on
    Skipped { state: SessionState },
    /// The session no longer exists
    Missing,
}

struct ArmedTimers {
    generation: u64,
    token: CancellationToken,
}

/// Bookkeeping for outstanding timer tasks
pub(crate) struct TimerRegistry {
    armed: Mutex<HashMap<SessionId, ArmedTimers>>,
    generation: AtomicU64,
    tracker: TaskTracker,
    root: CancellationToken,
}

impl TimerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            armed: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            tracker: TaskTracker::new(),
            root: CancellationToken::new(),
        }
    }

    fn register(&self, session_id: &str) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let previous = self.lock().insert(
            session_id.to_string(),
            ArmedTimers {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        (generation, token)
    }

    /// Forget a session's timers once its last timer has finished
    fn release(&self, session_id: &str, generation: u64) {
        let mut armed = self.lock();
        if armed
            .get(session_id)
            .is_some_and(|timers| timers.generation == generation)
        {
            armed.remove(session_id);
        }
    }

    /// Cancel a session's outstanding timers. Returns whether any were armed.
    pub(crate) fn cancel(&self, session_id: &str) -> bool {
        match self.lock().remove(session_id) {
            Some(timers) => {
                timers.token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn armed_count(&self) -> usize {
        self.lock().len()
    }

    /// Wait for every outstanding timer task to finish
    pub(crate) async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel every timer, then wait for the tasks to exit
    pub(crate) async fn cancel_all(&self) {
        self.root.cancel();
        self.lock().clear();
        self.drain().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, ArmedTimers>> {
        self.armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Arm the reminder and fallback timers for a freshly opened session.
pub(crate) fn arm(ctx: &Arc<EngineContext>, session: &Session, first_press_at: Instant) {
    let (generation, token) = ctx.timers.register(&session.id);
    let reminder_at = first_press_at + ctx.config.reminder_delay;
    let fallback_at = first_press_at + ctx.config.fallback_delay;

    debug!(
        session_id = %session.id,
        reminder_in = ?ctx.config.reminder_delay,
        fallback_in = ?ctx.config.fallback_delay,
        "Arming escalation timers"
    );

    spawn_timer(
        ctx,
        TimerKind::Reminder,
        session,
        reminder_at,
        token.clone(),
        None,
    );
    spawn_timer(
        ctx,
        TimerKind::Fallback,
        session,
        fallback_at,
        token,
        Some(generation),
    );
}

fn spawn_timer(
    ctx: &Arc<EngineContext>,
    kind: TimerKind,
    session: &Session,
    deadline: Instant,
    token: CancellationToken,
    release_generation: Option<u64>,
) {
    let ctx = Arc::clone(ctx);
    let session_id = session.id.clone();
    let button_id = session.button_id.clone();

    ctx.timers.tracker.clone().spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(session_id = %session_id, timer = ?kind, "Timer cancelled");
            }
            _ = tokio::time::sleep_until(deadline) => {
                let result = match kind {
                    TimerKind::Reminder => fire_reminder(&ctx, &session_id, &button_id).await,
                    TimerKind::Fallback => fire_fallback(&ctx, &session_id, &button_id).await,
                };
                if let Err(e) = result {
                    error!(session_id = %session_id, timer = ?kind, error = %e, "Timer failed");
                }
            }
        }
        if let Some(generation) = release_generation {
            ctx.timers.release(&session_id, generation);
        }
    });
}

/// Move a still-unanswered session to `WaitingForReply` and remind the
/// responder.
pub(crate) async fn fire_reminder(
    ctx: &EngineContext,
    session_id: &str,
    button_id: &str,
) -> EngineResult<TimerOutcome> {
    let guard = ctx.section.enter(button_id).await;

    let Some(mut session) = ctx.store.get_session_by_id(session_id).await? else {
        warn!(session_id, "Reminder fired for a session that no longer exists");
        return Ok(TimerOutcome::Missing);
    };

    if session.state != SessionState::Started {
        debug!(session_id, state = %session.state, "Reminder no longer applicable");
        skipped(ctx, session_id, TimerKind::Reminder, session.state);
        return Ok(TimerOutcome::Skipped {
            state: session.state,
        });
    }

    let installation = ctx
        .store
        .get_installation_by_id(&session.installation_id)
        .await?;
    session.state = SessionState::WaitingForReply;
    ctx.store.save_session(&session).await?;
    drop(guard);

    info!(session_id, unit = %session.unit, "Reminding responder");
    let body = cadence::reminder_message(ctx.config.response_window());
    let status = deliver(
        ctx.messenger.as_ref(),
        &session.phone_number,
        &installation.responder_phone_number,
        &body,
    )
    .await;

    ctx.events.publish(LifecycleEvent::AlertSent {
        session_id: session.id,
        kind: AlertKind::Reminder,
        to: installation.responder_phone_number,
        delivery_status: status.map(|s| s.to_string()),
        timestamp: Utc::now(),
    });
    Ok(TimerOutcome::Fired)
}

/// Escalate a session still waiting for a reply to the fallback number and
/// record the transport's delivery status. The state is left unchanged.
pub(crate) async fn fire_fallback(
    ctx: &EngineContext,
    session_id: &str,
    button_id: &str,
) -> EngineResult<TimerOutcome> {
    // Held across the send: the returned status is written back to the row.
    let _guard = ctx.section.enter(button_id).await;

    let Some(mut session) = ctx.store.get_session_by_id(session_id).await? else {
        warn!(session_id, "Fallback fired for a session that no longer exists");
        return Ok(TimerOutcome::Missing);
    };

    if session.state != SessionState::WaitingForReply {
        debug!(session_id, state = %session.state, "Fallback no longer applicable");
        skipped(ctx, session_id, TimerKind::Fallback, session.state);
        return Ok(TimerOutcome::Skipped {
            state: session.state,
        });
    }

    let installation = ctx
        .store
        .get_installation_by_id(&session.installation_id)
        .await?;

    warn!(session_id, unit = %session.unit, "No response, escalating to fallback number");
    let status = deliver(
        ctx.messenger.as_ref(),
        &session.phone_number,
        &installation.fallback_phone_number,
        &cadence::fallback_message(&session.unit),
    )
    .await;

    if let Some(status) = &status {
        session.fallback_alert_status = Some(status.to_string());
        ctx.store.save_session(&session).await?;
    }

    ctx.events.publish(LifecycleEvent::AlertSent {
        session_id: session.id,
        kind: AlertKind::Fallback,
        to: installation.fallback_phone_number,
        delivery_status: status.map(|s| s.to_string()),
        timestamp: Utc::now(),
    });
    Ok(TimerOutcome::Fired)
}

fn skipped(ctx: &EngineContext, session_id: &str, timer: TimerKind, state: SessionState) {
    ctx.events.publish(LifecycleEvent::TimerSkipped {
        session_id: session_id.to_string(),
        timer,
        state: Some(state),
        timestamp: Utc::now(),
    });
}
