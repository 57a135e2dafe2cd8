//! Press aggregation
//!
//! Every press on a button either opens a new session or coalesces into the
//! button's open (not yet responded to) session. Lookup and write happen in
//! one critical section keyed by the button id, so concurrent presses on the
//! same button can never open two sessions or lose a count.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::escalation::{alert_for_presses, scheduler, PressAlert};
use crate::events::{AlertKind, LifecycleEvent};
use crate::messaging::deliver;
use crate::state::{Button, NewSession, Session};

/// Physical gesture reported by a button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressGesture {
    Click,
    DoubleClick,
    /// Long press; counts as a single press
    Hold,
}

impl PressGesture {
    /// Number of presses the gesture contributes
    pub fn press_count(self) -> u32 {
        match self {
            Self::Click | Self::Hold => 1,
            Self::DoubleClick => 2,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown gesture: {0}")]
pub struct UnknownGesture(pub String);

impl FromStr for PressGesture {
    type Err = UnknownGesture;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "click" | "single" => Ok(Self::Click),
            "double_click" | "double-click" | "double" => Ok(Self::DoubleClick),
            "hold" | "long" => Ok(Self::Hold),
            other => Err(UnknownGesture(other.to_string())),
        }
    }
}

/// Result of ingesting one press event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressOutcome {
    /// Session after the press was recorded
    pub session: Session,
    /// Whether this press opened the session
    pub created: bool,
    /// Alert sent to the responder, if the cadence called for one
    pub alert: Option<PressAlert>,
}

pub(crate) async fn ingest_press(
    ctx: &Arc<EngineContext>,
    button: &Button,
    press_count: u32,
) -> EngineResult<PressOutcome> {
    if press_count == 0 {
        return Err(EngineError::InvalidPressCount);
    }
    // Timer deadlines count from arrival, not from lock acquisition
    let arrived_at = Instant::now();

    let guard = ctx.section.enter(&button.button_id).await;

    let open = ctx
        .store
        .find_unresolved_session_for_button(&button.button_id)
        .await?;
    let num_presses = match &open {
        Some(session) => session.num_presses.saturating_add(press_count),
        None => press_count,
    };
    let alert = alert_for_presses(num_presses);

    // Resolve the recipient before writing so a missing installation
    // leaves the store untouched
    let installation = match alert {
        Some(_) => Some(
            ctx.store
                .get_installation_by_id(&button.installation_id)
                .await?,
        ),
        None => None,
    };

    let (session, created) = match open {
        Some(mut session) => {
            session.record_presses(press_count);
            ctx.store.save_session(&session).await?;
            (session, false)
        }
        None => {
            let session = ctx
                .store
                .create_session(NewSession::for_button(button, press_count))
                .await?;
            (session, true)
        }
    };

    if alert.is_some_and(PressAlert::arms_timers) {
        scheduler::arm(ctx, &session, arrived_at);
    }
    drop(guard);

    let now = Utc::now();
    if created {
        info!(
            session_id = %session.id,
            button_id = %button.button_id,
            unit = %session.unit,
            num_presses = session.num_presses,
            "Session opened"
        );
        ctx.events.publish(LifecycleEvent::SessionCreated {
            session_id: session.id.clone(),
            button_id: button.button_id.clone(),
            num_presses: session.num_presses,
            timestamp: now,
        });
    } else {
        debug!(
            session_id = %session.id,
            added = press_count,
            num_presses = session.num_presses,
            "Press coalesced"
        );
        ctx.events.publish(LifecycleEvent::PressesRecorded {
            session_id: session.id.clone(),
            added: press_count,
            num_presses: session.num_presses,
            timestamp: now,
        });
    }

    if let (Some(alert), Some(installation)) = (alert, installation) {
        let status = deliver(
            ctx.messenger.as_ref(),
            &session.phone_number,
            &installation.responder_phone_number,
            &alert.message(&session.unit),
        )
        .await;
        ctx.events.publish(LifecycleEvent::AlertSent {
            session_id: session.id.clone(),
            kind: match alert {
                PressAlert::Initial => AlertKind::Initial,
                PressAlert::Urgent { .. } => AlertKind::Urgent,
            },
            to: installation.responder_phone_number,
            delivery_status: status.map(|s| s.to_string()),
            timestamp: Utc::now(),
        });
    }

    Ok(PressOutcome {
        session,
        created,
        alert,
    })
}
