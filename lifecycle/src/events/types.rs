//! Event types for session lifecycle observation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{ButtonId, SessionId, SessionState};

/// Which outbound alert was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Initial,
    Urgent,
    Reminder,
    Fallback,
}

/// Which escalation timer an event concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Reminder,
    Fallback,
}

/// Everything observable that happens to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A press opened a new session
    SessionCreated {
        session_id: SessionId,
        button_id: ButtonId,
        num_presses: u32,
        timestamp: DateTime<Utc>,
    },

    /// A press coalesced into an open session
    PressesRecorded {
        session_id: SessionId,
        added: u32,
        num_presses: u32,
        timestamp: DateTime<Utc>,
    },

    /// An alert left through the messenger
    AlertSent {
        session_id: SessionId,
        kind: AlertKind,
        to: String,
        delivery_status: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A responder reply moved the session
    SessionAdvanced {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
        timestamp: DateTime<Utc>,
    },

    /// A timer fired but the session had already moved on
    TimerSkipped {
        session_id: SessionId,
        timer: TimerKind,
        state: Option<SessionState>,
        timestamp: DateTime<Utc>,
    },

    /// Outstanding timers were cancelled before firing
    TimersCancelled {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::SessionCreated { timestamp, .. } => *timestamp,
            LifecycleEvent::PressesRecorded { timestamp, .. } => *timestamp,
            LifecycleEvent::AlertSent { timestamp, .. } => *timestamp,
            LifecycleEvent::SessionAdvanced { timestamp, .. } => *timestamp,
            LifecycleEvent::TimerSkipped { timestamp, .. } => *timestamp,
            LifecycleEvent::TimersCancelled { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::SessionCreated { .. } => "session_created",
            LifecycleEvent::PressesRecorded { .. } => "presses_recorded",
            LifecycleEvent::AlertSent { .. } => "alert_sent",
            LifecycleEvent::SessionAdvanced { .. } => "session_advanced",
            LifecycleEvent::TimerSkipped { .. } => "timer_skipped",
            LifecycleEvent::TimersCancelled { .. } => "timers_cancelled",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            LifecycleEvent::SessionCreated { session_id, .. }
            | LifecycleEvent::PressesRecorded { session_id, .. }
            | LifecycleEvent::AlertSent { session_id, .. }
            | LifecycleEvent::SessionAdvanced { session_id, .. }
            | LifecycleEvent::TimerSkipped { session_id, .. }
            | LifecycleEvent::TimersCancelled { session_id, .. } => session_id,
        }
    }
}
