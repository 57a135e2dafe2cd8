//! Escalation cadence: which press counts trigger an outbound alert
//!
//! Evaluated against the post-increment press count of a session:
//! - 1: initial alert, and the reminder/fallback timers are armed
//! - 3, or any multiple of 5: urgent re-alert, no new timers
//! - anything else: silence

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Alert due after a press was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressAlert {
    /// First press of a session
    Initial,
    /// Repeated presses
    Urgent { presses: u32 },
}

impl PressAlert {
    /// Whether this alert arms the reminder and fallback timers
    pub fn arms_timers(self) -> bool {
        matches!(self, Self::Initial)
    }

    /// Text sent to the responder
    pub fn message(self, unit: &str) -> String {
        match self {
            Self::Initial => initial_alert(unit),
            Self::Urgent { presses } => urgent_alert(presses),
        }
    }
}

/// Decide whether `num_presses` calls for an alert
pub fn alert_for_presses(num_presses: u32) -> Option<PressAlert> {
    match num_presses {
        1 => Some(PressAlert::Initial),
        n if n == 3 || (n > 0 && n % 5 == 0) => Some(PressAlert::Urgent { presses: n }),
        _ => None,
    }
}

pub fn initial_alert(unit: &str) -> String {
    format!(
        "There has been a request for help from Unit {}. Please respond \"Ok\" when you have followed up on the call.",
        unit
    )
}

pub fn urgent_alert(presses: u32) -> String {
    format!(
        "This is an urgent request. The button has been pressed {} times. Please respond \"Ok\" when you have followed up on the call.",
        presses
    )
}

/// Reminder asking for acknowledgment within the remaining fallback window
pub fn reminder_message(remaining: Duration) -> String {
    format!(
        "Please respond \"Ok\" if you have followed up on your call. If you do not respond within {} an emergency alert will be issued to staff.",
        format_window(remaining)
    )
}

pub fn fallback_message(unit: &str) -> String {
    format!("There has been an unresponded request at unit {}", unit)
}

/// Human wording for a window: whole minutes when exact, seconds otherwise
pub fn format_window(window: Duration) -> String {
    let secs = window.as_secs();
    let plural = |n: u64, unit: &str| {
        if n == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };
    if secs >= 60 && secs % 60 == 0 {
        plural(secs / 60, "minute")
    } else {
        plural(secs, "second")
    }
}
