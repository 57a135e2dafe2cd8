//! Escalation: alert cadence for repeated presses and the reminder/fallback
//! timers armed by a session's first press
//!
//! ```text
//! press #1 ─────▶ initial alert ──▶ arm timers
//! press #3, #5k ─▶ urgent alert
//! reminder fire ─▶ Started → WaitingForReply, remind responder
//! fallback fire ─▶ WaitingForReply? alert fallback number
//! ```

pub mod cadence;
pub mod scheduler;

pub use cadence::{alert_for_presses, PressAlert};
pub use scheduler::TimerOutcome;
