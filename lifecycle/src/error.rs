//! Engine error types

use std::time::Duration;

use thiserror::Error;

use crate::state::StoreError;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that abort an engine operation.
///
/// Conditions the caller is expected to handle as ordinary outcomes (an SMS
/// with no open session, a reply from the wrong number) are reported through
/// the operation's outcome type instead.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Store failure; the critical section was released and nothing after
    /// the failing call was written
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Press from a button id that is not in the registry
    #[error("button is not registered: {button_id}")]
    UnknownButton { button_id: String },

    #[error("press count must be at least 1")]
    InvalidPressCount,

    /// Every re-resolution of a reply's target landed on a different button
    #[error("target session for {phone_number} kept moving between buttons")]
    ReplyTargetUnstable { phone_number: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("reminder delay must be greater than zero")]
    ZeroReminderDelay,

    #[error("fallback delay ({fallback:?}) must exceed reminder delay ({reminder:?})")]
    FallbackNotAfterReminder {
        reminder: Duration,
        fallback: Duration,
    },
}
