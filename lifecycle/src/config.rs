//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lock::LockScope;

/// Timing and concurrency settings for the lifecycle engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay after the first press before the reminder fires
    pub reminder_delay: Duration,
    /// Delay after the first press before the fallback escalation fires
    pub fallback_delay: Duration,
    /// Width of the critical section
    pub lock_scope: LockScope,
    /// Row cap for the dashboard listing
    pub recent_sessions_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reminder_delay: Duration::from_secs(300),
            fallback_delay: Duration::from_secs(420),
            lock_scope: LockScope::PerButton,
            recent_sessions_limit: 40,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `LIFECYCLE_*` environment variables.
    ///
    /// Unparseable values are ignored in favour of the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(ms) = std::env::var("LIFECYCLE_REMINDER_MS") {
            if let Ok(n) = ms.parse() {
                config.reminder_delay = Duration::from_millis(n);
            }
        }
        if let Ok(ms) = std::env::var("LIFECYCLE_FALLBACK_MS") {
            if let Ok(n) = ms.parse() {
                config.fallback_delay = Duration::from_millis(n);
            }
        }
        if let Ok(scope) = std::env::var("LIFECYCLE_LOCK_SCOPE") {
            if let Ok(scope) = scope.parse() {
                config.lock_scope = scope;
            }
        }
        if let Ok(limit) = std::env::var("LIFECYCLE_RECENT_LIMIT") {
            if let Ok(n) = limit.parse() {
                config.recent_sessions_limit = n;
            }
        }

        config
    }

    /// Short delays for tests and local demos
    pub fn with_delays(mut self, reminder: Duration, fallback: Duration) -> Self {
        self.reminder_delay = reminder;
        self.fallback_delay = fallback;
        self
    }

    pub fn with_lock_scope(mut self, scope: LockScope) -> Self {
        self.lock_scope = scope;
        self
    }

    /// Window the responder has left after the reminder
    pub fn response_window(&self) -> Duration {
        self.fallback_delay.saturating_sub(self.reminder_delay)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reminder_delay.is_zero() {
            return Err(ConfigError::ZeroReminderDelay);
        }
        if self.fallback_delay <= self.reminder_delay {
            return Err(ConfigError::FallbackNotAfterReminder {
                reminder: self.reminder_delay,
                fallback: self.fallback_delay,
            });
        }
        Ok(())
    }
}
