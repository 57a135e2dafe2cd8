//! Outbound messaging contract
//!
//! The engine only needs a best-effort `send`. Failures are logged by the
//! caller and never retried here; the status a transport reports for the
//! fallback escalation is persisted as data on the session.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Status string reported by the transport for an accepted message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryStatus(String);

impl DeliveryStatus {
    pub const QUEUED: &'static str = "queued";

    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn queued() -> Self {
        Self::new(Self::QUEUED)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Statuses that mean the message will not reach the recipient
    pub fn is_failure(&self) -> bool {
        matches!(self.0.as_str(), "failed" | "undelivered" | "canceled")
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error type for outbound sends
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessagingError {
    /// The transport answered but refused the message
    #[error("transport rejected message: {0}")]
    Rejected(String),

    /// The transport could not be reached
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Send primitive of the SMS transport
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(
        &self,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<DeliveryStatus, MessagingError>;
}

/// Shared reference to a messenger
pub type SharedMessenger = Arc<dyn Messenger>;

/// A message handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub body: String,
}

/// Messenger that records every send and reports a fixed status.
///
/// Used for dry runs and as the observable transport in tests.
pub struct RecordingMessenger {
    sent: Mutex<Vec<OutboundMessage>>,
    status: DeliveryStatus,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::with_status(DeliveryStatus::queued())
    }

    pub fn with_status(status: DeliveryStatus) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            status,
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Snapshot of everything sent so far
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Messages sent to `to`
    pub fn sent_to(&self, to: &str) -> Vec<OutboundMessage> {
        self.sent().into_iter().filter(|m| m.to == to).collect()
    }
}

impl Default for RecordingMessenger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(
        &self,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<DeliveryStatus, MessagingError> {
        info!(from, to, body, "Outbound message");
        let message = OutboundMessage {
            from: from.to_string(),
            to: to.to_string(),
            body: body.to_string(),
        };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
        Ok(self.status.clone())
    }
}

/// Send and log; a failed send yields `None` and is not retried.
pub(crate) async fn deliver(
    messenger: &dyn Messenger,
    from: &str,
    to: &str,
    body: &str,
) -> Option<DeliveryStatus> {
    match messenger.send_message(from, to, body).await {
        Ok(status) => {
            if status.is_failure() {
                warn!(to, status = %status, "Transport reported delivery failure");
            }
            Some(status)
        }
        Err(e) => {
            warn!(to, error = %e, "Failed to send message");
            None
        }
    }
}
