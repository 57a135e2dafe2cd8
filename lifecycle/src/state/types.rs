//! Core types for session lifecycle persistence
//!
//! These types are what the store persists and what every engine path
//! passes around by value. Sessions are value copies: a path reads one,
//! derives the next value, and writes it back inside the critical section.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque session identity, assigned by the store
pub type SessionId = String;

/// Physical button identity
pub type ButtonId = String;

/// Installation (site) identity
pub type InstallationId = String;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Button pressed, responder alerted, nobody has answered yet
    Started,
    /// Reminder sent, still waiting for the responder to acknowledge
    WaitingForReply,
    /// Responder acknowledged, waiting for an incident category index
    WaitingForCategory,
    /// Category recorded, waiting for free-text notes
    WaitingForDetails,
    /// Notes recorded, terminal
    Completed,
    /// Reserved terminal state, nothing currently produces it
    TimedOut,
}

impl SessionState {
    /// Every state, in lifecycle order
    pub const ALL: [SessionState; 6] = [
        Self::Started,
        Self::WaitingForReply,
        Self::WaitingForCategory,
        Self::WaitingForDetails,
        Self::Completed,
        Self::TimedOut,
    ];

    /// Storage label for this state
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::WaitingForReply => "Waiting for reply",
            Self::WaitingForCategory => "Waiting for incident category",
            Self::WaitingForDetails => "Waiting for incident details",
            Self::Completed => "Completed",
            Self::TimedOut => "Timed out",
        }
    }

    /// States in which a new press coalesces into the existing session.
    pub fn is_pre_response(self) -> bool {
        matches!(self, Self::Started | Self::WaitingForReply | Self::TimedOut)
    }

    /// States reached only after the responder has replied at least once.
    pub fn is_responded_to(self) -> bool {
        matches!(
            self,
            Self::WaitingForCategory | Self::WaitingForDetails | Self::Completed
        )
    }

    /// Whether the reply state machine has nothing left to do.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored state label that matches no known [`SessionState`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized session state: {0:?}")]
pub struct UnknownState(pub String);

impl FromStr for SessionState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Arguments for creating a session (everything except store-assigned fields)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub button_id: ButtonId,
    pub installation_id: InstallationId,
    pub unit: String,
    pub phone_number: String,
    pub num_presses: u32,
}

impl NewSession {
    /// Session arguments for a first press on `button`
    pub fn for_button(button: &Button, num_presses: u32) -> Self {
        Self {
            button_id: button.button_id.clone(),
            installation_id: button.installation_id.clone(),
            unit: button.unit.clone(),
            phone_number: button.phone_number.clone(),
            num_presses,
        }
    }
}

/// One physical incident, from first press to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Store-assigned identity
    pub id: SessionId,

    /// Provenance, immutable after creation
    pub button_id: ButtonId,
    pub installation_id: InstallationId,
    pub unit: String,
    /// Virtual number the responder replies to
    pub phone_number: String,

    /// Current lifecycle state
    pub state: SessionState,

    /// Total presses coalesced into this session (>= 1, never decreases)
    pub num_presses: u32,

    /// Category label chosen by the responder
    pub incident_type: Option<String>,

    /// Free-text notes from the responder
    pub notes: Option<String>,

    /// Delivery status reported for the fallback escalation SMS
    pub fallback_alert_status: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Build a freshly created session in `Started`
    pub fn new(id: impl Into<SessionId>, new: NewSession) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            button_id: new.button_id,
            installation_id: new.installation_id,
            unit: new.unit,
            phone_number: new.phone_number,
            state: SessionState::Started,
            num_presses: new.num_presses,
            incident_type: None,
            notes: None,
            fallback_alert_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add presses from a coalesced button event
    pub fn record_presses(&mut self, presses: u32) {
        self.num_presses = self.num_presses.saturating_add(presses);
    }

    /// Touch the session to update last activity
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_responded_to(&self) -> bool {
        self.state.is_responded_to()
    }
}

/// A site configuration shared by its buttons
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: InstallationId,
    pub name: String,
    /// Number that receives alerts and is allowed to drive transitions
    pub responder_phone_number: String,
    /// Number that receives the escalation SMS
    pub fallback_phone_number: String,
    /// Ordered, index-addressable incident categories
    pub incident_categories: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Installation {
    /// Category label at `index`, if there is one
    pub fn category(&self, index: usize) -> Option<&str> {
        self.incident_categories.get(index).map(String::as_str)
    }
}

/// A physical button bound to one installation and one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub button_id: ButtonId,
    pub installation_id: InstallationId,
    pub unit: String,
    pub phone_number: String,
}
