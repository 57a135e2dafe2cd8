//! Reply state machine: pure session transitions driven by responder SMS.
//!
//! ```text
//! Started ─────────────┐
//!                      ├─ any text ─▶ WaitingForCategory
//! WaitingForReply ─────┘                   │
//!                                          ├─ valid index ─▶ WaitingForDetails
//!                                          └─ otherwise ───▶ (unchanged, reprompt)
//! WaitingForDetails ── any text (notes) ─▶ Completed
//! Completed | TimedOut ── any text ──────▶ (unchanged, "no active session")
//! ```
//!
//! [`advance_session`] takes its inputs by reference and returns a new
//! session value together with the reply text. It performs no I/O and does
//! not touch timestamps; the store refreshes `updated_at` on save.

use crate::state::{Installation, Session, SessionState};

/// Reply texts sent back to the responder
pub mod replies {
    use crate::state::Installation;

    pub const CATEGORY_ACCEPTED: &str =
        "Thank you. If you like, you can reply with any further details about the incident.";

    pub const CATEGORY_NOT_RECOGNIZED: &str =
        "Sorry, the incident type wasn't recognized. Please try again.";

    pub const COMPLETED: &str =
        "Thank you. This session is now complete. (You don't need to respond to this message.)";

    pub const NO_ACTIVE_SESSION: &str =
        "There is no active session for this button. (You don't need to respond to this message.)";

    pub const INTERNAL_ERROR: &str = "Thank you for responding. Unfortunately, we have encountered an error in our system and will deal with it shortly.";

    /// Prompt listing the installation's categories by index
    pub fn category_prompt(installation: &Installation) -> String {
        let mut prompt = String::from(
            "Now that you have responded, please reply with the number that best describes the incident:",
        );
        for (index, label) in installation.incident_categories.iter().enumerate() {
            prompt.push_str(&format!("\n{} - {}", index, label));
        }
        prompt
    }
}

/// Result of applying one responder message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// The session after the message
    pub session: Session,
    /// Text to send back to the responder
    pub reply: String,
}

impl Transition {
    /// Whether the message moved the session to a different state
    pub fn changed_state(&self, before: &Session) -> bool {
        self.session.state != before.state
    }
}

/// Interpret `text` as an index into the installation's categories.
///
/// Surrounding whitespace is ignored. Empty, non-numeric, negative and
/// out-of-range input all yield `None`.
pub fn parse_category<'a>(installation: &'a Installation, text: &str) -> Option<&'a str> {
    let index: usize = text.trim().parse().ok()?;
    installation.category(index)
}

/// Apply a responder message to a session.
pub fn advance_session(
    session: &Session,
    installation: &Installation,
    message_text: &str,
) -> Transition {
    let mut next = session.clone();

    let reply = match session.state {
        SessionState::Started | SessionState::WaitingForReply => {
            next.state = SessionState::WaitingForCategory;
            replies::category_prompt(installation)
        }
        SessionState::WaitingForCategory => match parse_category(installation, message_text) {
            Some(label) => {
                next.incident_type = Some(label.to_string());
                next.state = SessionState::WaitingForDetails;
                replies::CATEGORY_ACCEPTED.to_string()
            }
            None => replies::CATEGORY_NOT_RECOGNIZED.to_string(),
        },
        SessionState::WaitingForDetails => {
            next.notes = Some(message_text.trim().to_string());
            next.state = SessionState::Completed;
            replies::COMPLETED.to_string()
        }
        SessionState::Completed | SessionState::TimedOut => {
            replies::NO_ACTIVE_SESSION.to_string()
        }
    };

    Transition {
        session: next,
        reply,
    }
}
