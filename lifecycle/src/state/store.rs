//! Session store contract
//!
//! The engine never talks to a database directly. Everything it needs from
//! persistence goes through [`SessionStore`]; the binary crate provides a
//! PostgreSQL implementation and [`super::MemoryStore`] covers tests and
//! seeded local runs.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{Button, Installation, NewSession, Session, SessionId};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `save_session` was called for an identity the store has never issued
    #[error("session {0} does not exist yet; create it before saving")]
    UnknownSession(SessionId),

    #[error("installation not found: {0}")]
    InstallationNotFound(String),

    /// A persisted session could not be decoded. The owning installation
    /// is carried so the sender of a reply can still be checked.
    #[error("corrupt session {id}: {reason}")]
    Corrupt {
        id: String,
        installation_id: String,
        reason: String,
    },

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a session store
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// Durable keyed storage for sessions, buttons and installations.
///
/// Mutating paths call these methods only while holding the engine's
/// critical section. The display reads at the bottom are lock-free and may
/// observe slightly stale data.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Newest session for `button_id` still in a pre-response state
    /// (`Started`, `WaitingForReply`, `TimedOut`).
    async fn find_unresolved_session_for_button(
        &self,
        button_id: &str,
    ) -> StoreResult<Option<Session>>;

    /// Insert a new session in `Started` and return it with its identity.
    async fn create_session(&self, new: NewSession) -> StoreResult<Session>;

    /// Overwrite an existing session and refresh its `updated_at`.
    ///
    /// Fails with [`StoreError::UnknownSession`] if the identity was never
    /// created. Nothing is written in that case.
    async fn save_session(&self, session: &Session) -> StoreResult<()>;

    async fn get_session_by_id(&self, id: &str) -> StoreResult<Option<Session>>;

    async fn get_installation_by_id(&self, id: &str) -> StoreResult<Installation>;

    /// Newest session for `phone_number` that is not `Completed`.
    async fn find_most_recent_incomplete_session_for_phone_number(
        &self,
        phone_number: &str,
    ) -> StoreResult<Option<Session>>;

    async fn get_button_by_id(&self, button_id: &str) -> StoreResult<Option<Button>>;

    async fn list_installations(&self) -> StoreResult<Vec<Installation>>;

    /// Sessions for an installation, newest first, at most `limit` of them.
    async fn recent_sessions_for_installation(
        &self,
        installation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Session>>;

    /// Every session a button has produced, oldest first.
    async fn sessions_for_button(&self, button_id: &str) -> StoreResult<Vec<Session>>;
}
