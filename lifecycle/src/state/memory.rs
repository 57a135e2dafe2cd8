//! In-memory session store
//!
//! Backs tests and seeded local runs. Sessions live in insertion order, so
//! "newest" is simply the last match. An optional artificial latency is
//! awaited before every operation, which widens the window in which
//! unserialized read-modify-write paths would race.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::store::{SessionStore, StoreError, StoreResult};
use super::types::{Button, Installation, NewSession, Session, SessionState};

#[derive(Default)]
struct Tables {
    sessions: Vec<Session>,
    buttons: HashMap<String, Button>,
    installations: Vec<Installation>,
}

/// Volatile [`SessionStore`] implementation
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Register an installation, replacing any with the same id
    pub fn insert_installation(&self, installation: Installation) -> StoreResult<()> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        tables.installations.retain(|i| i.id != installation.id);
        tables.installations.push(installation);
        Ok(())
    }

    /// Register a button, replacing any with the same id
    pub fn insert_button(&self, button: Button) -> StoreResult<()> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        tables.buttons.insert(button.button_id.clone(), button);
        Ok(())
    }

    /// Drop every session (test teardown)
    pub fn clear_sessions(&self) -> StoreResult<()> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        tables.sessions.clear();
        Ok(())
    }

    /// Number of stored sessions
    pub fn session_count(&self) -> StoreResult<usize> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.sessions.len())
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn newest_matching(
        &self,
        predicate: impl Fn(&Session) -> bool,
    ) -> StoreResult<Option<Session>> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables
            .sessions
            .iter()
            .rev()
            .find(|&s| predicate(s))
            .cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_unresolved_session_for_button(
        &self,
        button_id: &str,
    ) -> StoreResult<Option<Session>> {
        self.pause().await;
        self.newest_matching(|s| s.button_id == button_id && s.state.is_pre_response())
    }

    async fn create_session(&self, new: NewSession) -> StoreResult<Session> {
        self.pause().await;
        let session = Session::new(uuid::Uuid::new_v4().to_string(), new);
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        tables.sessions.push(session.clone());
        Ok(session)
    }

    async fn save_session(&self, session: &Session) -> StoreResult<()> {
        self.pause().await;
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        let slot = tables
            .sessions
            .iter_mut()
            .find(|s| s.id == session.id)
            .ok_or_else(|| StoreError::UnknownSession(session.id.clone()))?;
        let created_at = slot.created_at;
        *slot = session.clone();
        slot.created_at = created_at;
        slot.touch();
        Ok(())
    }

    async fn get_session_by_id(&self, id: &str) -> StoreResult<Option<Session>> {
        self.pause().await;
        self.newest_matching(|s| s.id == id)
    }

    async fn get_installation_by_id(&self, id: &str) -> StoreResult<Installation> {
        self.pause().await;
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        tables
            .installations
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| StoreError::InstallationNotFound(id.to_string()))
    }

    async fn find_most_recent_incomplete_session_for_phone_number(
        &self,
        phone_number: &str,
    ) -> StoreResult<Option<Session>> {
        self.pause().await;
        self.newest_matching(|s| {
            s.phone_number == phone_number && s.state != SessionState::Completed
        })
    }

    async fn get_button_by_id(&self, button_id: &str) -> StoreResult<Option<Button>> {
        self.pause().await;
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.buttons.get(button_id).cloned())
    }

    async fn list_installations(&self) -> StoreResult<Vec<Installation>> {
        self.pause().await;
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.installations.clone())
    }

    async fn recent_sessions_for_installation(
        &self,
        installation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Session>> {
        self.pause().await;
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables
            .sessions
            .iter()
            .rev()
            .filter(|s| s.installation_id == installation_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn sessions_for_button(&self, button_id: &str) -> StoreResult<Vec<Session>> {
        self.pause().await;
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables
            .sessions
            .iter()
            .filter(|s| s.button_id == button_id)
            .cloned()
            .collect())
    }
}
