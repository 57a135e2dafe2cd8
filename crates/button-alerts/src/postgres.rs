//! PostgreSQL session store
//!
//! Sessions keep their state as the human-readable label
//! ([`SessionState::as_str`]). A label that no longer decodes surfaces as
//! [`StoreError::Corrupt`] rather than being coerced to a default.

use async_trait::async_trait;
use lifecycle::state::{StoreResult, UnknownState};
use lifecycle::{Button, Installation, NewSession, Session, SessionState, SessionStore, StoreError};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS installations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    responder_phone_number TEXT NOT NULL,
    fallback_phone_number TEXT NOT NULL,
    incident_categories TEXT[] NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
);

CREATE TABLE IF NOT EXISTS buttons (
    button_id TEXT PRIMARY KEY,
    installation_id TEXT NOT NULL REFERENCES installations (id),
    unit TEXT NOT NULL,
    phone_number TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    button_id TEXT NOT NULL,
    installation_id TEXT NOT NULL REFERENCES installations (id),
    unit TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    state TEXT NOT NULL,
    num_presses INTEGER NOT NULL,
    incident_type TEXT,
    notes TEXT,
    fallback_alert_status TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
);

CREATE INDEX IF NOT EXISTS sessions_button_created ON sessions (button_id, created_at DESC);
CREATE INDEX IF NOT EXISTS sessions_phone_created ON sessions (phone_number, created_at DESC);
"#;

const SESSION_COLUMNS: &str = "id, button_id, installation_id, unit, phone_number, state, \
     num_presses, incident_type, notes, fallback_alert_status, created_at, updated_at";

const INSTALLATION_COLUMNS: &str =
    "id, name, responder_phone_number, fallback_phone_number, incident_categories, created_at";

fn backend(e: tokio_postgres::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Decode a stored state label for session `id` of `installation_id`
fn decode_state(id: &str, installation_id: &str, label: &str) -> StoreResult<SessionState> {
    label.parse().map_err(|e: UnknownState| StoreError::Corrupt {
        id: id.to_string(),
        installation_id: installation_id.to_string(),
        reason: e.to_string(),
    })
}

fn session_from_row(row: &Row) -> StoreResult<Session> {
    let id: String = row.try_get("id").map_err(backend)?;
    let installation_id: String = row.try_get("installation_id").map_err(backend)?;
    let label: String = row.try_get("state").map_err(backend)?;
    let state = decode_state(&id, &installation_id, &label)?;
    let num_presses: i32 = row.try_get("num_presses").map_err(backend)?;
    let num_presses = u32::try_from(num_presses).map_err(|_| StoreError::Corrupt {
        id: id.clone(),
        installation_id: installation_id.clone(),
        reason: format!("negative press count {}", num_presses),
    })?;

    Ok(Session {
        button_id: row.try_get("button_id").map_err(backend)?,
        installation_id,
        unit: row.try_get("unit").map_err(backend)?,
        phone_number: row.try_get("phone_number").map_err(backend)?,
        state,
        num_presses,
        incident_type: row.try_get("incident_type").map_err(backend)?,
        notes: row.try_get("notes").map_err(backend)?,
        fallback_alert_status: row.try_get("fallback_alert_status").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
        id,
    })
}

fn installation_from_row(row: &Row) -> StoreResult<Installation> {
    Ok(Installation {
        id: row.try_get("id").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        responder_phone_number: row.try_get("responder_phone_number").map_err(backend)?,
        fallback_phone_number: row.try_get("fallback_phone_number").map_err(backend)?,
        incident_categories: row.try_get("incident_categories").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn button_from_row(row: &Row) -> StoreResult<Button> {
    Ok(Button {
        button_id: row.try_get("button_id").map_err(backend)?,
        installation_id: row.try_get("installation_id").map_err(backend)?,
        unit: row.try_get("unit").map_err(backend)?,
        phone_number: row.try_get("phone_number").map_err(backend)?,
    })
}

fn press_count(count: u32) -> StoreResult<i32> {
    i32::try_from(count).map_err(|_| StoreError::Backend(format!("press count {} out of range", count)))
}

/// [`SessionStore`] backed by a single PostgreSQL connection
pub struct PgStore {
    client: tokio_postgres::Client,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(backend)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed");
            }
        });
        info!("Connected to PostgreSQL");
        Ok(Self { client })
    }

    /// Create tables and indexes that do not exist yet
    pub async fn migrate(&self) -> StoreResult<()> {
        self.client.batch_execute(SCHEMA).await.map_err(backend)?;
        debug!("Schema ready");
        Ok(())
    }

    pub async fn upsert_installation(&self, installation: &Installation) -> StoreResult<()> {
        self.client
            .execute(
                "INSERT INTO installations \
                 (id, name, responder_phone_number, fallback_phone_number, incident_categories) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, \
                 responder_phone_number = EXCLUDED.responder_phone_number, \
                 fallback_phone_number = EXCLUDED.fallback_phone_number, \
                 incident_categories = EXCLUDED.incident_categories",
                &[
                    &installation.id,
                    &installation.name,
                    &installation.responder_phone_number,
                    &installation.fallback_phone_number,
                    &installation.incident_categories,
                ],
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    pub async fn upsert_button(&self, button: &Button) -> StoreResult<()> {
        self.client
            .execute(
                "INSERT INTO buttons (button_id, installation_id, unit, phone_number) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (button_id) DO UPDATE SET installation_id = EXCLUDED.installation_id, \
                 unit = EXCLUDED.unit, phone_number = EXCLUDED.phone_number",
                &[
                    &button.button_id,
                    &button.installation_id,
                    &button.unit,
                    &button.phone_number,
                ],
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn first_session(
        &self,
        query: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> StoreResult<Option<Session>> {
        self.client
            .query_opt(query, params)
            .await
            .map_err(backend)?
            .as_ref()
            .map(session_from_row)
            .transpose()
    }

    async fn sessions(
        &self,
        query: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> StoreResult<Vec<Session>> {
        self.client
            .query(query, params)
            .await
            .map_err(backend)?
            .iter()
            .map(session_from_row)
            .collect()
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn find_unresolved_session_for_button(
        &self,
        button_id: &str,
    ) -> StoreResult<Option<Session>> {
        let unresolved: Vec<&str> = SessionState::ALL
            .into_iter()
            .filter(|s| s.is_pre_response())
            .map(SessionState::as_str)
            .collect();
        self.first_session(
            &format!(
                "SELECT {} FROM sessions WHERE button_id = $1 AND state = ANY($2) \
                 ORDER BY created_at DESC LIMIT 1",
                SESSION_COLUMNS
            ),
            &[&button_id, &unresolved],
        )
        .await
    }

    async fn create_session(&self, new: NewSession) -> StoreResult<Session> {
        let id = Uuid::new_v4().to_string();
        let row = self
            .client
            .query_one(
                &format!(
                    "INSERT INTO sessions \
                     (id, button_id, installation_id, unit, phone_number, state, num_presses) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
                    SESSION_COLUMNS
                ),
                &[
                    &id,
                    &new.button_id,
                    &new.installation_id,
                    &new.unit,
                    &new.phone_number,
                    &SessionState::Started.as_str(),
                    &press_count(new.num_presses)?,
                ],
            )
            .await
            .map_err(backend)?;
        session_from_row(&row)
    }

    async fn save_session(&self, session: &Session) -> StoreResult<()> {
        let updated = self
            .client
            .execute(
                "UPDATE sessions SET state = $2, num_presses = $3, incident_type = $4, \
                 notes = $5, fallback_alert_status = $6, updated_at = clock_timestamp() \
                 WHERE id = $1",
                &[
                    &session.id,
                    &session.state.as_str(),
                    &press_count(session.num_presses)?,
                    &session.incident_type,
                    &session.notes,
                    &session.fallback_alert_status,
                ],
            )
            .await
            .map_err(backend)?;
        if updated == 0 {
            return Err(StoreError::UnknownSession(session.id.clone()));
        }
        Ok(())
    }

    async fn get_session_by_id(&self, id: &str) -> StoreResult<Option<Session>> {
        self.first_session(
            &format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS),
            &[&id],
        )
        .await
    }

    async fn get_installation_by_id(&self, id: &str) -> StoreResult<Installation> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {} FROM installations WHERE id = $1", INSTALLATION_COLUMNS),
                &[&id],
            )
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::InstallationNotFound(id.to_string()))?;
        installation_from_row(&row)
    }

    async fn find_most_recent_incomplete_session_for_phone_number(
        &self,
        phone_number: &str,
    ) -> StoreResult<Option<Session>> {
        self.first_session(
            &format!(
                "SELECT {} FROM sessions WHERE phone_number = $1 AND state <> $2 \
                 ORDER BY created_at DESC LIMIT 1",
                SESSION_COLUMNS
            ),
            &[&phone_number, &SessionState::Completed.as_str()],
        )
        .await
    }

    async fn get_button_by_id(&self, button_id: &str) -> StoreResult<Option<Button>> {
        self.client
            .query_opt(
                "SELECT button_id, installation_id, unit, phone_number FROM buttons \
                 WHERE button_id = $1",
                &[&button_id],
            )
            .await
            .map_err(backend)?
            .as_ref()
            .map(button_from_row)
            .transpose()
    }

    async fn list_installations(&self) -> StoreResult<Vec<Installation>> {
        self.client
            .query(
                &format!("SELECT {} FROM installations ORDER BY created_at", INSTALLATION_COLUMNS),
                &[],
            )
            .await
            .map_err(backend)?
            .iter()
            .map(installation_from_row)
            .collect()
    }

    async fn recent_sessions_for_installation(
        &self,
        installation_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<Session>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.sessions(
            &format!(
                "SELECT {} FROM sessions WHERE installation_id = $1 \
                 ORDER BY created_at DESC LIMIT $2",
                SESSION_COLUMNS
            ),
            &[&installation_id, &limit],
        )
        .await
    }

    async fn sessions_for_button(&self, button_id: &str) -> StoreResult<Vec<Session>> {
        self.sessions(
            &format!(
                "SELECT {} FROM sessions WHERE button_id = $1 ORDER BY created_at",
                SESSION_COLUMNS
            ),
            &[&button_id],
        )
        .await
    }
}
