//! Session persistence module
//!
//! Defines the data model shared by every lifecycle path and the contract
//! the engine consumes from persistence:
//! - `types`: sessions, installations, buttons and the closed state enum
//! - `store`: the [`SessionStore`] trait and its error type
//! - `memory`: a volatile store for tests and seeded local runs
//!
//! # Usage
//!
//! ```ignore
//! use lifecycle::state::{MemoryStore, SessionStore, NewSession};
//!
//! let store = MemoryStore::new();
//! let session = store.create_session(NewSession { .. }).await?;
//! store.save_session(&session).await?;
//! ```

pub mod memory;
pub mod store;
pub mod types;

pub use memory::MemoryStore;
pub use store::{SessionStore, SharedSessionStore, StoreError, StoreResult};
pub use types::{
    Button, ButtonId, Installation, InstallationId, NewSession, Session, SessionId,
    SessionState, UnknownState,
};
