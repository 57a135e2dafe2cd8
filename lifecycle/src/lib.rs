//! Session Lifecycle Engine
//!
//! Turns raw button presses into incident sessions and drives each session
//! through responder acknowledgment, incident categorisation and notes.
//!
//! # Components
//!
//! - [`aggregator`]: coalesces presses into one open session per button
//! - [`state_machine`]: pure transitions driven by responder SMS
//! - [`escalation`]: alert cadence plus the reminder and fallback timers
//! - [`lock`]: the critical section every read-modify-write goes through
//! - [`state`]: data model, store contract and an in-memory store
//! - [`messaging`]: outbound SMS contract
//! - [`events`]: broadcast stream of lifecycle events
//!
//! # Usage
//!
//! ```ignore
//! use lifecycle::{EngineConfig, LifecycleEngine, MemoryStore, RecordingMessenger};
//!
//! let engine = LifecycleEngine::new(store, messenger, EngineConfig::from_env())?;
//! let outcome = engine.ingest_press("button-1", 1).await?;
//! engine.handle_reply("+15550001111", &outcome.session.phone_number, "Ok").await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod events;
pub mod lock;
pub mod messaging;
pub mod state;
pub mod state_machine;

pub use aggregator::{PressGesture, PressOutcome};
pub use config::EngineConfig;
pub use engine::{LifecycleEngine, ReplyOutcome, ShutdownMode};
pub use error::{ConfigError, EngineError, EngineResult};
pub use events::{EventBus, LifecycleEvent};
pub use lock::LockScope;
pub use messaging::{
    DeliveryStatus, Messenger, MessagingError, OutboundMessage, RecordingMessenger, SharedMessenger,
};
pub use state::{
    Button, Installation, MemoryStore, NewSession, Session, SessionState, SessionStore,
    SharedSessionStore, StoreError,
};
