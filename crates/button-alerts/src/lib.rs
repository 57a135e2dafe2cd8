//! Runtime wiring for the session lifecycle engine
//!
//! - `config`: environment and command-line configuration
//! - `postgres`: PostgreSQL-backed [`lifecycle::SessionStore`]
//! - `twilio`: Twilio REST [`lifecycle::Messenger`]
//! - `seed`: TOML registry of installations and buttons
//! - `inbound`: line-delimited JSON feed of presses and SMS

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod inbound;
pub mod postgres;
pub mod seed;
pub mod twilio;

pub use config::{ServiceConfig, TwilioCredentials};
pub use inbound::{dispatch, run_feed, Dispatched, FeedSummary, InboundEvent};
pub use postgres::PgStore;
pub use seed::{SeedError, SeedFile};
pub use twilio::TwilioMessenger;
