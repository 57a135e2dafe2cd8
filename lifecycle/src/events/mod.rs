//! Lifecycle event stream
//!
//! Every engine path publishes what it did: sessions created, presses
//! coalesced, alerts sent, replies applied, timers skipped or cancelled.
//! Subscribers (logging sinks, tests) observe the stream; nothing in the
//! engine depends on anyone listening.
//!
//! ```ignore
//! let mut events = engine.events().subscribe_session(&session.id);
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.event_type());
//! }
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, SessionReceiver, SharedEventBus};
pub use types::{AlertKind, LifecycleEvent, TimerKind};
