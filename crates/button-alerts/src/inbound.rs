//! Line-delimited JSON inbound feed
//!
//! Each line is one transport event:
//!
//! ```text
//! {"type":"press","button_id":"111","gesture":"click"}
//! {"type":"press","button_id":"111","press_count":3}
//! {"type":"sms","from":"+15550000001","to":"+15559990001","body":"Ok"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. A malformed line or
//! a rejected event is logged and counted; the feed keeps going.

use lifecycle::{EngineResult, LifecycleEngine, PressGesture, PressOutcome, ReplyOutcome};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// One event from the webhook transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Press {
        button_id: String,
        #[serde(default)]
        gesture: Option<PressGesture>,
        /// Explicit count; takes precedence over the gesture
        #[serde(default)]
        press_count: Option<u32>,
    },
    Sms {
        from: String,
        to: String,
        body: String,
    },
}

impl InboundEvent {
    /// Presses carried by a press event. A bare press counts as one click.
    pub fn press_count(&self) -> Option<u32> {
        match self {
            Self::Press {
                gesture,
                press_count,
                ..
            } => Some(press_count.unwrap_or_else(|| {
                gesture.unwrap_or(PressGesture::Click).press_count()
            })),
            Self::Sms { .. } => None,
        }
    }
}

/// What the engine did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Press(PressOutcome),
    Reply(ReplyOutcome),
}

pub async fn dispatch(engine: &LifecycleEngine, event: &InboundEvent) -> EngineResult<Dispatched> {
    match event {
        InboundEvent::Press { button_id, .. } => {
            let count = event.press_count().unwrap_or(1);
            let outcome = engine.ingest_press(button_id, count).await?;
            info!(
                session_id = %outcome.session.id,
                button_id = %button_id,
                num_presses = outcome.session.num_presses,
                created = outcome.created,
                "Press handled"
            );
            Ok(Dispatched::Press(outcome))
        }
        InboundEvent::Sms { from, to, body } => {
            let outcome = engine.handle_reply(from, to, body).await?;
            match &outcome {
                ReplyOutcome::Advanced {
                    session,
                    previous_state,
                    ..
                } => info!(
                    session_id = %session.id,
                    from = %previous_state,
                    to = %session.state,
                    "Reply handled"
                ),
                ReplyOutcome::RejectedSender { session_id } => {
                    warn!(session_id = %session_id, sender = %from, "Reply rejected")
                }
                ReplyOutcome::NoActiveSession | ReplyOutcome::CorruptSession { .. } => {}
            }
            Ok(Dispatched::Reply(outcome))
        }
    }
}

/// Counters for one pass over a feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedSummary {
    pub processed: usize,
    pub malformed: usize,
    pub failed: usize,
}

/// Dispatch every event in `reader` in order, until end of input.
pub async fn run_feed<R>(engine: &LifecycleEngine, reader: R) -> std::io::Result<FeedSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = FeedSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: InboundEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed event");
                summary.malformed += 1;
                continue;
            }
        };

        match dispatch(engine, &event).await {
            Ok(_) => summary.processed += 1,
            Err(e) => {
                warn!(line = line_no, error = %e, "Event rejected");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
