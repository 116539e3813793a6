//! Streaming events for one chat turn.
//!
//! `ChatStreamEvent` wraps provider-level stream chunks into the events a
//! front end renders: text as it arrives, then exactly one terminal event.

use localmind_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted while a response is generated.
///
/// - `chunk` — partial text from the model
/// - `done`  — the turn finished or was cancelled
/// - `error` — the model failed mid-stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamEvent {
    /// Partial text token from the model.
    Chunk { content: String },

    /// The stream is complete. `text` is everything delivered as chunks.
    Done {
        text: String,
        usage: Option<Usage>,
        cancelled: bool,
    },

    /// Generation failed; `partial` is the text delivered before the failure.
    Error { message: String, partial: String },
}

impl ChatStreamEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}
