use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Controls, InputMode};

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Reply received and played (or nothing to play).
    Completed,
    /// Backend answered with an error; partial results and/or fallback audio used.
    PartialFailure,
    /// No response from the backend.
    Unreachable,
    /// The microphone could not be opened.
    CaptureFailed,
    /// Audio went out over the streaming transport; no reply channel exists.
    Streamed,
}

/// Everything the orchestrator tells its view.
///
/// Events are emitted in order after each state change and consumed by:
/// - The view (status line, controls, results panel)
/// - Tests (recorded and asserted on)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConversationEvent {
    /// The plain-language status line changed.
    StatusChanged { text: String },

    /// Control enablement changed.
    ControlsChanged { controls: Controls },

    /// The input mode switched.
    ModeChanged { mode: InputMode },

    /// Transcription and reply panels were cleared.
    ResultsCleared,

    /// The transcription of the user's utterance is available.
    TranscriptionShown { text: String },

    /// The agent's reply text is available.
    ReplyShown { text: String },

    /// A request/response cycle began.
    TurnStarted {
        turn_id: Uuid,
        mode: InputMode,
        timestamp: DateTime<Utc>,
    },

    /// A request/response cycle ended and the conversation is ready again.
    TurnFinished {
        turn_id: Uuid,
        outcome: TurnOutcome,
        timestamp: DateTime<Utc>,
    },

    /// Locally synthesized speech was requested.
    FallbackSpoken { message: String },
}

impl ConversationEvent {
    pub fn status(text: impl Into<String>) -> Self {
        ConversationEvent::StatusChanged { text: text.into() }
    }

    pub fn controls(controls: Controls) -> Self {
        ConversationEvent::ControlsChanged { controls }
    }

    /// The status text carried by this event, if any.
    pub fn status_text(&self) -> Option<&str> {
        match self {
            ConversationEvent::StatusChanged { text } => Some(text),
            _ => None,
        }
    }
}
