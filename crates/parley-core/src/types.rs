use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

// =============================================================================
// Input mode
// =============================================================================

/// How the user feeds utterances into the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Microphone capture, sent as audio.
    #[default]
    Speak,
    /// Typed text, sent as JSON.
    Type,
}

impl InputMode {
    /// The other mode.
    pub fn toggled(self) -> Self {
        match self {
            InputMode::Speak => InputMode::Type,
            InputMode::Type => InputMode::Speak,
        }
    }

    /// Status line shown while waiting for input in this mode.
    pub fn ready_prompt(self) -> &'static str {
        match self {
            InputMode::Speak => "Press start to talk.",
            InputMode::Type => "Type a message and press send.",
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputMode::Speak => write!(f, "speak"),
            InputMode::Type => write!(f, "type"),
        }
    }
}

impl std::str::FromStr for InputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "speak" | "voice" => Ok(InputMode::Speak),
            "type" | "text" => Ok(InputMode::Type),
            other => Err(format!("unknown input mode: {}", other)),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Client-chosen identifier scoping the backend's memory to one conversation.
///
/// Opaque to everything except `SessionIdentity`, which creates it once per
/// page lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session(String);

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Audio
// =============================================================================

/// How a microphone encodes the bytes it emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioEncoding {
    /// Chunks are slices of an already-containerized stream (webm, ogg, wav file).
    Encoded { mime_type: String },
    /// Chunks are raw little-endian 16-bit PCM samples.
    Pcm16 { sample_rate: u32, channels: u16 },
}

impl AudioEncoding {
    pub fn encoded(mime_type: impl Into<String>) -> Self {
        AudioEncoding::Encoded {
            mime_type: mime_type.into(),
        }
    }
}

/// A finished utterance ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl AudioPayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

// =============================================================================
// Turn result
// =============================================================================

/// What the backend produced for one successful turn.
///
/// Consumed once by the orchestrator and then dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TurnResult {
    pub transcription: String,
    pub reply_text: String,
    /// Reply clips in playback order. May be empty.
    pub reply_audio_urls: Vec<Url>,
    pub fallback_audio_url: Option<Url>,
}

/// Whatever a failed exchange still managed to return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartialTurn {
    pub transcription: Option<String>,
    pub reply_text: Option<String>,
    pub fallback_audio_url: Option<Url>,
}

impl PartialTurn {
    pub fn is_empty(&self) -> bool {
        self.transcription.is_none() && self.reply_text.is_none() && self.fallback_audio_url.is_none()
    }
}

// =============================================================================
// Controls
// =============================================================================

/// Which user controls are currently enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Controls {
    pub start: bool,
    pub stop: bool,
    pub submit: bool,
    pub switch_mode: bool,
}

impl Controls {
    /// Every control disabled.
    pub const LOCKED: Controls = Controls {
        start: false,
        stop: false,
        submit: false,
        switch_mode: false,
    };

    /// Controls for an idle conversation in `mode`.
    pub fn ready(mode: InputMode) -> Self {
        Controls {
            start: mode == InputMode::Speak,
            stop: false,
            submit: mode == InputMode::Type,
            switch_mode: true,
        }
    }

    /// Controls while the microphone is recording.
    pub fn capturing() -> Self {
        Controls {
            stop: true,
            ..Controls::LOCKED
        }
    }
}
