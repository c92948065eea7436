//! Error types for playback and fallback speech.

use parley_core::error::ParleyError;

/// Why a clip did not play to completion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("could not fetch clip: {0}")]
    Fetch(String),
    #[error("could not decode clip: {0}")]
    Decode(String),
    #[error("output device error: {0}")]
    Device(String),
    #[error("playback interrupted")]
    Interrupted,
}

/// Why local speech synthesis failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NarratorError {
    #[error("speech command failed to start: {0}")]
    Spawn(String),
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
}

impl From<PlaybackError> for ParleyError {
    fn from(err: PlaybackError) -> Self {
        ParleyError::Playback(err.to_string())
    }
}
