//! Error types for microphone capture.

use parley_core::error::ParleyError;

/// Errors from opening or driving the microphone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("no microphone available: {0}")]
    DeviceUnavailable(String),
    #[error("streaming transport unavailable: {0}")]
    StreamUnavailable(String),
    #[error("capture already in progress ({0})")]
    AlreadyActive(String),
    #[error("device error: {0}")]
    Device(String),
}

impl CaptureError {
    /// Plain-language status line for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied(_) => "Microphone access denied. Please allow access.",
            CaptureError::DeviceUnavailable(_) => "No microphone found. Please connect one and try again.",
            CaptureError::StreamUnavailable(_) => "Couldn't reach the streaming server. Please try again.",
            CaptureError::AlreadyActive(_) => "Already recording.",
            CaptureError::Device(_) => "The microphone stopped working. Please try again.",
        }
    }
}

impl From<CaptureError> for ParleyError {
    fn from(err: CaptureError) -> Self {
        ParleyError::Capture(err.to_string())
    }
}
