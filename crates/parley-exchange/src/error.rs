//! Error types for backend exchanges.

use parley_core::error::ParleyError;
use parley_core::types::PartialTurn;

/// How an exchange failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// No response at all: connection refused, reset, DNS, timeout.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// Non-2xx status. May still carry partial results and fallback audio.
    #[error("backend returned {status}{}", .detail.as_deref().map(|d| format!(": {}", d)).unwrap_or_default())]
    Server {
        status: u16,
        detail: Option<String>,
        partial: PartialTurn,
    },

    /// 2xx status but the body is not a usable turn.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Rejected before anything was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ExchangeError {
    /// Partial data salvaged from an error response.
    pub fn partial(&self) -> Option<&PartialTurn> {
        match self {
            ExchangeError::Server { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// Human-readable detail supplied by the backend.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ExchangeError::Server { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// Plain-language status line for this failure.
    pub fn user_message(&self) -> String {
        match self {
            ExchangeError::Unreachable(_) => {
                "I can't reach the server right now. Please check your connection and try again."
                    .to_string()
            }
            ExchangeError::Server {
                detail: Some(detail),
                ..
            } => format!("Error: {}", detail),
            ExchangeError::Server { detail: None, .. } | ExchangeError::MalformedResponse(_) => {
                "Something went wrong. Please try again.".to_string()
            }
            ExchangeError::InvalidRequest(reason) => reason.clone(),
        }
    }
}

impl From<ExchangeError> for ParleyError {
    fn from(err: ExchangeError) -> Self {
        ParleyError::Exchange(err.to_string())
    }
}
