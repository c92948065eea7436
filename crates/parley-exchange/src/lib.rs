//! Transcript exchange with the conversation backend.
//!
//! One request per turn, no retries. Responses are validated into `TurnResult`
//! or classified into an `ExchangeError` that still carries whatever partial
//! data the backend returned.

pub mod client;
pub mod error;
pub mod mock;
pub mod wire;

use async_trait::async_trait;

use parley_core::types::{AudioPayload, Session, TurnResult};

pub use client::{EchoResult, HttpExchange};
pub use error::ExchangeError;
pub use mock::{ExchangeRequest, MockExchange};

/// Sends one utterance to the backend's session-scoped endpoint.
#[async_trait]
pub trait TranscriptExchange: Send + Sync {
    /// Upload a recorded utterance.
    async fn send_audio(
        &self,
        session: &Session,
        payload: &AudioPayload,
    ) -> Result<TurnResult, ExchangeError>;

    /// Send a typed utterance.
    async fn send_text(&self, session: &Session, text: &str) -> Result<TurnResult, ExchangeError>;
}
