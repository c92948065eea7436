//! Scripted exchange for tests and offline runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use parley_core::types::{AudioPayload, Session, TurnResult};

use crate::error::ExchangeError;
use crate::TranscriptExchange;

/// A request the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeRequest {
    Audio { session: Session, payload: AudioPayload },
    Text { session: Session, text: String },
}

/// Replays queued responses in order, one per request.
///
/// With the queue empty every request fails as `Unreachable`.
#[derive(Debug, Clone, Default)]
pub struct MockExchange {
    responses: Arc<Mutex<VecDeque<Result<TurnResult, ExchangeError>>>>,
    requests: Arc<Mutex<Vec<ExchangeRequest>>>,
    delay: Option<Duration>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every response for `delay` before returning it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue the response for the next request.
    pub fn respond_with(&self, response: Result<TurnResult, ExchangeError>) -> &Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
        self
    }

    pub fn requests(&self) -> Vec<ExchangeRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    async fn answer(&self, request: ExchangeRequest) -> Result<TurnResult, ExchangeError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| Err(ExchangeError::Unreachable("no scripted response".to_string())))
    }
}

#[async_trait]
impl TranscriptExchange for MockExchange {
    async fn send_audio(
        &self,
        session: &Session,
        payload: &AudioPayload,
    ) -> Result<TurnResult, ExchangeError> {
        self.answer(ExchangeRequest::Audio {
            session: session.clone(),
            payload: payload.clone(),
        })
        .await
    }

    async fn send_text(&self, session: &Session, text: &str) -> Result<TurnResult, ExchangeError> {
        self.answer(ExchangeRequest::Text {
            session: session.clone(),
            text: text.to_string(),
        })
        .await
    }
}
