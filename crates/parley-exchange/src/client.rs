//! reqwest-backed client for the conversation backend.
//!
//! Session-scoped endpoints:
//! - `POST /agent/chat/{session}`       multipart `file`
//! - `POST /agent/chat/text/{session}`  JSON `{text}`
//!
//! Sessionless endpoints kept for the simple flows:
//! - `POST /generate-audio/`  `{text} -> {audio_url}`
//! - `POST /tts/echo`         multipart `file -> {audio_url, transcription}`
//! - `POST /llm/query`        multipart `file -> {transcription, llm_response, audio_urls}`
//! - `POST /llm/text_query`   `{text} -> {llm_response, audio_urls}`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use url::Url;

use parley_core::config::BackendConfig;
use parley_core::types::{AudioPayload, Session, TurnResult};

use crate::error::ExchangeError;
use crate::wire::{self, ChatReplyBody, EchoBody, GeneratedAudioBody};
use crate::TranscriptExchange;

/// Result of the echo endpoint: the user's recording re-voiced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoResult {
    pub audio_url: Url,
    pub transcription: Option<String>,
}

/// HTTP implementation of `TranscriptExchange`.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpExchange {
    /// Build a client for `base_url`.
    ///
    /// With `timeout = None` a request waits for as long as the backend keeps
    /// the connection open.
    pub fn new(base_url: Url, timeout: Option<Duration>) -> Result<Self, ExchangeError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ExchangeError::InvalidRequest(format!("http client: {}", e)))?;
        Ok(Self {
            base_url: with_trailing_slash(base_url),
            client,
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, ExchangeError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ExchangeError::InvalidRequest(format!("base url: {}", e)))?;
        Self::new(base, config.request_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ExchangeError> {
        self.base_url
            .join(path)
            .map_err(|e| ExchangeError::InvalidRequest(format!("{}: {}", path, e)))
    }

    fn session_endpoint(&self, path: &str, session: &Session) -> Result<Url, ExchangeError> {
        let mut url = self.endpoint(path)?;
        url.path_segments_mut()
            .map_err(|_| ExchangeError::InvalidRequest("base url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(session.id());
        Ok(url)
    }

    fn audio_form(payload: &AudioPayload) -> Result<reqwest::multipart::Form, ExchangeError> {
        if payload.is_empty() {
            return Err(ExchangeError::InvalidRequest(
                "recording is empty".to_string(),
            ));
        }
        let part = reqwest::multipart::Part::bytes(payload.bytes.clone())
            .file_name(payload.file_name.clone())
            .mime_str(&payload.mime_type)
            .map_err(|e| ExchangeError::InvalidRequest(format!("mime type: {}", e)))?;
        Ok(reqwest::multipart::Form::new().part("file", part))
    }

    fn text_body(text: &str) -> Result<serde_json::Value, ExchangeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ExchangeError::InvalidRequest(
                "Please enter something first.".to_string(),
            ));
        }
        Ok(serde_json::json!({ "text": text }))
    }

    /// Send one request and return the 2xx body, or classify the failure.
    async fn dispatch(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, ExchangeError> {
        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                "timed out"
            } else if e.is_connect() {
                "connection failed"
            } else {
                "request failed"
            };
            tracing::warn!(error = %e, kind, "Backend unreachable");
            ExchangeError::Unreachable(format!("{}: {}", kind, e))
        })?;

        let status = response.status();
        let url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ExchangeError::Unreachable(format!("reading response: {}", e)))?;

        tracing::info!(
            url = %url,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backend responded"
        );

        if status.is_success() {
            Ok(body.to_vec())
        } else {
            let err = wire::server_error(status.as_u16(), &body, &self.base_url);
            tracing::warn!(error = %err, "Backend returned an error");
            Err(err)
        }
    }

    async fn turn(
        &self,
        request: reqwest::RequestBuilder,
        transcription_fallback: Option<&str>,
    ) -> Result<TurnResult, ExchangeError> {
        let body = self.dispatch(request).await?;
        wire::parse_body::<ChatReplyBody>(&body)?.into_turn(&self.base_url, transcription_fallback)
    }

    // -------------------------------------------------------------------------
    // Sessionless endpoints
    // -------------------------------------------------------------------------

    /// Synthesize `text` and return the clip URL.
    pub async fn generate_audio(&self, text: &str) -> Result<Url, ExchangeError> {
        let body = Self::text_body(text).map_err(|_| {
            ExchangeError::InvalidRequest("Please enter something for me to convert!".to_string())
        })?;
        let url = self.endpoint("generate-audio/")?;
        let raw = self.dispatch(self.client.post(url).json(&body)).await?;
        let parsed: GeneratedAudioBody = wire::parse_body(&raw)?;
        let audio_url = parsed
            .audio_url
            .ok_or_else(|| ExchangeError::MalformedResponse("missing audio_url".to_string()))?;
        wire::resolve_url(&self.base_url, &audio_url)
    }

    /// Upload a recording and get it back re-voiced.
    pub async fn echo(&self, payload: &AudioPayload) -> Result<EchoResult, ExchangeError> {
        let url = self.endpoint("tts/echo")?;
        let form = Self::audio_form(payload)?;
        let raw = self.dispatch(self.client.post(url).multipart(form)).await?;
        let parsed: EchoBody = wire::parse_body(&raw)?;
        let audio_url = parsed
            .audio_url
            .ok_or_else(|| ExchangeError::MalformedResponse("missing audio_url".to_string()))?;
        Ok(EchoResult {
            audio_url: wire::resolve_url(&self.base_url, &audio_url)?,
            transcription: parsed.transcription,
        })
    }

    /// One-shot voice query without conversation memory.
    pub async fn llm_query(&self, payload: &AudioPayload) -> Result<TurnResult, ExchangeError> {
        let url = self.endpoint("llm/query")?;
        let form = Self::audio_form(payload)?;
        self.turn(self.client.post(url).multipart(form), None).await
    }

    /// One-shot text query without conversation memory.
    pub async fn llm_text_query(&self, text: &str) -> Result<TurnResult, ExchangeError> {
        let body = Self::text_body(text)?;
        let url = self.endpoint("llm/text_query")?;
        self.turn(self.client.post(url).json(&body), Some(text.trim()))
            .await
    }
}

#[async_trait]
impl TranscriptExchange for HttpExchange {
    async fn send_audio(
        &self,
        session: &Session,
        payload: &AudioPayload,
    ) -> Result<TurnResult, ExchangeError> {
        let url = self.session_endpoint("agent/chat/", session)?;
        let form = Self::audio_form(payload)?;
        tracing::debug!(url = %url, bytes = payload.len(), "Uploading utterance");
        self.turn(self.client.post(url).multipart(form), None).await
    }

    async fn send_text(&self, session: &Session, text: &str) -> Result<TurnResult, ExchangeError> {
        let body = Self::text_body(text)?;
        let url = self.session_endpoint("agent/chat/text/", session)?;
        tracing::debug!(url = %url, chars = text.len(), "Sending typed utterance");
        self.turn(self.client.post(url).json(&body), Some(text.trim()))
            .await
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
