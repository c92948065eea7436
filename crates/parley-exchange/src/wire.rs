//! Wire shapes returned by the backend and their validation.
//!
//! Every field is optional on the wire; validation decides which absences
//! make a body unusable.

use serde::Deserialize;
use url::Url;

use parley_core::types::{PartialTurn, TurnResult};

use crate::error::ExchangeError;

/// Success body of the chat endpoints: `{transcription, llm_response, audio_urls}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatReplyBody {
    pub transcription: Option<String>,
    pub llm_response: Option<String>,
    pub audio_urls: Option<Vec<String>>,
    pub fallback_audio_url: Option<String>,
}

/// Error body: `{detail, fallback_audio_url?, transcription?, llm_response?}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    /// A string, or a structured validation report.
    pub detail: Option<serde_json::Value>,
    pub fallback_audio_url: Option<String>,
    pub transcription: Option<String>,
    pub llm_response: Option<String>,
}

/// `POST /generate-audio/` success body.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedAudioBody {
    pub audio_url: Option<String>,
}

/// `POST /tts/echo` success body.
#[derive(Debug, Clone, Deserialize)]
pub struct EchoBody {
    pub audio_url: Option<String>,
    pub transcription: Option<String>,
}

/// Resolve a possibly-relative URL returned by the backend.
pub fn resolve_url(base: &Url, raw: &str) -> Result<Url, ExchangeError> {
    base.join(raw.trim())
        .map_err(|e| ExchangeError::MalformedResponse(format!("bad audio url {:?}: {}", raw, e)))
}

/// Parse a 2xx body as JSON of shape `T`.
pub fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ExchangeError> {
    serde_json::from_slice(body).map_err(|e| ExchangeError::MalformedResponse(e.to_string()))
}

impl ChatReplyBody {
    /// Validate into a `TurnResult`.
    ///
    /// `transcription_fallback` is used by text endpoints, whose responses may
    /// omit the transcription because the user's words are already known.
    pub fn into_turn(
        self,
        base: &Url,
        transcription_fallback: Option<&str>,
    ) -> Result<TurnResult, ExchangeError> {
        let transcription = self
            .transcription
            .or_else(|| transcription_fallback.map(str::to_string))
            .ok_or_else(|| ExchangeError::MalformedResponse("missing transcription".to_string()))?;
        let reply_text = self
            .llm_response
            .ok_or_else(|| ExchangeError::MalformedResponse("missing llm_response".to_string()))?;
        let raw_urls = self
            .audio_urls
            .ok_or_else(|| ExchangeError::MalformedResponse("missing audio_urls".to_string()))?;

        let reply_audio_urls = raw_urls
            .iter()
            .filter(|u| !u.trim().is_empty())
            .map(|u| resolve_url(base, u))
            .collect::<Result<Vec<_>, _>>()?;
        let fallback_audio_url = self
            .fallback_audio_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| resolve_url(base, u))
            .transpose()?;

        Ok(TurnResult {
            transcription,
            reply_text,
            reply_audio_urls,
            fallback_audio_url,
        })
    }
}

impl ErrorBody {
    /// Render `detail` as plain text.
    pub fn detail_text(&self) -> Option<String> {
        match self.detail.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Salvage partial results. An unparseable fallback URL is dropped rather
    /// than failing the whole classification.
    pub fn partial(&self, base: &Url) -> PartialTurn {
        let fallback_audio_url = self
            .fallback_audio_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .and_then(|u| match resolve_url(base, u) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unusable fallback audio url");
                    None
                }
            });
        PartialTurn {
            transcription: non_blank(self.transcription.as_deref()),
            reply_text: non_blank(self.llm_response.as_deref()),
            fallback_audio_url,
        }
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty()).map(str::to_string)
}

/// Classify a non-2xx response body.
pub fn server_error(status: u16, body: &[u8], base: &Url) -> ExchangeError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => ExchangeError::Server {
            status,
            detail: parsed.detail_text(),
            partial: parsed.partial(base),
        },
        Err(_) => ExchangeError::Server {
            status,
            detail: None,
            partial: PartialTurn::default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Url {
        Url::parse("http://localhost:8000/").unwrap()
    }

    #[test]
    fn test_full_reply_validates() {
        let body: ChatReplyBody = serde_json::from_value(json!({
            "transcription": "what's the weather",
            "llm_response": "Sunny.",
            "audio_urls": ["https://cdn.example.com/a.mp3", "/static/b.mp3"]
        }))
        .unwrap();
        let turn = body.into_turn(&base(), None).unwrap();
        assert_eq!(turn.transcription, "what's the weather");
        assert_eq!(turn.reply_text, "Sunny.");
        assert_eq!(
            turn.reply_audio_urls
                .iter()
                .map(Url::as_str)
                .collect::<Vec<_>>(),
            vec![
                "https://cdn.example.com/a.mp3",
                "http://localhost:8000/static/b.mp3"
            ]
        );
        assert!(turn.fallback_audio_url.is_none());
    }

    #[test]
    fn test_empty_audio_list_is_valid() {
        let body: ChatReplyBody = serde_json::from_value(json!({
            "transcription": "hi",
            "llm_response": "hello",
            "audio_urls": []
        }))
        .unwrap();
        let turn = body.into_turn(&base(), None).unwrap();
        assert!(turn.reply_audio_urls.is_empty());
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        for value in [
            json!({"llm_response": "x", "audio_urls": []}),
            json!({"transcription": "x", "audio_urls": []}),
            json!({"transcription": "x", "llm_response": "y"}),
        ] {
            let body: ChatReplyBody = serde_json::from_value(value).unwrap();
            let err = body.into_turn(&base(), None).unwrap_err();
            assert!(matches!(err, ExchangeError::MalformedResponse(_)));
        }
    }

    #[test]
    fn test_text_endpoint_transcription_fallback() {
        let body: ChatReplyBody = serde_json::from_value(json!({
            "llm_response": "Paris.",
            "audio_urls": ["/a.mp3"]
        }))
        .unwrap();
        let turn = body
            .into_turn(&base(), Some("capital of France?"))
            .unwrap();
        assert_eq!(turn.transcription, "capital of France?");
    }

    #[test]
    fn test_wrong_type_is_malformed() {
        let err = parse_body::<ChatReplyBody>(br#"{"audio_urls": "not-a-list"}"#).unwrap_err();
        assert!(matches!(err, ExchangeError::MalformedResponse(_)));
        let err = parse_body::<ChatReplyBody>(b"<html>").unwrap_err();
        assert!(matches!(err, ExchangeError::MalformedResponse(_)));
    }

    #[test]
    fn test_server_error_extracts_partial() {
        let body = json!({
            "detail": "TTS failed",
            "transcription": "tell me a joke",
            "llm_response": "Why did the chicken...",
            "fallback_audio_url": "/static/fallback.mp3"
        });
        let err = server_error(500, body.to_string().as_bytes(), &base());
        match err {
            ExchangeError::Server {
                status,
                detail,
                partial,
            } => {
                assert_eq!(status, 500);
                assert_eq!(detail.as_deref(), Some("TTS failed"));
                assert_eq!(partial.transcription.as_deref(), Some("tell me a joke"));
                assert_eq!(
                    partial.fallback_audio_url.map(|u| u.to_string()),
                    Some("http://localhost:8000/static/fallback.mp3".to_string())
                );
            }
            other => panic!("Expected server error, got {:?}", other),
        }
    }

    #[test]
    fn test_server_error_structured_detail() {
        let body = json!({"detail": [{"loc": ["body", "text"], "msg": "field required"}]});
        let err = server_error(422, body.to_string().as_bytes(), &base());
        let detail = err.detail().unwrap();
        assert!(detail.contains("field required"));
    }

    #[test]
    fn test_server_error_non_json_body() {
        let err = server_error(503, b"Service Unavailable", &base());
        assert_eq!(
            err,
            ExchangeError::Server {
                status: 503,
                detail: None,
                partial: PartialTurn::default()
            }
        );
    }

    #[test]
    fn test_blank_fields_do_not_count_as_partial() {
        let body = json!({"detail": "  ", "transcription": "", "fallback_audio_url": " "});
        let err = server_error(500, body.to_string().as_bytes(), &base());
        assert!(err.detail().is_none());
        assert!(err.partial().unwrap().is_empty());
    }
}
