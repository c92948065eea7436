use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for the parley client.
///
/// Loaded from `~/.parley/config.toml` by default. Every section falls back to
/// its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub narrator: NarratorConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check values that deserialize fine but cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.backend.base_url)?;
        url::Url::parse(&self.session.page_url)?;
        if let Some(ref ws) = self.backend.streaming_url {
            let parsed = url::Url::parse(ws)?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(ParleyError::Config(format!(
                    "streaming_url must use ws:// or wss://, got {}",
                    ws
                )));
            }
        }
        if self.capture.streaming && self.backend.streaming_url.is_none() {
            return Err(ParleyError::Config(
                "capture.streaming is enabled but backend.streaming_url is not set".to_string(),
            ));
        }
        if self.backend.request_timeout_secs == Some(0) {
            return Err(ParleyError::Config(
                "backend.request_timeout_secs must be greater than zero; omit it to wait indefinitely"
                    .to_string(),
            ));
        }
        if self.capture.chunk_interval_ms == 0 {
            return Err(ParleyError::Config(
                "capture.chunk_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.session.query_param.trim().is_empty() {
            return Err(ParleyError::Config(
                "session.query_param cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Where the conversation backend lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL for the HTTP endpoints.
    pub base_url: String,
    /// WebSocket endpoint for streamed capture. Streaming is off when unset.
    pub streaming_url: Option<String>,
    /// Per-request timeout. Unset means requests wait indefinitely.
    pub request_timeout_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            streaming_url: None,
            request_timeout_secs: None,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Microphone capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// How often the recorder emits a chunk.
    pub chunk_interval_ms: u64,
    /// Forward chunks over the streaming transport instead of buffering them.
    pub streaming: bool,
    /// MIME type reported for encoded recordings.
    pub mime_type: String,
    /// File name given to the uploaded recording.
    pub file_name: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: 500,
            streaming: false,
            mime_type: "audio/webm".to_string(),
            file_name: "recording.webm".to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

/// Session identifier placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Query parameter carrying the session id.
    pub query_param: String,
    /// Address the client starts from.
    pub page_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            query_param: "session_id".to_string(),
            page_url: "http://localhost:8000/".to_string(),
        }
    }
}

/// On-device fallback speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarratorConfig {
    pub enabled: bool,
    /// Explicit speech command (e.g. "espeak"). Detected from PATH when unset.
    pub command: Option<String>,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
        }
    }
}
