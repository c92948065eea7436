//! Picks the microphone, speaker and streaming transport for this build.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use parley_capture::{
    CaptureController, CaptureError, FileMicrophone, Microphone, RecordingStream,
    WebSocketTransport,
};
use parley_core::config::ParleyConfig;
use parley_core::error::{ParleyError, Result};
use parley_playback::AudioSink;

/// Stand-in when the build has no input device and no file was given.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMicrophone;

#[async_trait]
impl Microphone for NoMicrophone {
    async fn open(&self, _chunk_interval: Duration) -> std::result::Result<RecordingStream, CaptureError> {
        Err(CaptureError::DeviceUnavailable(
            "no input device in this build; pass --input-file or build with --features native"
                .to_string(),
        ))
    }
}

pub fn microphone(input_file: Option<&Path>, config: &ParleyConfig) -> Arc<dyn Microphone> {
    if let Some(path) = input_file {
        tracing::info!(path = %path.display(), "Using audio file as microphone");
        return Arc::new(FileMicrophone::from_config(path, &config.capture));
    }
    native_microphone()
}

#[cfg(feature = "native")]
fn native_microphone() -> Arc<dyn Microphone> {
    Arc::new(parley_capture::CpalMicrophone::new())
}

#[cfg(not(feature = "native"))]
fn native_microphone() -> Arc<dyn Microphone> {
    Arc::new(NoMicrophone)
}

#[cfg(feature = "native")]
pub fn speaker() -> Arc<dyn AudioSink> {
    Arc::new(parley_playback::RodioSink::new())
}

#[cfg(not(feature = "native"))]
pub fn speaker() -> Arc<dyn AudioSink> {
    tracing::info!("No output device in this build; reply clips are logged");
    Arc::new(parley_playback::SilentSink)
}

/// Build the capture controller, streaming over WebSocket when configured.
pub fn capture_controller(
    microphone: Arc<dyn Microphone>,
    config: &ParleyConfig,
) -> Result<CaptureController> {
    let controller = CaptureController::new(microphone, &config.capture);
    if !config.capture.streaming {
        return Ok(controller);
    }
    let url = config.backend.streaming_url.as_deref().ok_or_else(|| {
        ParleyError::Config("capture.streaming requires backend.streaming_url".to_string())
    })?;
    let url = Url::parse(url)?;
    tracing::info!(url = %url, "Streaming capture enabled");
    Ok(controller.with_transport(Arc::new(WebSocketTransport::new(url))))
}
