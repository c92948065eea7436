//! Streaming transport: forward capture chunks as they arrive instead of
//! buffering them for a batch upload.
//!
//! The socket is write-only from the client's side. Nothing the server sends
//! back is interpreted; incoming frames are drained and logged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::CaptureError;

/// Fire-and-forget sink for capture chunks, scoped to one capture cycle.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open the channel for a new capture cycle.
    async fn begin(&self) -> Result<(), CaptureError>;

    /// Forward one chunk. No acknowledgement is expected.
    async fn send_chunk(&self, chunk: Vec<u8>) -> Result<(), CaptureError>;

    /// Signal that the capture cycle is complete and close the channel.
    async fn finish(&self) -> Result<(), CaptureError>;
}

// =============================================================================
// WebSocket
// =============================================================================

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// How long `finish` waits for the server to acknowledge the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Pushes binary audio frames over a WebSocket, one connection per capture.
pub struct WebSocketTransport {
    url: Url,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            sink: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn take_reader(&self) -> Option<JoinHandle<()>> {
        match self.reader.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn begin(&self) -> Result<(), CaptureError> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| CaptureError::StreamUnavailable(format!("{}: {}", self.url, e)))?;
        let (write, mut read) = socket.split();

        let url = self.url.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Close(_)) => break,
                    Ok(other) => {
                        tracing::debug!(url = %url, len = other.len(), "Ignoring frame from streaming server")
                    }
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "Streaming socket read ended");
                        break;
                    }
                }
            }
        });

        *self.sink.lock().await = Some(write);
        if let Ok(mut guard) = self.reader.lock() {
            if let Some(stale) = guard.replace(reader) {
                stale.abort();
            }
        }
        tracing::info!(url = %self.url, "Streaming transport connected");
        Ok(())
    }

    async fn send_chunk(&self, chunk: Vec<u8>) -> Result<(), CaptureError> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| CaptureError::StreamUnavailable("socket is not open".to_string()))?;
        sink.send(Message::Binary(chunk))
            .await
            .map_err(|e| CaptureError::StreamUnavailable(e.to_string()))
    }

    async fn finish(&self) -> Result<(), CaptureError> {
        let sink = self.sink.lock().await.take();
        let result = match sink {
            Some(mut sink) => sink
                .close()
                .await
                .map_err(|e| CaptureError::StreamUnavailable(e.to_string())),
            None => Ok(()),
        };

        if let Some(mut reader) = self.take_reader() {
            if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
        }
        tracing::info!(url = %self.url, "Streaming transport closed");
        result
    }
}

// =============================================================================
// Recording transport (tests)
// =============================================================================

/// In-memory transport that records everything it is given.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    begins: Arc<AtomicUsize>,
    finishes: Arc<AtomicUsize>,
    refuse: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `begin` always fails.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.chunks.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn finishes(&self) -> usize {
        self.finishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for RecordingTransport {
    async fn begin(&self) -> Result<(), CaptureError> {
        if self.refuse {
            return Err(CaptureError::StreamUnavailable(
                "recording transport refuses connections".to_string(),
            ));
        }
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_chunk(&self, chunk: Vec<u8>) -> Result<(), CaptureError> {
        self.chunks
            .lock()
            .map_err(|e| CaptureError::StreamUnavailable(e.to_string()))?
            .push(chunk);
        Ok(())
    }

    async fn finish(&self) -> Result<(), CaptureError> {
        self.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
