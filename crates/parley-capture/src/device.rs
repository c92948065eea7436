//! Microphone devices: the trait the controller drives plus the non-hardware
//! implementations (scripted mock, file replay).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use parley_core::config::CaptureConfig;
use parley_core::types::{AudioEncoding, AudioPayload};

use crate::error::CaptureError;

// =============================================================================
// Traits
// =============================================================================

/// The tracks of an open microphone stream.
///
/// Releasing stops the hardware and closes the chunk channel of the owning
/// `RecordingStream`. Implementations must tolerate repeated calls.
pub trait DeviceTracks: Send {
    fn release(&mut self);

    /// The error that cut the recording short, if the device failed after it
    /// was opened.
    fn failure(&self) -> Option<CaptureError> {
        None
    }
}

/// An open recording: a chunk channel plus the tracks that feed it.
pub struct RecordingStream {
    /// Non-empty audio chunks, roughly one per chunk interval.
    pub chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    /// How the chunk bytes are encoded.
    pub encoding: AudioEncoding,
    pub tracks: Box<dyn DeviceTracks>,
}

impl std::fmt::Debug for RecordingStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingStream")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

/// A capture device that can be asked for access.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Request access and begin recording.
    ///
    /// Fails with `PermissionDenied` when access is refused and
    /// `DeviceUnavailable` when there is nothing to record from.
    async fn open(&self, chunk_interval: Duration) -> Result<RecordingStream, CaptureError>;
}

// =============================================================================
// Mock implementation
// =============================================================================

#[derive(Debug, Clone)]
enum MockBehavior {
    Grant,
    Deny,
    Missing,
}

/// Scripted microphone for tests.
///
/// Every successful `open` emits the configured chunks immediately and keeps the
/// channel open until the tracks are released. Opens and releases are counted
/// so tests can assert the hardware was returned exactly once per cycle.
#[derive(Debug, Clone)]
pub struct MockMicrophone {
    chunks: Vec<Vec<u8>>,
    encoding: AudioEncoding,
    behavior: MockBehavior,
    open_delay: Option<Duration>,
    lost: bool,
    opens: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl MockMicrophone {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            encoding: AudioEncoding::encoded("audio/webm"),
            behavior: MockBehavior::Grant,
            open_delay: None,
            lost: false,
            opens: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A microphone whose permission prompt is always refused.
    pub fn denied() -> Self {
        Self {
            behavior: MockBehavior::Deny,
            ..Self::new(Vec::new())
        }
    }

    /// A machine with no input device.
    pub fn missing() -> Self {
        Self {
            behavior: MockBehavior::Missing,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_encoding(mut self, encoding: AudioEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Simulate a slow permission prompt.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Simulate the device failing partway through every recording.
    pub fn with_device_loss(mut self) -> Self {
        self.lost = true;
        self
    }

    /// Successful opens so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Track releases so far.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

struct MockTracks {
    sender: Option<mpsc::UnboundedSender<Vec<u8>>>,
    releases: Arc<AtomicUsize>,
    lost: bool,
}

impl DeviceTracks for MockTracks {
    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.sender = None;
    }

    fn failure(&self) -> Option<CaptureError> {
        self.lost
            .then(|| CaptureError::Device("mock device disconnected".to_string()))
    }
}

#[async_trait]
impl Microphone for MockMicrophone {
    async fn open(&self, _chunk_interval: Duration) -> Result<RecordingStream, CaptureError> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        match self.behavior {
            MockBehavior::Deny => {
                return Err(CaptureError::PermissionDenied(
                    "mock permission refused".to_string(),
                ))
            }
            MockBehavior::Missing => {
                return Err(CaptureError::DeviceUnavailable(
                    "mock has no input device".to_string(),
                ))
            }
            MockBehavior::Grant => {}
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for chunk in &self.chunks {
            // Receiver is alive in this scope, send cannot fail.
            let _ = tx.send(chunk.clone());
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(chunks = self.chunks.len(), "Mock microphone opened");

        Ok(RecordingStream {
            chunks: rx,
            encoding: self.encoding.clone(),
            tracks: Box::new(MockTracks {
                sender: Some(tx),
                releases: Arc::clone(&self.releases),
                lost: self.lost,
            }),
        })
    }
}

// =============================================================================
// File replay
// =============================================================================

/// Default replay chunk size for encoded files.
const FILE_CHUNK_BYTES: usize = 16 * 1024;

/// Replays an audio file as if it were being recorded.
///
/// Useful for driving the client without hardware. The file is emitted in
/// fixed-size chunks, one per chunk interval, until it is exhausted or the
/// tracks are released.
#[derive(Debug, Clone)]
pub struct FileMicrophone {
    path: PathBuf,
    mime_type: String,
    chunk_bytes: usize,
}

impl FileMicrophone {
    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
            chunk_bytes: FILE_CHUNK_BYTES,
        }
    }

    /// Guess the MIME type from the extension, falling back to the configured one.
    pub fn from_config(path: impl Into<PathBuf>, config: &CaptureConfig) -> Self {
        let path = path.into();
        let mime = guess_mime(&path).unwrap_or(config.mime_type.as_str()).to_string();
        Self::new(path, mime)
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Read the whole file as one upload payload, skipping the replay.
    pub async fn read_payload(&self) -> Result<AudioPayload, CaptureError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            CaptureError::DeviceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("recording")
            .to_string();
        Ok(AudioPayload::new(bytes, self.mime_type.clone(), file_name))
    }
}

fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "wav" => Some("audio/wav"),
        "webm" => Some("audio/webm"),
        "ogg" | "oga" => Some("audio/ogg"),
        "mp3" => Some("audio/mpeg"),
        "m4a" => Some("audio/mp4"),
        _ => None,
    }
}

struct ReplayTracks {
    task: Option<JoinHandle<()>>,
}

impl DeviceTracks for ReplayTracks {
    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Microphone for FileMicrophone {
    async fn open(&self, chunk_interval: Duration) -> Result<RecordingStream, CaptureError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            CaptureError::DeviceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        tracing::info!(
            path = %self.path.display(),
            bytes = bytes.len(),
            "Replaying audio file as microphone input"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let chunk_bytes = self.chunk_bytes;
        let task = tokio::spawn(async move {
            for chunk in bytes.chunks(chunk_bytes) {
                if tx.send(chunk.to_vec()).is_err() {
                    break;
                }
                tokio::time::sleep(chunk_interval).await;
            }
        });

        Ok(RecordingStream {
            chunks: rx,
            encoding: AudioEncoding::encoded(self.mime_type.clone()),
            tracks: Box::new(ReplayTracks { task: Some(task) }),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
