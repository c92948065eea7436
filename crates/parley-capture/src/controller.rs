//! Capture controller managing the microphone lifecycle.
//!
//! The `CaptureController` owns at most one open recording at a time and drives
//! it through a strict state machine:
//! - Idle -> Starting (permission requested)
//! - Starting -> Recording (device opened)
//! - Starting -> Idle (access refused or no device)
//! - Recording -> Stopping -> Idle (stop)
//!
//! Stopping always releases the device tracks, and stopping while not recording
//! is a no-op. A device that failed mid-recording is reported by `stop` instead
//! of producing a truncated payload.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use parley_core::config::CaptureConfig;
use parley_core::types::{AudioEncoding, AudioPayload};

use crate::device::{DeviceTracks, Microphone};
use crate::error::CaptureError;
use crate::stream::StreamTransport;
use crate::wav;

/// Lifecycle state of the microphone handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    /// No capture in progress.
    Idle,
    /// Waiting for the device to grant access.
    Starting,
    /// Chunks are flowing.
    Recording,
    /// Finalizing the recording and releasing the device.
    Stopping,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "Idle"),
            CaptureState::Starting => write!(f, "Starting"),
            CaptureState::Recording => write!(f, "Recording"),
            CaptureState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Snapshot of a capture that was just opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHandle {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Chunks go to the streaming transport instead of a buffer.
    pub streaming: bool,
}

/// What `stop` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Buffered recording, ready for upload.
    Batch(AudioPayload),
    /// Chunks were forwarded over the streaming transport, which is now closed.
    Streamed { chunks_sent: usize },
    /// There was nothing to stop.
    NotRecording,
    /// The device failed while recording; whatever was captured is discarded.
    Failed(CaptureError),
}

#[derive(Debug, Default)]
struct PumpReport {
    buffered: Vec<Vec<u8>>,
    forwarded: usize,
    failed: usize,
}

struct ActiveCapture {
    handle: CaptureHandle,
    encoding: AudioEncoding,
    tracks: Box<dyn DeviceTracks>,
    pump: JoinHandle<PumpReport>,
}

/// Owns the microphone and turns a start/stop cycle into an upload payload or
/// a closed stream.
pub struct CaptureController {
    microphone: Arc<dyn Microphone>,
    transport: Option<Arc<dyn StreamTransport>>,
    chunk_interval: Duration,
    file_name: String,
    state: Mutex<CaptureState>,
    active: tokio::sync::Mutex<Option<ActiveCapture>>,
}

impl fmt::Debug for CaptureController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureController")
            .field("state", &self.state())
            .field("streaming", &self.transport.is_some())
            .field("chunk_interval", &self.chunk_interval)
            .finish()
    }
}

impl CaptureController {
    /// Create a batch-mode controller: chunks are buffered until `stop`.
    pub fn new(microphone: Arc<dyn Microphone>, config: &CaptureConfig) -> Self {
        Self {
            microphone,
            transport: None,
            chunk_interval: config.chunk_interval(),
            file_name: config.file_name.clone(),
            state: Mutex::new(CaptureState::Idle),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Forward every chunk to `transport` as it arrives instead of buffering.
    pub fn with_transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.transport.is_some()
    }

    /// Returns the current capture state.
    pub fn state(&self) -> CaptureState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    fn set_state(&self, next: CaptureState) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracing::debug!("Capture state: {} -> {}", *guard, next);
        *guard = next;
    }

    /// Move from `from` to `to` only if the current state is `from`.
    fn compare_and_set(&self, from: CaptureState, to: CaptureState) -> Result<(), CaptureState> {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard == from {
            tracing::debug!("Capture state: {} -> {}", *guard, to);
            *guard = to;
            Ok(())
        } else {
            Err(*guard)
        }
    }

    /// Request microphone access and begin recording.
    ///
    /// Rejected with `AlreadyActive` unless the controller is idle, so the
    /// device is never opened twice.
    pub async fn start(&self) -> Result<CaptureHandle, CaptureError> {
        self.compare_and_set(CaptureState::Idle, CaptureState::Starting)
            .map_err(|current| CaptureError::AlreadyActive(current.to_string()))?;

        match self.open().await {
            Ok(handle) => {
                self.set_state(CaptureState::Recording);
                tracing::info!(
                    capture_id = %handle.id,
                    streaming = handle.streaming,
                    "Capture started"
                );
                Ok(handle)
            }
            Err(e) => {
                self.set_state(CaptureState::Idle);
                tracing::warn!(error = %e, "Capture failed to start");
                Err(e)
            }
        }
    }

    async fn open(&self) -> Result<CaptureHandle, CaptureError> {
        let mut stream = self.microphone.open(self.chunk_interval).await?;

        if let Some(ref transport) = self.transport {
            if let Err(e) = transport.begin().await {
                stream.tracks.release();
                return Err(e);
            }
        }

        let handle = CaptureHandle {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            streaming: self.transport.is_some(),
        };
        let pump = tokio::spawn(pump_chunks(stream.chunks, self.transport.clone()));

        *self.active.lock().await = Some(ActiveCapture {
            handle: handle.clone(),
            encoding: stream.encoding,
            tracks: stream.tracks,
            pump,
        });
        Ok(handle)
    }

    /// Finalize the recording and release the device.
    ///
    /// Returns the buffered payload in batch mode, or closes the stream in
    /// streaming mode. Calling this while not recording does nothing.
    pub async fn stop(&self) -> StopOutcome {
        if let Err(current) = self.compare_and_set(CaptureState::Recording, CaptureState::Stopping)
        {
            tracing::debug!(state = %current, "Stop ignored: not recording");
            return StopOutcome::NotRecording;
        }

        let active = self.active.lock().await.take();
        let outcome = match active {
            Some(active) => self.finalize(active).await,
            None => StopOutcome::NotRecording,
        };

        self.set_state(CaptureState::Idle);
        outcome
    }

    async fn finalize(&self, mut active: ActiveCapture) -> StopOutcome {
        active.tracks.release();

        let report = match active.pump.await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "Capture pump task failed");
                PumpReport::default()
            }
        };
        let elapsed_ms = (Utc::now() - active.handle.started_at).num_milliseconds();
        let failure = active.tracks.failure();

        if let Some(ref transport) = self.transport {
            if let Err(e) = transport.finish().await {
                tracing::warn!(error = %e, "Streaming transport did not close cleanly");
            }
            tracing::info!(
                capture_id = %active.handle.id,
                elapsed_ms,
                chunks_sent = report.forwarded,
                chunks_failed = report.failed,
                "Capture stopped (streamed)"
            );
            if let Some(e) = failure {
                tracing::warn!(
                    capture_id = %active.handle.id,
                    error = %e,
                    "Device failed during streamed capture"
                );
                return StopOutcome::Failed(e);
            }
            return StopOutcome::Streamed {
                chunks_sent: report.forwarded,
            };
        }

        if let Some(e) = failure {
            tracing::warn!(
                capture_id = %active.handle.id,
                elapsed_ms,
                error = %e,
                "Device failed during capture; recording discarded"
            );
            return StopOutcome::Failed(e);
        }

        let payload = self.assemble(report.buffered, &active.encoding);
        tracing::info!(
            capture_id = %active.handle.id,
            elapsed_ms,
            bytes = payload.len(),
            "Capture stopped"
        );
        StopOutcome::Batch(payload)
    }

    fn assemble(&self, chunks: Vec<Vec<u8>>, encoding: &AudioEncoding) -> AudioPayload {
        let bytes = chunks.concat();
        match encoding {
            AudioEncoding::Encoded { mime_type } => {
                AudioPayload::new(bytes, mime_type.clone(), self.file_name.clone())
            }
            AudioEncoding::Pcm16 {
                sample_rate,
                channels,
            } => AudioPayload::new(
                wav::encode_wav(&bytes, *sample_rate, *channels),
                "audio/wav",
                "recording.wav",
            ),
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.get_mut().take() {
            tracing::warn!(capture_id = %active.handle.id, "Capture dropped while recording; releasing device");
            active.tracks.release();
            active.pump.abort();
        }
    }
}

async fn pump_chunks(
    mut chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    transport: Option<Arc<dyn StreamTransport>>,
) -> PumpReport {
    let mut report = PumpReport::default();
    while let Some(chunk) = chunks.recv().await {
        if chunk.is_empty() {
            continue;
        }
        match transport {
            Some(ref transport) => match transport.send_chunk(chunk).await {
                Ok(()) => report.forwarded += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(error = %e, "Dropped streamed chunk");
                }
            },
            None => report.buffered.push(chunk),
        }
    }
    report
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockMicrophone;
    use crate::stream::RecordingTransport;

    fn controller(mic: &MockMicrophone) -> CaptureController {
        CaptureController::new(Arc::new(mic.clone()), &CaptureConfig::default())
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CaptureState::Idle.to_string(), "Idle");
        assert_eq!(CaptureState::Starting.to_string(), "Starting");
        assert_eq!(CaptureState::Recording.to_string(), "Recording");
        assert_eq!(CaptureState::Stopping.to_string(), "Stopping");
    }

    #[tokio::test]
    async fn test_start_stop_batch() {
        let mic = MockMicrophone::new(vec![vec![1, 2], vec![], vec![3]]);
        let capture = controller(&mic);
        assert_eq!(capture.state(), CaptureState::Idle);

        let handle = capture.start().await.unwrap();
        assert!(!handle.streaming);
        assert_eq!(capture.state(), CaptureState::Recording);

        match capture.stop().await {
            StopOutcome::Batch(payload) => {
                assert_eq!(payload.bytes, vec![1, 2, 3]);
                assert_eq!(payload.mime_type, "audio/webm");
                assert_eq!(payload.file_name, "recording.webm");
            }
            other => panic!("Expected batch payload, got {:?}", other),
        }
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(mic.releases(), 1);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mic = MockMicrophone::new(vec![vec![1]]);
        let capture = controller(&mic);
        capture.start().await.unwrap();

        let err = capture.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::AlreadyActive(_)));
        assert_eq!(mic.opens(), 1);
        capture.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_start_opens_device_once() {
        let mic = MockMicrophone::new(vec![vec![1]]).with_open_delay(Duration::from_millis(20));
        let capture = controller(&mic);

        let (a, b) = tokio::join!(capture.start(), capture.start());
        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(mic.opens(), 1);

        capture.stop().await;
        assert_eq!(mic.releases(), 1);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let mic = MockMicrophone::new(vec![]);
        let capture = controller(&mic);
        assert_eq!(capture.stop().await, StopOutcome::NotRecording);
        assert_eq!(mic.releases(), 0);
    }

    #[tokio::test]
    async fn test_redundant_stop_releases_once() {
        let mic = MockMicrophone::new(vec![vec![5]]);
        let capture = controller(&mic);
        capture.start().await.unwrap();

        assert!(matches!(capture.stop().await, StopOutcome::Batch(_)));
        assert_eq!(capture.stop().await, StopOutcome::NotRecording);
        assert_eq!(mic.releases(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_returns_to_idle() {
        let mic = MockMicrophone::denied();
        let capture = controller(&mic);
        let err = capture.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
        assert_eq!(capture.state(), CaptureState::Idle);

        // Retry is allowed after a failure.
        let err = capture.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_any_start_stop_sequence_ends_idle_with_balanced_releases() {
        let mic = MockMicrophone::new(vec![vec![1]]);
        let capture = controller(&mic);
        let script = [true, true, false, false, true, false, false, true, true, false];

        for start in script {
            if start {
                let _ = capture.start().await;
            } else {
                capture.stop().await;
            }
        }
        capture.stop().await;

        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(mic.opens(), mic.releases());
        assert_eq!(mic.opens(), 3);
    }

    #[tokio::test]
    async fn test_pcm_device_is_wrapped_as_wav() {
        let mic = MockMicrophone::new(vec![vec![0, 0, 1, 0]]).with_encoding(AudioEncoding::Pcm16 {
            sample_rate: 16_000,
            channels: 1,
        });
        let capture = controller(&mic);
        capture.start().await.unwrap();

        match capture.stop().await {
            StopOutcome::Batch(payload) => {
                assert_eq!(payload.mime_type, "audio/wav");
                assert_eq!(payload.file_name, "recording.wav");
                assert_eq!(&payload.bytes[0..4], b"RIFF");
                assert_eq!(payload.len(), 44 + 4);
            }
            other => panic!("Expected batch payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_streaming_forwards_chunks() {
        let mic = MockMicrophone::new(vec![vec![1], vec![2], vec![3]]);
        let transport = RecordingTransport::new();
        let capture = controller(&mic).with_transport(Arc::new(transport.clone()));
        assert!(capture.is_streaming());

        let handle = capture.start().await.unwrap();
        assert!(handle.streaming);

        assert_eq!(capture.stop().await, StopOutcome::Streamed { chunks_sent: 3 });
        assert_eq!(transport.chunks(), vec![vec![1], vec![2], vec![3]]);
        assert_eq!(transport.begins(), 1);
        assert_eq!(transport.finishes(), 1);
        assert_eq!(mic.releases(), 1);
    }

    #[tokio::test]
    async fn test_streaming_begin_failure_releases_device() {
        let mic = MockMicrophone::new(vec![vec![1]]);
        let capture =
            controller(&mic).with_transport(Arc::new(RecordingTransport::refusing()));

        let err = capture.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::StreamUnavailable(_)));
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(mic.opens(), 1);
        assert_eq!(mic.releases(), 1);
    }

    #[tokio::test]
    async fn test_device_lost_mid_recording_is_reported_on_stop() {
        let mic = MockMicrophone::new(vec![vec![1], vec![2]]).with_device_loss();
        let capture = controller(&mic);
        capture.start().await.unwrap();

        match capture.stop().await {
            StopOutcome::Failed(CaptureError::Device(_)) => {}
            other => panic!("Expected device failure, got {:?}", other),
        }
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(mic.releases(), 1);
    }

    #[tokio::test]
    async fn test_device_lost_while_streaming_still_closes_transport() {
        let mic = MockMicrophone::new(vec![vec![1]]).with_device_loss();
        let transport = RecordingTransport::new();
        let capture = controller(&mic).with_transport(Arc::new(transport.clone()));
        capture.start().await.unwrap();

        assert!(matches!(capture.stop().await, StopOutcome::Failed(_)));
        assert_eq!(transport.finishes(), 1);
        assert_eq!(mic.releases(), 1);
    }

    #[tokio::test]
    async fn test_drop_while_recording_releases_device() {
        let mic = MockMicrophone::new(vec![vec![1]]);
        {
            let capture = controller(&mic);
            capture.start().await.unwrap();
        }
        assert_eq!(mic.releases(), 1);
    }
}
