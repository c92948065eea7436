//! The single shared audio output.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use url::Url;

use crate::error::PlaybackError;

/// An output that plays one clip at a time.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `url` and resolve when it ends naturally.
    ///
    /// Resolves with `PlaybackError::Interrupted` if `stop` is called first.
    async fn play_clip(&self, url: &Url) -> Result<(), PlaybackError>;

    /// Halt the clip currently playing, if any.
    fn stop(&self);
}

// =============================================================================
// Silent sink
// =============================================================================

/// Logs every clip instead of playing it. Used when no output device is built in.
#[derive(Debug, Clone, Default)]
pub struct SilentSink;

#[async_trait]
impl AudioSink for SilentSink {
    async fn play_clip(&self, url: &Url) -> Result<(), PlaybackError> {
        tracing::info!(url = %url, "Reply clip (no output device)");
        Ok(())
    }

    fn stop(&self) {}
}

// =============================================================================
// Mock sink
// =============================================================================

/// Test sink with scripted per-clip behavior.
///
/// Clips take `clip_duration` unless overridden, and fail with `Decode` when
/// listed as broken. Every started clip is recorded in order.
#[derive(Debug, Clone)]
pub struct MockSink {
    clip_duration: Duration,
    durations: Arc<Mutex<HashMap<Url, Duration>>>,
    broken: Arc<Mutex<HashSet<Url>>>,
    started: Arc<Mutex<Vec<Url>>>,
    completed: Arc<Mutex<Vec<Url>>>,
    stop_signal: Arc<Notify>,
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

impl MockSink {
    pub fn new(clip_duration: Duration) -> Self {
        Self {
            clip_duration,
            durations: Arc::new(Mutex::new(HashMap::new())),
            broken: Arc::new(Mutex::new(HashSet::new())),
            started: Arc::new(Mutex::new(Vec::new())),
            completed: Arc::new(Mutex::new(Vec::new())),
            stop_signal: Arc::new(Notify::new()),
        }
    }

    /// Make `url` fail as soon as it starts.
    pub fn break_clip(&self, url: &Url) {
        if let Ok(mut broken) = self.broken.lock() {
            broken.insert(url.clone());
        }
    }

    /// Give `url` its own length.
    pub fn set_duration(&self, url: &Url, duration: Duration) {
        if let Ok(mut durations) = self.durations.lock() {
            durations.insert(url.clone(), duration);
        }
    }

    /// Clips that began playing, in order.
    pub fn started(&self) -> Vec<Url> {
        self.started.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Clips that reached their natural end, in order.
    pub fn completed(&self) -> Vec<Url> {
        self.completed.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AudioSink for MockSink {
    async fn play_clip(&self, url: &Url) -> Result<(), PlaybackError> {
        let stopped = self.stop_signal.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();

        if let Ok(mut started) = self.started.lock() {
            started.push(url.clone());
        }
        let is_broken = self
            .broken
            .lock()
            .map(|b| b.contains(url))
            .unwrap_or(false);
        if is_broken {
            return Err(PlaybackError::Decode(format!("{} is not audio", url)));
        }
        let duration = self
            .durations
            .lock()
            .ok()
            .and_then(|d| d.get(url).copied())
            .unwrap_or(self.clip_duration);

        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                if let Ok(mut completed) = self.completed.lock() {
                    completed.push(url.clone());
                }
                Ok(())
            }
            _ = &mut stopped => Err(PlaybackError::Interrupted),
        }
    }

    fn stop(&self) {
        self.stop_signal.notify_waiters();
    }
}
