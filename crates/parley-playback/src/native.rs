//! Default output device via rodio.
//!
//! Each clip is downloaded with reqwest, decoded from memory and played on a
//! blocking thread; the rodio output stream is not `Send`, so it lives and dies
//! on that thread.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rodio::{OutputStream, Sink};
use url::Url;

use crate::error::PlaybackError;
use crate::sink::AudioSink;

/// Plays clips on the default output device.
#[derive(Clone)]
pub struct RodioSink {
    client: reqwest::Client,
    current: Arc<Mutex<Option<Arc<Sink>>>>,
    stopped: Arc<AtomicBool>,
}

impl std::fmt::Debug for RodioSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioSink")
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for RodioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RodioSink {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            current: Arc::new(Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, PlaybackError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PlaybackError::Fetch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlaybackError::Fetch(format!("{} returned {}", url, status)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlaybackError::Fetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn set_current(current: &Mutex<Option<Arc<Sink>>>, sink: Option<Arc<Sink>>) {
        match current.lock() {
            Ok(mut guard) => *guard = sink,
            Err(poisoned) => *poisoned.into_inner() = sink,
        }
    }
}

/// Empty `slot` only if it still holds `mine`; a newer clip may own it by now.
fn release_slot<T>(slot: &Mutex<Option<Arc<T>>>, mine: &Arc<T>) {
    let mut guard = match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if guard.as_ref().is_some_and(|held| Arc::ptr_eq(held, mine)) {
        *guard = None;
    }
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn play_clip(&self, url: &Url) -> Result<(), PlaybackError> {
        self.stopped.store(false, Ordering::SeqCst);
        let bytes = self.fetch(url).await?;
        if self.stopped.load(Ordering::SeqCst) {
            return Err(PlaybackError::Interrupted);
        }
        tracing::debug!(url = %url, bytes = bytes.len(), "Clip downloaded");

        let current = Arc::clone(&self.current);
        let stopped = Arc::clone(&self.stopped);
        tokio::task::spawn_blocking(move || {
            let (_stream, handle) =
                OutputStream::try_default().map_err(|e| PlaybackError::Device(e.to_string()))?;
            let sink = Sink::try_new(&handle).map_err(|e| PlaybackError::Device(e.to_string()))?;
            let source = rodio::Decoder::new(Cursor::new(bytes))
                .map_err(|e| PlaybackError::Decode(e.to_string()))?;

            let sink = Arc::new(sink);
            Self::set_current(&current, Some(Arc::clone(&sink)));
            if stopped.load(Ordering::SeqCst) {
                release_slot(&current, &sink);
                return Err(PlaybackError::Interrupted);
            }
            sink.append(source);
            sink.sleep_until_end();
            release_slot(&current, &sink);

            if stopped.load(Ordering::SeqCst) {
                Err(PlaybackError::Interrupted)
            } else {
                Ok(())
            }
        })
        .await
        .map_err(|e| PlaybackError::Device(format!("playback thread: {}", e)))?
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let sink = match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(sink) = sink {
            sink.stop();
        }
    }
}
