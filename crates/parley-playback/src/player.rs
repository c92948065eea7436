//! Sequential playback of reply clips.
//!
//! Clips play strictly in order; the next starts only after the current one
//! ends naturally. A clip error abandons the rest of the queue. Starting a new
//! sequence stops the old one, which then resolves as `Superseded`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use url::Url;

use crate::error::PlaybackError;
use crate::sink::AudioSink;

/// How a `play` call ended. Every call resolves exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every clip played to the end (trivially true for an empty queue).
    Finished { played: usize },
    /// A clip failed; the clips after it were skipped.
    Aborted {
        played: usize,
        failed: Url,
        error: PlaybackError,
    },
    /// A newer sequence took over the output.
    Superseded { played: usize },
}

impl PlaybackOutcome {
    pub fn played(&self) -> usize {
        match self {
            PlaybackOutcome::Finished { played }
            | PlaybackOutcome::Aborted { played, .. }
            | PlaybackOutcome::Superseded { played } => *played,
        }
    }
}

/// Plays ordered clip lists on the one shared output.
pub struct SequentialPlayer {
    sink: Arc<dyn AudioSink>,
    generation: AtomicU64,
    /// Generation currently holding the output.
    active: Mutex<Option<u64>>,
}

impl std::fmt::Debug for SequentialPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialPlayer")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("playing", &self.is_playing())
            .finish()
    }
}

impl SequentialPlayer {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
        }
    }

    pub fn is_playing(&self) -> bool {
        match self.active.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Take the output for a new sequence, stopping any sequence that holds it.
    fn claim(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = active.replace(generation) {
            tracing::debug!(previous, generation, "Stopping previous playback sequence");
            self.sink.stop();
        }
        generation
    }

    fn release(&self, generation: u64) {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *active == Some(generation) {
            *active = None;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Play `urls` back-to-back and resolve once the sequence is over.
    ///
    /// An empty list resolves on the next scheduler tick without touching the
    /// output.
    pub async fn play(&self, urls: &[Url]) -> PlaybackOutcome {
        if urls.is_empty() {
            tokio::task::yield_now().await;
            return PlaybackOutcome::Finished { played: 0 };
        }

        let generation = self.claim();
        tracing::info!(generation, clips = urls.len(), "Playback started");

        let mut played = 0;
        let outcome = loop {
            let Some(url) = urls.get(played) else {
                break PlaybackOutcome::Finished { played };
            };
            if !self.is_current(generation) {
                break PlaybackOutcome::Superseded { played };
            }

            tracing::debug!(generation, index = played, url = %url, "Playing clip");
            let result = self.sink.play_clip(url).await;

            if !self.is_current(generation) {
                break PlaybackOutcome::Superseded { played };
            }
            match result {
                Ok(()) => played += 1,
                Err(error) => {
                    tracing::warn!(url = %url, error = %error, "Clip failed; skipping the rest");
                    break PlaybackOutcome::Aborted {
                        played,
                        failed: url.clone(),
                        error,
                    };
                }
            }
        };

        self.release(generation);
        tracing::info!(generation, played = outcome.played(), "Playback ended");
        outcome
    }

    /// Stop whatever is playing. The running `play` call resolves as `Superseded`.
    pub fn stop(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if active.take().is_some() {
            tracing::debug!(generation, "Playback stopped");
            self.sink.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MockSink;
    use std::time::Duration;

    fn url(name: &str) -> Url {
        Url::parse(&format!("http://localhost/static/{}.mp3", name)).unwrap()
    }

    fn player(sink: &MockSink) -> SequentialPlayer {
        SequentialPlayer::new(Arc::new(sink.clone()))
    }

    #[tokio::test]
    async fn test_empty_queue_finishes_without_playback() {
        let sink = MockSink::default();
        let outcome = player(&sink).play(&[]).await;
        assert_eq!(outcome, PlaybackOutcome::Finished { played: 0 });
        assert!(sink.started().is_empty());
    }

    #[tokio::test]
    async fn test_plays_in_order() {
        let sink = MockSink::default();
        sink.set_duration(&url("a"), Duration::from_millis(15));
        let urls = vec![url("a"), url("b"), url("c")];

        let outcome = player(&sink).play(&urls).await;

        assert_eq!(outcome, PlaybackOutcome::Finished { played: 3 });
        assert_eq!(sink.started(), urls);
        assert_eq!(sink.completed(), urls);
    }

    #[tokio::test]
    async fn test_error_aborts_remaining_queue() {
        let sink = MockSink::default();
        sink.break_clip(&url("b"));

        let outcome = player(&sink)
            .play(&[url("a"), url("b"), url("c")])
            .await;

        match outcome {
            PlaybackOutcome::Aborted {
                played,
                failed,
                error,
            } => {
                assert_eq!(played, 1);
                assert_eq!(failed, url("b"));
                assert!(matches!(error, PlaybackError::Decode(_)));
            }
            other => panic!("Expected aborted playback, got {:?}", other),
        }
        assert_eq!(sink.started(), vec![url("a"), url("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_sequence_supersedes_old() {
        let sink = MockSink::new(Duration::from_secs(10));
        let player = Arc::new(player(&sink));

        let first = {
            let player = Arc::clone(&player);
            tokio::spawn(async move { player.play(&[url("old1"), url("old2")]).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(player.is_playing());

        let second = player.play(&[url("new")]).await;
        let first = first.await.unwrap();

        assert_eq!(first, PlaybackOutcome::Superseded { played: 0 });
        assert_eq!(second, PlaybackOutcome::Finished { played: 1 });
        assert_eq!(sink.started(), vec![url("old1"), url("new")]);
        assert!(!player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_sequence() {
        let sink = MockSink::new(Duration::from_secs(10));
        let player = Arc::new(player(&sink));

        let running = {
            let player = Arc::clone(&player);
            tokio::spawn(async move { player.play(&[url("a"), url("b")]).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        player.stop();

        assert_eq!(
            running.await.unwrap(),
            PlaybackOutcome::Superseded { played: 0 }
        );
        assert!(!player.is_playing());
    }

    #[test]
    fn test_outcome_played_count() {
        assert_eq!(PlaybackOutcome::Finished { played: 2 }.played(), 2);
        assert_eq!(PlaybackOutcome::Superseded { played: 1 }.played(), 1);
    }
}
