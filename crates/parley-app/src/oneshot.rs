//! One-shot flows on the sessionless endpoints: text-to-speech, echo and a
//! single question without conversation memory.

use parley_core::types::{AudioPayload, TurnResult};
use parley_exchange::{ExchangeError, HttpExchange};
use parley_playback::{FallbackNarrator, PlaybackOutcome, SequentialPlayer};
use url::Url;

const VOICE_FAILED: &str = "Error: Failed to generate voice.";

/// Status line for a failed synthesis. A response that came back without
/// detail or without a clip gets the synthesis-specific wording.
fn generate_audio_message(error: &ExchangeError) -> String {
    match error {
        ExchangeError::Server { detail: None, .. } | ExchangeError::MalformedResponse(_) => {
            VOICE_FAILED.to_string()
        }
        other => other.user_message(),
    }
}

/// Shared pieces of every one-shot flow.
pub struct OneShot<'a> {
    pub exchange: &'a HttpExchange,
    pub player: &'a SequentialPlayer,
    pub narrator: &'a FallbackNarrator,
}

impl OneShot<'_> {
    /// Synthesize `text` and play the result.
    pub async fn tts(&self, text: &str) -> Result<(), ExchangeError> {
        println!("[status] Generating voice... hang tight.");
        let url = self.exchange.generate_audio(text).await.map_err(|e| {
            println!("[status] {}", generate_audio_message(&e));
            e
        })?;
        println!("[status] Voice is ready! 🎧");
        println!("audio: {}", url);
        self.play(&[url]).await;
        Ok(())
    }

    /// Upload a recording and play it back re-voiced.
    pub async fn echo(&self, payload: &AudioPayload) -> Result<(), ExchangeError> {
        println!("[status] Sending recording...");
        let echo = match self.exchange.echo(payload).await {
            Ok(echo) => echo,
            Err(e) => return Err(self.fail(e).await),
        };
        if let Some(text) = echo.transcription.as_deref() {
            println!("you:   {}", text);
        }
        println!("audio: {}", echo.audio_url);
        self.play(&[echo.audio_url]).await;
        Ok(())
    }

    /// Ask one question and play the answer.
    pub async fn ask(&self, text: &str) -> Result<(), ExchangeError> {
        println!("[status] Thinking... hang tight.");
        match self.exchange.llm_text_query(text).await {
            Ok(turn) => {
                self.show(&turn);
                self.play(&turn.reply_audio_urls).await;
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    fn show(&self, turn: &TurnResult) {
        if !turn.transcription.is_empty() {
            println!("you:   {}", turn.transcription);
        }
        if !turn.reply_text.is_empty() {
            println!("agent: {}", turn.reply_text);
        }
    }

    async fn play(&self, urls: &[Url]) {
        if let PlaybackOutcome::Aborted { failed, error, .. } = self.player.play(urls).await {
            println!("[status] Couldn't play {}: {}", failed, error);
        }
    }

    /// Show and speak the failure, play any fallback audio, and hand the error back.
    async fn fail(&self, error: ExchangeError) -> ExchangeError {
        let message = error.user_message();
        println!("[status] {}", message);
        match error.partial().and_then(|p| p.fallback_audio_url.clone()) {
            Some(url) => self.play(&[url]).await,
            None => {
                self.narrator.speak(&message).await;
            }
        }
        error
    }
}
