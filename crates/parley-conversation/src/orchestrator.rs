//! Conversation orchestrator coordinating capture, exchange and playback.
//!
//! Every user action first claims a state transition. A claim that fails means
//! the conversation is busy and the action is ignored with no side effect, so
//! overlapping requests cannot happen even when actions race. Every turn ends
//! back in `Ready`, whatever failed along the way.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use parley_capture::{CaptureController, StopOutcome};
use parley_core::events::{ConversationEvent, TurnOutcome};
use parley_core::types::{Controls, InputMode, Session, TurnResult};
use parley_exchange::{ExchangeError, TranscriptExchange};
use parley_playback::{FallbackNarrator, PlaybackOutcome, SequentialPlayer};
use url::Url;

use crate::error::ConversationError;
use crate::state::{ConversationState, StateMachine};
use crate::view::ConversationView;

const REQUESTING_MICROPHONE: &str = "Requesting microphone...";
const RECORDING: &str = "Recording... 🎙️";
const STOPPING: &str = "Stopping recording...";
const THINKING: &str = "Thinking... hang tight.";
const PLAYING: &str = "Playing reply... 🎧";
const STREAMED: &str = "Audio streamed to the server.";
const NOTHING_RECORDED: &str = "I didn't catch anything. Please try again.";
const EMPTY_TEXT: &str = "Please enter something first.";

/// What happened to a user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action ran to completion.
    Accepted,
    /// The conversation was busy; nothing happened.
    Ignored(ConversationState),
    /// The action was refused with a status message and no state change.
    Rejected(String),
}

impl ActionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ActionOutcome::Accepted)
    }
}

/// One conversation per page session.
pub struct ConversationOrchestrator {
    session: Session,
    state: StateMachine,
    capture: CaptureController,
    exchange: Arc<dyn TranscriptExchange>,
    player: SequentialPlayer,
    narrator: FallbackNarrator,
    view: Arc<dyn ConversationView>,
    turn: Mutex<Option<Uuid>>,
}

impl std::fmt::Debug for ConversationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationOrchestrator")
            .field("session", &self.session)
            .field("state", &self.state.current())
            .field("capture", &self.capture)
            .field("player", &self.player)
            .field("narrator", &self.narrator)
            .finish()
    }
}

impl ConversationOrchestrator {
    /// Create an orchestrator in `Ready(Speak)`.
    pub fn new(
        session: Session,
        capture: CaptureController,
        exchange: Arc<dyn TranscriptExchange>,
        player: SequentialPlayer,
        narrator: FallbackNarrator,
        view: Arc<dyn ConversationView>,
    ) -> Self {
        Self {
            session,
            state: StateMachine::new(InputMode::Speak),
            capture,
            exchange,
            player,
            narrator,
            view,
            turn: Mutex::new(None),
        }
    }

    /// Start in `mode` instead of speak mode.
    pub fn with_mode(mut self, mode: InputMode) -> Self {
        self.state = StateMachine::new(mode);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> ConversationState {
        self.state.current()
    }

    pub fn mode(&self) -> InputMode {
        self.state.current().mode()
    }

    pub fn controls(&self) -> Controls {
        self.state.current().controls()
    }

    /// Render the initial ready state.
    pub fn show_ready(&self) {
        let state = self.state.current();
        self.emit(ConversationEvent::ModeChanged { mode: state.mode() });
        self.emit(ConversationEvent::controls(state.controls()));
        self.show_status(state.mode().ready_prompt());
    }

    // -------------------------------------------------------------------------
    // User actions
    // -------------------------------------------------------------------------

    /// Open the microphone and begin recording.
    pub async fn start_recording(&self) -> ActionOutcome {
        if let Err(e) = self.state.transition(ConversationState::Starting) {
            return ignored("start", e);
        }
        self.begin_turn(InputMode::Speak);
        self.show_controls();
        self.show_status(REQUESTING_MICROPHONE);

        match self.capture.start().await {
            Ok(handle) => {
                if let Err(e) = self.state.transition(ConversationState::Capturing) {
                    tracing::error!(error = %e, "Capture opened outside of a turn");
                    self.capture.stop().await;
                    self.finish_turn(InputMode::Speak, TurnOutcome::CaptureFailed);
                    return ActionOutcome::Accepted;
                }
                tracing::debug!(capture_id = %handle.id, "Recording");
                self.show_controls();
                self.show_status(RECORDING);
            }
            Err(e) => {
                let message = e.user_message();
                tracing::warn!(error = %e, "Microphone unavailable");
                self.show_status(message);
                self.narrate(message).await;
                self.finish_turn(InputMode::Speak, TurnOutcome::CaptureFailed);
            }
        }
        ActionOutcome::Accepted
    }

    /// Stop recording and send the utterance (or close the stream).
    pub async fn stop_recording(&self) -> ActionOutcome {
        let mode = InputMode::Speak;
        if let Err(e) = self.state.transition(ConversationState::Exchanging(mode)) {
            return ignored("stop", e);
        }
        self.show_controls();
        self.show_status(STOPPING);

        match self.capture.stop().await {
            StopOutcome::Batch(payload) if !payload.is_empty() => {
                self.show_status(THINKING);
                let result = self.exchange.send_audio(&self.session, &payload).await;
                self.conclude(mode, result).await;
            }
            StopOutcome::Streamed { chunks_sent } => {
                tracing::info!(chunks_sent, "Utterance streamed; no reply channel");
                self.show_status(STREAMED);
                self.finish_turn(mode, TurnOutcome::Streamed);
            }
            StopOutcome::Failed(e) => {
                let message = e.user_message();
                tracing::warn!(error = %e, "Recording lost");
                self.show_status(message);
                self.narrate(message).await;
                self.finish_turn(mode, TurnOutcome::CaptureFailed);
            }
            StopOutcome::Batch(_) | StopOutcome::NotRecording => {
                self.show_status(NOTHING_RECORDED);
                self.finish_turn(mode, TurnOutcome::CaptureFailed);
            }
        }
        ActionOutcome::Accepted
    }

    /// Send a typed message.
    pub async fn submit_text(&self, text: &str) -> ActionOutcome {
        let mode = InputMode::Type;
        let current = self.state.current();
        if current != ConversationState::Ready(mode) {
            tracing::debug!(action = "submit", state = %current, "Action ignored");
            return ActionOutcome::Ignored(current);
        }
        let text = text.trim();
        if text.is_empty() {
            self.show_status(EMPTY_TEXT);
            return ActionOutcome::Rejected(EMPTY_TEXT.to_string());
        }
        if let Err(e) = self.state.transition(ConversationState::Exchanging(mode)) {
            return ignored("submit", e);
        }
        self.begin_turn(mode);
        self.show_controls();
        self.show_status(THINKING);

        let result = self.exchange.send_text(&self.session, text).await;
        self.conclude(mode, result).await;
        ActionOutcome::Accepted
    }

    /// Switch between speaking and typing. Only legal while ready.
    pub fn switch_mode(&self, mode: InputMode) -> ActionOutcome {
        if let Err(e) = self.state.switch_mode(mode) {
            return ignored("switch_mode", e);
        }
        tracing::info!(mode = %mode, "Input mode switched");
        self.emit(ConversationEvent::ModeChanged { mode });
        self.emit(ConversationEvent::ResultsCleared);
        self.show_controls();
        self.show_status(mode.ready_prompt());
        ActionOutcome::Accepted
    }

    /// Release the microphone and silence playback.
    pub async fn shutdown(&self) {
        self.player.stop();
        if let StopOutcome::Batch(payload) = self.capture.stop().await {
            tracing::debug!(bytes = payload.len(), "Discarded unsent recording");
        }
    }

    // -------------------------------------------------------------------------
    // Turn handling
    // -------------------------------------------------------------------------

    /// Render the exchange result, play what there is to play, return to ready.
    async fn conclude(&self, mode: InputMode, result: Result<TurnResult, ExchangeError>) {
        match result {
            Ok(turn) => {
                self.show_results(Some(&turn.transcription), Some(&turn.reply_text));
                let clips = if turn.reply_audio_urls.is_empty() {
                    turn.fallback_audio_url.into_iter().collect()
                } else {
                    turn.reply_audio_urls
                };
                if !clips.is_empty() {
                    self.play(mode, &clips).await;
                }
                self.show_status(mode.ready_prompt());
                self.finish_turn(mode, TurnOutcome::Completed);
            }
            Err(error) => {
                let message = error.user_message();
                tracing::warn!(error = %error, mode = %mode, "Turn failed");

                if let Some(partial) = error.partial() {
                    self.show_results(
                        partial.transcription.as_deref(),
                        partial.reply_text.as_deref(),
                    );
                }
                self.show_status(&message);

                let fallback = error.partial().and_then(|p| p.fallback_audio_url.clone());
                match fallback {
                    Some(url) => {
                        if let PlaybackOutcome::Aborted { .. } = self.play(mode, &[url]).await {
                            self.narrate(&message).await;
                        }
                    }
                    None => self.narrate(&message).await,
                }

                let outcome = match error {
                    ExchangeError::Unreachable(_) => TurnOutcome::Unreachable,
                    _ => TurnOutcome::PartialFailure,
                };
                self.finish_turn(mode, outcome);
            }
        }
    }

    async fn play(&self, mode: InputMode, clips: &[Url]) -> PlaybackOutcome {
        if let Err(e) = self.state.transition(ConversationState::Playing(mode)) {
            tracing::warn!(error = %e, "Playing outside of a turn");
        }
        self.show_status(PLAYING);
        let outcome = self.player.play(clips).await;
        if let PlaybackOutcome::Aborted { failed, error, .. } = &outcome {
            tracing::warn!(url = %failed, error = %error, "Reply playback cut short");
        }
        outcome
    }

    async fn narrate(&self, message: &str) {
        if self.narrator.speak(message).await {
            self.emit(ConversationEvent::FallbackSpoken {
                message: message.to_string(),
            });
        }
    }

    fn begin_turn(&self, mode: InputMode) -> Uuid {
        let turn_id = Uuid::new_v4();
        match self.turn.lock() {
            Ok(mut guard) => *guard = Some(turn_id),
            Err(poisoned) => *poisoned.into_inner() = Some(turn_id),
        }
        tracing::info!(
            turn_id = %turn_id,
            session_id = %self.session,
            mode = %mode,
            "Turn started"
        );
        self.emit(ConversationEvent::ResultsCleared);
        self.emit(ConversationEvent::TurnStarted {
            turn_id,
            mode,
            timestamp: Utc::now(),
        });
        turn_id
    }

    fn finish_turn(&self, mode: InputMode, outcome: TurnOutcome) {
        if let Err(e) = self.state.transition(ConversationState::Ready(mode)) {
            tracing::warn!(error = %e, "Turn ended from an unexpected state");
            self.state.reset(mode);
        }
        let turn_id = match self.turn.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        self.show_controls();
        if let Some(turn_id) = turn_id {
            tracing::info!(turn_id = %turn_id, outcome = ?outcome, "Turn finished");
            self.emit(ConversationEvent::TurnFinished {
                turn_id,
                outcome,
                timestamp: Utc::now(),
            });
        }
    }

    fn show_results(&self, transcription: Option<&str>, reply: Option<&str>) {
        if let Some(text) = transcription.filter(|t| !t.trim().is_empty()) {
            self.emit(ConversationEvent::TranscriptionShown {
                text: text.to_string(),
            });
        }
        if let Some(text) = reply.filter(|t| !t.trim().is_empty()) {
            self.emit(ConversationEvent::ReplyShown {
                text: text.to_string(),
            });
        }
    }

    fn show_controls(&self) {
        self.emit(ConversationEvent::controls(self.state.current().controls()));
    }

    fn show_status(&self, text: &str) {
        self.emit(ConversationEvent::status(text));
    }

    fn emit(&self, event: ConversationEvent) {
        self.view.apply(&event);
    }
}

fn ignored(action: &'static str, error: ConversationError) -> ActionOutcome {
    let ConversationError::InvalidTransition { from, .. } = error;
    tracing::debug!(action, state = %from, "Action ignored");
    ActionOutcome::Ignored(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::RecordingView;
    use parley_capture::MockMicrophone;
    use parley_core::config::CaptureConfig;
    use parley_exchange::MockExchange;
    use parley_playback::{MockSink, MockSynthesizer};

    struct Fixture {
        orchestrator: ConversationOrchestrator,
        exchange: MockExchange,
        sink: MockSink,
        synth: MockSynthesizer,
        view: RecordingView,
    }

    fn fixture(mic: MockMicrophone) -> Fixture {
        let exchange = MockExchange::new();
        let sink = MockSink::default();
        let synth = MockSynthesizer::new();
        let view = RecordingView::new();
        let orchestrator = ConversationOrchestrator::new(
            Session::new("test-session"),
            CaptureController::new(Arc::new(mic), &CaptureConfig::default()),
            Arc::new(exchange.clone()),
            SequentialPlayer::new(Arc::new(sink.clone())),
            FallbackNarrator::new(Arc::new(synth.clone())),
            Arc::new(view.clone()),
        );
        Fixture {
            orchestrator,
            exchange,
            sink,
            synth,
            view,
        }
    }

    fn url(path: &str) -> Url {
        Url::parse("http://localhost:8000").unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn test_show_ready_renders_mode_controls_and_prompt() {
        let f = fixture(MockMicrophone::new(vec![]));
        f.orchestrator.show_ready();
        assert_eq!(
            f.view.last_controls(),
            Some(Controls::ready(InputMode::Speak))
        );
        assert_eq!(f.view.last_status().as_deref(), Some("Press start to talk."));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_ignored() {
        let f = fixture(MockMicrophone::new(vec![]));
        let outcome = f.orchestrator.stop_recording().await;
        assert_eq!(
            outcome,
            ActionOutcome::Ignored(ConversationState::Ready(InputMode::Speak))
        );
        assert!(f.view.events().is_empty());
    }

    #[tokio::test]
    async fn test_submit_in_speak_mode_is_ignored() {
        let f = fixture(MockMicrophone::new(vec![]));
        let outcome = f.orchestrator.submit_text("hello").await;
        assert!(matches!(outcome, ActionOutcome::Ignored(_)));
        assert_eq!(f.exchange.request_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_text_rejected_without_request() {
        let f = fixture(MockMicrophone::new(vec![]));
        f.orchestrator.switch_mode(InputMode::Type);
        let outcome = f.orchestrator.submit_text("   ").await;
        assert_eq!(outcome, ActionOutcome::Rejected(EMPTY_TEXT.to_string()));
        assert_eq!(f.exchange.request_count(), 0);
        assert_eq!(f.orchestrator.state(), ConversationState::Ready(InputMode::Type));
    }

    #[tokio::test]
    async fn test_speak_turn_uploads_and_plays() {
        let f = fixture(MockMicrophone::new(vec![b"ab".to_vec(), b"cd".to_vec()]));
        f.exchange.respond_with(Ok(TurnResult {
            transcription: "hello".into(),
            reply_text: "hi there".into(),
            reply_audio_urls: vec![url("/static/1.mp3"), url("/static/2.mp3")],
            fallback_audio_url: None,
        }));

        assert!(f.orchestrator.start_recording().await.is_accepted());
        assert_eq!(f.orchestrator.state(), ConversationState::Capturing);
        assert_eq!(f.view.last_controls(), Some(Controls::capturing()));

        assert!(f.orchestrator.stop_recording().await.is_accepted());
        assert_eq!(f.orchestrator.state(), ConversationState::Ready(InputMode::Speak));
        assert_eq!(f.view.transcriptions(), vec!["hello".to_string()]);
        assert_eq!(f.view.replies(), vec!["hi there".to_string()]);
        assert_eq!(
            f.sink.completed(),
            vec![url("/static/1.mp3"), url("/static/2.mp3")]
        );
        assert!(f.synth.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_denied_microphone_narrates_and_returns_ready() {
        let f = fixture(MockMicrophone::denied());
        assert!(f.orchestrator.start_recording().await.is_accepted());

        assert_eq!(f.orchestrator.state(), ConversationState::Ready(InputMode::Speak));
        let denial = "Microphone access denied. Please allow access.";
        assert!(f.view.statuses().contains(&denial.to_string()));
        assert_eq!(f.synth.spoken(), vec![denial.to_string()]);
        assert_eq!(
            f.view.last_controls(),
            Some(Controls::ready(InputMode::Speak))
        );
    }

    #[tokio::test]
    async fn test_unreachable_in_type_mode() {
        let f = fixture(MockMicrophone::new(vec![]));
        f.orchestrator.switch_mode(InputMode::Type);
        f.exchange
            .respond_with(Err(ExchangeError::Unreachable("refused".into())));

        assert!(f.orchestrator.submit_text("ping").await.is_accepted());

        assert_eq!(f.orchestrator.state(), ConversationState::Ready(InputMode::Type));
        assert!(f.view.transcriptions().is_empty());
        assert!(f.sink.started().is_empty());
        assert_eq!(f.synth.spoken().len(), 1);
        assert!(f.synth.spoken()[0].contains("can't reach the server"));
    }

    #[tokio::test]
    async fn test_switch_mode_clears_and_resets_controls() {
        let f = fixture(MockMicrophone::new(vec![]));
        assert!(f.orchestrator.switch_mode(InputMode::Type).is_accepted());

        let events = f.view.events();
        assert!(events.contains(&ConversationEvent::ResultsCleared));
        assert!(events.contains(&ConversationEvent::ModeChanged {
            mode: InputMode::Type
        }));
        assert_eq!(f.view.last_controls(), Some(Controls::ready(InputMode::Type)));
        assert_eq!(
            f.view.last_status().as_deref(),
            Some("Type a message and press send.")
        );
    }

    #[tokio::test]
    async fn test_switch_mode_while_capturing_is_ignored() {
        let f = fixture(MockMicrophone::new(vec![b"x".to_vec()]));
        f.orchestrator.start_recording().await;
        let outcome = f.orchestrator.switch_mode(InputMode::Type);
        assert_eq!(outcome, ActionOutcome::Ignored(ConversationState::Capturing));
        // Same-mode switch must not end the turn either.
        let outcome = f.orchestrator.switch_mode(InputMode::Speak);
        assert_eq!(outcome, ActionOutcome::Ignored(ConversationState::Capturing));
        f.orchestrator.shutdown().await;
    }
}
