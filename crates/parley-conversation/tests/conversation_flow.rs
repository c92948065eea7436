//! End-to-end turn flows against mock hardware and a scripted backend.

use std::sync::Arc;
use std::time::Duration;

use parley_capture::{CaptureController, MockMicrophone, RecordingTransport};
use parley_conversation::{
    ActionOutcome, ConversationOrchestrator, ConversationState, InMemoryLocation,
    RecordingView, SessionIdentity,
};
use parley_core::config::CaptureConfig;
use parley_core::events::{ConversationEvent, TurnOutcome};
use parley_core::types::{Controls, InputMode, PartialTurn, Session, TurnResult};
use parley_exchange::{ExchangeError, ExchangeRequest, MockExchange};
use parley_playback::{FallbackNarrator, MockSink, MockSynthesizer, SequentialPlayer};
use url::Url;

struct Rig {
    orchestrator: Arc<ConversationOrchestrator>,
    mic: MockMicrophone,
    exchange: MockExchange,
    sink: MockSink,
    synth: MockSynthesizer,
    view: RecordingView,
}

fn rig(mic: MockMicrophone, exchange: MockExchange, sink: MockSink) -> Rig {
    let capture = CaptureController::new(Arc::new(mic.clone()), &CaptureConfig::default());
    rig_with_capture(capture, mic, exchange, sink)
}

fn rig_with_capture(
    capture: CaptureController,
    mic: MockMicrophone,
    exchange: MockExchange,
    sink: MockSink,
) -> Rig {
    let synth = MockSynthesizer::new();
    let view = RecordingView::new();
    let orchestrator = ConversationOrchestrator::new(
        Session::new("flow-session"),
        capture,
        Arc::new(exchange.clone()),
        SequentialPlayer::new(Arc::new(sink.clone())),
        FallbackNarrator::new(Arc::new(synth.clone())),
        Arc::new(view.clone()),
    );
    Rig {
        orchestrator: Arc::new(orchestrator),
        mic,
        exchange,
        sink,
        synth,
        view,
    }
}

fn url(path: &str) -> Url {
    Url::parse("http://localhost:8000").unwrap().join(path).unwrap()
}

fn reply(urls: &[&str]) -> TurnResult {
    TurnResult {
        transcription: "what's the weather".into(),
        reply_text: "Sunny.".into(),
        reply_audio_urls: urls.iter().map(|u| url(u)).collect(),
        fallback_audio_url: None,
    }
}

fn finished_outcomes(view: &RecordingView) -> Vec<TurnOutcome> {
    view.events()
        .into_iter()
        .filter_map(|e| match e {
            ConversationEvent::TurnFinished { outcome, .. } => Some(outcome),
            _ => None,
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Happy paths
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_voice_turn_sends_recording_for_session() {
    let r = rig(
        MockMicrophone::new(vec![b"OggS".to_vec(), b"-data".to_vec()]),
        MockExchange::new(),
        MockSink::default(),
    );
    r.exchange.respond_with(Ok(reply(&["/static/a.mp3"])));

    r.orchestrator.start_recording().await;
    r.orchestrator.stop_recording().await;

    match r.exchange.requests().as_slice() {
        [ExchangeRequest::Audio { session, payload }] => {
            assert_eq!(session.id(), "flow-session");
            assert_eq!(payload.bytes, b"OggS-data".to_vec());
            assert_eq!(payload.file_name, "recording.webm");
        }
        other => panic!("Expected one audio request, got {:?}", other),
    }
    assert_eq!(r.sink.completed(), vec![url("/static/a.mp3")]);
    assert_eq!(finished_outcomes(&r.view), vec![TurnOutcome::Completed]);
    assert_eq!(
        r.view.last_controls(),
        Some(Controls::ready(InputMode::Speak))
    );
}

#[tokio::test]
async fn test_text_turn_with_no_audio_returns_to_type_mode() {
    let r = rig(
        MockMicrophone::new(vec![]),
        MockExchange::new(),
        MockSink::default(),
    );
    r.orchestrator.switch_mode(InputMode::Type);
    r.exchange.respond_with(Ok(reply(&[])));

    assert!(r.orchestrator.submit_text("  weather?  ").await.is_accepted());

    assert_eq!(
        r.exchange.requests(),
        vec![ExchangeRequest::Text {
            session: Session::new("flow-session"),
            text: "weather?".to_string(),
        }]
    );
    assert!(r.sink.started().is_empty());
    assert_eq!(r.view.replies(), vec!["Sunny.".to_string()]);
    assert_eq!(r.orchestrator.state(), ConversationState::Ready(InputMode::Type));
}

#[tokio::test]
async fn test_reply_clips_play_in_order() {
    let r = rig(
        MockMicrophone::new(vec![]),
        MockExchange::new(),
        MockSink::default(),
    );
    r.sink.set_duration(&url("/1.mp3"), Duration::from_millis(20));
    r.orchestrator.switch_mode(InputMode::Type);
    r.exchange
        .respond_with(Ok(reply(&["/1.mp3", "/2.mp3", "/3.mp3"])));

    r.orchestrator.submit_text("tell me a story").await;

    assert_eq!(
        r.sink.completed(),
        vec![url("/1.mp3"), url("/2.mp3"), url("/3.mp3")]
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Failure paths
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_error_plays_fallback_without_transcription() {
    let r = rig(
        MockMicrophone::new(vec![b"audio".to_vec()]),
        MockExchange::new(),
        MockSink::default(),
    );
    r.exchange.respond_with(Err(ExchangeError::Server {
        status: 500,
        detail: Some("TTS failed".into()),
        partial: PartialTurn {
            transcription: None,
            reply_text: None,
            fallback_audio_url: Some(url("/static/fallback.mp3")),
        },
    }));

    r.orchestrator.start_recording().await;
    r.orchestrator.stop_recording().await;

    assert_eq!(r.sink.completed(), vec![url("/static/fallback.mp3")]);
    assert!(r.view.transcriptions().is_empty());
    assert!(r.synth.spoken().is_empty());
    assert!(r.view.statuses().contains(&"Error: TTS failed".to_string()));
    assert_eq!(finished_outcomes(&r.view), vec![TurnOutcome::PartialFailure]);
    assert_eq!(r.orchestrator.state(), ConversationState::Ready(InputMode::Speak));
}

#[tokio::test]
async fn test_server_error_renders_partial_text_and_narrates() {
    let r = rig(
        MockMicrophone::new(vec![]),
        MockExchange::new(),
        MockSink::default(),
    );
    r.orchestrator.switch_mode(InputMode::Type);
    r.exchange.respond_with(Err(ExchangeError::Server {
        status: 502,
        detail: None,
        partial: PartialTurn {
            transcription: Some("read me a poem".into()),
            reply_text: Some("Roses are red".into()),
            fallback_audio_url: None,
        },
    }));

    r.orchestrator.submit_text("read me a poem").await;

    assert_eq!(r.view.transcriptions(), vec!["read me a poem".to_string()]);
    assert_eq!(r.view.replies(), vec!["Roses are red".to_string()]);
    assert_eq!(
        r.synth.spoken(),
        vec!["Something went wrong. Please try again.".to_string()]
    );
    assert_eq!(r.orchestrator.state(), ConversationState::Ready(InputMode::Type));
}

#[tokio::test]
async fn test_broken_fallback_clip_falls_through_to_narrator() {
    let r = rig(
        MockMicrophone::new(vec![]),
        MockExchange::new(),
        MockSink::default(),
    );
    r.sink.break_clip(&url("/static/fallback.mp3"));
    r.orchestrator.switch_mode(InputMode::Type);
    r.exchange.respond_with(Err(ExchangeError::Server {
        status: 500,
        detail: Some("LLM down".into()),
        partial: PartialTurn {
            fallback_audio_url: Some(url("/static/fallback.mp3")),
            ..Default::default()
        },
    }));

    r.orchestrator.submit_text("hello").await;

    assert_eq!(r.synth.spoken(), vec!["Error: LLM down".to_string()]);
    assert_eq!(r.orchestrator.state(), ConversationState::Ready(InputMode::Type));
}

#[tokio::test]
async fn test_unreachable_narrates_and_keeps_mode() {
    let r = rig(
        MockMicrophone::new(vec![b"audio".to_vec()]),
        MockExchange::new(),
        MockSink::default(),
    );
    // No scripted response: the mock answers Unreachable.
    r.orchestrator.start_recording().await;
    r.orchestrator.stop_recording().await;

    assert_eq!(r.synth.spoken().len(), 1);
    assert!(r
        .view
        .events()
        .iter()
        .any(|e| matches!(e, ConversationEvent::FallbackSpoken { .. })));
    assert!(r.view.transcriptions().is_empty());
    assert_eq!(finished_outcomes(&r.view), vec![TurnOutcome::Unreachable]);
    assert_eq!(r.orchestrator.state(), ConversationState::Ready(InputMode::Speak));
}

#[tokio::test]
async fn test_missing_microphone_narrates_and_stays_usable() {
    let r = rig(
        MockMicrophone::missing(),
        MockExchange::new(),
        MockSink::default(),
    );
    r.orchestrator.start_recording().await;

    assert_eq!(
        r.synth.spoken(),
        vec!["No microphone found. Please connect one and try again.".to_string()]
    );
    assert_eq!(finished_outcomes(&r.view), vec![TurnOutcome::CaptureFailed]);
    // Still usable in the other mode.
    assert!(r.orchestrator.switch_mode(InputMode::Type).is_accepted());
}

#[tokio::test]
async fn test_microphone_lost_while_recording_discards_utterance() {
    let r = rig(
        MockMicrophone::new(vec![vec![1, 2, 3]]).with_device_loss(),
        MockExchange::new(),
        MockSink::default(),
    );
    r.orchestrator.start_recording().await;
    assert_eq!(r.orchestrator.state(), ConversationState::Capturing);

    assert!(r.orchestrator.stop_recording().await.is_accepted());

    assert_eq!(r.exchange.request_count(), 0);
    assert_eq!(
        r.synth.spoken(),
        vec!["The microphone stopped working. Please try again.".to_string()]
    );
    assert_eq!(finished_outcomes(&r.view), vec![TurnOutcome::CaptureFailed]);
    assert_eq!(r.orchestrator.state(), ConversationState::Ready(InputMode::Speak));
    assert_eq!(r.mic.releases(), 1);
}

#[tokio::test]
async fn test_empty_recording_is_not_uploaded() {
    let r = rig(
        MockMicrophone::new(vec![]),
        MockExchange::new(),
        MockSink::default(),
    );
    r.orchestrator.start_recording().await;
    r.orchestrator.stop_recording().await;

    assert_eq!(r.exchange.request_count(), 0);
    assert_eq!(
        r.view.last_status().as_deref(),
        Some("I didn't catch anything. Please try again.")
    );
    assert_eq!(r.orchestrator.state(), ConversationState::Ready(InputMode::Speak));
}

// ────────────────────────────────────────────────────────────────────────────
// Busy states ignore conflicting actions
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_actions_while_exchanging_have_no_effect() {
    let r = rig(
        MockMicrophone::new(vec![b"x".to_vec()]),
        MockExchange::new().with_delay(Duration::from_secs(30)),
        MockSink::default(),
    );
    r.orchestrator.switch_mode(InputMode::Type);
    r.exchange.respond_with(Ok(reply(&[])));

    let turn = {
        let orchestrator = Arc::clone(&r.orchestrator);
        tokio::spawn(async move { orchestrator.submit_text("first").await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        r.orchestrator.state(),
        ConversationState::Exchanging(InputMode::Type)
    );
    assert_eq!(r.orchestrator.controls(), Controls::LOCKED);

    let events_before = r.view.events().len();
    let busy = ConversationState::Exchanging(InputMode::Type);
    assert_eq!(
        r.orchestrator.submit_text("second").await,
        ActionOutcome::Ignored(busy)
    );
    assert_eq!(r.orchestrator.start_recording().await, ActionOutcome::Ignored(busy));
    assert_eq!(r.orchestrator.stop_recording().await, ActionOutcome::Ignored(busy));
    assert_eq!(
        r.orchestrator.switch_mode(InputMode::Speak),
        ActionOutcome::Ignored(busy)
    );
    assert_eq!(
        r.orchestrator.switch_mode(InputMode::Type),
        ActionOutcome::Ignored(busy)
    );
    assert_eq!(r.view.events().len(), events_before);
    assert_eq!(r.mic.opens(), 0);

    assert!(turn.await.unwrap().is_accepted());
    assert_eq!(r.exchange.request_count(), 1);
    assert_eq!(r.orchestrator.state(), ConversationState::Ready(InputMode::Type));
}

#[tokio::test(start_paused = true)]
async fn test_actions_while_playing_have_no_effect() {
    let r = rig(
        MockMicrophone::new(vec![]),
        MockExchange::new(),
        MockSink::new(Duration::from_secs(10)),
    );
    r.orchestrator.switch_mode(InputMode::Type);
    r.exchange.respond_with(Ok(reply(&["/long.mp3"])));

    let turn = {
        let orchestrator = Arc::clone(&r.orchestrator);
        tokio::spawn(async move { orchestrator.submit_text("go").await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    let playing = ConversationState::Playing(InputMode::Type);
    assert_eq!(r.orchestrator.state(), playing);

    assert_eq!(
        r.orchestrator.submit_text("again").await,
        ActionOutcome::Ignored(playing)
    );
    assert_eq!(r.exchange.request_count(), 1);

    turn.await.unwrap();
    assert_eq!(r.sink.completed(), vec![url("/long.mp3")]);
}

#[tokio::test(start_paused = true)]
async fn test_racing_starts_open_device_once() {
    let r = rig(
        MockMicrophone::new(vec![b"x".to_vec()]).with_open_delay(Duration::from_secs(2)),
        MockExchange::new(),
        MockSink::default(),
    );

    let racers: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = Arc::clone(&r.orchestrator);
            tokio::spawn(async move { orchestrator.start_recording().await })
        })
        .collect();
    let mut accepted = 0;
    for racer in racers {
        if racer.await.unwrap().is_accepted() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(r.mic.opens(), 1);
    assert_eq!(r.orchestrator.state(), ConversationState::Capturing);
    r.orchestrator.shutdown().await;
    assert_eq!(r.mic.releases(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_microphone_pending_is_ignored() {
    let r = rig(
        MockMicrophone::new(vec![b"x".to_vec()]).with_open_delay(Duration::from_secs(5)),
        MockExchange::new(),
        MockSink::default(),
    );
    let start = {
        let orchestrator = Arc::clone(&r.orchestrator);
        tokio::spawn(async move { orchestrator.start_recording().await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        r.orchestrator.stop_recording().await,
        ActionOutcome::Ignored(ConversationState::Starting)
    );
    start.await.unwrap();
    assert_eq!(r.orchestrator.state(), ConversationState::Capturing);
    r.orchestrator.shutdown().await;
}

// ────────────────────────────────────────────────────────────────────────────
// Hardware and streaming
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_microphone_released_once_per_cycle() {
    let r = rig(
        MockMicrophone::new(vec![b"chunk".to_vec()]),
        MockExchange::new(),
        MockSink::default(),
    );
    for _ in 0..3 {
        r.exchange.respond_with(Ok(reply(&[])));
        r.orchestrator.start_recording().await;
        r.orchestrator.stop_recording().await;
        // Redundant stop must not touch the device again.
        r.orchestrator.stop_recording().await;
    }
    assert_eq!(r.mic.opens(), 3);
    assert_eq!(r.mic.releases(), 3);
}

#[tokio::test]
async fn test_streamed_turn_skips_exchange() {
    let mic = MockMicrophone::new(vec![b"a".to_vec(), b"b".to_vec()]);
    let transport = RecordingTransport::new();
    let capture = CaptureController::new(Arc::new(mic.clone()), &CaptureConfig::default())
        .with_transport(Arc::new(transport.clone()));
    let r = rig_with_capture(capture, mic, MockExchange::new(), MockSink::default());

    r.orchestrator.start_recording().await;
    r.orchestrator.stop_recording().await;

    assert_eq!(transport.chunks(), vec![b"a".to_vec(), b"b".to_vec()]);
    assert_eq!(transport.finishes(), 1);
    assert_eq!(r.exchange.request_count(), 0);
    assert_eq!(finished_outcomes(&r.view), vec![TurnOutcome::Streamed]);
    assert_eq!(r.orchestrator.state(), ConversationState::Ready(InputMode::Speak));
}

#[tokio::test]
async fn test_session_resumed_from_address() {
    let location = InMemoryLocation::parse("http://localhost:8000/?session_id=resume-me").unwrap();
    let session = SessionIdentity::new("session_id").ensure_session(&location);
    assert_eq!(session.id(), "resume-me");
}
