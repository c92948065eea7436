//! Parley playback crate - ordered reply clips and on-device fallback speech.
//!
//! The `SequentialPlayer` owns the single shared output (`AudioSink`) and plays
//! a list of clips back-to-back. The `FallbackNarrator` speaks status messages
//! locally when the backend gave us nothing to play.

pub mod error;
#[cfg(feature = "native")]
pub mod native;
pub mod narrator;
pub mod player;
pub mod sink;

pub use error::{NarratorError, PlaybackError};
#[cfg(feature = "native")]
pub use native::RodioSink;
pub use narrator::{FallbackNarrator, MockSynthesizer, SpeechSynthesizer, SystemSpeech};
pub use player::{PlaybackOutcome, SequentialPlayer};
pub use sink::{AudioSink, MockSink, SilentSink};
