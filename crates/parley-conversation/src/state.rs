//! Conversation state machine with thread-safe transitions.
//!
//! Valid transitions:
//! - Ready(Speak) -> Starting (start pressed, waiting for the microphone)
//! - Starting -> Capturing (microphone granted)
//! - Starting -> Ready(Speak) (microphone refused or missing)
//! - Capturing -> Exchanging(Speak) (stop pressed, utterance uploading)
//! - Ready(Type) -> Exchanging(Type) (text submitted)
//! - Exchanging(m) -> Playing(m) (reply or fallback audio to play)
//! - Exchanging(m) -> Ready(m) (turn ended without audio)
//! - Playing(m) -> Ready(m) (playback over)
//! - Ready(_) -> Ready(_) (mode switch)

use std::fmt;
use std::sync::Mutex;

use parley_core::types::{Controls, InputMode};

use crate::error::ConversationError;

/// Where the conversation is in its turn cycle.
///
/// The busy states remember the mode the turn started in so the conversation
/// returns to it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationState {
    /// Waiting for user input in the given mode.
    Ready(InputMode),
    /// Waiting for the microphone to open.
    Starting,
    /// Microphone is recording.
    Capturing,
    /// Utterance sent, waiting for the backend.
    Exchanging(InputMode),
    /// Reply or fallback audio is playing.
    Playing(InputMode),
}

impl Default for ConversationState {
    fn default() -> Self {
        ConversationState::Ready(InputMode::default())
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationState::Ready(mode) => write!(f, "Ready({})", mode),
            ConversationState::Starting => write!(f, "Starting"),
            ConversationState::Capturing => write!(f, "Capturing"),
            ConversationState::Exchanging(mode) => write!(f, "Exchanging({})", mode),
            ConversationState::Playing(mode) => write!(f, "Playing({})", mode),
        }
    }
}

impl ConversationState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &ConversationState) -> bool {
        use ConversationState::*;
        use InputMode::{Speak, Type};
        match (self, target) {
            (Ready(_), Ready(_)) => true,
            (Ready(Speak), Starting) => true,
            (Starting, Capturing) | (Starting, Ready(Speak)) => true,
            (Capturing, Exchanging(Speak)) => true,
            (Ready(Type), Exchanging(Type)) => true,
            (Exchanging(from), Playing(to)) | (Exchanging(from), Ready(to)) => from == to,
            (Playing(from), Ready(to)) => from == to,
            _ => false,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConversationState::Ready(_))
    }

    /// The mode a turn in this state will return to.
    pub fn mode(&self) -> InputMode {
        match self {
            ConversationState::Ready(mode)
            | ConversationState::Exchanging(mode)
            | ConversationState::Playing(mode) => *mode,
            ConversationState::Starting | ConversationState::Capturing => InputMode::Speak,
        }
    }

    /// Controls the user may press in this state.
    pub fn controls(&self) -> Controls {
        match self {
            ConversationState::Ready(mode) => Controls::ready(*mode),
            ConversationState::Capturing => Controls::capturing(),
            ConversationState::Starting
            | ConversationState::Exchanging(_)
            | ConversationState::Playing(_) => Controls::LOCKED,
        }
    }
}

/// Thread-safe holder for the conversation state.
///
/// `transition` checks and applies a move under one lock, so two racing
/// actions can never both leave the same state.
#[derive(Debug, Default)]
pub struct StateMachine {
    state: Mutex<ConversationState>,
}

impl StateMachine {
    pub fn new(mode: InputMode) -> Self {
        Self {
            state: Mutex::new(ConversationState::Ready(mode)),
        }
    }

    pub fn current(&self) -> ConversationState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Move to `target`, returning the state that was left.
    pub fn transition(
        &self,
        target: ConversationState,
    ) -> Result<ConversationState, ConversationError> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.can_transition_to(&target) {
            tracing::debug!("Conversation state: {} -> {}", *state, target);
            let previous = *state;
            *state = target;
            Ok(previous)
        } else {
            Err(ConversationError::InvalidTransition {
                from: *state,
                to: target,
            })
        }
    }

    /// Switch the input mode. Only a ready conversation may switch, which
    /// keeps a busy turn from being ended early by a same-mode switch.
    pub fn switch_mode(&self, mode: InputMode) -> Result<ConversationState, ConversationError> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let target = ConversationState::Ready(mode);
        if !state.is_ready() {
            return Err(ConversationError::InvalidTransition {
                from: *state,
                to: target,
            });
        }
        tracing::debug!("Conversation state: {} -> {}", *state, target);
        let previous = *state;
        *state = target;
        Ok(previous)
    }

    /// Force the conversation back to `Ready(mode)`.
    pub fn reset(&self, mode: InputMode) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracing::warn!("Conversation state reset to Ready({}) from {}", mode, *state);
        *state = ConversationState::Ready(mode);
    }
}

// =============================================================================
// Tests
// =============================================================================
