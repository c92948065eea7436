//! Presentation seam for the orchestrator.

use std::sync::{Arc, Mutex};

use parley_core::events::ConversationEvent;
use parley_core::types::Controls;

/// Renders conversation events: status line, controls, result panels.
pub trait ConversationView: Send + Sync {
    fn apply(&self, event: &ConversationEvent);
}

/// Keeps every event for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingView {
    events: Arc<Mutex<Vec<ConversationEvent>>>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConversationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Status lines in the order they were shown.
    pub fn statuses(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.status_text().map(str::to_string))
            .collect()
    }

    pub fn last_status(&self) -> Option<String> {
        self.statuses().pop()
    }

    pub fn last_controls(&self) -> Option<Controls> {
        self.events().iter().rev().find_map(|e| match e {
            ConversationEvent::ControlsChanged { controls } => Some(*controls),
            _ => None,
        })
    }

    pub fn transcriptions(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConversationEvent::TranscriptionShown { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn replies(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ConversationEvent::ReplyShown { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl ConversationView for RecordingView {
    fn apply(&self, event: &ConversationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
