//! Error types for the conversation state machine.

use parley_core::error::ParleyError;

use crate::state::ConversationState;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("invalid conversation transition: {from} -> {to}")]
    InvalidTransition {
        from: ConversationState,
        to: ConversationState,
    },
}

impl From<ConversationError> for ParleyError {
    fn from(err: ConversationError) -> Self {
        ParleyError::Conversation(err.to_string())
    }
}
