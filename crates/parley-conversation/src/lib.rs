//! Parley conversation crate - the turn-taking core.
//!
//! `ConversationOrchestrator` drives one conversation: it claims a state
//! transition for every user action, moves the utterance through capture,
//! exchange and playback, and always lands back in `Ready`. `SessionIdentity`
//! pins the conversation to an identifier carried in the page address.

pub mod error;
pub mod orchestrator;
pub mod session;
pub mod state;
pub mod view;

pub use error::ConversationError;
pub use orchestrator::{ActionOutcome, ConversationOrchestrator};
pub use session::{InMemoryLocation, Location, SessionIdentity};
pub use state::{ConversationState, StateMachine};
pub use view::{ConversationView, RecordingView};
