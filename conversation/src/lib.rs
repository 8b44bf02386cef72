//! Conversation state for the voice chat client
//!
//! Holds the message model shared with the backend, the capped in-memory
//! history that bounds the context sent with each turn, and the transcript
//! entries the UI renders.

pub mod history;
pub mod message;
pub mod transcript;

pub use history::History;
pub use message::{ChatMessage, Role};
pub use transcript::TranscriptEntry;
