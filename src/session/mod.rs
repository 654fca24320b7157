//! Conversation state: the transcript and the controller that drives turns.
//!
//! - [`ChatController`]: accepts turns, forwards them to the bridge, appends
//!   the resulting messages and handles cancellation and reset
//! - [`Transcript`]: ordered message log with session-id adoption and
//!   markdown export
//!
//! # Example
//!
//! ```rust
//! use note_sage::message::Message;
//! use note_sage::session::Transcript;
//!
//! let mut transcript = Transcript::new();
//! let provisional = transcript.session_id().to_string();
//! transcript.push(Message::user_input("Hello!", provisional));
//!
//! transcript.adopt_session("3f1c");
//! assert_eq!(transcript.messages()[0].session_id, "3f1c");
//! ```

mod controller;
mod transcript;

pub use controller::{
    ChatController, ChatOptions, RejectReason, TranscriptUpdate, TurnOutcome, TurnState,
};
pub use transcript::{Transcript, export_file_name, write_export};
