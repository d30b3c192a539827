//! tether-ai: Conversation types and the streaming vocabulary spoken by agents
//!
//! Agents (LLM clients, scripted replays, test doubles) report their progress
//! as a stream of [`StreamEvent`]s. The session engine turns those events into
//! wire frames and records them into history with a [`TurnRecorder`].

pub mod error;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{EventStream, StreamEvent, TurnRecorder};
pub use types::*;
