//! The boundary to whatever produces model output

use async_trait::async_trait;
use tether_ai::{EventStream, Message, Result};
use tokio_util::sync::CancellationToken;

/// Input for one agent turn.
#[derive(Debug, Clone)]
pub struct StreamCall {
    /// The new user prompt (or the summarize instruction)
    pub prompt: String,
    /// Conversation history, oldest first, not including `prompt`
    pub messages: Vec<Message>,
}

impl StreamCall {
    pub fn new(prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            prompt: prompt.into(),
            messages,
        }
    }
}

/// Something that can run a turn and stream back its events.
///
/// Implementations should stop producing events once `cancel` fires. The
/// session also drops the stream on cancel, so an agent that ignores the
/// token is still cut off.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn stream(&self, call: StreamCall, cancel: CancellationToken) -> Result<EventStream>;
}
