//! Conversation state and the snapshot published in system frames

use serde::{Deserialize, Serialize};
use tether_ai::{Message, Usage};

/// Conversation state: messages and token accounting.
#[derive(Debug, Default)]
pub struct Conversation {
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Total usage across all turns, never reset
    pub total_usage: Usage,
    /// Estimated size of the live context, reset by summarize
    pub context_tokens: u64,
}

impl Conversation {
    /// Add turn usage to cumulative totals.
    pub fn record_usage(&mut self, usage: &Usage) {
        self.total_usage.add(usage);
    }

    /// Swap the whole history for one summary message.
    pub fn replace_with_summary(&mut self, summary: impl Into<String>, usage: &Usage) {
        self.messages = vec![Message::assistant(summary)];
        self.record_usage(usage);
        self.context_tokens = usage.output;
    }
}

/// Payload of a `system` frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Tokens in the live context
    pub context: u64,
    /// Total tokens used by the conversation
    pub total: u64,
    /// Tasks waiting in the queue
    pub queue: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
}

impl SystemInfo {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
