//! Streaming event types and the recorder that turns them into history

use crate::types::{AssistantMetadata, Content, Message, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted by an agent while it works on one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Assistant text delta
    TextDelta { delta: String },
    /// Reasoning delta
    ReasoningDelta { delta: String },
    /// The model requested a tool call
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    /// A tool finished; recorded, never forwarded to consumers
    ToolResult {
        id: String,
        name: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    /// One model step completed with the given usage
    StepFinish { usage: Usage },
    /// The turn failed
    Error { message: String },
}

impl StreamEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
        }
    }

    pub fn reasoning(delta: impl Into<String>) -> Self {
        Self::ReasoningDelta {
            delta: delta.into(),
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn step_finish(usage: Usage) -> Self {
        Self::StepFinish { usage }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// A stream of agent events
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Builds the messages of one turn from streaming events.
///
/// Deltas accumulate into the current assistant message. A tool result or a
/// finished step closes it, so a multi-step turn records as
/// `assistant, tool_result, assistant, ...`.
#[derive(Debug, Default)]
pub struct TurnRecorder {
    content_buffers: Vec<ContentBuffer>,
    step_usage: Usage,
    messages: Vec<Message>,
    usage: Usage,
    error: Option<String>,
}

#[derive(Debug)]
enum ContentBuffer {
    Text(String),
    Thinking(String),
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
}

impl TurnRecorder {
    /// Create a new recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event and update the turn state
    pub fn process_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { delta } => match self.content_buffers.last_mut() {
                Some(ContentBuffer::Text(text)) => text.push_str(delta),
                _ => self.content_buffers.push(ContentBuffer::Text(delta.clone())),
            },
            StreamEvent::ReasoningDelta { delta } => match self.content_buffers.last_mut() {
                Some(ContentBuffer::Thinking(thinking)) => thinking.push_str(delta),
                _ => self
                    .content_buffers
                    .push(ContentBuffer::Thinking(delta.clone())),
            },
            StreamEvent::ToolCall {
                id,
                name,
                arguments,
            } => {
                self.content_buffers.push(ContentBuffer::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
            }
            StreamEvent::ToolResult {
                id,
                name,
                content,
                is_error,
            } => {
                self.flush_assistant();
                self.messages.push(Message::tool_result(
                    id.clone(),
                    name.clone(),
                    vec![Content::text(content.clone())],
                    *is_error,
                ));
            }
            StreamEvent::StepFinish { usage } => {
                self.step_usage.add(usage);
                self.usage.add(usage);
                self.flush_assistant();
            }
            StreamEvent::Error { message } => {
                self.error = Some(message.clone());
            }
        }
    }

    /// Usage reported so far
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Assistant text recorded so far, across every step
    pub fn text(&self) -> String {
        let mut out: String = self
            .messages
            .iter()
            .filter(|m| matches!(m, Message::Assistant { .. }))
            .map(|m| m.text())
            .collect();
        for buf in &self.content_buffers {
            if let ContentBuffer::Text(text) = buf {
                out.push_str(text);
            }
        }
        out
    }

    /// Close any open assistant message and return the turn's messages and usage
    pub fn finish(mut self) -> (Vec<Message>, Usage) {
        self.flush_assistant();
        (self.messages, self.usage)
    }

    fn flush_assistant(&mut self) {
        if self.content_buffers.is_empty() {
            return;
        }
        let content: Vec<Content> = self
            .content_buffers
            .drain(..)
            .map(|buf| match buf {
                ContentBuffer::Text(text) => Content::Text { text },
                ContentBuffer::Thinking(thinking) => Content::Thinking { thinking },
                ContentBuffer::ToolCall {
                    id,
                    name,
                    arguments,
                } => Content::ToolCall {
                    id,
                    name,
                    arguments,
                },
            })
            .collect();

        self.messages.push(Message::Assistant {
            content,
            metadata: AssistantMetadata {
                usage: std::mem::take(&mut self.step_usage),
                error_message: self.error.clone(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        });
    }
}
