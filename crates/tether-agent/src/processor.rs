//! Translates an agent's event stream into frames and a recorded turn

use futures::StreamExt;
use tether_ai::{Message, StreamEvent, TurnRecorder, Usage};
use tether_wire::{Output, Tag, encode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::{Agent, StreamCall};
use crate::tools::ToolSummaries;

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEnd {
    Completed,
    Cancelled,
    Failed(String),
}

/// Result of one agent turn
#[derive(Debug, Clone)]
pub struct Turn {
    /// Assistant messages and tool results, in order
    pub messages: Vec<Message>,
    /// Usage reported by finished steps
    pub usage: Usage,
    /// All assistant text streamed during the turn
    pub text: String,
    pub end: TurnEnd,
}

impl Turn {
    fn from_recorder(recorder: TurnRecorder, end: TurnEnd) -> Self {
        let text = recorder.text();
        let (messages, usage) = recorder.finish();
        Self {
            messages,
            usage,
            text,
            end,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.end == TurnEnd::Cancelled
    }
}

/// Write one pre-encoded chunk and flush. Failures are logged and dropped.
pub(crate) fn emit(output: &dyn Output, bytes: &[u8]) {
    if let Err(e) = output.write(bytes) {
        warn!(error = %e, "output write failed");
        return;
    }
    if let Err(e) = output.flush() {
        warn!(error = %e, "output flush failed");
    }
}

/// Drives one agent turn, writing a frame per event.
pub struct Processor<'a> {
    output: &'a dyn Output,
    tools: &'a ToolSummaries,
}

impl<'a> Processor<'a> {
    pub fn new(output: &'a dyn Output, tools: &'a ToolSummaries) -> Self {
        Self { output, tools }
    }

    /// Run `call` on `agent` until the stream ends, fails or `cancel` fires.
    pub async fn run_turn(
        &self,
        agent: &dyn Agent,
        call: StreamCall,
        cancel: &CancellationToken,
    ) -> Turn {
        let mut recorder = TurnRecorder::new();

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Turn::from_recorder(recorder, TurnEnd::Cancelled);
            }
            result = agent.stream(call, cancel.clone()) => result,
        };

        let mut events = match started {
            Ok(events) => events,
            Err(e) if e.is_aborted() || cancel.is_cancelled() => {
                return Turn::from_recorder(recorder, TurnEnd::Cancelled);
            }
            Err(e) => return Turn::from_recorder(recorder, TurnEnd::Failed(e.to_string())),
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("turn cancelled mid-stream");
                    return Turn::from_recorder(recorder, TurnEnd::Cancelled);
                }
                event = events.next() => event,
            };
            let Some(event) = event else {
                break;
            };

            recorder.process_event(&event);
            match &event {
                StreamEvent::TextDelta { delta } => self.send(Tag::Text, delta),
                StreamEvent::ReasoningDelta { delta } => self.send(Tag::Reasoning, delta),
                StreamEvent::ToolCall {
                    name, arguments, ..
                } => {
                    debug!(tool = %name, "tool call");
                    self.send(Tag::Tool, &self.tools.describe(name, arguments));
                }
                StreamEvent::ToolResult { .. } | StreamEvent::StepFinish { .. } => {}
                StreamEvent::Error { message } => {
                    return Turn::from_recorder(recorder, TurnEnd::Failed(message.clone()));
                }
            }
        }

        Turn::from_recorder(recorder, TurnEnd::Completed)
    }

    fn send(&self, tag: Tag, value: &str) {
        emit(self.output, &encode(tag, value));
    }
}
