//! Local agents for driving a session without a model provider

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_stream::stream;
use async_trait::async_trait;
use serde::Deserialize;
use tether_agent::{Agent, StreamCall};
use tether_ai::{EventStream, Message, StreamEvent, Usage};
use tokio_util::sync::CancellationToken;

/// Rough token estimate (chars/4 heuristic)
fn estimate_tokens(chars: usize) -> u64 {
    (chars / 4) as u64
}

fn history_chars(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.text().len()).sum()
}

/// Echoes the prompt back one word at a time.
pub struct EchoAgent {
    word_delay: Duration,
}

impl EchoAgent {
    pub fn new(word_delay: Duration) -> Self {
        Self { word_delay }
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new(Duration::from_millis(40))
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn stream(
        &self,
        call: StreamCall,
        cancel: CancellationToken,
    ) -> tether_ai::Result<EventStream> {
        let delay = self.word_delay;
        let input = estimate_tokens(history_chars(&call.messages) + call.prompt.len());
        let output = estimate_tokens(call.prompt.len());
        let words: Vec<String> = call
            .prompt
            .split_inclusive(char::is_whitespace)
            .map(str::to_string)
            .collect();

        Ok(Box::pin(stream! {
            yield StreamEvent::reasoning(format!(
                "echoing {} words with {} messages of history",
                words.len(),
                call.messages.len()
            ));
            for word in words {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                yield StreamEvent::text(word);
            }
            yield StreamEvent::step_finish(Usage::new(input, output));
        }))
    }
}

/// One scripted turn
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptTurn {
    /// Pause before each event
    #[serde(default)]
    pub delay_ms: u64,
    pub events: Vec<StreamEvent>,
}

#[derive(Debug, Clone, Deserialize)]
struct Script {
    turns: Vec<ScriptTurn>,
}

/// Replays turns from a JSON script, cycling when it runs out.
pub struct ScriptAgent {
    turns: Vec<ScriptTurn>,
    next: AtomicUsize,
}

impl ScriptAgent {
    pub fn new(turns: Vec<ScriptTurn>) -> anyhow::Result<Self> {
        anyhow::ensure!(!turns.is_empty(), "script has no turns");
        Ok(Self {
            turns,
            next: AtomicUsize::new(0),
        })
    }

    /// Parse `{"turns": [{"delay_ms": 50, "events": [...]}, ...]}`
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let script: Script = serde_json::from_str(json)?;
        Self::new(script.turns)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing script {}", path.display()))
    }
}

#[async_trait]
impl Agent for ScriptAgent {
    async fn stream(
        &self,
        _call: StreamCall,
        cancel: CancellationToken,
    ) -> tether_ai::Result<EventStream> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.turns.len();
        let turn = self.turns[index].clone();
        let delay = Duration::from_millis(turn.delay_ms);
        tracing::debug!(turn = index, events = turn.events.len(), "replaying scripted turn");

        Ok(Box::pin(stream! {
            for event in turn.events {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                yield event;
            }
        }))
    }
}
