//! The session engine: one conversation, one running task, a bounded queue.
//!
//! A [`Session`] is a cloneable handle; every clone drives the same
//! conversation. Producers call [`Session::submit_prompt`] and
//! [`Session::submit_command`] from any task. If nothing is running, the
//! call spawns the processing loop with that task. Otherwise the task is
//! queued, or dropped with a `notify` frame when the queue is full.
//!
//! The loop runs tasks strictly in submission order. For each one it emits a
//! gapped `promptStart`, streams the agent's output, records the turn into
//! history and finishes with a `system` frame.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_ai::{Message, Usage};
use tether_wire::{Frame, FrameDecoder, FrameError, Input, Output, Tag, encode, encode_gapped};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::agent::{Agent, StreamCall};
use crate::config::SessionConfig;
use crate::conversation::{Conversation, SystemInfo};
use crate::error::Result;
use crate::processor::{Processor, TurnEnd, emit};
use crate::task::{Command, Task};
use crate::tools::ToolSummaries;

/// Appended to history after a cancelled task.
pub const CANCELED_MESSAGE: &str = "The user canceled.";

pub const QUEUED_NOTICE: &str = "[Queued] Previous task in progress. Will run after completion.";

pub const BUSY_NOTICE: &str = "[Busy] Cannot queue, try again shortly.";

pub const SUMMARIZE_PROMPT: &str = "Please summarize the conversation above in a concise manner. \
Return ONLY the summary, no introductions or explanations.";

const READ_BUF_LEN: usize = 8 * 1024;

/// Queue and loop ownership. `cancel` is `Some` only while a task is running.
#[derive(Default)]
struct LoopState {
    queue: VecDeque<Task>,
    in_progress: bool,
    cancel: Option<CancellationToken>,
}

struct Inner {
    id: Uuid,
    config: SessionConfig,
    agent: Arc<dyn Agent>,
    output: Arc<dyn Output>,
    tools: ToolSummaries,
    state: Mutex<LoopState>,
    conversation: Mutex<Conversation>,
    idle_notify: Notify,
}

/// How a task left history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Cancelled,
    /// Nothing was recorded
    Failed,
}

enum Admission {
    Start(Task, CancellationToken),
    Queued,
    Busy(Task),
}

/// A cloneable handle to one conversation.
///
/// All state lives behind an `Arc`, so cloning is cheap.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create a session with the default tool summaries.
    pub fn new(config: SessionConfig, agent: Arc<dyn Agent>, output: Arc<dyn Output>) -> Self {
        Self::with_tools(config, agent, output, ToolSummaries::default())
    }

    pub fn with_tools(
        config: SessionConfig,
        agent: Arc<dyn Agent>,
        output: Arc<dyn Output>,
        tools: ToolSummaries,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, queue_capacity = config.queue_capacity, "session created");
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                agent,
                output,
                tools,
                state: Mutex::new(LoopState::default()),
                conversation: Mutex::new(Conversation::default()),
                idle_notify: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Submit a user prompt. Blank prompts are ignored.
    pub fn submit_prompt(&self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            debug!(session = %self.inner.id, "ignoring blank prompt");
            return;
        }
        self.submit(Task::UserPrompt(text));
    }

    /// Submit a slash command by name, with or without the leading `/`.
    pub fn submit_command(&self, name: &str) {
        match name.parse::<Command>() {
            Ok(cmd) => self.submit(Task::Command(cmd)),
            Err(e) => {
                warn!(session = %self.inner.id, command = name.trim(), "unknown command");
                self.send_gapped(Tag::Error, &e.to_string());
            }
        }
    }

    /// Submit a task. Immediate commands run on the caller's thread.
    pub fn submit(&self, task: Task) {
        match task {
            Task::Command(Command::Cancel) => {
                if !self.cancel_current() {
                    self.send_gapped(Tag::Error, "nothing to cancel");
                }
            }
            Task::Command(Command::Usage) => self.send_system_info(),
            task => self.admit(task),
        }
    }

    /// Cancel the running task. Returns `false` when nothing is running or
    /// the running task was already cancelled.
    ///
    /// A `true` result always leaves a cancel entry in history, unless the
    /// task failed and left no trace there.
    pub fn cancel_current(&self) -> bool {
        let state = self.inner.state.lock();
        match &state.cancel {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                info!(session = %self.inner.id, "cancel requested");
                true
            }
            _ => false,
        }
    }

    /// Whether the processing loop is running.
    pub fn is_in_progress(&self) -> bool {
        self.inner.state.lock().in_progress
    }

    /// Number of tasks waiting behind the running one.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Snapshot of the conversation history.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.conversation.lock().messages.clone()
    }

    /// Cumulative usage.
    pub fn usage(&self) -> Usage {
        self.inner.conversation.lock().total_usage
    }

    pub fn context_tokens(&self) -> u64 {
        self.inner.conversation.lock().context_tokens
    }

    /// Current payload for a `system` frame.
    pub fn system_info(&self) -> SystemInfo {
        let queue = self.queued();
        let conv = self.inner.conversation.lock();
        SystemInfo {
            context: conv.context_tokens,
            total: conv.total_usage.total,
            queue,
            model: self.inner.config.model.clone(),
            base_url: self.inner.config.base_url.clone(),
        }
    }

    /// Wait until the processing loop has drained the queue and exited.
    pub async fn wait_for_idle(&self) {
        let notified = self.inner.idle_notify.notified();
        if !self.is_in_progress() {
            return;
        }
        notified.await;
    }

    /// Read frames from `input` and dispatch them until end of stream.
    ///
    /// Framing errors are reported as `error` frames and reading continues.
    /// Only a failing transport ends this early.
    pub async fn serve<I>(&self, input: &mut I) -> Result<()>
    where
        I: Input + ?Sized,
    {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_BUF_LEN];

        loop {
            let n = input.read(&mut buf).await?;
            if n == 0 {
                if let Err(e) = decoder.finish() {
                    self.report_frame_error(&e);
                }
                debug!(session = %self.inner.id, "input closed");
                return Ok(());
            }

            decoder.extend(&buf[..n]);
            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => self.handle_frame(frame),
                    Ok(None) => break,
                    Err(e) => self.report_frame_error(&e),
                }
            }
        }
    }

    /// Dispatch one inbound frame. Only `userText` is accepted.
    pub fn handle_frame(&self, frame: Frame) {
        match frame.tag {
            Tag::UserText => match frame.payload.strip_prefix('/') {
                Some(name) => self.submit_command(name),
                None => self.submit_prompt(frame.payload),
            },
            other => {
                warn!(session = %self.inner.id, tag = other.name(), "rejected inbound frame");
                self.send_gapped(
                    Tag::Error,
                    &format!(
                        "invalid input tag: '{}' (only '{}' is allowed)",
                        other,
                        Tag::UserText
                    ),
                );
            }
        }
    }

    fn admit(&self, task: Task) {
        let admission = {
            let mut state = self.inner.state.lock();
            if !state.in_progress {
                let token = CancellationToken::new();
                state.in_progress = true;
                state.cancel = Some(token.clone());
                Admission::Start(task, token)
            } else if state.queue.len() < self.inner.config.queue_capacity {
                state.queue.push_back(task);
                Admission::Queued
            } else {
                Admission::Busy(task)
            }
        };

        match admission {
            Admission::Start(task, token) => {
                let session = self.clone();
                tokio::spawn(session.run_loop(task, token));
            }
            Admission::Queued => {
                debug!(session = %self.inner.id, "task queued");
                self.send_gapped(Tag::Notify, QUEUED_NOTICE);
                self.send_system_info();
            }
            Admission::Busy(task) => {
                warn!(session = %self.inner.id, kind = task.kind(), "queue full, dropping task");
                self.send_gapped(Tag::Notify, BUSY_NOTICE);
            }
        }
    }

    async fn run_loop(self, first: Task, first_token: CancellationToken) {
        let mut next = Some((first, first_token));
        while let Some((task, cancel)) = next {
            let span = info_span!("task", session = %self.inner.id, kind = task.kind());
            self.run_task(task, &cancel).instrument(span).await;
            next = self.next_task();
        }
        debug!(session = %self.inner.id, "loop idle");
        self.inner.idle_notify.notify_waiters();
    }

    /// Pop the next task and arm a fresh token, or release the loop.
    fn next_task(&self) -> Option<(Task, CancellationToken)> {
        let mut state = self.inner.state.lock();
        match state.queue.pop_front() {
            Some(task) => {
                let token = CancellationToken::new();
                state.cancel = Some(token.clone());
                Some((task, token))
            }
            None => {
                state.in_progress = false;
                state.cancel = None;
                None
            }
        }
    }

    async fn run_task(&self, task: Task, cancel: &CancellationToken) {
        info!("task started");
        self.send_gapped(Tag::PromptStart, &task.display_text());

        let outcome = match task {
            Task::UserPrompt(text) => self.run_prompt(text, cancel).await,
            Task::Command(Command::Summarize) => self.run_summarize(cancel).await,
            // handled in submit, never queued
            Task::Command(Command::Cancel | Command::Usage) => Outcome::Done,
        };

        // a cancel that lands after this point finds no token
        self.inner.state.lock().cancel = None;
        let cancelled = match outcome {
            Outcome::Done => cancel.is_cancelled(),
            Outcome::Cancelled => true,
            Outcome::Failed => false,
        };
        if cancelled {
            self.inner
                .conversation
                .lock()
                .messages
                .push(Message::assistant(CANCELED_MESSAGE));
        }

        self.send_system_info();
        info!(cancelled, "task finished");
    }

    /// A failed turn leaves history and usage untouched.
    async fn run_prompt(&self, text: String, cancel: &CancellationToken) -> Outcome {
        let history = self.messages();
        let call = StreamCall::new(text.clone(), history);
        let turn = self
            .processor()
            .run_turn(self.inner.agent.as_ref(), call, cancel)
            .await;

        let message = match turn.end {
            TurnEnd::Failed(message) => message,
            end => {
                let mut conv = self.inner.conversation.lock();
                conv.record_usage(&turn.usage);
                conv.context_tokens += turn.usage.total;
                conv.messages.push(Message::user(text));
                if end == TurnEnd::Cancelled {
                    return Outcome::Cancelled;
                }
                conv.messages.extend(turn.messages);
                return Outcome::Done;
            }
        };

        warn!(error = %message, "turn failed");
        self.send_gapped(Tag::Error, &message);
        Outcome::Failed
    }

    /// History and usage are only touched by a non-empty summary or a
    /// cancelled one.
    async fn run_summarize(&self, cancel: &CancellationToken) -> Outcome {
        let history = self.messages();
        if history.is_empty() {
            self.send_gapped(Tag::Notify, "nothing to summarize");
            return Outcome::Done;
        }

        let call = StreamCall::new(SUMMARIZE_PROMPT, history);
        let turn = self
            .processor()
            .run_turn(self.inner.agent.as_ref(), call, cancel)
            .await;

        let summary = turn.text.trim();
        let message = match &turn.end {
            TurnEnd::Completed if !summary.is_empty() => {
                self.inner
                    .conversation
                    .lock()
                    .replace_with_summary(summary, &turn.usage);
                info!(context_tokens = turn.usage.output, "history summarized");
                return Outcome::Done;
            }
            TurnEnd::Cancelled => {
                self.inner.conversation.lock().record_usage(&turn.usage);
                return Outcome::Cancelled;
            }
            TurnEnd::Completed => "summary was empty, history kept".to_string(),
            TurnEnd::Failed(message) => message.clone(),
        };

        warn!(error = %message, "summarize failed");
        self.send_gapped(Tag::Error, &message);
        Outcome::Failed
    }

    fn processor(&self) -> Processor<'_> {
        Processor::new(self.inner.output.as_ref(), &self.inner.tools)
    }

    fn send(&self, tag: Tag, value: &str) {
        emit(self.inner.output.as_ref(), &encode(tag, value));
    }

    /// `streamGap, frame, streamGap` in one write.
    fn send_gapped(&self, tag: Tag, value: &str) {
        emit(self.inner.output.as_ref(), &encode_gapped(tag, value));
    }

    fn send_system_info(&self) {
        self.send(Tag::System, &self.system_info().to_json());
    }

    fn report_frame_error(&self, e: &FrameError) {
        warn!(session = %self.inner.id, error = %e, "bad inbound frame");
        self.send_gapped(Tag::Error, &e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use tether_ai::{EventStream, StreamEvent};
    use tether_wire::{channel_input, channel_output};
    use tokio::sync::{Semaphore, mpsc};

    /// Plays back one canned turn per call. With a gate, each turn waits for
    /// a permit before producing events.
    struct MockAgent {
        turns: Mutex<VecDeque<Vec<StreamEvent>>>,
        calls: Mutex<Vec<(String, usize)>>,
        gate: Option<Arc<Semaphore>>,
        started: mpsc::UnboundedSender<String>,
    }

    impl MockAgent {
        fn new(
            turns: Vec<Vec<StreamEvent>>,
            gated: bool,
        ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (started, started_rx) = mpsc::unbounded_channel();
            let agent = Arc::new(Self {
                turns: Mutex::new(turns.into()),
                calls: Mutex::new(Vec::new()),
                gate: gated.then(|| Arc::new(Semaphore::new(0))),
                started,
            });
            (agent, started_rx)
        }

        fn release(&self, turns: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(turns);
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(p, _)| p.clone()).collect()
        }
    }

    #[async_trait]
    impl Agent for MockAgent {
        async fn stream(
            &self,
            call: StreamCall,
            _cancel: CancellationToken,
        ) -> tether_ai::Result<EventStream> {
            self.calls
                .lock()
                .push((call.prompt.clone(), call.messages.len()));
            let events = self.turns.lock().pop_front().unwrap_or_else(|| {
                vec![
                    StreamEvent::text("done"),
                    StreamEvent::step_finish(Usage::new(1, 1)),
                ]
            });
            let gate = self.gate.clone();
            let started = self.started.clone();
            let prompt = call.prompt;

            Ok(Box::pin(async_stream::stream! {
                let _ = started.send(prompt);
                if let Some(gate) = gate {
                    gate.acquire().await.unwrap().forget();
                }
                for event in events {
                    yield event;
                }
            }))
        }
    }

    struct Harness {
        session: Session,
        agent: Arc<MockAgent>,
        started: mpsc::UnboundedReceiver<String>,
        rx: mpsc::UnboundedReceiver<Bytes>,
        decoder: FrameDecoder,
    }

    impl Harness {
        fn new(turns: Vec<Vec<StreamEvent>>, gated: bool, config: SessionConfig) -> Self {
            let (agent, started) = MockAgent::new(turns, gated);
            let (output, rx) = channel_output();
            let session = Session::new(config, agent.clone(), Arc::new(output));
            Self {
                session,
                agent,
                started,
                rx,
                decoder: FrameDecoder::new(),
            }
        }

        /// Next non-gap frame.
        async fn next(&mut self) -> Frame {
            loop {
                if let Some(frame) = self.decoder.next_frame().unwrap() {
                    if frame.tag != Tag::StreamGap {
                        return frame;
                    }
                    continue;
                }
                let chunk = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                    .await
                    .expect("timed out waiting for a frame")
                    .expect("output closed");
                self.decoder.extend(&chunk);
            }
        }

        async fn expect(&mut self, tag: Tag, payload: &str) {
            assert_eq!(self.next().await, Frame::new(tag, payload));
        }

        async fn expect_tag(&mut self, tag: Tag) -> Frame {
            let frame = self.next().await;
            assert_eq!(frame.tag, tag, "unexpected frame {:?}", frame);
            frame
        }

        async fn system(&mut self) -> SystemInfo {
            let frame = self.expect_tag(Tag::System).await;
            serde_json::from_str(&frame.payload).unwrap()
        }

        async fn wait_started(&mut self) -> String {
            tokio::time::timeout(Duration::from_secs(2), self.started.recv())
                .await
                .expect("timed out waiting for the agent")
                .expect("agent gone")
        }

        async fn idle(&self) {
            tokio::time::timeout(Duration::from_secs(2), self.session.wait_for_idle())
                .await
                .expect("session never went idle");
        }
    }

    fn reply(text: &str, usage: Usage) -> Vec<StreamEvent> {
        vec![StreamEvent::text(text), StreamEvent::step_finish(usage)]
    }

    #[tokio::test]
    async fn test_prompt_scenario_frames_and_history() {
        let turn = vec![
            StreamEvent::reasoning("need a listing"),
            StreamEvent::tool_call("c1", "bash", serde_json::json!({"command": "ls -la"})),
            StreamEvent::ToolResult {
                id: "c1".into(),
                name: "bash".into(),
                content: "Cargo.toml\nsrc".into(),
                is_error: false,
            },
            StreamEvent::step_finish(Usage::new(100, 10)),
            StreamEvent::text("Two entries."),
            StreamEvent::step_finish(Usage::new(120, 5)),
        ];
        let mut h = Harness::new(vec![turn], false, SessionConfig::default().with_model("m1"));

        h.session.submit_prompt("list files");

        h.expect(Tag::PromptStart, "list files").await;
        h.expect(Tag::Reasoning, "need a listing").await;
        h.expect(Tag::Tool, "bash: ls -la").await;
        h.expect(Tag::Text, "Two entries.").await;
        let info = h.system().await;
        assert_eq!(info.total, 235);
        assert_eq!(info.context, 235);
        assert_eq!(info.queue, 0);
        assert_eq!(info.model, "m1");

        h.idle().await;
        let roles: Vec<&str> = h.session.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool_result", "assistant"]);
        assert!(!h.session.is_in_progress());
    }

    #[tokio::test]
    async fn test_prompt_start_is_gapped() {
        let (agent, _started) = MockAgent::new(vec![], false);
        let (output, mut rx) = channel_output();
        let session = Session::new(SessionConfig::default(), agent, Arc::new(output));

        session.submit_prompt("hi");
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, encode_gapped(Tag::PromptStart, "hi"));
    }

    #[tokio::test]
    async fn test_second_prompt_is_queued_then_runs() {
        let mut h = Harness::new(
            vec![reply("first", Usage::new(5, 5)), reply("second", Usage::new(5, 5))],
            true,
            SessionConfig::default(),
        );

        h.session.submit_prompt("one");
        assert_eq!(h.wait_started().await, "one");
        h.expect(Tag::PromptStart, "one").await;

        h.session.submit_prompt("two");
        h.expect(Tag::Notify, QUEUED_NOTICE).await;
        assert_eq!(h.system().await.queue, 1);

        h.agent.release(2);
        h.expect(Tag::Text, "first").await;
        // reported before the loop picks up the next task
        assert_eq!(h.system().await.queue, 1);
        h.expect(Tag::PromptStart, "two").await;
        h.expect(Tag::Text, "second").await;
        h.system().await;

        h.idle().await;
        // the second turn saw the first turn's user and assistant messages
        assert_eq!(
            *h.agent.calls.lock(),
            vec![("one".to_string(), 0), ("two".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_queue_bound_drops_overflow() {
        let mut h = Harness::new(vec![], true, SessionConfig::default().with_queue_capacity(2));

        h.session.submit_prompt("a");
        h.wait_started().await;
        h.session.submit_prompt("b");
        h.session.submit_prompt("c");
        h.session.submit_prompt("d");
        assert_eq!(h.session.queued(), 2);

        h.agent.release(3);
        h.idle().await;

        let mut notices = Vec::new();
        while let Ok(chunk) = h.rx.try_recv() {
            h.decoder.extend(&chunk);
        }
        while let Some(frame) = h.decoder.next_frame().unwrap() {
            if frame.tag == Tag::Notify {
                notices.push(frame.payload);
            }
        }
        assert_eq!(notices, vec![QUEUED_NOTICE, QUEUED_NOTICE, BUSY_NOTICE]);
        assert_eq!(h.agent.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_cancel_running_prompt() {
        let mut h = Harness::new(
            vec![reply("never", Usage::new(1, 1)), reply("after", Usage::new(3, 4))],
            true,
            SessionConfig::default(),
        );

        h.session.submit_prompt("slow");
        h.wait_started().await;
        assert!(h.session.is_in_progress());
        assert!(h.session.cancel_current());
        assert!(!h.session.cancel_current());

        h.expect(Tag::PromptStart, "slow").await;
        h.system().await;
        h.idle().await;
        assert!(!h.session.cancel_current());

        let messages = h.session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), "slow");
        assert_eq!(messages[1].role(), "assistant");
        assert_eq!(messages[1].text(), CANCELED_MESSAGE);

        // the next prompt starts a clean turn
        h.agent.release(1);
        h.session.submit_prompt("again");
        h.expect(Tag::PromptStart, "again").await;
        h.expect(Tag::Text, "after").await;
        h.system().await;
        h.idle().await;

        let messages = h.session.messages();
        let canceled = messages
            .iter()
            .filter(|m| m.text() == CANCELED_MESSAGE)
            .count();
        assert_eq!(canceled, 1);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3].text(), "after");
    }

    #[tokio::test]
    async fn test_cancel_only_hits_running_task() {
        let mut h = Harness::new(
            vec![reply("one", Usage::default()), reply("two", Usage::default())],
            true,
            SessionConfig::default(),
        );

        h.session.submit_prompt("one");
        h.wait_started().await;
        h.session.submit_prompt("two");
        assert!(h.session.cancel_current());

        h.agent.release(1);
        assert_eq!(h.wait_started().await, "two");
        h.idle().await;

        let texts: Vec<String> = h.session.messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["one", CANCELED_MESSAGE, "two", "two"]);
    }

    #[tokio::test]
    async fn test_cancel_command_when_idle() {
        let mut h = Harness::new(vec![], false, SessionConfig::default());
        assert!(!h.session.cancel_current());
        h.session.submit_command("cancel");
        h.expect(Tag::Error, "nothing to cancel").await;
        assert!(!h.session.is_in_progress());
    }

    #[tokio::test]
    async fn test_cancel_command_while_running() {
        let mut h = Harness::new(vec![], true, SessionConfig::default());
        h.session.submit_prompt("x");
        h.wait_started().await;
        h.session.submit_command("/cancel");
        h.expect(Tag::PromptStart, "x").await;
        h.system().await;
        h.idle().await;
        assert_eq!(h.session.messages()[1].text(), CANCELED_MESSAGE);
    }

    #[tokio::test]
    async fn test_usage_is_monotonic_and_summarize_resets_context() {
        let mut h = Harness::new(
            vec![
                reply("a", Usage::new(10, 5)),
                reply("b", Usage::new(20, 5)),
                reply("  short summary\n", Usage::new(40, 7)),
            ],
            false,
            SessionConfig::default(),
        );

        h.session.submit_prompt("first");
        h.idle().await;
        let after_first = h.session.usage().total;
        assert_eq!(after_first, 15);

        h.session.submit_prompt("second");
        h.idle().await;
        assert!(h.session.usage().total >= after_first);
        assert_eq!(h.session.usage().total, 40);
        assert_eq!(h.session.context_tokens(), 40);

        h.session.submit_command("/summarize");
        h.idle().await;
        assert_eq!(h.session.context_tokens(), 7);
        assert_eq!(h.session.usage().total, 87);
        let messages = h.session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role(), "assistant");
        assert_eq!(messages[0].text(), "short summary");
        assert_eq!(h.agent.prompts()[2], SUMMARIZE_PROMPT);

        let mut saw_summarize_start = false;
        loop {
            let frame = h.next().await;
            if frame == Frame::new(Tag::PromptStart, "/summarize") {
                saw_summarize_start = true;
            }
            if saw_summarize_start && frame.tag == Tag::System {
                let info: SystemInfo = serde_json::from_str(&frame.payload).unwrap();
                assert_eq!(info.context, 7);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_failed_or_empty_summary_keeps_history_and_usage() {
        let mut h = Harness::new(
            vec![
                reply("a", Usage::new(10, 5)),
                vec![
                    StreamEvent::text("half a summ"),
                    StreamEvent::step_finish(Usage::new(40, 7)),
                    StreamEvent::error("overloaded"),
                ],
                reply(" \n ", Usage::new(30, 1)),
            ],
            false,
            SessionConfig::default(),
        );

        h.session.submit_prompt("first");
        h.expect(Tag::PromptStart, "first").await;
        h.expect(Tag::Text, "a").await;
        h.system().await;

        h.session.submit_command("/summarize");
        h.expect(Tag::PromptStart, "/summarize").await;
        h.expect(Tag::Text, "half a summ").await;
        h.expect(Tag::Error, "overloaded").await;
        let info = h.system().await;
        assert_eq!((info.context, info.total), (15, 15));

        h.session.submit_command("/summarize");
        h.expect(Tag::PromptStart, "/summarize").await;
        h.expect(Tag::Text, " \n ").await;
        h.expect(Tag::Error, "summary was empty, history kept").await;
        let info = h.system().await;
        assert_eq!((info.context, info.total), (15, 15));

        h.idle().await;
        let texts: Vec<String> = h.session.messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["first", "a"]);
        assert_eq!(h.session.usage(), Usage::new(10, 5));
    }

    #[tokio::test]
    async fn test_summarize_empty_history() {
        let mut h = Harness::new(vec![], false, SessionConfig::default());
        h.session.submit_command("summarize");
        h.expect(Tag::PromptStart, "/summarize").await;
        h.expect(Tag::Notify, "nothing to summarize").await;
        h.system().await;
        h.idle().await;
        assert!(h.agent.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let mut h = Harness::new(vec![], false, SessionConfig::default());
        h.session.submit_command("frobnicate");
        h.expect(Tag::Error, "unknown cmd frobnicate").await;
        assert!(!h.session.is_in_progress());
        assert_eq!(h.session.queued(), 0);
    }

    #[tokio::test]
    async fn test_usage_command_reports_immediately() {
        let mut h = Harness::new(vec![], false, SessionConfig::default().with_base_url("http://x"));
        h.session.submit_command("usage");
        let info = h.system().await;
        assert_eq!(info, SystemInfo {
            context: 0,
            total: 0,
            queue: 0,
            model: String::new(),
            base_url: "http://x".into(),
        });
        assert!(!h.session.is_in_progress());
    }

    #[tokio::test]
    async fn test_failed_turn_reports_error_and_keeps_history_clean() {
        let mut h = Harness::new(
            vec![
                vec![
                    StreamEvent::text("partial"),
                    StreamEvent::step_finish(Usage::new(2, 2)),
                    StreamEvent::error("rate limited"),
                ],
                reply("ok", Usage::new(1, 1)),
            ],
            false,
            SessionConfig::default(),
        );

        h.session.submit_prompt("boom");
        h.expect(Tag::PromptStart, "boom").await;
        h.expect(Tag::Text, "partial").await;
        h.expect(Tag::Error, "rate limited").await;
        assert_eq!(h.system().await.context, 0);
        h.idle().await;
        assert!(h.session.messages().is_empty());
        assert_eq!(h.session.usage().total, 0);
        assert_eq!(h.session.context_tokens(), 0);

        h.session.submit_prompt("retry");
        h.idle().await;
        assert_eq!(h.session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_prompt_is_ignored() {
        let h = Harness::new(vec![], false, SessionConfig::default());
        h.session.submit_prompt("   \n");
        assert!(!h.session.is_in_progress());
        assert!(h.agent.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_idle_when_never_started() {
        let h = Harness::new(vec![], false, SessionConfig::default());
        h.idle().await;
    }

    #[tokio::test]
    async fn test_serve_dispatches_and_rejects() {
        let mut h = Harness::new(vec![reply("hello back", Usage::new(1, 1))], false, SessionConfig::default());
        let (tx, mut input) = channel_input(8);
        let session = h.session.clone();
        let served = tokio::spawn(async move { session.serve(&mut input).await });

        tx.send(encode(Tag::Text, "not allowed")).await.unwrap();
        h.expect(Tag::Error, "invalid input tag: 'T' (only 'U' is allowed)")
            .await;

        tx.send(Bytes::from_static(&[b'Z', 0, 0, 0, 0])).await.unwrap();
        h.expect(Tag::Error, "unknown frame tag: 0x5a").await;

        // split mid-header
        let frame = encode(Tag::UserText, "hello");
        tx.send(frame.slice(..3)).await.unwrap();
        tx.send(frame.slice(3..)).await.unwrap();
        h.expect(Tag::PromptStart, "hello").await;
        h.expect(Tag::Text, "hello back").await;
        h.system().await;

        tx.send(encode(Tag::UserText, "/bogus")).await.unwrap();
        h.expect(Tag::Error, "unknown cmd bogus").await;

        tx.send(encode(Tag::UserText, "/usage")).await.unwrap();
        h.system().await;

        // truncated trailing frame
        tx.send(encode(Tag::UserText, "cut").slice(..6)).await.unwrap();
        drop(tx);
        h.expect(
            Tag::Error,
            "stream ended with a truncated frame (6 bytes buffered)",
        )
        .await;
        served.await.unwrap().unwrap();
    }

    /// Cancels its own session after the final event, when the turn has
    /// already completed.
    struct LateCancelAgent {
        session: std::sync::OnceLock<Session>,
        result: mpsc::UnboundedSender<bool>,
    }

    #[async_trait]
    impl Agent for LateCancelAgent {
        async fn stream(
            &self,
            _call: StreamCall,
            _cancel: CancellationToken,
        ) -> tether_ai::Result<EventStream> {
            let session = self.session.get().cloned();
            let result = self.result.clone();
            Ok(Box::pin(async_stream::stream! {
                yield StreamEvent::text("done");
                yield StreamEvent::step_finish(Usage::new(1, 1));
                if let Some(session) = session {
                    let _ = result.send(session.cancel_current());
                }
            }))
        }
    }

    #[tokio::test]
    async fn test_cancel_after_last_event_still_closes_turn() {
        let (result, mut cancelled) = mpsc::unbounded_channel();
        let agent = Arc::new(LateCancelAgent {
            session: std::sync::OnceLock::new(),
            result,
        });
        let session = Session::new(
            SessionConfig::default(),
            agent.clone(),
            Arc::new(tether_wire::NopOutput),
        );
        let _ = agent.session.set(session.clone());

        session.submit_prompt("go");
        tokio::time::timeout(Duration::from_secs(2), session.wait_for_idle())
            .await
            .expect("session never went idle");

        assert_eq!(cancelled.recv().await, Some(true));
        let texts: Vec<String> = session.messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["go", "done", CANCELED_MESSAGE]);
        assert!(!session.cancel_current());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_producers_on_many_threads() {
        const PRODUCERS: usize = 16;

        for round in 0..20 {
            let (agent, _started) = MockAgent::new(vec![], false);
            let session = Session::new(
                SessionConfig::default().with_queue_capacity(PRODUCERS),
                agent.clone(),
                Arc::new(tether_wire::NopOutput),
            );

            let barrier = Arc::new(tokio::sync::Barrier::new(PRODUCERS));
            let handles: Vec<_> = (0..PRODUCERS)
                .map(|i| {
                    let session = session.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        session.submit_prompt(format!("r{}-p{}", round, i));
                        let _ = session.is_in_progress();
                        let _ = session.system_info();
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap();
            }
            tokio::time::timeout(Duration::from_secs(5), session.wait_for_idle())
                .await
                .expect("session never went idle");

            assert!(!session.is_in_progress());
            assert_eq!(session.queued(), 0);

            let prompts = agent.prompts();
            let mut unique = prompts.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), PRODUCERS, "round {}", round);

            // each turn saw every earlier turn, and history keeps run order
            for (k, (_, seen)) in agent.calls.lock().iter().enumerate() {
                assert_eq!(*seen, 2 * k);
            }
            let messages = session.messages();
            assert_eq!(messages.len(), 2 * PRODUCERS);
            let users: Vec<String> = messages.iter().step_by(2).map(|m| m.text()).collect();
            assert_eq!(users, prompts);
            assert!(messages.iter().skip(1).step_by(2).all(|m| m.text() == "done"));
            assert_eq!(session.usage().total, 2 * PRODUCERS as u64);
        }
    }
}
