//! Units of work accepted by a session

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Slash commands understood by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Replace history with a model-written summary. Queued like a prompt.
    Summarize,
    /// Cancel the running task. Handled immediately.
    Cancel,
    /// Emit a system frame with current usage. Handled immediately.
    Usage,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::Summarize, Command::Cancel, Command::Usage];

    pub fn name(self) -> &'static str {
        match self {
            Command::Summarize => "summarize",
            Command::Cancel => "cancel",
            Command::Usage => "usage",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}

impl FromStr for Command {
    type Err = Error;

    /// Parse a command name, with or without its leading `/`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let name = name.strip_prefix('/').unwrap_or(name);
        Command::ALL
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))
    }
}

/// One prompt or command awaiting processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    UserPrompt(String),
    Command(Command),
}

impl Task {
    /// Text echoed in the task's `promptStart` frame
    pub fn display_text(&self) -> String {
        match self {
            Task::UserPrompt(text) => text.clone(),
            Task::Command(cmd) => cmd.to_string(),
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Task::UserPrompt(_) => "prompt",
            Task::Command(cmd) => cmd.name(),
        }
    }
}
