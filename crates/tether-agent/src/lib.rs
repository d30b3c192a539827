//! tether-agent: Session engine for tool-calling agent front-ends
//!
//! A [`Session`] owns one conversation. Producers submit prompts and slash
//! commands; the session runs them one at a time against an [`Agent`],
//! translating the agent's events into frames on a shared
//! [`tether_wire::Output`].

pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod processor;
pub mod session;
pub mod task;
pub mod tools;

pub use agent::{Agent, StreamCall};
pub use config::SessionConfig;
pub use conversation::{Conversation, SystemInfo};
pub use error::{Error, Result};
pub use processor::{Processor, Turn, TurnEnd};
pub use session::Session;
pub use task::{Command, Task};
pub use tools::ToolSummaries;
