//! Error types for tether-agent

use thiserror::Error;

/// Result type alias using tether-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum Error {
    /// The input transport failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Slash command with no handler
    #[error("unknown cmd {0}")]
    UnknownCommand(String),
}
