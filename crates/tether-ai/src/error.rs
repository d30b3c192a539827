//! Error types for tether-ai

use thiserror::Error;

/// Result type alias using tether-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors an agent can report when starting or running a turn
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The model API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// The connection to the model failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Stream was aborted
    #[error("Request aborted")]
    Aborted,

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from cancelling the request
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }
}
