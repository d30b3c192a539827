//! Error types for tether-wire

use thiserror::Error;

/// Result type alias using FrameError
pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors raised while decoding a frame stream
#[derive(Error, Debug)]
pub enum FrameError {
    /// Tag byte outside the known vocabulary
    #[error("unknown frame tag: 0x{0:02x}")]
    UnknownTag(u8),

    /// Declared payload exceeds the decoder limit
    #[error("frame payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Payload is not valid UTF-8
    #[error("frame '{tag}' payload is not valid UTF-8")]
    InvalidUtf8 { tag: char },

    /// Stream ended inside a frame
    #[error("stream ended with a truncated frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    /// Underlying transport failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
