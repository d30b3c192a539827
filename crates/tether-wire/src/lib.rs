//! tether-wire: TLV framing for session engine output
//!
//! Every unit of output is one frame: a tag byte, a big-endian `u32` length
//! and that many bytes of UTF-8 payload. Frames are concatenated on a single
//! byte stream and always handed to an [`Output`] in one write.

pub mod codec;
pub mod error;
pub mod frame;
pub mod port;

pub use codec::{FrameCodec, FrameDecoder};
pub use error::{FrameError, Result};
pub use frame::{Frame, HEADER_LEN, MAX_PAYLOAD_LEN, Tag, encode, encode_gapped};
pub use port::{
    ChannelInput, ChannelOutput, Input, NopInput, NopOutput, Output, ReaderInput, WriterOutput,
    channel_input, channel_output, write_frame,
};
