//! Stateful frame decoding.
//!
//! [`FrameCodec`] plugs into [`tokio_util::codec::FramedRead`] /
//! [`tokio_util::codec::FramedWrite`]. [`FrameDecoder`] wraps the same codec
//! for callers that receive chunks by hand, such as the session read loop.
//!
//! Both tolerate arbitrary fragmentation: a frame may arrive split at any
//! byte, including inside the length field.
//!
//! Unknown tags are a framing error. There is no way to know where the
//! garbage ends, so the decoder drops everything buffered and resumes with
//! the next chunk.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::{FrameError, Result};
use crate::frame::{Frame, HEADER_LEN, MAX_PAYLOAD_LEN, Tag};

/// TLV codec with a payload limit.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload_len: usize,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_PAYLOAD_LEN`] limit.
    pub fn new() -> Self {
        Self::with_max_payload_len(MAX_PAYLOAD_LEN)
    }

    pub fn with_max_payload_len(max_payload_len: usize) -> Self {
        Self { max_payload_len }
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let Some(tag) = Tag::from_byte(src[0]) else {
            let byte = src[0];
            debug!(tag = byte, discarded = src.len(), "unknown frame tag");
            src.clear();
            return Err(FrameError::UnknownTag(byte));
        };

        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > self.max_payload_len {
            debug!(len, discarded = src.len(), "oversized frame");
            src.clear();
            return Err(FrameError::PayloadTooLarge {
                len,
                max: self.max_payload_len,
            });
        }

        let needed = HEADER_LEN + len;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len);
        let payload = String::from_utf8(payload.to_vec()).map_err(|_| FrameError::InvalidUtf8 {
            tag: tag.as_char(),
        })?;

        Ok(Some(Frame { tag, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let buffered = src.len();
                src.clear();
                Err(FrameError::Truncated { buffered })
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > self.max_payload_len {
            return Err(FrameError::PayloadTooLarge {
                len: item.payload.len(),
                max: self.max_payload_len,
            });
        }
        item.encode_into(dst);
        Ok(())
    }
}

/// Push-style decoder: feed chunks, pull frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    codec: FrameCodec,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec(codec: FrameCodec) -> Self {
        Self {
            buf: BytesMut::new(),
            codec,
        }
    }

    /// Append a chunk as received from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Peel one complete frame off the buffer, if there is one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.codec.decode(&mut self.buf)
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Call at end of stream. Reports a frame that never completed.
    pub fn finish(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let buffered = self.buf.len();
        self.buf.clear();
        Err(FrameError::Truncated { buffered })
    }
}
