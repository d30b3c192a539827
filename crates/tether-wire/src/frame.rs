//! Frame tags and encoding

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of the tag byte plus the length field.
pub const HEADER_LEN: usize = 5;

/// Largest payload in one frame: 16 MiB. Longer values are split by
/// [`encode`] and rejected by the codec.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Frame tags. The byte values are part of the wire format and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// Assistant text delta
    Text = b'T',
    /// Reasoning delta
    Reasoning = b'R',
    /// `"<tool>: <summary>"`
    Tool = b't',
    /// Error message
    Error = b'E',
    /// Session info JSON
    System = b'S',
    /// Echo of the prompt or command that just started
    PromptStart = b'P',
    /// Structural separator, empty payload
    StreamGap = b'G',
    /// Queued / busy advisory
    Notify = b'N',
    /// Raw user input, the only inbound tag
    UserText = b'U',
}

impl Tag {
    pub const ALL: [Tag; 9] = [
        Tag::Text,
        Tag::Reasoning,
        Tag::Tool,
        Tag::Error,
        Tag::System,
        Tag::PromptStart,
        Tag::StreamGap,
        Tag::Notify,
        Tag::UserText,
    ];

    pub fn from_byte(byte: u8) -> Option<Tag> {
        Tag::ALL.into_iter().find(|t| t.as_byte() == byte)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn as_char(self) -> char {
        self.as_byte() as char
    }

    /// Name used in logs
    pub fn name(self) -> &'static str {
        match self {
            Tag::Text => "text",
            Tag::Reasoning => "reasoning",
            Tag::Tool => "tool",
            Tag::Error => "error",
            Tag::System => "system",
            Tag::PromptStart => "prompt_start",
            Tag::StreamGap => "stream_gap",
            Tag::Notify => "notify",
            Tag::UserText => "user_text",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: Tag,
    pub payload: String,
}

impl Frame {
    pub fn new(tag: Tag, payload: impl Into<String>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// Total encoded size
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Append the encoded frame to `dst`. The payload is written as one
    /// frame whatever its size.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        put_frame(dst, self.tag, &self.payload);
    }
}

fn put_frame(dst: &mut BytesMut, tag: Tag, value: &str) {
    dst.reserve(HEADER_LEN + value.len());
    dst.put_u8(tag.as_byte());
    dst.put_u32(value.len() as u32);
    dst.put_slice(value.as_bytes());
}

fn put_frames(dst: &mut BytesMut, tag: Tag, value: &str) {
    for chunk in split_payload(value, MAX_PAYLOAD_LEN) {
        put_frame(dst, tag, chunk);
    }
}

/// Cut `value` into pieces of at most `max` bytes on char boundaries.
/// An empty value yields one empty piece.
fn split_payload(value: &str, max: usize) -> impl Iterator<Item = &str> {
    let mut rest = value;
    let mut first = true;
    std::iter::from_fn(move || {
        if rest.is_empty() && !first {
            return None;
        }
        first = false;
        let mut end = rest.len().min(max);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(0, char::len_utf8);
        }
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(chunk)
    })
}

/// Encode one frame into exactly `HEADER_LEN + value.len()` bytes.
///
/// A value over [`MAX_PAYLOAD_LEN`] becomes consecutive frames with the same
/// tag, so every frame stays decodable.
pub fn encode(tag: Tag, value: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + value.len());
    put_frames(&mut buf, tag, value);
    buf.freeze()
}

/// Encode `streamGap, frame, streamGap` as one buffer.
pub fn encode_gapped(tag: Tag, value: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(3 * HEADER_LEN + value.len());
    put_frame(&mut buf, Tag::StreamGap, "");
    put_frames(&mut buf, tag, value);
    put_frame(&mut buf, Tag::StreamGap, "");
    buf.freeze()
}
