//! Plain-text rendering of a frame stream for line mode

use std::io::{self, Write};

use parking_lot::Mutex;
use tether_agent::SystemInfo;
use tether_wire::{Frame, FrameDecoder, Output, Tag};

struct RenderState<W> {
    decoder: FrameDecoder,
    writer: W,
    last: Option<Tag>,
    at_line_start: bool,
}

/// An [`Output`] that decodes frames and prints them as plain text.
pub struct TextRenderer<W> {
    state: Mutex<RenderState<W>>,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            state: Mutex::new(RenderState {
                decoder: FrameDecoder::new(),
                writer,
                last: None,
                at_line_start: true,
            }),
        }
    }

    pub fn into_inner(self) -> W {
        self.state.into_inner().writer
    }
}

impl<W: Write> RenderState<W> {
    fn render(&mut self, frame: Frame) -> io::Result<()> {
        let continuing = self.last == Some(frame.tag);
        match frame.tag {
            Tag::Text => {
                if !continuing {
                    self.break_line()?;
                }
                self.put(&frame.payload)?;
            }
            Tag::Reasoning => {
                if !continuing {
                    self.break_line()?;
                    self.put("(thinking) ")?;
                }
                self.put(&frame.payload)?;
            }
            Tag::Tool => self.line(&format!("[{}]", frame.payload))?,
            Tag::Error => self.line(&format!("Error: {}", frame.payload))?,
            Tag::Notify => self.line(&frame.payload)?,
            Tag::PromptStart => self.line(&format!("> {}", frame.payload))?,
            Tag::System => {
                let line = match serde_json::from_str::<SystemInfo>(&frame.payload) {
                    Ok(info) => format!(
                        "[Tokens: {} context, {} total | Queue: {}]",
                        info.context, info.total, info.queue
                    ),
                    Err(_) => format!("[{}]", frame.payload),
                };
                self.line(&line)?;
            }
            Tag::StreamGap => self.break_line()?,
            Tag::UserText => {}
        }
        if frame.tag != Tag::StreamGap {
            self.last = Some(frame.tag);
        }
        Ok(())
    }

    fn put(&mut self, s: &str) -> io::Result<()> {
        if s.is_empty() {
            return Ok(());
        }
        self.writer.write_all(s.as_bytes())?;
        self.at_line_start = s.ends_with('\n');
        Ok(())
    }

    fn break_line(&mut self) -> io::Result<()> {
        if !self.at_line_start {
            self.writer.write_all(b"\n")?;
            self.at_line_start = true;
        }
        Ok(())
    }

    fn line(&mut self, s: &str) -> io::Result<()> {
        self.break_line()?;
        self.put(s)?;
        self.put("\n")
    }
}

impl<W: Write + Send> Output for TextRenderer<W> {
    fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.decoder.extend(bytes);
        loop {
            match state.decoder.next_frame() {
                Ok(Some(frame)) => state.render(frame)?,
                Ok(None) => break,
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
            }
        }
        Ok(bytes.len())
    }

    fn flush(&self) -> io::Result<()> {
        self.state.lock().writer.flush()
    }
}
