//! Byte-stream ports between the session engine and its transports.
//!
//! [`Input`] is pulled by the session read loop. [`Output`] is shared by
//! every producer, so it takes `&self`; implementations must deliver each
//! `write` call to the transport as one unit.

use std::io::{self, Write};

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::frame::{Tag, encode};

/// Source of inbound bytes.
#[async_trait]
pub trait Input: Send {
    /// Read into `buf`. `Ok(0)` means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Sink for outbound frames.
pub trait Output: Send + Sync {
    /// Write `bytes` as one unit.
    fn write(&self, bytes: &[u8]) -> io::Result<usize>;

    fn write_str(&self, s: &str) -> io::Result<usize> {
        self.write(s.as_bytes())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Encode one frame and hand it to `output` in a single write.
pub fn write_frame<O: Output + ?Sized>(output: &O, tag: Tag, value: &str) -> io::Result<()> {
    output.write(&encode(tag, value)).map(|_| ())
}

/// Input that is immediately at end of stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopInput;

#[async_trait]
impl Input for NopInput {
    async fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

/// Output that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopOutput;

impl Output for NopOutput {
    fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        Ok(bytes.len())
    }
}

/// Input fed by an mpsc channel of chunks. Closing every sender ends the stream.
#[derive(Debug)]
pub struct ChannelInput {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
}

/// Create a bounded chunk channel and the [`ChannelInput`] reading from it.
pub fn channel_input(capacity: usize) -> (mpsc::Sender<Bytes>, ChannelInput) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        tx,
        ChannelInput {
            rx,
            pending: Bytes::new(),
        },
    )
}

#[async_trait]
impl Input for ChannelInput {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.rx.recv().await {
                Some(chunk) => self.pending = chunk,
                None => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

/// Output that forwards each write as one chunk on an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    tx: mpsc::UnboundedSender<Bytes>,
}

/// Create a [`ChannelOutput`] and the receiver of its chunks.
pub fn channel_output() -> (ChannelOutput, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelOutput { tx }, rx)
}

impl Output for ChannelOutput {
    fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        self.tx
            .send(Bytes::copy_from_slice(bytes))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output receiver closed"))?;
        Ok(bytes.len())
    }
}

/// Input over any tokio reader (stdin, a socket half, a file).
#[derive(Debug)]
pub struct ReaderInput<R> {
    reader: R,
}

impl<R> ReaderInput<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<R> Input for ReaderInput<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf).await
    }
}

/// Output over a blocking writer such as stdout. The mutex keeps writes whole.
#[derive(Debug)]
pub struct WriterOutput<W> {
    writer: Mutex<W>,
}

impl<W> WriterOutput<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W> Output for WriterOutput<W>
where
    W: Write + Send,
{
    fn write(&self, bytes: &[u8]) -> io::Result<usize> {
        let mut writer = self.writer.lock();
        writer.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}
