use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::time::Duration;

use pipecap_nls::{Decoder, Encoding, StreamDecoder, TextDecoder};

use crate::capture::{self, Flusher, Frame, Relay, Writer};
use crate::config::{Capacity, CaptureConfig};
use crate::error::{CaptureError, Result};
use crate::sink::{downcast_sink, LogSink, SharedBuffer, Sink, WriteSink};
use crate::stream::Stream;

/// Where one stream's output goes while a session is active.
#[derive(Default)]
pub enum Destination {
    /// Keep output in the pipe and read it after the session ends.
    #[default]
    Pipe,
    /// Throw output away.
    Discard,
    /// Point the descriptor straight at this file.
    File(File),
    /// Relay output into a sink from a background thread.
    Sink(Box<dyn Sink>),
    /// Relay output line by line into the `log` facade.
    Log(LogSink),
    /// Stderr only: share stdout's destination.
    Stdout,
}

impl Destination {
    pub fn forward(sink: impl Sink) -> Self {
        Destination::Sink(Box::new(sink))
    }

    pub fn writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self::forward(WriteSink::new(writer))
    }

    pub fn log() -> Self {
        Destination::Log(LogSink::new())
    }

    fn needs_relay(&self, eager_drain: bool) -> bool {
        match self {
            Destination::Sink(_) | Destination::Log(_) => true,
            Destination::Pipe => eager_drain,
            _ => false,
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Pipe => f.write_str("Pipe"),
            Destination::Discard => f.write_str("Discard"),
            Destination::File(file) => f.debug_tuple("File").field(file).finish(),
            Destination::Sink(_) => f.write_str("Sink(..)"),
            Destination::Log(log) => f.debug_tuple("Log").field(log).finish(),
            Destination::Stdout => f.write_str("Stdout"),
        }
    }
}

/// Builder for a capture session.
///
/// ```no_run
/// use pipecap::{Destination, Pipes};
///
/// let session = Pipes::new()
///     .stderr(Destination::Stdout)
///     .enter()?;
/// // ... native code writes to descriptors 1 and 2 ...
/// let mut captured = session.finish()?;
/// let text = captured.stdout.take().and_then(|o| o.into_reader()).map(|mut r| r.read_all());
/// # Ok::<(), pipecap::CaptureError>(())
/// ```
#[derive(Debug)]
pub struct Pipes {
    stdout: Destination,
    stderr: Destination,
    encoding: Option<Encoding>,
    capacity: Capacity,
    chunk_size: usize,
    eager_drain: bool,
    flush_interval: Option<Duration>,
}

impl Default for Pipes {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipes {
    pub fn new() -> Self {
        Self::with_config(CaptureConfig::global())
    }

    pub fn with_config(cfg: &CaptureConfig) -> Self {
        Self {
            stdout: Destination::Pipe,
            stderr: Destination::Pipe,
            encoding: cfg.encoding,
            capacity: cfg.capacity,
            chunk_size: cfg.chunk_size.max(1),
            eager_drain: cfg.eager_drain,
            flush_interval: cfg.flush_interval.filter(|d| !d.is_zero()),
        }
    }

    pub fn stdout(mut self, dest: Destination) -> Self {
        self.stdout = dest;
        self
    }

    pub fn stderr(mut self, dest: Destination) -> Self {
        self.stderr = dest;
        self
    }

    pub fn encoding(mut self, enc: Encoding) -> Self {
        self.encoding = Some(enc);
        self
    }

    pub fn encoding_label(self, label: &str) -> Result<Self> {
        let enc = Encoding::for_label(label)
            .ok_or_else(|| CaptureError::UnknownEncoding(label.to_owned()))?;
        Ok(self.encoding(enc))
    }

    /// Deliver raw bytes instead of decoded text.
    pub fn raw(mut self) -> Self {
        self.encoding = None;
        self
    }

    pub fn capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    /// Drain `Pipe` destinations from a background thread while the session
    /// runs, so output larger than the pipe cannot block the writer.
    pub fn eager_drain(mut self, on: bool) -> Self {
        self.eager_drain = on;
        self
    }

    /// How often native stdio buffers (C `printf` and friends) are flushed
    /// while a relay is running. `None` or zero flushes only at finish.
    pub fn flush_interval(mut self, interval: Option<Duration>) -> Self {
        self.flush_interval = interval.filter(|d| !d.is_zero());
        self
    }

    /// Redirect the configured streams. On error nothing stays redirected
    /// and the caller's descriptors are untouched.
    pub fn enter(self) -> Result<Session> {
        let Pipes {
            stdout,
            stderr,
            encoding,
            capacity,
            chunk_size,
            eager_drain,
            flush_interval,
        } = self;
        let route = Route { encoding, capacity, chunk_size, eager_drain };

        if matches!(stdout, Destination::Stdout) {
            return Err(CaptureError::InvalidConfig("stdout cannot be merged into itself"));
        }
        capture::check_target(Stream::Stdout)?;
        capture::check_target(Stream::Stderr)?;

        // Anything buffered before the session belongs to the old destination.
        capture::flush_native();

        let relays =
            stdout.needs_relay(eager_drain) as usize + stderr.needs_relay(eager_drain) as usize;
        log::debug!(
            "entering capture session (stdout: {:?}, stderr: {:?}, relays: {})",
            stdout,
            stderr,
            relays
        );

        // Declared first so it is dropped last: any early return below closes
        // the route writers before the session restores and joins.
        let mut session = Session {
            frames: Vec::with_capacity(2),
            stdout: Slot::Empty,
            stderr: Slot::Empty,
            flusher: None,
            done: false,
        };

        let (slot, out_writer) = route.open(Stream::Stdout, stdout)?;
        session.stdout = slot;
        session.frames.push(capture::redirect(Stream::Stdout, &out_writer)?);

        match stderr {
            Destination::Stdout => {
                session.frames.push(capture::redirect(Stream::Stderr, &out_writer)?);
            }
            dest => {
                let (slot, err_writer) = route.open(Stream::Stderr, dest)?;
                session.stderr = slot;
                session.frames.push(capture::redirect(Stream::Stderr, &err_writer)?);
            }
        }
        // From here on the redirected descriptors hold the only write ends.
        drop(out_writer);

        if let Some(interval) = flush_interval.filter(|_| relays > 0) {
            session.flusher = Some(Flusher::spawn(interval)?);
        }
        Ok(session)
    }
}

#[derive(Clone, Copy)]
struct Route {
    encoding: Option<Encoding>,
    capacity: Capacity,
    chunk_size: usize,
    eager_drain: bool,
}

impl Route {
    fn open(&self, stream: Stream, dest: Destination) -> Result<(Slot, Writer)> {
        match dest {
            Destination::Pipe if self.eager_drain => {
                let (reader, writer) = capture::pipe(self.capacity)?;
                let buffer = SharedBuffer::new();
                let sink = Box::new(buffer.clone());
                let relay = Relay::spawn(stream, reader, sink, None, self.chunk_size)?;
                Ok((Slot::Drained { relay, buffer, encoding: self.encoding }, writer))
            }
            Destination::Pipe => {
                let (reader, writer) = capture::pipe(self.capacity)?;
                Ok((Slot::Pipe(PipeReader::new(Source::Pipe(reader), self.encoding)), writer))
            }
            Destination::Discard => Ok((Slot::Empty, capture::null_writer()?)),
            Destination::File(file) => {
                let writer = capture::file_writer(&file)?;
                Ok((Slot::File(file), writer))
            }
            Destination::Sink(sink) => self.relayed(stream, sink),
            Destination::Log(log) => self.relayed(stream, Box::new(log.bind(stream))),
            Destination::Stdout => {
                Err(CaptureError::InvalidConfig("only stderr can be merged into stdout"))
            }
        }
    }

    fn relayed(&self, stream: Stream, sink: Box<dyn Sink>) -> Result<(Slot, Writer)> {
        let (reader, writer) = capture::pipe(self.capacity)?;
        let decoder = self.encoding.map(StreamDecoder::new);
        let relay = Relay::spawn(stream, reader, sink, decoder, self.chunk_size)?;
        Ok((Slot::Relayed(relay), writer))
    }
}

enum Slot {
    /// Discarded, or merged into the other stream.
    Empty,
    Pipe(PipeReader),
    Drained {
        relay: Relay,
        buffer: SharedBuffer,
        encoding: Option<Encoding>,
    },
    Relayed(Relay),
    File(File),
}

impl Slot {
    fn has_relay(&self) -> bool {
        matches!(self, Slot::Drained { .. } | Slot::Relayed(_))
    }

    fn settle(self) -> Result<Option<Output>> {
        Ok(match self {
            Slot::Empty => None,
            Slot::Pipe(reader) => Some(Output::Pipe(reader)),
            Slot::Drained { relay, buffer, encoding } => {
                relay.join()?;
                let bytes = buffer.take();
                Some(Output::Pipe(PipeReader::new(Source::Drained(Cursor::new(bytes)), encoding)))
            }
            Slot::Relayed(relay) => Some(Output::Sink(relay.join()?)),
            Slot::File(file) => Some(Output::File(file)),
        })
    }
}

/// An active capture. Finish it to get the output back; dropping it
/// restores the descriptors and discards the output.
pub struct Session {
    frames: Vec<Frame>,
    stdout: Slot,
    stderr: Slot,
    flusher: Option<Flusher>,
    done: bool,
}

impl Session {
    /// Number of background threads draining pipes for this session.
    pub fn relay_count(&self) -> usize {
        self.stdout.has_relay() as usize + self.stderr.has_relay() as usize
    }

    /// Flush native buffers, restore the descriptors (last redirected first)
    /// and wait for every relay to see end of stream.
    pub fn finish(mut self) -> Result<Captured> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<Captured> {
        self.done = true;
        if let Some(flusher) = self.flusher.take() {
            flusher.stop();
        }
        capture::flush_native();

        let mut first_err = None;
        while let Some(frame) = self.frames.pop() {
            if let Err(e) = frame.restore() {
                first_err.get_or_insert(e);
            }
        }

        let stdout = std::mem::replace(&mut self.stdout, Slot::Empty).settle();
        let stderr = std::mem::replace(&mut self.stderr, Slot::Empty).settle();
        log::debug!("capture session restored");

        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(Captured { stdout: stdout?, stderr: stderr? })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.teardown() {
            log::warn!("capture session teardown failed: {}", e);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("frames", &self.frames.len())
            .field("relays", &self.relay_count())
            .finish()
    }
}

/// Run `body` with the configured streams captured.
///
/// Descriptors are restored when `body` returns and also when it panics.
pub fn pipes<R>(pipes: Pipes, body: impl FnOnce() -> R) -> Result<(R, Captured)> {
    let session = pipes.enter()?;
    let value = body();
    let captured = session.finish()?;
    Ok((value, captured))
}

/// What a finished session hands back. Merged and discarded streams are `None`.
#[derive(Debug)]
pub struct Captured {
    pub stdout: Option<Output>,
    pub stderr: Option<Output>,
}

pub enum Output {
    Pipe(PipeReader),
    /// The sink given to the session, after it saw end of stream.
    Sink(Box<dyn Sink>),
    File(File),
}

impl Output {
    pub fn into_reader(self) -> Option<PipeReader> {
        match self {
            Output::Pipe(reader) => Some(reader),
            _ => None,
        }
    }

    /// The sink given to the session, as its concrete type.
    pub fn into_sink<T: Sink>(self) -> Option<Box<T>> {
        match self {
            Output::Sink(sink) => downcast_sink::<T>(sink).ok(),
            _ => None,
        }
    }

    pub fn into_file(self) -> Option<File> {
        match self {
            Output::File(file) => Some(file),
            _ => None,
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Pipe(reader) => f.debug_tuple("Pipe").field(reader).finish(),
            Output::Sink(_) => f.write_str("Sink(..)"),
            Output::File(file) => f.debug_tuple("File").field(file).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Bytes(Vec<u8>),
}

impl Content {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s.as_str()),
            Content::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Content::Text(s) => s.as_bytes(),
            Content::Bytes(b) => b.as_slice(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Content::Text(s) => s.into_bytes(),
            Content::Bytes(b) => b,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

#[derive(Debug)]
enum Source {
    Pipe(File),
    Drained(Cursor<Vec<u8>>),
}

/// Read side of an internal-buffer capture. Dropping it closes the pipe.
#[derive(Debug)]
pub struct PipeReader {
    source: Source,
    encoding: Option<Encoding>,
}

impl PipeReader {
    fn new(source: Source, encoding: Option<Encoding>) -> Self {
        Self { source, encoding }
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    /// Everything not read yet, decoded with the session's encoding.
    pub fn read_all(&mut self) -> Result<Content> {
        let mut bytes = Vec::new();
        Read::read_to_end(self, &mut bytes)?;
        Ok(match self.encoding {
            Some(enc) => Content::Text(Decoder::new(enc).decode(&bytes).into_owned()),
            None => Content::Bytes(bytes),
        })
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.source {
            Source::Pipe(file) => file.read(buf),
            Source::Drained(cursor) => cursor.read(buf),
        }
    }
}
