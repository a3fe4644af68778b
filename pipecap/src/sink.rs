use std::any::Any;
use std::io::{self, Write};
use std::sync::Arc;

use crossbeam_channel::Sender;
use log::Level;
use parking_lot::Mutex;

use crate::stream::Stream;

#[doc(hidden)]
pub trait AsAny {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send> AsAny for T {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Destination for relayed output.
///
/// Sinks are written from the relay thread, never from the thread that opened
/// the session. Text arrives already decoded; bytes arrive only when the
/// session runs in raw mode.
pub trait Sink: AsAny + Send + 'static {
    fn write_text(&mut self, text: &str) -> io::Result<()>;

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_text(&String::from_utf8_lossy(bytes))
    }

    /// Called once the pipe reports end of stream.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Recover the concrete sink handed to a session.
pub fn downcast_sink<T: Sink>(sink: Box<dyn Sink>) -> Result<Box<T>, Box<dyn Any + Send>> {
    AsAny::into_any(sink).downcast::<T>()
}

/// Clonable in-memory buffer. Clones share storage, so a caller can keep one
/// handle and give another to a session.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles share the same storage.
    pub fn ptr_eq(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer").field("len", &self.len()).finish()
    }
}

impl Sink for SharedBuffer {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.write_bytes(text.as_bytes())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.lock().extend_from_slice(bytes);
        Ok(())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Adapts any `Write` into a sink. Text is written as UTF-8.
#[derive(Debug)]
pub struct WriteSink<W> {
    inner: W,
}

impl<W: Write + Send + 'static> WriteSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send + 'static> Sink for WriteSink<W> {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.inner.write_all(text.as_bytes())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// One message per relayed chunk. A dropped receiver is reported as a broken
/// pipe; the relay logs it and keeps draining.
impl Sink for Sender<String> {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.send(text.to_owned())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped"))
    }
}

/// Emits one `log` record per complete line.
///
/// Records carry a `stream` key-value naming the captured stream. Target and
/// level default to the stream's (`pipecap.stdout` at info, `pipecap.stderr`
/// at error) until set explicitly.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    target: Option<String>,
    level: Option<Level>,
    stream: Option<Stream>,
    pending: String,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub(crate) fn bind(mut self, stream: Stream) -> Self {
        self.stream = Some(stream);
        self
    }

    fn stream(&self) -> Stream {
        self.stream.unwrap_or(Stream::Stdout)
    }

    fn emit(&self, line: &str) {
        let stream = self.stream();
        let target = self.target.as_deref().unwrap_or(stream.default_target());
        let level = self.level.unwrap_or(stream.default_level());
        let name = stream.name();
        log::log!(target: target, level, stream = name; "{}", line);
    }
}

impl Sink for LogSink {
    fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.pending.push_str(text);
        while let Some(end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=end).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            self.emit(line);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit(rest.trim_end_matches('\r'));
        }
        Ok(())
    }
}
