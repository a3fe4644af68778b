use std::fs::File;
use std::io::{ErrorKind, Read};
use std::thread;

use pipecap_nls::StreamDecoder;

use crate::error::{CaptureError, Result};
use crate::sink::Sink;
use crate::stream::Stream;

/// A thread draining one pipe into one sink until the write side closes.
///
/// The thread is the only reader of the pipe. It hands the sink back on join.
pub(crate) struct Relay {
    stream: Stream,
    handle: thread::JoinHandle<Box<dyn Sink>>,
}

impl Relay {
    pub(crate) fn spawn(
        stream: Stream,
        reader: File,
        sink: Box<dyn Sink>,
        decoder: Option<StreamDecoder>,
        chunk_size: usize,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("pipecap-{}", stream))
            .spawn(move || run(stream, reader, sink, decoder, chunk_size.max(1)))
            .map_err(|e| CaptureError::from_os("spawning a relay thread", e))?;
        log::debug!("relay started for {}", stream);
        Ok(Self { stream, handle })
    }

    /// Wait for end of stream. Blocks for as long as any copy of the pipe's
    /// write end stays open, including copies inherited by child processes.
    pub(crate) fn join(self) -> Result<Box<dyn Sink>> {
        self.handle.join().map_err(|_| CaptureError::RelayPanicked(self.stream))
    }
}

fn run(
    stream: Stream,
    mut reader: File,
    mut sink: Box<dyn Sink>,
    mut decoder: Option<StreamDecoder>,
    chunk_size: usize,
) -> Box<dyn Sink> {
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0usize;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("relay for {} stopped reading: {}", stream, e);
                break;
            }
        };
        total += n;
        log::trace!("relay for {} read {} bytes", stream, n);

        let written = match decoder.as_mut() {
            Some(d) => {
                let text = d.feed(&buf[..n]);
                if text.is_empty() {
                    Ok(())
                } else {
                    sink.write_text(&text)
                }
            }
            None => sink.write_bytes(&buf[..n]),
        };
        // Keep draining regardless, so the native writer never blocks on a
        // failing sink.
        if let Err(e) = written {
            log::warn!("sink for {} rejected {} bytes: {}", stream, n, e);
        }
    }

    if let Some(d) = decoder.as_mut() {
        let tail = d.finish();
        if !tail.is_empty() {
            if let Err(e) = sink.write_text(&tail) {
                log::warn!("sink for {} rejected trailing text: {}", stream, e);
            }
        }
    }
    if let Err(e) = sink.flush() {
        log::warn!("sink for {} failed to flush: {}", stream, e);
    }
    log::debug!("relay for {} finished after {} bytes", stream, total);
    sink
}
