//! Capture output written straight to the stdout and stderr file descriptors.
//!
//! Native code that calls `write(1, ..)` or `printf` bypasses Rust's own
//! stdout handle. A [`Session`] swaps descriptors 1 and 2 for pipes (or files)
//! and swaps them back when it ends, so that output can be buffered, relayed
//! to a [`Sink`], or logged.
//!
//! Output kept in a [`Destination::Pipe`] is only read after the session
//! ends. A writer producing more than the pipe holds blocks until then, so
//! large outputs need a relayed destination or [`Pipes::eager_drain`].
//!
//! While output is relayed, buffered C stdio is flushed every
//! [`Pipes::flush_interval`] so `printf` output reaches the sink before the
//! session ends.

pub mod capture;
pub mod config;
pub mod error;
pub mod forever;
pub mod session;
pub mod sink;
pub mod stream;

pub use capture::capacity::{pipe_capacity, query_max_capacity, set_capacity};
pub use config::{Capacity, CaptureConfig};
pub use error::{CaptureError, Result};
pub use pipecap_nls::Encoding;
pub use session::{pipes, Captured, Content, Destination, Output, PipeReader, Pipes, Session};
pub use sink::{downcast_sink, LogSink, SharedBuffer, Sink, WriteSink};
pub use stream::Stream;
