use std::io;

use thiserror::Error;

use crate::stream::Stream;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("out of descriptors while {op}: {source}")]
    ResourceExhausted {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0} has no open descriptor to capture")]
    InvalidTarget(Stream),

    #[error("invalid capture configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("unknown encoding label: {0}")]
    UnknownEncoding(String),

    #[error("process-wide capture is already running")]
    AlreadyStarted,

    #[error("relay thread for {0} panicked")]
    RelayPanicked(Stream),

    #[error("descriptor capture is not supported on this platform")]
    Unsupported,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// Classify a failed descriptor syscall. Running out of descriptors or
    /// kernel memory is reported as exhaustion, anything else as plain I/O.
    pub(crate) fn from_os(op: &'static str, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOMEM) => {
                CaptureError::ResourceExhausted { op, source: err }
            }
            _ => CaptureError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
