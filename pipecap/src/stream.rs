use std::fmt;

use log::Level;

/// One of the two standard output streams a session can capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    /// Descriptor number backing this stream.
    #[inline]
    pub fn fd(self) -> i32 {
        match self {
            Stream::Stdout => 1,
            Stream::Stderr => 2,
        }
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }

    /// Severity used for log records relayed from this stream.
    #[inline]
    pub fn default_level(self) -> Level {
        match self {
            Stream::Stdout => Level::Info,
            Stream::Stderr => Level::Error,
        }
    }

    /// Log target used when a log sink was not given one explicitly.
    #[inline]
    pub fn default_target(self) -> &'static str {
        match self {
            Stream::Stdout => "pipecap.stdout",
            Stream::Stderr => "pipecap.stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
