use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use pipecap_nls::Encoding;

/// Capture defaults, read from the environment once per process.
///
/// Supported:
/// - PIPECAP_ENCODING: encoding label (default "utf-8"); "none", "raw" or "bytes" disables decoding
/// - PIPECAP_BUFSIZE: "max" (default) raises each pipe to the platform maximum,
///   "0"/"off" keeps the OS default, any other number is a capacity in bytes
/// - PIPECAP_CHUNK_SIZE (usize, default 1024): relay read size
/// - PIPECAP_EAGER_DRAIN=1: drain internal-buffer pipes while the session runs
/// - PIPECAP_FLUSH_INTERVAL (milliseconds, default 200): how often native stdio
///   buffers are flushed while output is relayed; "0"/"off" disables it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// `None` means raw bytes.
    pub encoding: Option<Encoding>,
    pub capacity: Capacity,
    pub chunk_size: usize,
    pub eager_drain: bool,
    /// `None` leaves native buffers alone until the session ends.
    pub flush_interval: Option<Duration>,
}

/// How the capacity of a freshly created pipe is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capacity {
    /// Raise to the platform maximum where the platform exposes one.
    Max,
    /// Leave whatever the OS hands out.
    Unchanged,
    Bytes(usize),
}

pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            encoding: Some(Encoding::utf8()),
            capacity: Capacity::Max,
            chunk_size: DEFAULT_CHUNK_SIZE,
            eager_drain: false,
            flush_interval: Some(DEFAULT_FLUSH_INTERVAL),
        }
    }
}

impl CaptureConfig {
    /// The process-wide defaults.
    pub fn global() -> &'static CaptureConfig {
        static CFG: OnceLock<CaptureConfig> = OnceLock::new();
        CFG.get_or_init(|| Self::from_lookup(|name| env::var(name).ok()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            encoding: lookup("PIPECAP_ENCODING")
                .map(|v| parse_encoding(&v, defaults.encoding))
                .unwrap_or(defaults.encoding),
            capacity: lookup("PIPECAP_BUFSIZE")
                .and_then(|v| parse_capacity(&v))
                .unwrap_or(defaults.capacity),
            chunk_size: lookup("PIPECAP_CHUNK_SIZE")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.chunk_size),
            eager_drain: lookup("PIPECAP_EAGER_DRAIN").map(|v| parse_bool(&v)).unwrap_or(false),
            flush_interval: lookup("PIPECAP_FLUSH_INTERVAL")
                .and_then(|v| parse_interval(&v))
                .unwrap_or(defaults.flush_interval),
        }
    }
}

fn parse_bool(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    !(s.is_empty() || s == "0" || s == "false" || s == "no" || s == "off")
}

fn parse_encoding(v: &str, fallback: Option<Encoding>) -> Option<Encoding> {
    let label = v.trim();
    match label.to_ascii_lowercase().as_str() {
        "none" | "raw" | "bytes" => None,
        _ => match Encoding::for_label(label) {
            Some(enc) => Some(enc),
            None => {
                log::warn!("PIPECAP_ENCODING: unknown label {:?}, keeping default", label);
                fallback
            }
        },
    }
}

fn parse_capacity(v: &str) -> Option<Capacity> {
    let s = v.trim().to_ascii_lowercase();
    match s.as_str() {
        "max" | "" => Some(Capacity::Max),
        "off" | "0" => Some(Capacity::Unchanged),
        _ => s.parse::<usize>().ok().map(Capacity::Bytes),
    }
}

/// Milliseconds; zero or "off" disables periodic flushing.
fn parse_interval(v: &str) -> Option<Option<Duration>> {
    let s = v.trim().to_ascii_lowercase();
    match s.as_str() {
        "off" | "0" => Some(None),
        _ => s.parse::<u64>().ok().map(|ms| Some(Duration::from_millis(ms))),
    }
}
