//! Pipe capacity control.
//!
//! Linux and Android expose `F_GETPIPE_SZ`/`F_SETPIPE_SZ` and publish the
//! unprivileged ceiling in `/proc/sys/fs/pipe-max-size`. Elsewhere capacity is
//! fixed by the kernel and every query here reports `None`.
//!
//! A larger pipe only moves the point where a writer blocks. Output that is
//! not drained while the session runs still stalls the writer once the pipe
//! fills, whatever its capacity.

use crate::config::Capacity;
use crate::error::Result;

#[cfg(any(target_os = "linux", target_os = "android"))]
const PIPE_MAX_SIZE_PATH: &str = "/proc/sys/fs/pipe-max-size";

/// Largest capacity an unprivileged process may request.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn query_max_capacity() -> Option<usize> {
    std::fs::read_to_string(PIPE_MAX_SIZE_PATH)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn query_max_capacity() -> Option<usize> {
    None
}

/// Current capacity of the pipe behind `fd`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn pipe_capacity(fd: i32) -> Result<Option<usize>> {
    use nix::fcntl::{fcntl, FcntlArg};

    let size = fcntl(fd, FcntlArg::F_GETPIPE_SZ)
        .map_err(|e| crate::error::CaptureError::Io(e.into()))?;
    Ok(Some(size as usize))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn pipe_capacity(_fd: i32) -> Result<Option<usize>> {
    Ok(None)
}

/// Resize the pipe behind `fd`. The kernel rounds up to a power-of-two number
/// of pages; the size actually applied is returned.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn set_capacity(fd: i32, size: usize) -> Result<Option<usize>> {
    use crate::error::CaptureError;
    use nix::fcntl::{fcntl, FcntlArg};

    let size = i32::try_from(size)
        .map_err(|_| CaptureError::InvalidConfig("pipe capacity does not fit the platform limit"))?;
    let applied = fcntl(fd, FcntlArg::F_SETPIPE_SZ(size)).map_err(|e| CaptureError::Io(e.into()))?;
    Ok(Some(applied as usize))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn set_capacity(_fd: i32, _size: usize) -> Result<Option<usize>> {
    Ok(None)
}

/// Apply a capacity policy to a freshly created pipe. Failures are logged and
/// the pipe keeps its OS default.
pub(crate) fn apply(fd: i32, capacity: Capacity) {
    let size = match capacity {
        Capacity::Unchanged => return,
        Capacity::Max => match query_max_capacity() {
            Some(max) => max,
            None => return,
        },
        Capacity::Bytes(n) => n,
    };
    match set_capacity(fd, size) {
        Ok(Some(applied)) => log::trace!("pipe capacity set to {} bytes", applied),
        Ok(None) => {}
        Err(e) => log::warn!("failed to set pipe capacity to {} bytes: {}", size, e),
    }
}
