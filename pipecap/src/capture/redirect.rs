use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::unistd::pipe as os_pipe;

use super::{capacity, nesting};
use crate::config::Capacity;
use crate::error::{CaptureError, Result};
use crate::stream::Stream;

/// The write side of a capture route, pointed at by the redirected target
/// for the lifetime of the session.
pub(crate) struct Writer(OwnedFd);

/// One redirect of one standard stream. Restored exactly once: explicitly
/// through `restore`, or on drop. A failed `restore` is tried once more on
/// drop.
pub(crate) struct Frame {
    stream: Stream,
    id: u64,
    restored: bool,
}

impl Frame {
    pub(crate) fn restore(mut self) -> Result<()> {
        let result = nesting::pop(self.stream.fd(), self.id);
        self.restored = result.is_ok();
        result
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = nesting::pop(self.stream.fd(), self.id) {
            log::warn!("failed to restore {}: {}", self.stream, e);
        }
    }
}

/// Fail fast when the stream has no open descriptor behind it.
pub(crate) fn check_target(stream: Stream) -> Result<()> {
    match fcntl(stream.fd(), FcntlArg::F_GETFD) {
        Ok(_) => Ok(()),
        Err(Errno::EBADF) => Err(CaptureError::InvalidTarget(stream)),
        Err(e) => Err(CaptureError::Io(e.into())),
    }
}

pub(crate) fn redirect(stream: Stream, writer: &Writer) -> Result<Frame> {
    let id = nesting::push(stream.fd(), writer.0.as_fd())?;
    log::trace!("{} redirected (depth {})", stream, nesting::depth(stream.fd()));
    Ok(Frame { stream, id, restored: false })
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(|e| CaptureError::Io(e.into()))?;
    Ok(())
}

/// Create a pipe sized per `capacity`. Returns the read end and the writer.
pub(crate) fn pipe(capacity: Capacity) -> Result<(File, Writer)> {
    let (r, w) = os_pipe().map_err(|e| CaptureError::from_os("creating a pipe", e.into()))?;
    let (r, w) = unsafe { (OwnedFd::from_raw_fd(r), OwnedFd::from_raw_fd(w)) };
    set_cloexec(r.as_raw_fd())?;
    set_cloexec(w.as_raw_fd())?;
    capacity::apply(w.as_raw_fd(), capacity);
    Ok((File::from(r), Writer(w)))
}

pub(crate) fn null_writer() -> Result<Writer> {
    let null = OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .map_err(|e| CaptureError::from_os("opening /dev/null", e))?;
    Ok(Writer(OwnedFd::from(null)))
}

/// A writer sharing `file`'s open file description. The caller keeps `file`.
pub(crate) fn file_writer(file: &File) -> Result<Writer> {
    let dup = file
        .try_clone()
        .map_err(|e| CaptureError::from_os("duplicating the destination file", e))?;
    Ok(Writer(OwnedFd::from(dup)))
}

/// Push buffered native output into whatever the standard descriptors point
/// at right now. Best effort.
pub(crate) fn flush_native() {
    if let Err(e) = io::stdout().flush() {
        log::debug!("flushing stdout handle failed: {}", e);
    }
    if let Err(e) = io::stderr().flush() {
        log::debug!("flushing stderr handle failed: {}", e);
    }
    if unsafe { libc::fflush(std::ptr::null_mut()) } != 0 {
        log::debug!("fflush failed: {}", io::Error::last_os_error());
    }
}
