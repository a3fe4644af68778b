#![allow(dead_code)]

use std::ffi::CString;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pipecap::{CaptureConfig, Pipes};

/// Session builder that ignores the PIPECAP_* environment.
pub fn pipes() -> Pipes {
    Pipes::with_config(&CaptureConfig::default())
}

/// write(2) straight to a descriptor, bypassing every Rust and C buffer.
pub fn write_fd(fd: i32, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            panic!("write({}) failed: {}", fd, err);
        }
        bytes = &bytes[n as usize..];
    }
}

pub fn write_stdout(text: &str) {
    write_fd(libc::STDOUT_FILENO, text.as_bytes());
}

pub fn write_stderr(text: &str) {
    write_fd(libc::STDERR_FILENO, text.as_bytes());
}

/// C `printf`, which stays in libc's stdout buffer until flushed.
pub fn printf(text: &str) {
    let text = CString::new(text).expect("no interior NUL");
    unsafe {
        libc::printf(b"%s\0".as_ptr().cast(), text.as_ptr());
    }
}

/// Open descriptors of this process. Stable across calls as long as nothing
/// leaks.
pub fn count_fds() -> usize {
    let dir = if Path::new("/proc/self/fd").is_dir() { "/proc/self/fd" } else { "/dev/fd" };
    std::fs::read_dir(dir).expect("list open descriptors").count()
}

pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pipecap-{}-{}", std::process::id(), name))
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
