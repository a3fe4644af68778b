use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::error::{CaptureError, Result};

/// Periodically pushes native stdio buffers into the redirected descriptors
/// so relayed output shows up while the session is still running.
///
/// Runs apart from the relays: a flush that blocks on a full pipe or on a
/// stdio lock held by the writer never stops the pipe from draining.
pub(crate) struct Flusher {
    stop: Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl Flusher {
    pub(crate) fn spawn(interval: Duration) -> Result<Self> {
        let (stop, ticks) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("pipecap-flush".to_owned())
            .spawn(move || loop {
                match ticks.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => super::flush_native(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| CaptureError::from_os("spawning the flush thread", e))?;
        log::debug!("flushing native buffers every {:?}", interval);
        Ok(Self { stop, handle })
    }

    /// Stop ticking and wait for a flush in progress to complete.
    pub(crate) fn stop(self) {
        drop(self.stop);
        if self.handle.join().is_err() {
            log::warn!("flush thread panicked");
        }
    }
}
