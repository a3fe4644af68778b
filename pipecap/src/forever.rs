//! Process-wide capture: one session installed until explicitly stopped.

use parking_lot::{const_mutex, Mutex};

use crate::error::{CaptureError, Result};
use crate::session::{Captured, Pipes, Session};

static ACTIVE: Mutex<Option<Session>> = const_mutex(None);

/// Install a process-wide capture. Starting twice is an error and leaves the
/// running capture in place.
pub fn start(pipes: Pipes) -> Result<()> {
    let mut active = ACTIVE.lock();
    if active.is_some() {
        return Err(CaptureError::AlreadyStarted);
    }
    *active = Some(pipes.enter()?);
    log::debug!("process-wide capture started");
    Ok(())
}

/// Remove the process-wide capture and hand back its output. Returns
/// `Ok(None)` when nothing was running.
pub fn stop() -> Result<Option<Captured>> {
    let session = ACTIVE.lock().take();
    match session {
        Some(session) => {
            let captured = session.finish()?;
            log::debug!("process-wide capture stopped");
            Ok(Some(captured))
        }
        None => Ok(None),
    }
}

pub fn is_active() -> bool {
    ACTIVE.lock().is_some()
}
