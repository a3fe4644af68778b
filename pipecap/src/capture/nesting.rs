//! Process-wide stack of saved descriptors, one stack per redirected target.
//!
//! Every redirect of a target pushes a duplicate of what the target pointed
//! at before; releasing pops it back. The stack owns the saved duplicates, so
//! each one is restored or closed exactly once.

use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg};
use nix::unistd::dup2;
use parking_lot::{const_mutex, Mutex};

use crate::error::{CaptureError, Result};

/// Saved descriptors below this number would shadow a standard stream.
const SAVED_FD_FLOOR: RawFd = 3;

struct Entry {
    id: u64,
    saved: OwnedFd,
}

struct TargetStack {
    target: RawFd,
    entries: Vec<Entry>,
}

static STACKS: Mutex<Vec<TargetStack>> = const_mutex(Vec::new());
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn dup2_retrying(src: RawFd, dst: RawFd) -> std::result::Result<(), Errno> {
    loop {
        match dup2(src, dst) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Point `target` at `writer`, saving what it referred to before.
///
/// On failure nothing is left redirected and the saved duplicate is closed.
pub(super) fn push(target: RawFd, writer: BorrowedFd<'_>) -> Result<u64> {
    let mut stacks = STACKS.lock();

    let saved = fcntl(target, FcntlArg::F_DUPFD_CLOEXEC(SAVED_FD_FLOOR))
        .map_err(|e| CaptureError::from_os("saving the target descriptor", e.into()))?;
    let saved = unsafe { OwnedFd::from_raw_fd(saved) };

    dup2_retrying(writer.as_raw_fd(), target)
        .map_err(|e| CaptureError::from_os("redirecting the target descriptor", e.into()))?;

    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let pos = match stacks.iter().position(|s| s.target == target) {
        Some(pos) => pos,
        None => {
            stacks.push(TargetStack { target, entries: Vec::new() });
            stacks.len() - 1
        }
    };
    stacks[pos].entries.push(Entry { id, saved });
    Ok(id)
}

/// Undo the redirect identified by `id`.
///
/// Releasing the top entry restores the target. Releasing an entry further
/// down leaves the live descriptor alone: the entry above inherits the saved
/// original, and its own saved duplicate (which points at the released
/// redirect) is closed. Unknown ids are ignored.
pub(super) fn pop(target: RawFd, id: u64) -> Result<()> {
    let mut stacks = STACKS.lock();
    let Some(spos) = stacks.iter().position(|s| s.target == target) else {
        return Ok(());
    };
    let result = release(&mut stacks[spos], id, |saved| dup2_retrying(saved, target));
    if stacks[spos].entries.is_empty() {
        stacks.swap_remove(spos);
    }
    result
}

/// Remove entry `id` from `stack`. The top entry is only removed once
/// `restore` has pointed the target back at its saved descriptor, so a
/// failed restore can be retried.
fn release(
    stack: &mut TargetStack,
    id: u64,
    restore: impl FnOnce(RawFd) -> std::result::Result<(), Errno>,
) -> Result<()> {
    let Some(pos) = stack.entries.iter().position(|e| e.id == id) else {
        return Ok(());
    };

    if pos + 1 == stack.entries.len() {
        restore(stack.entries[pos].saved.as_raw_fd())
            .map_err(|e| CaptureError::from_os("restoring the target descriptor", e.into()))?;
        stack.entries.pop();
    } else {
        log::warn!(
            "descriptor {} released out of order ({} newer redirect(s) still active)",
            stack.target,
            stack.entries.len() - pos - 1
        );
        let entry = stack.entries.remove(pos);
        stack.entries[pos].saved = entry.saved;
    }
    Ok(())
}

/// Number of redirects currently stacked on `target`.
pub(crate) fn depth(target: RawFd) -> usize {
    STACKS
        .lock()
        .iter()
        .find(|s| s.target == target)
        .map_or(0, |s| s.entries.len())
}
