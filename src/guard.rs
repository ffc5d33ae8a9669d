//! Process-wide lifecycle guard.
//!
//! Tracks the currently active tunnel process (as a pid plus a kill
//! request channel into the task that owns the child handle, never an
//! owning handle itself) and any in-flight archive download, and installs
//! a process exit hook that terminates the tunnel and removes the partial
//! archive when the hosting program exits.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

#[cfg(unix)]
use crate::tunnel::process;

static ACTIVE_PID: AtomicU32 = AtomicU32::new(0);
static HOOK_REGISTERED: AtomicBool = AtomicBool::new(false);
static KILL_REQUEST: Mutex<Option<watch::Sender<bool>>> = Mutex::new(None);
static PENDING_ARCHIVE: Mutex<Option<PathBuf>> = Mutex::new(None);

const KILL_WAIT_SECS: u64 = 30;

/// Install the exit hook. Idempotent; re-entrant calls are no-ops.
pub fn register_exit_hook() {
    if HOOK_REGISTERED.swap(true, Ordering::SeqCst) {
        return;
    }

    #[cfg(unix)]
    unsafe {
        libc::atexit(exit_hook);
    }
}

// Runs after the runtime (and with it the exit monitor) is gone, so the
// tunnel process is signalled directly by pid here.
#[cfg(unix)]
extern "C" fn exit_hook() {
    let pid = ACTIVE_PID.load(Ordering::SeqCst);
    if pid != 0 {
        log::info!("Shutting down");
        process::terminate(pid);
    }

    if let Ok(mut pending) = PENDING_ARCHIVE.try_lock() {
        if let Some(path) = pending.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Record `pid` as the active tunnel process, together with the kill
/// request channel into its exit monitor.
pub(crate) fn set_active(pid: u32, kill: watch::Sender<bool>) {
    ACTIVE_PID.store(pid, Ordering::SeqCst);
    if let Ok(mut slot) = KILL_REQUEST.lock() {
        *slot = Some(kill);
    }
}

/// Forget `pid` if it is still the active tunnel process.
pub(crate) fn clear_active(pid: u32) {
    if ACTIVE_PID
        .compare_exchange(pid, 0, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        if let Ok(mut slot) = KILL_REQUEST.lock() {
            *slot = None;
        }
    }
}

/// Record an in-flight archive download for exit cleanup.
pub(crate) fn set_pending_archive(path: PathBuf) {
    if let Ok(mut pending) = PENDING_ARCHIVE.lock() {
        *pending = Some(path);
    }
}

/// Forget the in-flight archive after it has been unpacked or removed.
pub(crate) fn clear_pending_archive() {
    if let Ok(mut pending) = PENDING_ARCHIVE.lock() {
        *pending = None;
    }
}

/// Terminate the active tunnel process out-of-band, if any, and wait for
/// it to exit before returning so callers never race a follow-up connect
/// against a not-yet-reaped process.
///
/// The kill request is routed through the exit monitor that owns the
/// child handle; the monitor clears the active pid once the process has
/// been reaped, which is what this waits on.
pub async fn kill() {
    let pid = ACTIVE_PID.load(Ordering::SeqCst);
    if pid == 0 {
        return;
    }

    log::info!("Terminating active tunnel process {}", pid);
    let kill = match KILL_REQUEST.lock() {
        Ok(slot) => slot.clone(),
        Err(_) => None,
    };
    if let Some(kill) = kill {
        let _ = kill.send(true);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(KILL_WAIT_SECS);
    while ACTIVE_PID.load(Ordering::SeqCst) == pid {
        if tokio::time::Instant::now() >= deadline {
            log::warn!("Tunnel process {} did not exit after the kill request", pid);
            clear_active(pid);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
