//! OS-level process helpers.

/// Send SIGTERM to a process. Best effort; errors are ignored.
#[cfg(unix)]
pub fn terminate(pid: u32) {
    if pid == 0 {
        return;
    }
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}
