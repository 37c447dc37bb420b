use std::io;

/// Forks the process and runs `work` in the child, exiting with status 0 on
/// success and 1 on failure; the parent gets the child's pid back
/// immediately (spec §4.8 "the child exits with status 0 on success and the
/// parent observes completion via non-blocking wait in cron").
///
/// This is real `fork()`, not a thread pool, specifically because the
/// server's values live behind `Rc`, which is not `Send` -- a
/// copy-on-write child process sidesteps that restriction entirely since
/// it never shares the parent's heap across a thread boundary.
pub fn spawn_background<F: FnOnce() -> bool>(work: F) -> io::Result<i32> {
    // Safety: `fork` is called with no other threads in this (single
    // threaded) process running concurrently, and the child only calls
    // async-signal-safe-ish Rust code before an immediate `_exit` -- it
    // never returns up through the caller's stack into code expecting the
    // parent's full runtime state.
    let pid = unsafe { libc::fork() };
    match pid {
        -1 => Err(io::Error::last_os_error()),
        0 => {
            let success = work();
            unsafe { libc::_exit(if success { 0 } else { 1 }) }
        }
        child_pid => Ok(child_pid),
    }
}

/// Non-blocking reap of a background child, called from the cron tick.
/// Returns `Some(true)` if `pid` exited successfully, `Some(false)` if it
/// exited with a failure status or signal, `None` if it's still running.
pub fn poll_child(pid: i32) -> Option<bool> {
    let mut status: i32 = 0;
    let result = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if result == 0 {
        None
    } else if result == pid {
        Some(unsafe { libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 })
    } else {
        // ECHILD or similar: treat as "gone", and callers should not poll
        // it again.
        Some(false)
    }
}
