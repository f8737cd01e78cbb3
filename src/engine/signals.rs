//! SIGINT disposition around engine startup and interrupt forwarding.

use std::io;

/// Holds SIGINT at its default disposition until dropped.
///
/// Signal dispositions are inherited across `fork`, and an ignored SIGINT
/// stays ignored across `exec`. The engine and its children must stay
/// interruptible, so the guard is held only while the session spawns and the
/// previous handler is restored on every exit path.
pub struct DefaultInterruptGuard {
    #[cfg(unix)]
    previous: Option<libc::sigaction>,
}

impl DefaultInterruptGuard {
    #[cfg(unix)]
    pub fn acquire() -> Self {
        // SAFETY: both structs are fully initialised before the call; the
        // saved action, flags and mask included, is restored in `Drop`.
        let previous = unsafe {
            let mut default: libc::sigaction = std::mem::zeroed();
            default.sa_sigaction = libc::SIG_DFL;
            libc::sigemptyset(&mut default.sa_mask);
            let mut previous: libc::sigaction = std::mem::zeroed();
            (libc::sigaction(libc::SIGINT, &default, &mut previous) == 0).then_some(previous)
        };
        Self { previous }
    }

    #[cfg(not(unix))]
    pub fn acquire() -> Self {
        Self {}
    }
}

impl Drop for DefaultInterruptGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(previous) = &self.previous {
            // SAFETY: restores the action captured in `acquire`.
            unsafe {
                libc::sigaction(libc::SIGINT, previous, std::ptr::null_mut());
            }
        }
    }
}

/// Serialises tests that touch the process-wide SIGINT action.
#[cfg(all(test, unix))]
pub(crate) fn serial_sigint() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sends SIGINT to the engine's process group.
#[cfg(unix)]
pub fn send_interrupt(pid: u32) -> io::Result<()> {
    let pid = pid as libc::pid_t;
    // SAFETY: plain syscall; a negative pid addresses the process group.
    let result = unsafe { libc::kill(-pid, libc::SIGINT) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    // Group already gone
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}

#[cfg(not(unix))]
pub fn send_interrupt(_pid: u32) -> io::Result<()> {
    Ok(())
}
