//! Fatal-signal guard.
//!
//! Installs handlers for process-killing signals that write a short
//! diagnostic through an async-signal-safe path and then exit with a
//! deterministic status, instead of leaving termination behavior to the
//! platform. Setting `VELA_CRASH_DIALOG=1` skips installation so the
//! platform's native crash reporting takes over.

use once_cell::sync::OnceCell;

/// Escape-hatch environment variable: set to `1` to keep the platform's
/// native crash behavior.
pub const CRASH_DIALOG_ENV_VAR: &str = "VELA_CRASH_DIALOG";

static GUARD: OnceCell<bool> = OnceCell::new();

/// Install the guard once per process. Returns whether it is active
/// (false when the escape hatch is set or the platform is unsupported).
/// Repeated calls are no-ops reporting the first outcome.
pub fn install() -> bool {
    *GUARD.get_or_init(|| {
        if std::env::var_os(CRASH_DIALOG_ENV_VAR).is_some_and(|v| v == "1") {
            log::debug!("crash guard disabled by {}", CRASH_DIALOG_ENV_VAR);
            return false;
        }
        imp::install()
    })
}

#[cfg(unix)]
mod imp {
    /// Signals treated as fatal program faults.
    const FATAL_SIGNALS: [libc::c_int; 5] = [
        libc::SIGSEGV,
        libc::SIGBUS,
        libc::SIGILL,
        libc::SIGFPE,
        libc::SIGABRT,
    ];

    pub(super) fn install() -> bool {
        unsafe {
            let handler_fn = handler as extern "C" fn(libc::c_int);
            for signal in FATAL_SIGNALS {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = handler_fn as usize;
                // Restore the default disposition while handling, so a
                // second fault cannot loop.
                action.sa_flags = libc::SA_RESETHAND;
                libc::sigemptyset(&mut action.sa_mask);
                if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                    return false;
                }
            }
        }
        true
    }

    /// Only async-signal-safe calls: `write` and `_exit`.
    extern "C" fn handler(signal: libc::c_int) {
        let message: &[u8] = match signal {
            libc::SIGSEGV => b"vela: fatal signal SIGSEGV\n",
            libc::SIGBUS => b"vela: fatal signal SIGBUS\n",
            libc::SIGILL => b"vela: fatal signal SIGILL\n",
            libc::SIGFPE => b"vela: fatal signal SIGFPE\n",
            libc::SIGABRT => b"vela: fatal signal SIGABRT\n",
            _ => b"vela: fatal signal\n",
        };
        unsafe {
            libc::write(
                libc::STDERR_FILENO,
                message.as_ptr() as *const libc::c_void,
                message.len(),
            );
            libc::_exit(128 + signal);
        }
    }
}

#[cfg(not(unix))]
mod imp {
    pub(super) fn install() -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        let first = install();
        let second = install();
        assert_eq!(first, second);
    }
}
