//! Process creation and exit-status plumbing shared by the interpreter, the
//! pipeline executor and the job registry.

use crate::command::{EXIT_NOT_FOUND, ExitCode};
use crate::error::{Result, ShellError};
use crate::signals;
use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};

/// Exit code for a terminated process; `None` while it is alive or stopped.
///
/// A process killed by a signal did not exit normally and maps to 127.
pub fn exit_code(status: WaitStatus) -> Option<ExitCode> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(..) => Some(EXIT_NOT_FOUND),
        _ => None,
    }
}

/// Leave a forked child without running the parent's exit handlers.
pub fn exit_child(code: ExitCode) -> ! {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    unsafe { libc::_exit(code) }
}

/// Fork, run `child` in the new process and exit with its return value.
///
/// Buffered output is flushed first so it is not written twice. The child
/// restores the default `SIGINT` disposition before running `child`. Returns
/// the child's pid in the parent.
pub fn spawn<F>(child: F) -> Result<Pid>
where
    F: FnOnce() -> ExitCode,
{
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    // SAFETY: the child never returns into the caller; it runs `child` and
    // leaves through `_exit`.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            tracing::debug!(pid = child.as_raw(), "forked");
            Ok(child)
        }
        Ok(ForkResult::Child) => {
            signals::restore_default_interrupt();
            let code = panic::catch_unwind(AssertUnwindSafe(child)).unwrap_or(EXIT_NOT_FOUND);
            exit_child(code)
        }
        Err(e) => Err(ShellError::Fork(e)),
    }
}

/// Block until `pid` terminates and return its exit code.
pub fn wait_for(pid: Pid) -> Result<ExitCode> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(code) = exit_code(status) {
                    tracing::debug!(pid = pid.as_raw(), code, "reaped");
                    return Ok(code);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(ShellError::Wait(e)),
        }
    }
}
