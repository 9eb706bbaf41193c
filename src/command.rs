use crate::env::Environment;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// 127 is reserved for "program not found" and for process-management
/// failures, mirroring POSIX shells.
pub type ExitCode = i32;

/// Exit status used when a program cannot be found or a process could not be
/// created, waited for, or did not exit normally.
pub const EXIT_NOT_FOUND: ExitCode = 127;

/// Object-safe trait for any command the shell can run without replacing the
/// process image.
///
/// Implemented by built-ins via a blanket impl.
pub trait ExecutableCommand {
    /// Executes the command, writing its regular output to `stdout`.
    fn execute(self: Box<Self>, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`; the
/// interpreter then falls back to running an external program.
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
