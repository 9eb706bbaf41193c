use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::interpreter::Factory;
use anyhow::{Context, Result, anyhow};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed
/// without replacing the process image: inside the shell itself when they
/// form a whole foreground command, in the forked child otherwise.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command, writing regular output to `stdout`.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let result = <T as BuiltinCommand>::execute(*self, stdout, env);
        stdout.flush()?;
        match result {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(io::stderr(), "{}: {:#}", T::name(), e)?;
                Ok(1)
            }
        }
    }
}

/// Usage error or `--help` output produced by argh instead of a command.
struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode> {
        if self.is_error {
            writeln!(io::stderr(), "{}", self.output.trim_end())?;
            Ok(1)
        } else {
            writeln!(stdout, "{}", self.output.trim_end())?;
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

/// Split `name=value` at the first `=`.
fn assignment(arg: &str) -> Result<(&str, &str)> {
    arg.split_once('=')
        .ok_or_else(|| anyhow!("expected name=value, got {}", arg))
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode> {
        let cwd = env::current_dir().context("can't read current directory")?;
        writeln!(stdout, "{}", cwd.to_string_lossy())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// Without a target, or with `~`, changes to the HOME directory.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let target = match self.target.as_deref() {
            Some(t) if !t.is_empty() && t != "~" => PathBuf::from(t),
            _ => env
                .get_var("HOME")
                .or_else(|| env::var("HOME").ok())
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("no target and HOME not set"))?,
        };

        env::set_current_dir(&target)
            .with_context(|| format!("can't chdir to {}", target.display()))?;
        tracing::debug!(dir = %target.display(), "changed directory");
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Leave the shell.
pub struct Exit {
    #[argh(positional)]
    /// status to exit with; defaults to 0.
    pub code: Option<ExitCode>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        env.should_exit = true;
        Ok(self.code.unwrap_or(0))
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, stdout: &mut dyn Write, _env: &mut Environment) -> Result<ExitCode> {
        write!(stdout, "{}", self.args.join(" "))?;
        if !self.no_newline {
            writeln!(stdout)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Report how the previous command ended.
pub struct Status {}

impl BuiltinCommand for Status {
    fn name() -> &'static str {
        "status"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        match &env.last {
            None => writeln!(stdout, "No commands have been executed yet.")?,
            Some(last) if last.status == 0 => writeln!(
                stdout,
                "{} exited with status {}",
                last.command, last.status
            )?,
            Some(last) => writeln!(stdout, "{} terminated abnormally", last.command)?,
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Define local variables, or list them when called without arguments.
pub struct Set {
    #[argh(positional, greedy)]
    /// assignments of the form name=value.
    pub assignments: Vec<String>,
}

impl BuiltinCommand for Set {
    fn name() -> &'static str {
        "set"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        if self.assignments.is_empty() {
            for (name, value) in env.locals.iter() {
                writeln!(stdout, "{}={}", name, value)?;
            }
            return Ok(0);
        }
        for arg in &self.assignments {
            let (name, value) = assignment(arg)?;
            env.locals.set(name, value)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Remove a local variable.
pub struct Unset {
    #[argh(positional)]
    /// variable name, with or without a leading `$`.
    pub name: String,
}

impl BuiltinCommand for Unset {
    fn name() -> &'static str {
        "unset"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let name = self.name.strip_prefix('$').unwrap_or(&self.name);
        env.locals.unset(name)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Define shared variables, or list them when called without arguments.
pub struct Setenv {
    #[argh(positional, greedy)]
    /// assignments of the form name=value.
    pub assignments: Vec<String>,
}

impl BuiltinCommand for Setenv {
    fn name() -> &'static str {
        "setenv"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        if self.assignments.is_empty() {
            for (name, value) in env.shared.snapshot()?.iter() {
                writeln!(stdout, "{}={}", name, value)?;
            }
            return Ok(0);
        }
        for arg in &self.assignments {
            let (name, value) = assignment(arg)?;
            env.set_shared(name, value)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Remove a shared variable.
pub struct Unsetenv {
    #[argh(positional)]
    /// variable name, with or without a leading `$`.
    pub name: String,
}

impl BuiltinCommand for Unsetenv {
    fn name() -> &'static str {
        "unsetenv"
    }

    fn execute(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let name = self.name.strip_prefix('$').unwrap_or(&self.name);
        env.shared.unset(name)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List background jobs, reporting the ones that have finished.
pub struct Myjobs {}

impl BuiltinCommand for Myjobs {
    fn name() -> &'static str {
        "myjobs"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        for job in env.jobs.refresh() {
            writeln!(stdout, "[{}] Done {}", job.id, job.command)?;
        }
        env.jobs.list(stdout)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Resume a job and wait for it.
pub struct Myfg {
    #[argh(positional)]
    /// job id as shown by myjobs.
    pub id: usize,
}

impl BuiltinCommand for Myfg {
    fn name() -> &'static str {
        "myfg"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        Ok(env.jobs.foreground(self.id, stdout)?)
    }
}

#[derive(FromArgs)]
/// Resume a stopped job without waiting for it.
pub struct Mybg {
    #[argh(positional)]
    /// job id as shown by myjobs.
    pub id: usize,
}

impl BuiltinCommand for Mybg {
    fn name() -> &'static str {
        "mybg"
    }

    fn execute(self, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        env.jobs.background(self.id, stdout)?;
        Ok(0)
    }
}
