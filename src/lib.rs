//! Execution core of `mysh`, a small interactive Unix shell.
//!
//! A line of user text is split into commands joined by `&&`, `||` and `;`.
//! Each command gets its `$NAME` references substituted and then runs as a
//! built-in inside the shell, as a forked child replaced by an external
//! program, as a pipeline of such children, or as a background job tracked
//! by the shell. Redirections (`<`, `>`, `>>`, `2>`, `2>>`) and wildcards
//! (`*`, `?`, `[`) are resolved per command.
//!
//! The main entry point is [`Interpreter`]. The public modules [`command`]
//! and [`env`] expose traits and types for implementing your own commands
//! and for inspecting the shell state; [`config`] describes how the shell is
//! set up.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
mod external;
mod interpreter;
pub mod jobs;
mod lexer;
pub mod parser;
mod pipeline;
mod process;
mod redirect;
pub mod shared;
pub mod signals;
mod substitute;
mod wildcard;

pub use config::ShellConfig;
pub use error::ShellError;
/// Just a convenient re-export of the command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::Interpreter;
