use std::io;
use thiserror::Error;

/// Result type alias using [`ShellError`].
pub type Result<T> = std::result::Result<T, ShellError>;

/// Errors raised by the execution core.
///
/// None of these is fatal to the shell: the driver reports them and turns
/// them into an exit status for the command that caused them. The only
/// startup failure that ends the process is [`ShellError::Segment`] when the
/// shared segment cannot be created.
#[derive(Error, Debug)]
pub enum ShellError {
    /// Name or value rejected by the variable tables (empty, too long, bad characters).
    #[error("invalid name or value for {kind} variable: {name}")]
    InvalidVariable { kind: &'static str, name: String },

    /// `unset`/`unsetenv` of a name that is not defined.
    #[error("variable {0} not found")]
    VariableNotFound(String),

    /// Inserting the record would push the shared segment past its size.
    #[error("shared segment is full")]
    SegmentFull,

    /// The shared segment could not be created, locked, read or written.
    #[error("shared segment: {0}")]
    Segment(#[source] io::Error),

    /// Substitution would overflow the scratch buffer.
    #[error("variable substitution exceeds buffer size near ${0}")]
    SubstitutionOverflow(String),

    #[error("job [{0}] not found")]
    JobNotFound(usize),

    #[error("job [{0}] is already running in background")]
    JobAlreadyRunning(usize),

    #[error("job list is full")]
    JobTableFull,

    /// A redirection target could not be opened or installed.
    #[error("{path}: {source}")]
    Redirect {
        path: String,
        #[source]
        source: nix::Error,
    },

    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("pipe failed: {0}")]
    Pipe(#[source] nix::Error),

    #[error("wait failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("signal delivery failed: {0}")]
    Signal(#[source] nix::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
