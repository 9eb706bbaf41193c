//! Splitting of a raw input line into gated commands.
//!
//! A line is a flat sequence of command texts joined by `&&`, `||` and `;`.
//! There is no nesting: pipes, redirections and the background marker stay
//! inside the command text and are handled later by the interpreter.

use crate::command::ExitCode;

/// Condition recorded on a command, deciding whether the *next* command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Followed by `;` or the end of the line.
    Always,
    /// Followed by `&&`.
    RunIfPrevSucceeded,
    /// Followed by `||`.
    RunIfPrevFailed,
}

impl Gate {
    /// Whether a command placed after one carrying this gate may run, given
    /// the exit status of that preceding command.
    pub fn permits(self, last_status: ExitCode) -> bool {
        match self {
            Gate::Always => true,
            Gate::RunIfPrevSucceeded => last_status == 0,
            Gate::RunIfPrevFailed => last_status != 0,
        }
    }
}

/// One command of a line, in original order.
///
/// `text` is trimmed and may be empty (`a ; ; b` yields an empty middle entry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub text: String,
    pub gate: Gate,
}

const SEPARATORS: [(&str, Gate); 3] = [
    ("&&", Gate::RunIfPrevSucceeded),
    ("||", Gate::RunIfPrevFailed),
    (";", Gate::Always),
];

/// Find the leftmost separator in `text`: `(byte offset, gate, separator length)`.
fn find_separator(text: &str) -> Option<(usize, Gate, usize)> {
    let bytes = text.as_bytes();
    (0..bytes.len()).find_map(|pos| {
        SEPARATORS
            .iter()
            .find(|(sep, _)| bytes[pos..].starts_with(sep.as_bytes()))
            .map(|&(sep, gate)| (pos, gate, sep.len()))
    })
}

/// Split `line` into gated commands.
///
/// Scanning stops as soon as the remaining text is empty, so a trailing
/// separator does not produce an extra entry while trailing whitespace does.
pub fn parse_line(line: &str) -> Vec<ParsedCommand> {
    let mut commands = Vec::new();
    let mut rest = line;

    while !rest.is_empty() {
        let (segment, gate, next) = match find_separator(rest) {
            Some((pos, gate, len)) => (&rest[..pos], gate, &rest[pos + len..]),
            None => (rest, Gate::Always, ""),
        };
        commands.push(ParsedCommand {
            text: segment.trim().to_string(),
            gate,
        });
        rest = next;
    }

    commands
}

/// Gating decision for command `index` of `commands`.
///
/// The first command always runs; any other command only looks at the gate
/// of its immediate predecessor and at `last_status`, the status recorded by
/// the most recent command that actually ran.
pub fn should_run(commands: &[ParsedCommand], index: usize, last_status: ExitCode) -> bool {
    match index.checked_sub(1).and_then(|prev| commands.get(prev)) {
        None => true,
        Some(prev) => prev.gate.permits(last_status),
    }
}
