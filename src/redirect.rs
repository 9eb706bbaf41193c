//! Redirection operators (`<`, `>`, `>>`, `2>`, `2>>`) found in raw command
//! text, and their installation on the standard descriptors.

use crate::error::{Result, ShellError};
use nix::fcntl::{FcntlArg, OFlag, fcntl, open};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2};
use std::io::{self, Write};
use std::os::fd::RawFd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

impl Stream {
    pub fn fd(self) -> RawFd {
        match self {
            Stream::Stdin => libc::STDIN_FILENO,
            Stream::Stdout => libc::STDOUT_FILENO,
            Stream::Stderr => libc::STDERR_FILENO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub stream: Stream,
    pub path: String,
    pub append: bool,
}

impl Redirect {
    fn open(&self) -> Result<RawFd> {
        let flags = match (self.stream, self.append) {
            (Stream::Stdin, _) => OFlag::O_RDONLY,
            (_, true) => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND,
            (_, false) => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
        };
        open(
            self.path.as_str(),
            flags | OFlag::O_CLOEXEC,
            Mode::from_bits_truncate(0o644),
        )
        .map_err(|source| self.error(source))
    }

    fn error(&self, source: nix::Error) -> ShellError {
        ShellError::Redirect {
            path: self.path.clone(),
            source,
        }
    }

    /// Point the standard stream at the target file.
    fn install(&self) -> Result<()> {
        let fd = self.open()?;
        let target = self.stream.fd();
        if fd == target {
            return Ok(());
        }
        let installed = dup2(fd, target).map(|_| ()).map_err(|e| self.error(e));
        if let Err(e) = close(fd) {
            tracing::warn!("close({}) failed: {}", fd, e);
        }
        installed
    }
}

/// Cut the operator and the word following it out of `text`, starting at
/// byte `pos` with an operator `op_len` bytes long.
fn cut(text: &str, pos: usize, op_len: usize) -> (String, String) {
    let after_op = &text[pos + op_len..];
    let path_start = after_op.len() - after_op.trim_start().len();
    let path_len = after_op[path_start..]
        .find(char::is_whitespace)
        .unwrap_or(after_op.len() - path_start);
    let path = after_op[path_start..path_start + path_len].to_string();
    let rest = format!("{}{}", &text[..pos], &after_op[path_start + path_len..]);
    (rest, path)
}

/// Strip the redirections out of `text`, returning the remaining command
/// text and the redirections in detection order.
///
/// Detection runs stderr first, then stdout (ignoring a `>` directly after a
/// `2`), then stdin, taking the first matching operator of each kind. Each
/// operator consumes only the next word as its path; a missing word leaves
/// an empty path.
pub fn split_redirections(text: &str) -> (String, Vec<Redirect>) {
    let mut text = text.to_string();
    let mut redirects = Vec::new();

    if let Some(pos) = text.find("2>") {
        let append = text[pos + 2..].starts_with('>');
        let (rest, path) = cut(&text, pos, if append { 3 } else { 2 });
        text = rest;
        redirects.push(Redirect {
            stream: Stream::Stderr,
            path,
            append,
        });
    }

    let stdout_pos = text
        .match_indices('>')
        .map(|(pos, _)| pos)
        .find(|&pos| pos == 0 || text.as_bytes()[pos - 1] != b'2');
    if let Some(pos) = stdout_pos {
        let append = text[pos + 1..].starts_with('>');
        let (rest, path) = cut(&text, pos, if append { 2 } else { 1 });
        text = rest;
        redirects.push(Redirect {
            stream: Stream::Stdout,
            path,
            append,
        });
    }

    if let Some(pos) = text.find('<') {
        let (rest, path) = cut(&text, pos, 1);
        text = rest;
        redirects.push(Redirect {
            stream: Stream::Stdin,
            path,
            append: false,
        });
    }

    (text, redirects)
}

fn report(e: &ShellError) {
    let _ = writeln!(io::stderr(), "mysh: {}", e);
}

/// Install `redirects` for good; used in a child about to run its command.
///
/// A target that cannot be opened is reported and its stream is left as it
/// was; the remaining redirections are still attempted.
pub fn apply(redirects: &[Redirect]) {
    for redirect in redirects {
        if let Err(e) = redirect.install() {
            report(&e);
        }
    }
}

/// Redirections installed on the shell's own descriptors while a built-in
/// runs in-process. The previous descriptors are restored on drop.
#[derive(Debug)]
pub struct RedirectGuard {
    saved: Vec<(RawFd, RawFd)>,
}

/// Saved copies are kept above the descriptors a command may use.
const SAVED_FD_FLOOR: RawFd = 10;

impl RedirectGuard {
    pub fn apply(redirects: &[Redirect]) -> Self {
        let _ = io::stdout().flush();
        let mut saved = Vec::with_capacity(redirects.len());
        for redirect in redirects {
            let target = redirect.stream.fd();
            let copy = match fcntl(target, FcntlArg::F_DUPFD_CLOEXEC(SAVED_FD_FLOOR)) {
                Ok(copy) => copy,
                Err(e) => {
                    tracing::warn!("cannot save descriptor {}: {}", target, e);
                    continue;
                }
            };
            match redirect.install() {
                Ok(()) => saved.push((copy, target)),
                Err(e) => {
                    report(&e);
                    let _ = close(copy);
                }
            }
        }
        Self { saved }
    }
}

impl Drop for RedirectGuard {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        for (copy, target) in self.saved.drain(..).rev() {
            if let Err(e) = dup2(copy, target) {
                tracing::warn!("cannot restore descriptor {}: {}", target, e);
            }
            let _ = close(copy);
        }
    }
}
