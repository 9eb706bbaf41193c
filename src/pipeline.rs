//! Commands joined by `|`.

use crate::command::{EXIT_NOT_FOUND, ExitCode};
use crate::error::{Result, ShellError};
use crate::process;
use nix::unistd::{close, dup2, pipe};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Split a command text on `|`, dropping empty stages.
pub fn split_stages(text: &str) -> Vec<&str> {
    text.split('|')
        .map(str::trim)
        .filter(|stage| !stage.is_empty())
        .collect()
}

/// Child-side wiring: move the pipe ends onto stdin/stdout and close every
/// pipe descriptor the child inherited.
fn wire(stdin: Option<RawFd>, stdout: Option<RawFd>, spare: Option<RawFd>) -> Result<()> {
    if let Some(fd) = stdin {
        dup2(fd, libc::STDIN_FILENO).map_err(ShellError::Pipe)?;
    }
    if let Some(fd) = stdout {
        dup2(fd, libc::STDOUT_FILENO).map_err(ShellError::Pipe)?;
    }
    for fd in [stdin, stdout, spare].into_iter().flatten() {
        let _ = close(fd);
    }
    Ok(())
}

/// Run `stages` as one pipeline and return the exit status of the last stage.
///
/// Every stage is forked before any is awaited. Stage `i` reads from the
/// pipe written by stage `i - 1` (the first inherits stdin) and writes into
/// the pipe read by stage `i + 1` (the last inherits stdout). Each child
/// closes all pipe descriptors after wiring, and the parent closes its copies
/// as soon as the stage that needs them is forked, so every reader sees EOF
/// once its writer exits. `stage_body` runs in the child with the stage text.
///
/// If a pipe or a fork fails, the stages already started are still waited
/// for and the failure is returned.
pub fn run<F>(stages: &[&str], mut stage_body: F) -> Result<ExitCode>
where
    F: FnMut(&str) -> ExitCode,
{
    let mut pids = Vec::with_capacity(stages.len());
    let mut prev_read: Option<OwnedFd> = None;
    let mut failure = None;

    for (i, &stage) in stages.iter().enumerate() {
        let (read, write) = if i + 1 == stages.len() {
            (None, None)
        } else {
            match pipe() {
                Ok((read, write)) => (Some(read), Some(write)),
                Err(e) => {
                    failure = Some(ShellError::Pipe(e));
                    break;
                }
            }
        };

        let stdin_fd = prev_read.as_ref().map(AsRawFd::as_raw_fd);
        let stdout_fd = write.as_ref().map(AsRawFd::as_raw_fd);
        let spare_fd = read.as_ref().map(AsRawFd::as_raw_fd);
        let spawned = process::spawn(|| {
            if let Err(e) = wire(stdin_fd, stdout_fd, spare_fd) {
                let _ = writeln!(io::stderr(), "mysh: {}", e);
                return EXIT_NOT_FOUND;
            }
            stage_body(stage)
        });

        drop(write);
        prev_read = read;

        match spawned {
            Ok(pid) => pids.push(pid),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    drop(prev_read);

    let mut status = EXIT_NOT_FOUND;
    for pid in pids {
        status = process::wait_for(pid).unwrap_or_else(|e| {
            let _ = writeln!(io::stderr(), "mysh: {}", e);
            EXIT_NOT_FOUND
        });
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::lock_process;
    use std::fs;
    use std::io::{BufRead, Read};

    #[test]
    fn stages_split_and_trimmed() {
        assert_eq!(split_stages("ls -l | grep x |wc"), vec!["ls -l", "grep x", "wc"]);
        assert_eq!(split_stages("a || b"), vec!["a", "b"]);
        assert_eq!(split_stages("a | | b"), vec!["a", "b"]);
    }

    #[test]
    fn output_flows_through_every_stage() {
        let _lock = lock_process();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let out_path = out.clone();

        let status = run(&["produce", "double", "collect"], |stage| {
            match stage {
                "produce" => {
                    let mut stdout = io::stdout();
                    for n in 1..=3 {
                        writeln!(stdout, "{}", n).unwrap();
                    }
                }
                "double" => {
                    let mut stdout = io::stdout();
                    for line in io::stdin().lock().lines() {
                        let n: i32 = line.unwrap().parse().unwrap();
                        writeln!(stdout, "{}", n * 2).unwrap();
                    }
                }
                _ => {
                    let mut input = String::new();
                    io::stdin().read_to_string(&mut input).unwrap();
                    fs::write(&out_path, input).unwrap();
                }
            }
            0
        })
        .unwrap();

        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(out).unwrap(), "2\n4\n6\n");
    }

    #[test]
    fn status_is_last_stage_status() {
        let _lock = lock_process();
        let status = run(&["first", "last"], |stage| if stage == "last" { 7 } else { 0 }).unwrap();
        assert_eq!(status, 7);

        let status = run(&["first", "last"], |stage| if stage == "first" { 9 } else { 0 }).unwrap();
        assert_eq!(status, 0);
    }

    #[test]
    fn large_output_does_not_deadlock() {
        let _lock = lock_process();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("count.txt");
        let out_path = out.clone();

        // More than a pipe buffer, consumed by a stage forked after the producer.
        let status = run(&["produce", "count"], |stage| {
            if stage == "produce" {
                let chunk = vec![b'x'; 1 << 16];
                let mut stdout = io::stdout();
                for _ in 0..8 {
                    stdout.write_all(&chunk).unwrap();
                }
            } else {
                let mut total = 0usize;
                let mut buf = [0u8; 8192];
                let mut stdin = io::stdin();
                loop {
                    let n = stdin.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    total += n;
                }
                fs::write(&out_path, total.to_string()).unwrap();
            }
            0
        })
        .unwrap();

        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(out).unwrap(), (8usize << 16).to_string());
    }
}
