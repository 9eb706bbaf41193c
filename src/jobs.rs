//! Background jobs started from this shell.

use crate::command::{EXIT_NOT_FOUND, ExitCode};
use crate::error::{Result, ShellError};
use crate::process;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::fmt;
use std::io::Write;

/// Most jobs tracked at once.
pub const MAX_JOBS: usize = 100;
/// Longest command text kept for a job, in bytes.
pub const MAX_COMMAND_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running => write!(f, "Running"),
            JobState::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: usize,
    pub pid: Pid,
    pub command: String,
    pub state: JobState,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {} {}", self.id, self.pid, self.state, self.command)
    }
}

fn truncate(command: &str) -> String {
    if command.len() <= MAX_COMMAND_LEN {
        return command.to_string();
    }
    let mut end = MAX_COMMAND_LEN;
    while !command.is_char_boundary(end) {
        end -= 1;
    }
    command[..end].to_string()
}

/// What a non-blocking poll saw for one job.
enum Poll {
    Unchanged,
    State(JobState),
    Finished,
}

fn poll(pid: Pid) -> Poll {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        return match waitpid(pid, Some(flags)) {
            Ok(WaitStatus::Stopped(..)) => Poll::State(JobState::Stopped),
            Ok(WaitStatus::Continued(_)) => Poll::State(JobState::Running),
            Ok(status) if process::exit_code(status).is_some() => Poll::Finished,
            Ok(_) => Poll::Unchanged,
            Err(Errno::EINTR) => continue,
            // Someone else reaped it.
            Err(Errno::ECHILD) => Poll::Finished,
            Err(e) => {
                tracing::warn!(pid = pid.as_raw(), "cannot poll job: {}", e);
                Poll::Unchanged
            }
        };
    }
}

/// Table of background jobs.
///
/// Ids come from a counter that only grows, so an id is never handed out
/// twice even after its job is removed. Entries keep insertion order.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Vec<Job>,
    last_id: usize,
}

impl JobRegistry {
    /// Track `pid` as running `command` and announce it as `[id] pid`.
    pub fn register(&mut self, pid: Pid, command: &str, out: &mut dyn Write) -> Result<usize> {
        if self.jobs.len() >= MAX_JOBS {
            return Err(ShellError::JobTableFull);
        }
        self.last_id += 1;
        let job = Job {
            id: self.last_id,
            pid,
            command: truncate(command),
            state: JobState::Running,
        };
        writeln!(out, "[{}] {}", job.id, job.pid)?;
        tracing::debug!(id = job.id, pid = pid.as_raw(), command = %job.command, "job registered");
        self.jobs.push(job);
        Ok(self.last_id)
    }

    /// Forget the job running as `pid`, if any.
    pub fn remove(&mut self, pid: Pid) -> Option<Job> {
        let index = self.jobs.iter().position(|job| job.pid == pid)?;
        Some(self.jobs.remove(index))
    }

    pub fn get(&self, id: usize) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    fn get_mut(&mut self, id: usize) -> Result<&mut Job> {
        self.jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(ShellError::JobNotFound(id))
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// One line per job: `[id] pid State command`.
    pub fn list(&self, out: &mut dyn Write) -> Result<()> {
        for job in &self.jobs {
            writeln!(out, "{}", job)?;
        }
        Ok(())
    }

    /// Poll every job without blocking. State changes are recorded; jobs that
    /// terminated are reaped, removed and returned.
    pub fn refresh(&mut self) -> Vec<Job> {
        let mut finished = Vec::new();
        let mut i = 0;
        while i < self.jobs.len() {
            match poll(self.jobs[i].pid) {
                Poll::Finished => {
                    let job = self.jobs.remove(i);
                    tracing::debug!(id = job.id, "job finished");
                    finished.push(job);
                    continue;
                }
                Poll::State(state) => self.jobs[i].state = state,
                Poll::Unchanged => {}
            }
            i += 1;
        }
        finished
    }

    /// Continue job `id` and wait for it.
    ///
    /// Returns the job's exit code once it terminates, after which it is no
    /// longer tracked. If it stops instead, it stays tracked as `Stopped` and
    /// `128 + signal` is returned.
    pub fn foreground(&mut self, id: usize, out: &mut dyn Write) -> Result<ExitCode> {
        let job = self.get_mut(id)?;
        writeln!(out, "Bringing job [{}] {} to foreground.", job.id, job.command)?;
        out.flush()?;
        kill(job.pid, Signal::SIGCONT).map_err(ShellError::Signal)?;
        job.state = JobState::Running;
        let pid = job.pid;

        loop {
            match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
                Ok(WaitStatus::Stopped(_, signal)) => {
                    self.get_mut(id)?.state = JobState::Stopped;
                    tracing::debug!(id, "job stopped in foreground");
                    return Ok(128 + signal as i32);
                }
                Ok(status) => {
                    if let Some(code) = process::exit_code(status) {
                        self.remove(pid);
                        return Ok(code);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    self.remove(pid);
                    return Ok(EXIT_NOT_FOUND);
                }
                Err(e) => return Err(ShellError::Wait(e)),
            }
        }
    }

    /// Continue job `id` without waiting for it.
    pub fn background(&mut self, id: usize, out: &mut dyn Write) -> Result<()> {
        let pid = self.get_mut(id)?.pid;
        if let Poll::State(state) = poll(pid) {
            self.get_mut(id)?.state = state;
        }

        let job = self.get_mut(id)?;
        if job.state == JobState::Running {
            return Err(ShellError::JobAlreadyRunning(id));
        }
        writeln!(out, "Moving job [{}] {} to background.", job.id, job.command)?;
        kill(job.pid, Signal::SIGCONT).map_err(ShellError::Signal)?;
        job.state = JobState::Running;
        tracing::debug!(id, "job continued in background");
        Ok(())
    }
}
