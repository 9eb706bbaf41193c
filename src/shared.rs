//! Environment-style variables shared between shell instances.
//!
//! The segment is a named file holding at most [`SEGMENT_SIZE`] bytes of
//! `name=value\0` records. Every access follows the same protocol:
//!
//! * reads take a shared `flock`, decode the whole segment into a
//!   [`Snapshot`] and release the lock;
//! * writes take an exclusive `flock`, decode, modify the map, check the
//!   encoded size and rewrite the segment before releasing the lock.
//!
//! There is no in-memory cache, so a value written by another instance is
//! visible to the next read.

use crate::error::{Result, ShellError};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Capacity of the segment, terminators included.
pub const SEGMENT_SIZE: usize = 4096;

/// Handle on the shared segment.
///
/// Every shell that calls [`SharedVariables::create`] registers as a user of
/// the segment by holding a shared `flock` on a `<segment>.users` file for
/// its whole lifetime. The first user of an unused segment resets it; later
/// users join the records already there. On drop, a user that finds no other
/// user left removes the segment, so it is released on every orderly shutdown
/// path, including early returns and unwinding.
pub struct SharedVariables {
    path: PathBuf,
    users: Option<Flock<File>>,
}

impl fmt::Debug for SharedVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedVariables")
            .field("path", &self.path)
            .field("registered", &self.users.is_some())
            .finish()
    }
}

fn users_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".users");
    PathBuf::from(name)
}

/// Decoded view of the segment at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    records: BTreeMap<String, String>,
}

impl Snapshot {
    fn decode(bytes: &[u8]) -> Self {
        let records = bytes
            .split(|&b| b == 0)
            .filter(|record| !record.is_empty())
            .filter_map(|record| {
                let record = String::from_utf8_lossy(record);
                let (name, value) = record.split_once('=')?;
                Some((name.to_string(), value.to_string()))
            })
            .collect();
        Self { records }
    }

    fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        for (name, value) in &self.records {
            bytes.extend_from_slice(name.as_bytes());
            bytes.push(b'=');
            bytes.extend_from_slice(value.as_bytes());
            bytes.push(0);
        }
        bytes
    }

    /// Bytes the records occupy in the segment, terminators included.
    pub fn encoded_len(&self) -> usize {
        self.records
            .iter()
            .map(|(name, value)| name.len() + value.len() + 2)
            .sum()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.records.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SharedVariables {
    /// Register as a user of the segment at `path`, creating it if needed.
    ///
    /// The segment is reset when no other shell is using it (a leftover from
    /// a shell that did not shut down cleanly is not trusted); otherwise its
    /// records are kept.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (users, first) = loop {
            let (users, first) = register(&users_path(&path))?;
            // The last user may have removed the file while we waited for it.
            if still_linked(&users, &users_path(&path)) {
                break (users, first);
            }
        };

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(first)
            .open(&path)
            .map_err(ShellError::Segment)?;

        if first {
            users
                .relock(FlockArg::LockShared)
                .map_err(|errno| ShellError::Segment(io::Error::from(errno)))?;
        }
        tracing::debug!(path = %path.display(), first, "registered as segment user");
        Ok(Self {
            path,
            users: Some(users),
        })
    }

    /// Attach to a segment created by another instance without registering
    /// as a user. The segment is left in place when this handle is dropped.
    pub fn attach(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        File::open(&path).map_err(ShellError::Segment)?;
        Ok(Self { path, users: None })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self, arg: FlockArg) -> Result<Flock<File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(ShellError::Segment)?;
        lock_file(file, arg)
    }

    fn read_locked(file: &mut File) -> Result<Snapshot> {
        let mut bytes = Vec::with_capacity(SEGMENT_SIZE);
        file.seek(SeekFrom::Start(0)).map_err(ShellError::Segment)?;
        file.take(SEGMENT_SIZE as u64)
            .read_to_end(&mut bytes)
            .map_err(ShellError::Segment)?;
        Ok(Snapshot::decode(&bytes))
    }

    /// Decode the current content of the segment.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut guard = self.lock(FlockArg::LockShared)?;
        Self::read_locked(&mut guard)
    }

    pub fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.snapshot()?.get(name).map(str::to_string))
    }

    /// Run `update` on the decoded records under the exclusive lock and write
    /// the result back. Nothing is written if `update` fails or the encoded
    /// records would not fit in the segment.
    fn modify<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> Result<()>,
    {
        let mut guard = self.lock(FlockArg::LockExclusive)?;
        let mut snapshot = Self::read_locked(&mut guard)?;
        update(&mut snapshot.records)?;
        if snapshot.encoded_len() > SEGMENT_SIZE {
            return Err(ShellError::SegmentFull);
        }
        let bytes = snapshot.encode();
        let file: &mut File = &mut guard;
        file.set_len(0).map_err(ShellError::Segment)?;
        file.seek(SeekFrom::Start(0)).map_err(ShellError::Segment)?;
        file.write_all(&bytes).map_err(ShellError::Segment)?;
        tracing::debug!(bytes = bytes.len(), "rewrote shared segment");
        Ok(())
    }

    /// Insert or replace `name`. Callers validate name and value first.
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        self.modify(|records| {
            records.insert(name.to_string(), value.to_string());
            Ok(())
        })
    }

    pub fn unset(&self, name: &str) -> Result<()> {
        self.modify(|records| match records.remove(name) {
            Some(_) => Ok(()),
            None => Err(ShellError::VariableNotFound(name.to_string())),
        })
    }
}

/// Lock the users file, exclusively if nobody else holds it. Returns whether
/// this is the only user.
fn register(users: &Path) -> Result<(Flock<File>, bool)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(users)
        .map_err(ShellError::Segment)?;
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(file) => Ok((file, true)),
        Err((file, Errno::EWOULDBLOCK)) => Ok((lock_file(file, FlockArg::LockShared)?, false)),
        Err((_, errno)) => Err(ShellError::Segment(io::Error::from(errno))),
    }
}

fn still_linked(file: &File, path: &Path) -> bool {
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

fn lock_file(file: File, arg: FlockArg) -> Result<Flock<File>> {
    Flock::lock(file, arg).map_err(|(_, errno)| ShellError::Segment(io::Error::from(errno)))
}

impl Drop for SharedVariables {
    fn drop(&mut self) {
        let Some(users) = self.users.take() else {
            return;
        };
        if users.relock(FlockArg::LockExclusiveNonblock).is_err() {
            tracing::debug!(path = %self.path.display(), "segment still in use, left in place");
            return;
        }
        for path in [self.path.clone(), users_path(&self.path)] {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "failed to remove shared segment: {}", e);
            }
        }
    }
}
