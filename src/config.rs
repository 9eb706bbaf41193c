//! Shell configuration.
//!
//! Values come from built-in defaults, then the `MYSH_*` environment
//! variables, then the command line (applied by the binary).

use std::env;
use std::path::{Path, PathBuf};

/// Environment variable naming the shared variable segment.
pub const SEGMENT_ENV: &str = "MYSH_SHARED_SEGMENT";
/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "MYSH_LOG";

const SEGMENT_NAME: &str = "mysh-variables";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    /// Location of the shared variable segment.
    pub shared_segment: PathBuf,
    /// `tracing` filter directive, e.g. `warn` or `mysh=debug`.
    pub log_filter: String,
    /// Whether the interactive loop shows a prompt. The binary turns it off
    /// when stdin is not a terminal, so piped scripts produce clean output.
    pub prompt: bool,
}

fn default_segment() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.join(SEGMENT_NAME)
    } else {
        env::temp_dir().join(SEGMENT_NAME)
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shared_segment: default_segment(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            prompt: true,
        }
    }
}

impl ShellConfig {
    /// Defaults overridden by `MYSH_SHARED_SEGMENT` and `MYSH_LOG`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(path) = lookup(SEGMENT_ENV).filter(|p| !p.is_empty()) {
            config.shared_segment = PathBuf::from(path);
        }
        if let Some(filter) = lookup(LOG_ENV).filter(|f| !f.is_empty()) {
            config.log_filter = filter;
        }
        config
    }
}
