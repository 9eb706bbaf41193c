//! `$NAME` expansion over a whole command text.

use crate::error::{Result, ShellError};
use regex::Regex;
use std::sync::OnceLock;

/// Size of the scratch buffer the expanded text must fit in, terminator included.
pub const SCRATCH_CAPACITY: usize = 1024;

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Za-z0-9_]+)").expect("`$NAME` pattern is a valid regex"))
}

/// Outcome of a substitution that fit in the scratch buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    /// Referenced names that resolved to nothing, in order of appearance.
    pub undefined: Vec<String>,
}

struct Scratch {
    buf: String,
}

impl Scratch {
    fn push(&mut self, s: &str, near: &str) -> Result<()> {
        if self.buf.len() + s.len() > SCRATCH_CAPACITY - 1 {
            return Err(ShellError::SubstitutionOverflow(near.to_string()));
        }
        self.buf.push_str(s);
        Ok(())
    }
}

/// Replace every `$NAME` in `text` with `lookup(NAME)`.
///
/// Undefined names expand to nothing and are collected in
/// [`Substitution::undefined`] for the caller to report. A `$` not followed
/// by a name character is kept as is. Fails with
/// [`ShellError::SubstitutionOverflow`] as soon as the output would not fit in
/// [`SCRATCH_CAPACITY`].
pub fn substitute<F>(text: &str, lookup: F) -> Result<Substitution>
where
    F: Fn(&str) -> Option<String>,
{
    let mut scratch = Scratch {
        buf: String::with_capacity(text.len()),
    };
    let mut undefined = Vec::new();
    let mut last = 0;

    for caps in reference_regex().captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        scratch.push(&text[last..whole.start()], name.as_str())?;
        match lookup(name.as_str()) {
            Some(value) => scratch.push(&value, name.as_str())?,
            None => undefined.push(name.as_str().to_string()),
        }
        last = whole.end();
    }
    scratch.push(&text[last..], "")?;

    Ok(Substitution {
        text: scratch.buf,
        undefined,
    })
}
