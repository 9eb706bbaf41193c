//! Wildcard expansion of single words against one directory listing.

use glob::{MatchOptions, Pattern};
use std::fs;

const GLOB_CHARS: [char; 3] = ['*', '?', '['];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Whether `word` holds a `*`, `?` or `[` not directly preceded by a backslash.
pub fn has_unescaped_glob(word: &str) -> bool {
    let mut prev = None;
    for c in word.chars() {
        if GLOB_CHARS.contains(&c) && prev != Some('\\') {
            return true;
        }
        prev = Some(c);
    }
    false
}

/// Walk `word`, handing each character to `emit` with a flag telling whether
/// it was escaped by a backslash. The escaping backslash itself is dropped.
fn for_each_char(word: &str, mut emit: impl FnMut(char, bool)) {
    let mut chars = word.chars().peekable();
    while let Some(c) = chars.next() {
        match chars.peek() {
            Some(&next) if c == '\\' && GLOB_CHARS.contains(&next) => {
                chars.next();
                emit(next, true);
            }
            _ => emit(c, false),
        }
    }
}

/// `word` with the backslashes that escape glob characters removed.
pub fn unescape(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    for_each_char(word, |c, _| out.push(c));
    out
}

fn to_pattern(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    for_each_char(word, |c, escaped| {
        if escaped {
            out.push_str(&Pattern::escape(&c.to_string()));
        } else {
            out.push(c);
        }
    });
    out
}

/// Expand `word` into `<dir>/<entry>` paths.
///
/// `<dir>` is the text before the last `/` (`.` when there is none) and only
/// the part after it is matched. Entries starting with `.` only match when
/// that part starts with `.`. Results follow directory enumeration order.
/// An unreadable directory yields no matches; a pattern the glob syntax
/// rejects yields the word itself.
pub fn expand(word: &str) -> Vec<String> {
    let (dir, prefix, pattern) = match word.rfind('/') {
        Some(0) => ("/", "", &word[1..]),
        Some(pos) => (&word[..pos], &word[..pos], &word[pos + 1..]),
        None => (".", ".", word),
    };

    let compiled = match Pattern::new(&to_pattern(pattern)) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(word, "not a valid pattern, kept literally: {}", e);
            return vec![unescape(word)];
        }
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("mysh: {}: {}", dir, e);
            return Vec::new();
        }
    };

    let show_hidden = pattern.starts_with('.');
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| show_hidden || !name.starts_with('.'))
        .filter(|name| compiled.matches_with(name, MATCH_OPTIONS))
        .map(|name| format!("{}/{}", prefix, name))
        .collect()
}

/// Expand every word carrying an unescaped glob character; other words only
/// lose their escaping backslashes. A word may expand to nothing.
pub fn expand_words(words: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(words.len());
    for word in words {
        if has_unescaped_glob(&word) {
            out.extend(expand(&word));
        } else {
            out.push(unescape(&word));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs::File;
    use std::path::Path;

    fn populated_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.log", "ab.txt", ".hidden.txt"] {
            File::create(dir.path().join(name)).unwrap();
        }
        dir
    }

    fn expand_in(dir: &Path, pattern: &str) -> BTreeSet<String> {
        let base = dir.to_str().unwrap();
        expand(&format!("{}/{}", base, pattern))
            .into_iter()
            .map(|p| p.strip_prefix(&format!("{}/", base)).unwrap().to_string())
            .collect()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn star_matches_and_skips_hidden() {
        let dir = populated_dir();
        assert_eq!(
            expand_in(dir.path(), "*.txt"),
            set(&["a.txt", "b.txt", "ab.txt"])
        );
    }

    #[test]
    fn dot_pattern_shows_hidden() {
        let dir = populated_dir();
        assert_eq!(expand_in(dir.path(), ".h*"), set(&[".hidden.txt"]));
    }

    #[test]
    fn question_mark_and_brackets() {
        let dir = populated_dir();
        assert_eq!(expand_in(dir.path(), "?.txt"), set(&["a.txt", "b.txt"]));
        assert_eq!(expand_in(dir.path(), "[ac].*"), set(&["a.txt", "c.log"]));
    }

    #[test]
    fn results_keep_directory_prefix() {
        let dir = populated_dir();
        let base = dir.path().to_str().unwrap().to_string();
        let matches = expand(&format!("{}/*.log", base));
        assert_eq!(matches, vec![format!("{}/c.log", base)]);
    }

    #[test]
    fn missing_directory_drops_the_word() {
        let words = vec![
            "ls".to_string(),
            "/definitely/not/here/*.txt".to_string(),
        ];
        assert_eq!(expand_words(words), vec!["ls".to_string()]);
    }

    #[test]
    fn escaped_glob_is_literal() {
        assert!(!has_unescaped_glob(r"\*.txt"));
        assert!(has_unescaped_glob(r"\*.t?t"));
        assert!(has_unescaped_glob("a[bc]"));
        assert!(!has_unescaped_glob("plain"));

        let words = vec!["echo".to_string(), r"\*".to_string(), r"a\b".to_string()];
        assert_eq!(expand_words(words), vec!["echo", "*", r"a\b"]);
    }

    #[test]
    fn escaped_char_in_pattern_matches_literally() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("x*1")).unwrap();
        File::create(dir.path().join("xy1")).unwrap();
        assert_eq!(expand_in(dir.path(), r"x\*?"), set(&["x*1"]));
    }

    #[test]
    fn no_match_yields_nothing() {
        let dir = populated_dir();
        assert!(expand_in(dir.path(), "*.rs").is_empty());
    }
}
