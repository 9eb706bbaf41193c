use crate::command::{EXIT_NOT_FOUND, ExitCode};
use nix::unistd::execve;
use std::borrow::Cow;
use std::ffi::{CString, OsStr, OsString};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`) or `./`-prefixed:
///   returns it if it exists.
/// - Single path component (no separators): search each directory in
///   `search_paths` (PATH) and return the first existing match.
/// - Empty path: returns `None`.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    if path.starts_with("./") && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, None) => None,
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|path| path.is_file())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

fn to_cstrings<'a>(items: impl Iterator<Item = &'a [u8]>) -> Option<Vec<CString>> {
    items.map(|bytes| CString::new(bytes).ok()).collect()
}

/// Replace the current process image with the program named by `args[0]`.
///
/// `envs` becomes the program's whole environment; its `PATH` entry (or the
/// process's own `PATH`) drives the lookup. Only returns on failure, after
/// reporting it, with status 127.
pub fn exec(args: &[String], envs: &[(String, String)]) -> ExitCode {
    let Some(name) = args.first() else {
        return 0;
    };

    let search_paths = envs
        .iter()
        .find(|(k, _)| k == "PATH")
        .map(|(_, v)| OsString::from(v))
        .or_else(|| std::env::var_os("PATH"))
        .unwrap_or_default();

    let Some(program) = find_command_path(&search_paths, Path::new(name)) else {
        let _ = writeln!(io::stderr(), "mysh: command not found: {}", name);
        return EXIT_NOT_FOUND;
    };

    let pairs: Vec<String> = envs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    let (Some(path), Some(argv), Some(envp)) = (
        CString::new(program.as_os_str().as_bytes()).ok(),
        to_cstrings(args.iter().map(|a| a.as_bytes())),
        to_cstrings(pairs.iter().map(|p| p.as_bytes())),
    ) else {
        let _ = writeln!(io::stderr(), "mysh: {}: argument contains a NUL byte", name);
        return EXIT_NOT_FOUND;
    };

    tracing::debug!(program = %program.display(), argc = argv.len(), "exec");
    let _ = io::stdout().flush();
    if let Err(e) = execve(&path, &argv, &envp) {
        let _ = writeln!(io::stderr(), "mysh: {}: {}", name, e);
    }
    EXIT_NOT_FOUND
}
