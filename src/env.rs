use crate::command::ExitCode;
use crate::config::ShellConfig;
use crate::error::{Result, ShellError};
use crate::jobs::JobRegistry;
use crate::shared::SharedVariables;
use std::collections::BTreeMap;

/// Longest accepted variable name, in bytes.
pub const MAX_NAME_LEN: usize = 63;
/// Longest accepted variable value, in bytes.
pub const MAX_VALUE_LEN: usize = 255;

/// Check a `name=value` pair before it reaches either variable table.
///
/// Names are non-empty runs of alphanumerics and underscores (the only names
/// `$NAME` can refer to); values are non-empty. Both are bounded in length.
pub fn validate_variable(kind: &'static str, name: &str, value: &str) -> Result<()> {
    let name_ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    let value_ok = !value.is_empty() && value.len() <= MAX_VALUE_LEN;
    if name_ok && value_ok {
        Ok(())
    } else {
        Err(ShellError::InvalidVariable {
            kind,
            name: name.to_string(),
        })
    }
}

/// Variables private to one shell instance. Last write wins.
#[derive(Debug, Clone, Default)]
pub struct LocalVariables {
    vars: BTreeMap<String, String>,
}

impl LocalVariables {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        validate_variable("local", name, value)?;
        self.vars.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn unset(&mut self, name: &str) -> Result<()> {
        self.vars
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ShellError::VariableNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Text and exit status of the most recent command that ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastCommand {
    pub command: String,
    pub status: ExitCode,
}

/// Mutable state of one shell instance, handed explicitly to the interpreter
/// and to every built-in.
///
/// The environment contains:
/// - `locals`: variables visible only to this shell;
/// - `shared`: the environment-style variables of the shared segment;
/// - `jobs`: background processes started from this shell;
/// - `last`: the previous command, for `status`;
/// - `should_exit`: set by `exit`, checked by the interactive loop.
#[derive(Debug)]
pub struct Environment {
    pub locals: LocalVariables,
    pub shared: SharedVariables,
    pub jobs: JobRegistry,
    pub last: Option<LastCommand>,
    pub should_exit: bool,
}

impl Environment {
    /// Create the shell state, creating the shared segment named by `config`.
    pub fn new(config: &ShellConfig) -> Result<Self> {
        Ok(Self::with_shared(SharedVariables::create(&config.shared_segment)?))
    }

    pub fn with_shared(shared: SharedVariables) -> Self {
        Self {
            locals: LocalVariables::default(),
            shared,
            jobs: JobRegistry::default(),
            last: None,
            should_exit: false,
        }
    }

    /// Get the value of a variable.
    ///
    /// Looks up the local table first, falling back to the shared segment.
    /// A segment that cannot be read is treated as holding no variables.
    pub fn get_var(&self, name: &str) -> Option<String> {
        if let Some(value) = self.locals.get(name) {
            return Some(value.to_string());
        }
        match self.shared.get(name) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("shared variable lookup failed: {}", e);
                None
            }
        }
    }

    pub fn set_shared(&self, name: &str, value: &str) -> Result<()> {
        validate_variable("environment", name, value)?;
        self.shared.set(name, value)
    }

    /// Process environment overlaid with the shared records, as handed to
    /// external programs.
    pub fn exported_vars(&self) -> Vec<(String, String)> {
        let mut vars: BTreeMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        match self.shared.snapshot() {
            Ok(snapshot) => {
                for (name, value) in snapshot.iter() {
                    vars.insert(name.to_string(), value.to_string());
                }
            }
            Err(e) => tracing::warn!("cannot export shared variables: {}", e),
        }
        vars.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environment() -> (tempfile::TempDir, Environment) {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedVariables::create(dir.path().join("segment")).unwrap();
        (dir, Environment::with_shared(shared))
    }

    #[test]
    fn test_local_set_unset_and_lookup() {
        let (_dir, mut env) = environment();

        // initially absent
        assert_eq!(env.get_var("SOME_RANDOM_VAR_12345"), None);

        env.locals.set("KEY", "VALUE").unwrap();
        assert_eq!(env.get_var("KEY"), Some("VALUE".to_string()));

        env.locals.set("KEY", "OTHER").unwrap();
        assert_eq!(env.get_var("KEY"), Some("OTHER".to_string()));

        env.locals.unset("KEY").unwrap();
        assert_eq!(env.get_var("KEY"), None);
        assert!(matches!(
            env.locals.unset("KEY"),
            Err(ShellError::VariableNotFound(_))
        ));
    }

    #[test]
    fn test_local_shadows_shared() {
        let (_dir, mut env) = environment();
        env.set_shared("WHO", "shared").unwrap();
        assert_eq!(env.get_var("WHO"), Some("shared".to_string()));

        env.locals.set("WHO", "local").unwrap();
        assert_eq!(env.get_var("WHO"), Some("local".to_string()));
    }

    #[test]
    fn test_shared_visible_after_reread() {
        let (_dir, env) = environment();
        let other = SharedVariables::attach(env.shared.path()).unwrap();
        other.set("FROM_OTHER", "1").unwrap();
        assert_eq!(env.get_var("FROM_OTHER"), Some("1".to_string()));
    }

    #[test]
    fn test_validation_rejects_without_writing() {
        let (_dir, mut env) = environment();
        let long_name = "N".repeat(MAX_NAME_LEN + 1);
        let long_value = "v".repeat(MAX_VALUE_LEN + 1);

        assert!(env.locals.set(&long_name, "v").is_err());
        assert!(env.locals.set("N", &long_value).is_err());
        assert!(env.locals.set("N", "").is_err());
        assert!(env.locals.set("BAD-NAME", "v").is_err());
        assert!(env.set_shared(&long_name, "v").is_err());
        assert!(env.set_shared("N", &long_value).is_err());

        assert_eq!(env.locals.iter().count(), 0);
        assert!(env.shared.snapshot().unwrap().is_empty());

        let max_name = "N".repeat(MAX_NAME_LEN);
        let max_value = "v".repeat(MAX_VALUE_LEN);
        env.locals.set(&max_name, &max_value).unwrap();
    }

    #[test]
    fn test_exported_vars_include_shared_records() {
        let (_dir, env) = environment();
        env.set_shared("MYSH_EXPORT_TEST", "on").unwrap();
        let vars = env.exported_vars();
        assert!(vars.iter().any(|(k, v)| k == "MYSH_EXPORT_TEST" && v == "on"));
        assert!(vars.iter().any(|(k, _)| k == "PATH"));
    }
}
