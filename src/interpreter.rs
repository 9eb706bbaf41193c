use crate::command::{CommandFactory, EXIT_NOT_FOUND, ExecutableCommand, ExitCode};
use crate::config::ShellConfig;
use crate::env::{Environment, LastCommand};
use crate::error::ShellError;
use crate::external;
use crate::lexer;
use crate::parser;
use crate::pipeline;
use crate::process;
use crate::redirect::{self, RedirectGuard};
use crate::signals::Interrupts;
use crate::substitute;
use crate::wildcard;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::borrow::Cow;
use std::io::{self, Write};

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate, see [`crate::builtin`].
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// The built-in commands every shell starts with.
fn builtins() -> Vec<Box<dyn CommandFactory>> {
    use crate::builtin::*;
    vec![
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Pwd>::default()),
        Box::new(Factory::<Echo>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Status>::default()),
        Box::new(Factory::<Set>::default()),
        Box::new(Factory::<Unset>::default()),
        Box::new(Factory::<Setenv>::default()),
        Box::new(Factory::<Unsetenv>::default()),
        Box::new(Factory::<Myjobs>::default()),
        Box::new(Factory::<Myfg>::default()),
        Box::new(Factory::<Mybg>::default()),
    ]
}

/// The execution driver: runs lines of user text as gated sequences of
/// commands, pipelines and background jobs.
///
/// The interpreter owns an [`Environment`] and a list of [`CommandFactory`]
/// objects that are queried to create built-in commands by name. Anything
/// they do not recognize is run as an external program.
///
/// Example
/// ```no_run
/// use mysh::{Interpreter, ShellConfig};
/// let mut sh = Interpreter::with_config(&ShellConfig::from_env()).unwrap();
/// let code = sh.run_line("false ; true && echo hello");
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
    interrupts: Interrupts,
    prompt: bool,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of command factories.
    pub fn new(env: Environment, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env,
            commands,
            interrupts: Interrupts::detached(),
            prompt: true,
        }
    }

    /// Interpreter over `env` with the standard built-ins.
    pub fn with_environment(env: Environment) -> Self {
        Self::new(env, builtins())
    }

    /// Interpreter with the standard built-ins, creating the shared segment
    /// named by `config`.
    pub fn with_config(config: &ShellConfig) -> crate::error::Result<Self> {
        let mut interpreter = Self::with_environment(Environment::new(config)?);
        interpreter.prompt = config.prompt;
        Ok(interpreter)
    }

    /// Poll `interrupts` for keyboard interrupts.
    pub fn with_interrupts(mut self, interrupts: Interrupts) -> Self {
        self.interrupts = interrupts;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Status of the last command that ran, 0 before any.
    pub fn last_status(&self) -> ExitCode {
        self.env.last.as_ref().map_or(0, |last| last.status)
    }

    /// Run every command of `line` whose gate allows it and return the
    /// status of the last one that ran.
    pub fn run_line(&mut self, line: &str) -> ExitCode {
        let commands = parser::parse_line(line);
        let mut status = self.last_status();

        for (i, command) in commands.iter().enumerate() {
            if !parser::should_run(&commands, i, status) {
                tracing::debug!(command = %command.text, "skipped by gate");
                continue;
            }
            status = self.execute(&command.text);
            if !command.text.is_empty() {
                self.env.last = Some(LastCommand {
                    command: command.text.clone(),
                    status,
                });
            }
            if self.env.should_exit {
                break;
            }
        }
        status
    }

    /// Run one command text (no `&&`, `||` or `;`) and return its status.
    pub fn execute(&mut self, text: &str) -> ExitCode {
        let text = text.trim();
        if text.is_empty() {
            return 0;
        }
        let text = self.expand_variables(text, &mut io::stderr());

        let result = if text.contains('|') {
            let stages = pipeline::split_stages(&text);
            pipeline::run(&stages, |stage| self.run_in_child(stage))
        } else if let Some(body) = lexer::strip_background(&text) {
            return self.run_background(body).unwrap_or_else(|e| {
                eprintln!("mysh: {}", e);
                EXIT_NOT_FOUND
            });
        } else {
            self.run_foreground(&text)
        };

        // Interrupts delivered while the shell waited belong to the command.
        if self.interrupts.take() {
            tracing::debug!(command = %text, "interrupt during foreground command discarded");
        }
        result.unwrap_or_else(|e| {
            eprintln!("mysh: {}", e);
            EXIT_NOT_FOUND
        })
    }

    /// Replace `$NAME` references, reporting undefined names to `diag`.
    /// `unset` and `unsetenv` name variables rather than use them and are
    /// left alone.
    fn expand_variables<'a>(&self, text: &'a str, diag: &mut dyn Write) -> Cow<'a, str> {
        if matches!(
            lexer::first_word(text).as_deref(),
            Some("unset" | "unsetenv")
        ) {
            return Cow::Borrowed(text);
        }
        match substitute::substitute(text, |name| self.env.get_var(name)) {
            Ok(substitution) => {
                for name in &substitution.undefined {
                    let _ = writeln!(diag, "mysh: variable not defined: ${}", name);
                }
                Cow::Owned(substitution.text)
            }
            Err(e) => {
                let _ = writeln!(diag, "mysh: {}", e);
                Cow::Borrowed(text)
            }
        }
    }

    fn create_builtin(&self, words: &[String]) -> Option<Box<dyn ExecutableCommand>> {
        let (name, args) = words.split_first()?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.commands
            .iter()
            .find_map(|factory| factory.try_create(name, &args))
    }

    fn run_builtin(&mut self, cmd: Box<dyn ExecutableCommand>) -> ExitCode {
        cmd.execute(&mut io::stdout(), &mut self.env)
            .unwrap_or_else(|e| {
                eprintln!("mysh: {:#}", e);
                1
            })
    }

    /// Body of a forked child: redirect, split, expand, then run a built-in
    /// or replace the process image.
    fn run_in_child(&mut self, text: &str) -> ExitCode {
        let (rest, redirects) = redirect::split_redirections(text);
        redirect::apply(&redirects);

        let words = wildcard::expand_words(lexer::split_words(&rest));
        if words.is_empty() {
            return 0;
        }
        match self.create_builtin(&words) {
            Some(cmd) => self.run_builtin(cmd),
            None => external::exec(&words, &self.env.exported_vars()),
        }
    }

    fn run_background(&mut self, text: &str) -> crate::error::Result<ExitCode> {
        let pid = process::spawn(|| self.run_in_child(text))?;
        match self.env.jobs.register(pid, text, &mut io::stdout()) {
            Ok(_) => {}
            Err(ShellError::JobTableFull) => {
                eprintln!("mysh: job list is full, pid {} is not tracked", pid);
            }
            Err(e) => return Err(e),
        }
        Ok(0)
    }

    fn run_foreground(&mut self, text: &str) -> crate::error::Result<ExitCode> {
        let (rest, redirects) = redirect::split_redirections(text);
        let builtin = lexer::first_word(&rest)
            .is_some_and(|name| self.create_builtin(&[name]).is_some());

        if builtin {
            let words = wildcard::expand_words(lexer::split_words(&rest));
            let _guard = RedirectGuard::apply(&redirects);
            return Ok(match self.create_builtin(&words) {
                Some(cmd) => self.run_builtin(cmd),
                None => 0,
            });
        }

        let pid = process::spawn(|| self.run_in_child(text))?;
        process::wait_for(pid)
    }

    fn prompt(&self) -> String {
        if !self.prompt {
            return String::new();
        }
        let cwd = std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|_| "?".to_string());
        format!("mysh:{} ~> ", cwd)
    }

    fn confirm_quit(&self, rl: &mut DefaultEditor) -> rustyline::Result<bool> {
        match rl.readline("Do you want to quit mysh? (y/n) ") {
            Ok(answer) => Ok(is_yes(&answer)),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Interactive Read-Eval-Print Loop. Returns when the input ends, on
    /// `exit`, or when the user confirms quitting after an interrupt.
    pub fn repl(&mut self) -> rustyline::Result<()> {
        let mut rl = DefaultEditor::new()?;

        while !self.env.should_exit {
            if self.interrupts.take() && self.confirm_quit(&mut rl)? {
                break;
            }
            match rl.readline(&self.prompt()) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line.as_str())?;
                    self.run_line(&line);
                }
                Err(ReadlineError::Interrupted) => {
                    if self.confirm_quit(&mut rl)? {
                        break;
                    }
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("mysh: {}", err);
                    break;
                }
            }
        }

        Ok(())
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim(), "y" | "Y")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobState;
    use crate::shared::SharedVariables;
    use crate::testing::lock_process;
    use nix::sys::signal::{Signal, kill};
    use std::fs;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    struct Fixture {
        dir: tempfile::TempDir,
        sh: Interpreter,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_interrupts(Interrupts::detached())
        }

        fn with_interrupts(interrupts: Interrupts) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let shared = SharedVariables::create(dir.path().join("segment")).unwrap();
            let sh = Interpreter::with_environment(Environment::with_shared(shared))
                .with_interrupts(interrupts);
            Self { dir, sh }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn read(&self, name: &str) -> String {
            fs::read_to_string(self.path(name)).unwrap_or_default()
        }

        fn run(&mut self, line: &str) -> ExitCode {
            let line = line.replace("{dir}", &self.dir.path().display().to_string());
            self.sh.run_line(&line)
        }
    }

    #[test]
    fn empty_command_succeeds_without_running_anything() {
        let mut fx = Fixture::new();
        assert_eq!(fx.sh.execute("   "), 0);
        assert_eq!(fx.sh.run_line(""), 0);
        assert!(fx.sh.env().last.is_none());
    }

    #[test]
    fn leftmost_separator_wins() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        assert_eq!(fx.run("false ; true && echo hi > {dir}/out"), 0);
        assert_eq!(fx.read("out"), "hi\n");
    }

    #[test]
    fn gates_follow_previous_status() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        fx.run("false && echo and > {dir}/and");
        fx.run("true || echo or > {dir}/or");
        fx.run("false || echo fallback > {dir}/fallback");
        assert!(!fx.path("and").exists());
        assert!(!fx.path("or").exists());
        assert_eq!(fx.read("fallback"), "fallback\n");
    }

    #[test]
    fn gate_only_looks_at_immediate_predecessor() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        // `b` is skipped, so `c` is gated by the status `false` left behind.
        fx.run("false && echo b > {dir}/b || echo c > {dir}/c");
        assert!(!fx.path("b").exists());
        assert_eq!(fx.read("c"), "c\n");
    }

    #[test]
    fn exit_status_of_external_commands() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        assert_eq!(fx.run("true"), 0);
        assert_eq!(fx.run("false"), 1);
        assert_eq!(fx.run("surely-not-a-program-xyz"), EXIT_NOT_FOUND);
        assert_eq!(fx.sh.last_status(), EXIT_NOT_FOUND);
    }

    #[test]
    fn builtin_output_redirection_truncates_and_appends() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        fx.run("echo first > {dir}/log");
        fx.run("echo second >> {dir}/log");
        assert_eq!(fx.read("log"), "first\nsecond\n");
        fx.run("echo third > {dir}/log");
        assert_eq!(fx.read("log"), "third\n");
    }

    #[test]
    fn external_command_redirections() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        fs::write(fx.path("in"), "from file\n").unwrap();
        assert_eq!(fx.run("cat < {dir}/in > {dir}/out"), 0);
        assert_eq!(fx.read("out"), "from file\n");

        assert_ne!(fx.run("ls {dir}/missing 2> {dir}/err"), 0);
        assert!(!fx.read("err").is_empty());
    }

    #[test]
    fn failed_redirection_still_runs_command() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        assert_eq!(fx.run("echo hi < {dir}/missing > {dir}/out"), 0);
        assert_eq!(fx.read("out"), "hi\n");
    }

    #[test]
    fn pipeline_connects_stages_and_reports_last_status() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        assert_eq!(fx.run("echo hello | tr a-z A-Z > {dir}/out"), 0);
        assert_eq!(fx.read("out"), "HELLO\n");

        assert_eq!(fx.run("true | false"), 1);
        assert_eq!(fx.run("false | true"), 0);
    }

    #[test]
    fn background_command_is_tracked_as_a_job() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        let started = Instant::now();
        assert_eq!(fx.run("sleep 5 &"), 0);
        assert!(started.elapsed() < Duration::from_secs(1));

        let jobs = fx.sh.env().jobs.jobs().to_vec();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, 1);
        assert_eq!(jobs[0].command, "sleep 5");
        assert_eq!(jobs[0].state, JobState::Running);

        kill(jobs[0].pid, Signal::SIGKILL).unwrap();
        assert_eq!(fx.run("myfg 1 > {dir}/fg"), EXIT_NOT_FOUND);
        assert!(fx.sh.env().jobs.is_empty());
        assert_eq!(fx.read("fg"), "Bringing job [1] sleep 5 to foreground.\n");
    }

    #[test]
    fn ampersand_inside_word_is_not_background() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        fx.run("echo a& > {dir}/out");
        assert_eq!(fx.read("out"), "a&\n");
        assert!(fx.sh.env().jobs.is_empty());
    }

    #[test]
    fn variables_are_substituted() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        assert_eq!(fx.run("set GREETING=hello"), 0);
        fx.run("echo $GREETING world > {dir}/out");
        assert_eq!(fx.read("out"), "hello world\n");

        fx.run("echo x$UNDEFINED_VARIABLE_XYZ y > {dir}/undefined");
        assert_eq!(fx.read("undefined"), "x y\n");
    }

    #[test]
    fn undefined_variable_is_reported() {
        let fx = Fixture::new();
        let mut diag = Vec::new();
        let text = fx.sh.expand_variables("echo $UNDEFINED_VARIABLE_XYZ", &mut diag);
        assert_eq!(text, "echo ");
        assert_eq!(
            String::from_utf8(diag).unwrap(),
            "mysh: variable not defined: $UNDEFINED_VARIABLE_XYZ\n"
        );

        let mut diag = Vec::new();
        fx.sh.expand_variables("unsetenv $UNDEFINED_VARIABLE_XYZ", &mut diag);
        assert!(diag.is_empty());
    }

    #[test]
    fn unset_names_the_variable_not_its_value() {
        let mut fx = Fixture::new();
        fx.run("set X=abc");
        assert_eq!(fx.run("unset $X"), 0);
        assert_eq!(fx.sh.env().get_var("X"), None);
    }

    #[test]
    fn shared_variables_reach_external_programs() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        assert_eq!(fx.run("setenv MYSH_TEST_SHARED=visible"), 0);
        assert_eq!(fx.run("env > {dir}/env"), 0);
        assert!(fx.read("env").lines().any(|l| l == "MYSH_TEST_SHARED=visible"));
    }

    #[test]
    fn wildcards_expand_against_directory() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        fs::write(fx.path("only.txt"), "").unwrap();
        fx.run("echo {dir}/*.txt > {dir}/out");
        let expected = format!("{}\n", fx.path("only.txt").display());
        assert_eq!(fx.read("out"), expected);

        fx.run(r"echo \*.txt > {dir}/literal");
        assert_eq!(fx.read("literal"), "*.txt\n");
    }

    #[test]
    fn builtins_change_shell_state() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        let orig = std::env::current_dir().unwrap();
        fx.run("cd {dir}");
        let moved = fs::canonicalize(std::env::current_dir().unwrap()).unwrap();
        std::env::set_current_dir(orig).unwrap();
        assert_eq!(moved, fs::canonicalize(fx.dir.path()).unwrap());

        assert_eq!(fx.run("exit ; echo never > {dir}/never"), 0);
        assert!(fx.sh.env().should_exit);
        assert!(!fx.path("never").exists());
    }

    #[test]
    fn builtin_in_child_does_not_touch_shell() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        fx.run("set A=1 | cat");
        assert_eq!(fx.sh.env().get_var("A"), None);
    }

    #[test]
    fn status_reports_previous_command() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        fx.run("false");
        fx.run("status > {dir}/status");
        assert_eq!(fx.read("status"), "false terminated abnormally\n");
        let last = fx.sh.env().last.clone().unwrap();
        assert_eq!(last.status, 0);
        assert!(last.command.starts_with("status"));
    }

    #[test]
    fn interrupt_during_foreground_pipeline_is_discarded() {
        let _lock = lock_process();
        let interrupts = Interrupts::install().unwrap();
        let mut fx = Fixture::with_interrupts(interrupts.clone());
        // The stage's parent is this process, which plays the shell.
        fs::write(fx.path("int.sh"), "kill -INT $PPID\nsleep 0.2\n").unwrap();

        assert_eq!(fx.run("sh {dir}/int.sh | cat"), 0);
        assert!(!interrupts.take());

        assert_eq!(fx.run("sh {dir}/int.sh"), 0);
        assert!(!interrupts.take());
    }

    #[test]
    fn interrupt_during_builtin_is_discarded() {
        let _lock = lock_process();
        let interrupts = Interrupts::detached();
        let mut fx = Fixture::with_interrupts(interrupts.clone());
        interrupts.raise();
        assert_eq!(fx.run("echo hi > {dir}/out"), 0);
        assert!(!interrupts.take());
    }

    #[test]
    fn interrupt_stays_pending_after_background_launch() {
        let _lock = lock_process();
        let interrupts = Interrupts::detached();
        let mut fx = Fixture::with_interrupts(interrupts.clone());
        interrupts.raise();
        assert_eq!(fx.run("sleep 5 &"), 0);
        assert!(interrupts.take());

        let pid = fx.sh.env().jobs.jobs()[0].pid;
        kill(pid, Signal::SIGKILL).unwrap();
        process::wait_for(pid).unwrap();
    }

    #[test]
    fn quit_needs_an_explicit_yes() {
        assert!(is_yes("y"));
        assert!(is_yes(" Y\n"));
        assert!(!is_yes("n"));
        assert!(!is_yes(""));
        assert!(!is_yes("yes please"));
    }

    #[test]
    fn prompt_shows_directory_unless_disabled() {
        let _lock = lock_process();
        let mut fx = Fixture::new();
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(fx.sh.prompt(), format!("mysh:{} ~> ", cwd.display()));

        fx.sh.prompt = false;
        assert_eq!(fx.sh.prompt(), "");
    }
}
