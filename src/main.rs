use anyhow::{Context, Result};
use argh::FromArgs;
use mysh::signals::Interrupts;
use mysh::{Interpreter, ShellConfig};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// A small Unix shell with pipelines, redirections and job control.
struct Args {
    #[argh(option, short = 'c')]
    /// run the given line and exit with its status.
    command: Option<String>,

    #[argh(option)]
    /// path of the shared variable segment (default: $MYSH_SHARED_SEGMENT or /dev/shm/mysh-variables).
    segment: Option<PathBuf>,

    #[argh(option)]
    /// log filter directive, e.g. `debug` (default: $MYSH_LOG or `warn`).
    log: Option<String>,
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();

    let mut config = ShellConfig::from_env();
    if let Some(segment) = args.segment {
        config.shared_segment = segment;
    }
    if let Some(log) = args.log {
        config.log_filter = log;
    }
    config.prompt = std::io::stdin().is_terminal();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .with_writer(std::io::stderr)
        .init();

    let interrupts = Interrupts::install().context("can't install SIGINT handler")?;
    let mut sh = Interpreter::with_config(&config)
        .with_context(|| {
            format!(
                "can't create shared segment {}",
                config.shared_segment.display()
            )
        })?
        .with_interrupts(interrupts);

    let status = match args.command {
        Some(line) => sh.run_line(&line),
        None => {
            sh.repl()?;
            sh.last_status()
        }
    };

    // The last shell using the shared segment removes it on drop.
    drop(sh);
    std::process::exit(status)
}
