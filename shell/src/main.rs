use anyhow::{Context, Result};
use argh::FromArgs;
use std::fs::File;
use std::io::{self, BufReader, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use wsh::interpreter::{EditorSource, LineSource, ReaderSource};
use wsh::{Config, Interpreter, JobControl, Reconciler, Terminal, config};

#[derive(FromArgs)]
/// A small shell with job control.
struct Options {
    #[argh(positional)]
    /// read command lines from this file instead of the terminal.
    script: Option<PathBuf>,

    #[argh(option, default = "config::DEFAULT_PROMPT.to_string()")]
    /// prompt printed before each line when interactive.
    prompt: String,

    #[argh(option, default = "config::DEFAULT_MAX_JOBS")]
    /// how many background and stopped jobs may exist at once; 0 for no limit.
    max_jobs: usize,

    #[argh(option, default = "config::DEFAULT_MAX_ARGS")]
    /// how many words a single command may have.
    max_args: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_env("WSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let options: Options = argh::from_env();
    let config = Config::new(options.prompt, options.max_jobs, options.max_args, options.script);

    match run(config) {
        Ok(status) => ExitCode::from((status & 0xff) as u8),
        Err(err) => {
            eprintln!("wsh: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<i32> {
    let mut source: Box<dyn LineSource> = match &config.script {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("{}", path.display()))?;
            Box::new(ReaderSource::new(BufReader::new(file)))
        }
        None if io::stdin().is_terminal() => Box::new(EditorSource::new()?),
        None => Box::new(ReaderSource::new(io::stdin().lock())),
    };

    let terminal = if config.script.is_some() {
        Terminal::detached()
    } else {
        Terminal::claim().context("could not take control of the terminal")?
    };
    tracing::info!(
        interactive = terminal.is_interactive(),
        pgid = %terminal.shell_pgid(),
        "starting"
    );
    let reconciler = Reconciler::install().context("could not install SIGCHLD handler")?;
    let jobs = JobControl::new(terminal, reconciler, config.max_jobs);

    let mut sh = Interpreter::new(jobs, config);
    sh.repl(source.as_mut())?;
    Ok(sh.env().exit_status)
}
