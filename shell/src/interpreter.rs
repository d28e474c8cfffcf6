use crate::builtin;
use crate::command::{CommandFactory, CommandLine, Context, ExitCode};
use crate::config::Config;
use crate::engine::JobControl;
use crate::env::Environment;
use crate::lexer;
use crate::parser;
use anyhow::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{BufRead, Write};

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate: see [`crate::builtin`].
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

/// Where command lines come from.
pub trait LineSource {
    /// Read one line without its trailing newline; `None` at end of input.
    fn next_line(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Interactive line editing with history.
pub struct EditorSource {
    editor: DefaultEditor,
}

impl EditorSource {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineSource for EditorSource {
    fn next_line(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    self.editor.add_history_entry(line.as_str())?;
                }
                Ok(Some(line))
            }
            // Ctrl-C at the prompt drops the line; the shell keeps going.
            Err(ReadlineError::Interrupted) => Ok(Some(String::new())),
            Err(ReadlineError::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Plain line reading for piped input and scripts. Never prints a prompt.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn next_line(&mut self, _prompt: &str) -> Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

/// The read-eval loop: parses each line and hands it to a built-in or to the job control
/// engine.
///
/// Example
/// ```no_run
/// use wsh::{Config, Interpreter, JobControl, Reconciler, Terminal};
/// use wsh::interpreter::ReaderSource;
///
/// let config = Config::default();
/// let jobs = JobControl::new(Terminal::detached(), Reconciler::install()?, config.max_jobs);
/// let mut sh = Interpreter::new(jobs, config);
/// sh.repl(&mut ReaderSource::new("sleep 1 &\njobs\n".as_bytes()))?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Interpreter {
    env: Environment,
    jobs: JobControl,
    commands: Vec<Box<dyn CommandFactory>>,
    config: Config,
}

impl Interpreter {
    /// Create an interpreter with the built-ins `exit`, `cd`, `jobs`, `fg` and `bg`.
    pub fn new(jobs: JobControl, config: Config) -> Self {
        Self::with_env(Environment::new(), jobs, config)
    }

    pub fn with_env(env: Environment, jobs: JobControl, config: Config) -> Self {
        Self {
            env,
            jobs,
            commands: builtin::factories(),
            config,
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn jobs(&self) -> &JobControl {
        &self.jobs
    }

    /// Evaluate one input line.
    ///
    /// Syntax and job-control errors are reported on `err` and turn into exit status 1;
    /// only failures to write to `out`/`err` propagate.
    pub fn run_line(
        &mut self,
        line: &str,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<ExitCode> {
        let parsed = lexer::split_into_tokens(line)
            .map_err(anyhow::Error::from)
            .and_then(|tokens| Ok(parser::construct_command_line(tokens, self.config.max_args)?));
        let command_line = match parsed {
            Ok(Some(command_line)) => command_line,
            Ok(None) => return Ok(0),
            Err(e) => {
                writeln!(err, "wsh: {e}")?;
                return Ok(1);
            }
        };
        self.execute(&command_line, out, err)
    }

    fn execute(
        &mut self,
        line: &CommandLine,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<ExitCode> {
        if let Some((name, args)) = line.as_simple().filter(|_| !line.background) {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            if let Some(cmd) = self.commands.iter().find_map(|f| f.try_create(name, &args)) {
                let mut ctx = Context {
                    env: &mut self.env,
                    jobs: &mut self.jobs,
                    out,
                    err,
                };
                return cmd.execute(&mut ctx);
            }
        }

        match self.jobs.launch(line, &self.env, err) {
            Ok(code) => Ok(code),
            Err(e) => {
                tracing::debug!(command = %line.text(), err = %e, "launch failed");
                writeln!(err, "wsh: {e}")?;
                Ok(1)
            }
        }
    }

    /// Read and evaluate lines until end of input or `exit`, then hang up remaining jobs.
    ///
    /// Job notifications are printed at the top of every cycle, before the prompt.
    pub fn repl(&mut self, source: &mut dyn LineSource) -> Result<()> {
        let mut stdout = std::io::stdout();
        let mut stderr = std::io::stderr();
        let result = self.read_eval(source, &mut stdout, &mut stderr);
        self.jobs.hang_up();
        result
    }

    fn read_eval(
        &mut self,
        source: &mut dyn LineSource,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<()> {
        let prompt = if self.jobs.terminal().is_interactive() {
            self.config.prompt.clone()
        } else {
            String::new()
        };
        while !self.env.should_exit {
            self.jobs.notify(err);
            let Some(line) = source.next_line(&prompt)? else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            let code = self.run_line(&line, out, err)?;
            tracing::debug!(line = %line, code, "evaluated");
            out.flush()?;
        }
        Ok(())
    }
}
