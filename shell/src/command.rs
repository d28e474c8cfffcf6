use crate::engine::JobControl;
use crate::env::Environment;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Everything a built-in may touch while it runs.
pub struct Context<'a> {
    pub env: &'a mut Environment,
    pub jobs: &'a mut JobControl,
    /// Standard output of the shell; the `jobs` listing goes here.
    pub out: &'a mut dyn Write,
    /// Error stream for diagnostics and job notifications.
    pub err: &'a mut dyn Write,
}

/// Object-safe trait for any command the shell runs in-process.
///
/// Implemented by built-ins via a blanket impl.
pub trait ExecutableCommand {
    /// Executes the command.
    fn execute(self: Box<Self>, ctx: &mut Context<'_>) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}

/// One parsed input line: a pipeline of one or more stages, optionally run in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Argument vectors, one per pipeline stage; none of them is empty.
    pub stages: Vec<Vec<String>>,
    /// The line ended with `&`.
    pub background: bool,
}

impl CommandLine {
    /// Program name and arguments when the line is a single command.
    pub fn as_simple(&self) -> Option<(&str, &[String])> {
        match self.stages.as_slice() {
            [argv] => argv.split_first().map(|(name, args)| (name.as_str(), args)),
            _ => None,
        }
    }

    /// Command text shown in job listings and notifications.
    pub fn text(&self) -> String {
        self.stages
            .iter()
            .map(|argv| argv.join(" "))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
