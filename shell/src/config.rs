use std::path::PathBuf;

pub const DEFAULT_PROMPT: &str = "wsh> ";
pub const DEFAULT_MAX_JOBS: usize = 256;
pub const DEFAULT_MAX_ARGS: usize = 256;

/// Settings resolved from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Printed before each line when the shell is interactive.
    pub prompt: String,
    /// Capacity of the job table; `None` for no limit.
    pub max_jobs: Option<usize>,
    /// Words allowed in one pipeline stage, the program name included.
    pub max_args: usize,
    /// Batch mode: read command lines from this file.
    pub script: Option<PathBuf>,
}

impl Config {
    /// `max_jobs == 0` lifts the job-table limit.
    pub fn new(prompt: String, max_jobs: usize, max_args: usize, script: Option<PathBuf>) -> Self {
        Self {
            prompt,
            max_jobs: (max_jobs > 0).then_some(max_jobs),
            max_args,
            script,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT.to_string(), DEFAULT_MAX_JOBS, DEFAULT_MAX_ARGS, None)
    }
}
