use crate::job::JobId;
use nix::errno::Errno;
use thiserror::Error;

/// Failures of the job-control core.
///
/// None of these are fatal to the shell: the interpreter reports them and moves on
/// to the next command line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    /// The executable resolver could not find a runnable file for the name.
    #[error("{0}: command is not executable")]
    NotExecutable(String),

    /// An argument or path contained an interior NUL byte.
    #[error("{0}: argument contains a NUL byte")]
    InvalidArgument(String),

    #[error("fork failed: {0}")]
    Fork(Errno),

    #[error("pipe failed: {0}")]
    Pipe(Errno),

    #[error("{0}: no such job")]
    NoSuchJob(JobId),

    #[error("no current job")]
    NoCurrentJob,

    #[error("job table full ({0} jobs)")]
    TableFull(usize),

    #[error("job {0} is already running in the background")]
    AlreadyRunning(JobId),

    /// Only completed jobs may give their slot back.
    #[error("job {0} has not completed")]
    NotCompleted(JobId),
}
