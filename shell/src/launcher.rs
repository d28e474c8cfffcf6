use crate::error::JobError;
use crate::terminal::{JOB_CONTROL_SIGNALS, Terminal};
use nix::libc;
use nix::sys::signal::{self, SigHandler, SigSet, Signal};
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::CString;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Exit status of a child whose `execve` failed.
pub const EXEC_FAILED: i32 = 127;

/// Everything a child needs to exec, converted before `fork` so the child does not allocate.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    path: CString,
    argv: Vec<CString>,
}

impl Stage {
    pub fn new(path: &Path, argv: &[String]) -> Result<Self, JobError> {
        let name = argv.first().cloned().unwrap_or_default();
        let invalid = |_| JobError::InvalidArgument(name.clone());
        let path = CString::new(path.as_os_str().as_bytes()).map_err(invalid)?;
        let argv = argv
            .iter()
            .map(|arg| CString::new(arg.as_bytes()).map_err(invalid))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name, path, argv })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Descriptors a stage reads from and writes to instead of the shell's own.
#[derive(Debug, Default, Clone, Copy)]
pub struct StageIo<'a> {
    pub stdin: Option<BorrowedFd<'a>>,
    pub stdout: Option<BorrowedFd<'a>>,
}

/// Fork a child for `stage` and place it in process group `pgid` (or a new group led by the
/// child when `pgid` is `None`).
///
/// The parent also calls `setpgid` so the group exists no matter which side runs first.
pub fn spawn(
    stage: &Stage,
    envp: &[CString],
    pgid: Option<Pid>,
    foreground: bool,
    terminal: &Terminal,
    io: StageIo<'_>,
) -> Result<Pid, JobError> {
    match unsafe { unistd::fork() } {
        Ok(ForkResult::Child) => launch(stage, envp, pgid, foreground, terminal.fd(), io),
        Ok(ForkResult::Parent { child }) => {
            let target = pgid.unwrap_or(child);
            // EACCES once the child has exec'd; it did the setpgid itself by then.
            if let Err(err) = unistd::setpgid(child, target) {
                tracing::debug!(%child, %target, %err, "parent-side setpgid");
            }
            tracing::debug!(pid = %child, pgid = %target, name = stage.name(), "spawned");
            Ok(child)
        }
        Err(err) => Err(JobError::Fork(err)),
    }
}

/// Child side of `spawn`. Each step must finish before the next one starts.
fn launch(
    stage: &Stage,
    envp: &[CString],
    pgid: Option<Pid>,
    foreground: bool,
    terminal: Option<BorrowedFd<'_>>,
    io: StageIo<'_>,
) -> ! {
    let pid = unistd::getpid();
    let pgid = pgid.unwrap_or(pid);
    let _ = unistd::setpgid(pid, pgid);

    // SIGTTOU is still ignored here, so this cannot stop us.
    if foreground {
        if let Some(fd) = terminal {
            let _ = unistd::tcsetpgrp(fd, pgid);
        }
    }

    for sig in JOB_CONTROL_SIGNALS
        .into_iter()
        .chain([Signal::SIGCHLD, Signal::SIGCONT])
    {
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }
    let _ = SigSet::empty().thread_set_mask();

    if let Some(fd) = io.stdin {
        let _ = unistd::dup2(fd.as_raw_fd(), libc::STDIN_FILENO);
    }
    if let Some(fd) = io.stdout {
        let _ = unistd::dup2(fd.as_raw_fd(), libc::STDOUT_FILENO);
    }

    let err = match unistd::execve(&stage.path, &stage.argv, envp) {
        Err(err) => err,
        Ok(never) => match never {},
    };
    eprintln!("{}: exec failed: {}", stage.name, err);
    unsafe { libc::_exit(EXEC_FAILED) }
}
