//! Ownership of the controlling terminal.
//!
//! [`Terminal`] is the only place that calls `tcsetpgrp`. When the shell is not attached to a
//! terminal (piped input, batch scripts) every transfer is a no-op and the shell still runs
//! jobs in their own process groups.

use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal, killpg};
use nix::sys::termios::{self, SetArg, Termios};
use nix::unistd::{self, Pid};
use std::io::IsTerminal;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

/// Signals that should only affect the shell's children, never the shell itself.
pub const JOB_CONTROL_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

/// Session-wide terminal state, initialized once at startup.
#[derive(Debug)]
pub struct Terminal {
    /// `None` when the shell is not interactive.
    fd: Option<OwnedFd>,
    shell_pgid: Pid,
    shell_tmodes: Option<Termios>,
}

impl Terminal {
    /// A terminal controller for a non-interactive shell.
    pub fn detached() -> Self {
        Self {
            fd: None,
            shell_pgid: unistd::getpgrp(),
            shell_tmodes: None,
        }
    }

    /// Take over the terminal on standard input if there is one.
    ///
    /// Waits (by stopping itself with `SIGTTIN`) until the shell's process group is in the
    /// foreground, ignores the interactive and job-control signals, moves the shell into its
    /// own process group and makes that group the terminal's foreground group.
    pub fn claim() -> nix::Result<Self> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return Ok(Self::detached());
        }
        let fd = stdin.as_fd().try_clone_to_owned().map_err(|_| Errno::last())?;

        loop {
            let pgid = unistd::getpgrp();
            if unistd::tcgetpgrp(&fd)? == pgid {
                break;
            }
            killpg(pgid, Signal::SIGTTIN)?;
        }

        for sig in JOB_CONTROL_SIGNALS {
            unsafe { signal::signal(sig, SigHandler::SigIgn)? };
        }

        let pid = unistd::getpid();
        if unistd::getpgrp() != pid {
            match unistd::setpgid(pid, pid) {
                // Session leaders cannot change group; they already lead one.
                Ok(()) | Err(Errno::EPERM) => {}
                Err(err) => return Err(err),
            }
        }
        let shell_pgid = unistd::getpgrp();
        unistd::tcsetpgrp(&fd, shell_pgid)?;
        let shell_tmodes = termios::tcgetattr(&fd)?;
        tracing::debug!(%shell_pgid, "terminal claimed");

        Ok(Self {
            fd: Some(fd),
            shell_pgid,
            shell_tmodes: Some(shell_tmodes),
        })
    }

    pub fn is_interactive(&self) -> bool {
        self.fd.is_some()
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    /// Descriptor children use to claim the terminal for their group.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    /// Make `pgid` the foreground process group, restoring `modes` first when resuming a job.
    pub fn give(&self, pgid: Pid, modes: Option<&Termios>) -> nix::Result<()> {
        let Some(fd) = &self.fd else {
            return Ok(());
        };
        unistd::tcsetpgrp(fd, pgid)?;
        if let Some(modes) = modes {
            termios::tcsetattr(fd, SetArg::TCSADRAIN, modes)?;
        }
        Ok(())
    }

    /// Put the shell back in the foreground and restore its own terminal modes.
    ///
    /// Returns the modes the departing job left behind so they can be restored on `fg`.
    pub fn reclaim(&self) -> nix::Result<Option<Termios>> {
        let Some(fd) = &self.fd else {
            return Ok(None);
        };
        unistd::tcsetpgrp(fd, self.shell_pgid)?;
        let job_modes = termios::tcgetattr(fd)?;
        if let Some(modes) = &self.shell_tmodes {
            termios::tcsetattr(fd, SetArg::TCSADRAIN, modes)?;
        }
        Ok(Some(job_modes))
    }
}
