//! Bookkeeping for processes and jobs.
//!
//! A [`Job`] is one command line: one or more [`Process`]es that share a process group.
//! Nothing in here talks to the OS; state changes arrive as [`WaitStatus`] values that the
//! signal reconciler collected, which keeps this module easy to test.

use crate::command::ExitCode;
use nix::sys::signal::Signal;
use nix::sys::termios::Termios;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// Small positive integer naming a job in the job table.
pub type JobId = usize;

/// One OS process spawned for one pipeline stage.
#[derive(Debug, Clone)]
pub struct Process {
    pub pid: Pid,
    pub argv: Vec<String>,
    pub completed: bool,
    pub stopped: bool,
    /// Last status reported by `waitpid`, if any.
    pub status: Option<WaitStatus>,
}

impl Process {
    pub fn new(pid: Pid, argv: Vec<String>) -> Self {
        Self {
            pid,
            argv,
            completed: false,
            stopped: false,
            status: None,
        }
    }

    /// Fold a wait status into the completion and stop flags.
    ///
    /// Statuses that do not describe a stop, continue or exit (ptrace events, `StillAlive`)
    /// leave the process untouched.
    pub fn apply(&mut self, status: WaitStatus) {
        match status {
            WaitStatus::Stopped(..) => {
                self.stopped = true;
            }
            WaitStatus::Continued(_) => {
                self.stopped = false;
            }
            WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                self.completed = true;
                self.stopped = false;
            }
            _ => return,
        }
        self.status = Some(status);
    }

    pub fn is_running(&self) -> bool {
        !self.completed && !self.stopped
    }

    /// Signal that killed the process, if it was killed.
    pub fn term_signal(&self) -> Option<Signal> {
        match self.status {
            Some(WaitStatus::Signaled(_, signal, _)) => Some(signal),
            _ => None,
        }
    }
}

/// Coarse job state as the user sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    RunningForeground,
    RunningBackground,
    Stopped,
    Completed,
}

/// What a single status update did to the owning job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobUpdate {
    Completed,
    Stopped,
    Neither,
}

/// One pipeline of processes sharing a process group.
#[derive(Debug, Clone)]
pub struct Job {
    pgid: Option<Pid>,
    pub processes: Vec<Process>,
    pub foreground: bool,
    /// The command line ended with `&`.
    pub background_launch: bool,
    /// The user has been told this job stopped.
    pub notified: bool,
    pub command: String,
    /// Terminal modes the job had when it last gave the terminal back.
    pub tmodes: Option<Termios>,
}

impl Job {
    pub fn new(command: impl Into<String>, background_launch: bool) -> Self {
        Self {
            pgid: None,
            processes: Vec::new(),
            foreground: !background_launch,
            background_launch,
            notified: false,
            command: command.into(),
            tmodes: None,
        }
    }

    pub fn pgid(&self) -> Option<Pid> {
        self.pgid
    }

    /// Record a newly forked process.
    ///
    /// The first process to join fixes the job's process group id; later calls never change it.
    pub fn add_process(&mut self, process: Process) -> Pid {
        let pgid = *self.pgid.get_or_insert(process.pid);
        self.processes.push(process);
        pgid
    }

    pub fn find_process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.pid == pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.iter().any(|p| p.pid == pid)
    }

    /// Apply a status to the process `pid` and report the resulting job-level transition.
    ///
    /// Returns `None` when `pid` does not belong to this job.
    pub fn mark_process(&mut self, pid: Pid, status: WaitStatus) -> Option<JobUpdate> {
        self.find_process_mut(pid)?.apply(status);
        Some(if self.is_completed() {
            JobUpdate::Completed
        } else if self.is_stopped() {
            JobUpdate::Stopped
        } else {
            JobUpdate::Neither
        })
    }

    /// Every process has completed.
    pub fn is_completed(&self) -> bool {
        self.processes.iter().all(|p| p.completed)
    }

    /// Nothing is running and at least one process is stopped.
    pub fn is_stopped(&self) -> bool {
        !self.processes.iter().any(Process::is_running)
            && self.processes.iter().any(|p| p.stopped && !p.completed)
    }

    pub fn state(&self) -> JobState {
        if self.is_completed() {
            JobState::Completed
        } else if self.is_stopped() {
            JobState::Stopped
        } else if self.foreground {
            JobState::RunningForeground
        } else {
            JobState::RunningBackground
        }
    }

    /// Clear stop flags before the job is sent `SIGCONT`.
    pub fn mark_running(&mut self) {
        for process in &mut self.processes {
            if !process.completed {
                process.stopped = false;
            }
        }
        self.notified = false;
    }

    /// Saved terminal modes to restore when the job gets the terminal back.
    ///
    /// Only a stopped job being continued has modes worth restoring; otherwise they stay saved.
    pub fn resume_modes(&mut self, cont: bool) -> Option<Termios> {
        if cont { self.tmodes.take() } else { None }
    }

    /// Exit status in shell terms: the last stage decides.
    pub fn exit_code(&self) -> ExitCode {
        if self.is_stopped() {
            let signal = self
                .processes
                .iter()
                .find_map(|p| match p.status {
                    Some(WaitStatus::Stopped(_, signal)) if p.stopped => Some(signal),
                    _ => None,
                })
                .unwrap_or(Signal::SIGTSTP);
            return 128 + signal as ExitCode;
        }
        match self.processes.last().and_then(|p| p.status) {
            Some(WaitStatus::Exited(_, code)) => code,
            Some(WaitStatus::Signaled(_, signal, _)) => 128 + signal as ExitCode,
            _ => 0,
        }
    }

    /// Line printed by the `jobs` built-in.
    pub fn listing(&self, id: JobId) -> String {
        let suffix = if self.background_launch { " &" } else { "" };
        format!("{}: {}{}", id, self.command, suffix)
    }
}
