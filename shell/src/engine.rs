//! The job control engine: launching pipelines, waiting on the foreground job, and the
//! `jobs`/`fg`/`bg` operations.
//!
//! All job-table mutation happens here, on the control thread. The foreground job lives in
//! its own slot outside the table while it runs; it only gets a table id if it stops.

use crate::command::{CommandLine, ExitCode};
use crate::env::Environment;
use crate::error::JobError;
use crate::job::{Job, JobId, JobState, Process};
use crate::job_table::JobTable;
use crate::launcher::{self, Stage, StageIo};
use crate::reconciler::{Reconciler, SigchldBlock};
use crate::terminal::Terminal;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::WaitStatus;
use nix::unistd::{self, Pid};
use std::ffi::CString;
use std::io::{self, Write};
use std::os::fd::{AsFd, OwnedFd};

pub struct JobControl {
    terminal: Terminal,
    reconciler: Reconciler,
    table: JobTable,
    foreground: Option<Job>,
}

impl JobControl {
    pub fn new(terminal: Terminal, reconciler: Reconciler, max_jobs: Option<usize>) -> Self {
        Self {
            terminal,
            reconciler,
            table: JobTable::new(max_jobs),
            foreground: None,
        }
    }

    pub fn table(&self) -> &JobTable {
        &self.table
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn foreground(&self) -> Option<&Job> {
        self.foreground.as_ref()
    }

    /// Start every stage of `line` in one new process group.
    ///
    /// Background jobs are registered and the call returns at once; foreground jobs are
    /// waited on and their exit status returned.
    pub fn launch(
        &mut self,
        line: &CommandLine,
        env: &Environment,
        err: &mut dyn Write,
    ) -> Result<ExitCode, JobError> {
        if line.background && self.table.is_full() {
            return Err(JobError::TableFull(self.table.capacity().unwrap_or_default()));
        }

        let stages = line
            .stages
            .iter()
            .map(|argv| {
                let name = argv.first().map(String::as_str).unwrap_or_default();
                let path = env
                    .resolve_command(name)
                    .ok_or_else(|| JobError::NotExecutable(name.to_string()))?;
                Stage::new(&path, argv)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let envp = env.envp();

        let mut job = Job::new(line.text(), line.background);
        if let Err(e) = self.spawn_stages(&mut job, &stages, &line.stages, &envp) {
            if let Some(pgid) = job.pgid() {
                let _ = killpg(pgid, Signal::SIGKILL);
            }
            return Err(e);
        }

        if !line.background {
            self.foreground = Some(job);
            return Ok(self.wait_for_foreground(false, err));
        }

        let pgid = job.pgid();
        match self.table.allocate(job) {
            Ok(id) => {
                if let Some(pgid) = pgid {
                    let _ = writeln!(err, "[{id}] {pgid}");
                }
                Ok(0)
            }
            Err(e) => {
                if let Some(pgid) = pgid {
                    let _ = killpg(pgid, Signal::SIGKILL);
                }
                Err(e)
            }
        }
    }

    /// Fork the stages left to right, wiring stage `i` stdout to stage `i + 1` stdin.
    fn spawn_stages(
        &self,
        job: &mut Job,
        stages: &[Stage],
        argvs: &[Vec<String>],
        envp: &[CString],
    ) -> Result<(), JobError> {
        let mut upstream: Option<OwnedFd> = None;
        for (i, (stage, argv)) in stages.iter().zip(argvs).enumerate() {
            let downstream = if i + 1 < stages.len() {
                Some(unistd::pipe2(OFlag::O_CLOEXEC).map_err(JobError::Pipe)?)
            } else {
                None
            };
            let io = StageIo {
                stdin: upstream.as_ref().map(|fd| fd.as_fd()),
                stdout: downstream.as_ref().map(|(_, write)| write.as_fd()),
            };
            let pid = launcher::spawn(stage, envp, job.pgid(), job.foreground, &self.terminal, io)?;
            job.add_process(Process::new(pid, argv.clone()));
            // The write end closes here; only the next stage keeps it open.
            upstream = downstream.map(|(read, _)| read);
        }
        Ok(())
    }

    /// Give the terminal to the foreground job, optionally continue it, and block until it
    /// stops or completes. A stopped job is moved into the job table.
    fn wait_for_foreground(&mut self, cont: bool, err: &mut dyn Write) -> ExitCode {
        let Some(pgid) = self.foreground.as_ref().and_then(Job::pgid) else {
            return 0;
        };
        let modes = self.foreground.as_mut().and_then(|job| job.resume_modes(cont));
        if let Err(e) = self.terminal.give(pgid, modes.as_ref()) {
            tracing::warn!(%pgid, err = %e, "could not give terminal to job");
        }
        if cont {
            if let Err(e) = killpg(pgid, Signal::SIGCONT) {
                tracing::warn!(%pgid, err = %e, "kill (SIGCONT)");
            }
        }

        self.wait_for_job(err);

        let job_modes = match self.terminal.reclaim() {
            Ok(modes) => modes,
            Err(e) => {
                tracing::warn!(err = %e, "could not reclaim terminal");
                None
            }
        };
        let Some(mut job) = self.foreground.take() else {
            return 0;
        };
        if job_modes.is_some() {
            job.tmodes = job_modes;
        }
        let code = job.exit_code();
        if job.is_completed() {
            return code;
        }

        job.foreground = false;
        let stopped = job.is_stopped();
        job.notified = stopped;
        let command = job.command.clone();
        match self.table.allocate(job) {
            Ok(id) if stopped => {
                let _ = writeln!(err, "[{id}] Stopped {command}");
            }
            Ok(id) => {
                let _ = writeln!(err, "[{id}] Running {command}");
            }
            Err(e) => {
                let _ = writeln!(err, "wsh: {e}");
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        }
        code
    }

    /// Targeted blocking wait: feed every child status change into the bookkeeping until the
    /// foreground job has stopped or completed.
    fn wait_for_job(&mut self, err: &mut dyn Write) {
        let _block = SigchldBlock::new();
        loop {
            for (pid, status) in self.reconciler.take_recorded() {
                self.mark(pid, status, err);
            }
            let settled = self
                .foreground
                .as_ref()
                .is_none_or(|job| job.is_stopped() || job.is_completed());
            if settled {
                return;
            }
            match self.reconciler.wait_any() {
                Ok(Some((pid, status))) => self.mark(pid, status, err),
                Ok(None) => {
                    tracing::warn!("no child processes left while waiting for the foreground job");
                    if let Some(job) = self.foreground.as_mut() {
                        for process in &mut job.processes {
                            process.completed = true;
                        }
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(err = %e, "waitpid");
                    return;
                }
            }
        }
    }

    /// Apply one status change to whichever job owns `pid`.
    fn mark(&mut self, pid: Pid, status: WaitStatus, err: &mut dyn Write) {
        if let WaitStatus::Signaled(_, signal, _) = status {
            let _ = writeln!(err, "{pid}: Terminated by signal {}.", signal.as_str());
        }
        if let Some(update) = self
            .foreground
            .as_mut()
            .and_then(|job| job.mark_process(pid, status))
        {
            tracing::debug!(%pid, ?update, "foreground job update");
            return;
        }
        match self.table.mark_process(pid, status) {
            Some((id, update)) => tracing::debug!(%pid, job = id, ?update, "job update"),
            None => tracing::debug!(%pid, ?status, "status for a child no job owns"),
        }
    }

    /// Feed a batch of collected status changes into the bookkeeping.
    pub fn apply(&mut self, changes: Vec<(Pid, WaitStatus)>, err: &mut dyn Write) {
        for (pid, status) in changes {
            self.mark(pid, status, err);
        }
    }

    /// Draining wait followed by user notification; run before every prompt.
    ///
    /// Completed jobs are reported and their ids released. Stopped jobs are reported once.
    pub fn notify(&mut self, err: &mut dyn Write) {
        self.refresh(err);
        self.report(err);
    }

    /// Apply every status change collected so far, so decisions see current job states.
    fn refresh(&mut self, err: &mut dyn Write) {
        let changes = self.reconciler.drain();
        self.apply(changes, err);
    }

    fn report(&mut self, err: &mut dyn Write) {
        for id in self.table.ids() {
            let Some(job) = self.table.find_mut(id) else {
                continue;
            };
            match job.state() {
                JobState::Completed => {
                    let label = match job.processes.last().and_then(Process::term_signal) {
                        Some(signal) => format!("Terminated ({})", signal.as_str()),
                        None => "Done".to_string(),
                    };
                    let _ = writeln!(err, "[{id}] {label} {}", job.command);
                    if let Err(e) = self.table.release(id) {
                        tracing::warn!(job = id, err = %e, "release");
                    }
                }
                JobState::Stopped if !job.notified => {
                    let _ = writeln!(err, "[{id}] Stopped {}", job.command);
                    job.notified = true;
                }
                _ => {}
            }
        }
    }

    /// The `jobs` listing: one line per job in ascending id order.
    pub fn list(&self, out: &mut dyn Write) -> io::Result<()> {
        for (id, job) in self.table.iter() {
            writeln!(out, "{}", job.listing(id))?;
        }
        Ok(())
    }

    /// Explicit id, or the highest id whose job matches `pred`.
    fn target(&self, id: Option<JobId>, pred: impl Fn(&Job) -> bool) -> Result<JobId, JobError> {
        match id {
            Some(id) => self.table.find(id).map(|_| id).ok_or(JobError::NoSuchJob(id)),
            None => self.table.highest(pred).ok_or(JobError::NoCurrentJob),
        }
    }

    /// `fg`: move a background or stopped job into the foreground and wait for it.
    pub fn resume_foreground(
        &mut self,
        id: Option<JobId>,
        err: &mut dyn Write,
    ) -> Result<ExitCode, JobError> {
        self.refresh(err);
        let id = self.target(id, |_| true)?;
        let mut job = self.table.take(id)?;
        let cont = job.state() == JobState::Stopped;
        job.mark_running();
        job.foreground = true;
        let _ = writeln!(err, "{}", job.command);
        tracing::debug!(job = id, cont, "resuming in foreground");
        self.foreground = Some(job);
        Ok(self.wait_for_foreground(cont, err))
    }

    /// `bg`: continue a stopped job without waiting for it.
    pub fn resume_background(
        &mut self,
        id: Option<JobId>,
        err: &mut dyn Write,
    ) -> Result<JobId, JobError> {
        self.refresh(err);
        let id = self.target(id, |job| job.state() == JobState::Stopped)?;
        let job = self.table.find_mut(id).ok_or(JobError::NoSuchJob(id))?;
        if job.state() != JobState::Stopped {
            return Err(JobError::AlreadyRunning(id));
        }
        job.mark_running();
        job.foreground = false;
        if let Some(pgid) = job.pgid() {
            if let Err(e) = killpg(pgid, Signal::SIGCONT) {
                tracing::warn!(%pgid, err = %e, "kill (SIGCONT)");
            }
        }
        let _ = writeln!(err, "[{id}] {} &", job.command);
        Ok(id)
    }

    /// Hang up every remaining job and take the terminal back; used when the shell exits.
    pub fn hang_up(&mut self) {
        for (id, job) in self.table.drain() {
            let Some(pgid) = job.pgid().filter(|_| !job.is_completed()) else {
                continue;
            };
            tracing::debug!(job = id, %pgid, "hanging up");
            let _ = killpg(pgid, Signal::SIGHUP);
            let _ = killpg(pgid, Signal::SIGCONT);
        }
        if let Err(e) = self.terminal.reclaim() {
            tracing::warn!(err = %e, "could not reclaim terminal");
        }
    }
}
