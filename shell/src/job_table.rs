use crate::error::JobError;
use crate::job::{Job, JobId, JobUpdate};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::collections::{BTreeMap, BTreeSet};

/// Registry of background and stopped jobs, keyed by job id.
///
/// Ids are handed out smallest-free-first: released ids go onto a free list and are reused
/// before the table grows. Iteration is always in ascending id order.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: BTreeMap<JobId, Job>,
    free: BTreeSet<JobId>,
    /// One past the highest id currently in use or on the free list.
    next: JobId,
    /// `None` means unbounded.
    capacity: Option<usize>,
}

impl JobTable {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            jobs: BTreeMap::new(),
            free: BTreeSet::new(),
            next: 1,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|cap| self.jobs.len() >= cap)
    }

    /// Register `job` under the smallest free id.
    pub fn allocate(&mut self, job: Job) -> Result<JobId, JobError> {
        if let Some(cap) = self.capacity.filter(|_| self.is_full()) {
            return Err(JobError::TableFull(cap));
        }
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                let id = self.next;
                self.next += 1;
                id
            }
        };
        self.jobs.insert(id, job);
        Ok(id)
    }

    pub fn find(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn find_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn find_by_pgid(&self, pgid: Pid) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|(_, job)| job.pgid() == Some(pgid))
            .map(|(id, _)| *id)
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|(_, job)| job.contains(pid))
            .map(|(id, _)| *id)
    }

    /// Highest id whose job satisfies `pred`; the default target of `fg` and `bg`.
    pub fn highest(&self, pred: impl Fn(&Job) -> bool) -> Option<JobId> {
        self.jobs
            .iter()
            .rev()
            .find(|(_, job)| pred(job))
            .map(|(id, _)| *id)
    }

    /// Free the slot of a completed job.
    pub fn release(&mut self, id: JobId) -> Result<Job, JobError> {
        match self.jobs.get(&id) {
            None => Err(JobError::NoSuchJob(id)),
            Some(job) if !job.is_completed() => Err(JobError::NotCompleted(id)),
            Some(_) => self.take(id),
        }
    }

    /// Remove a job regardless of its state, e.g. when it moves into the foreground.
    pub fn take(&mut self, id: JobId) -> Result<Job, JobError> {
        let job = self.jobs.remove(&id).ok_or(JobError::NoSuchJob(id))?;
        self.free.insert(id);
        while self.next > 1 && self.free.remove(&(self.next - 1)) {
            self.next -= 1;
        }
        Ok(job)
    }

    /// Route a wait status to the job owning `pid`.
    ///
    /// Returns `None` when no registered job has that process.
    pub fn mark_process(&mut self, pid: Pid, status: WaitStatus) -> Option<(JobId, JobUpdate)> {
        let id = self.find_by_pid(pid)?;
        let update = self.jobs.get_mut(&id)?.mark_process(pid, status)?;
        Some((id, update))
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobId, &Job)> {
        self.jobs.iter().map(|(id, job)| (*id, job))
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.keys().copied().collect()
    }

    /// Empty the table, handing back every job in id order.
    pub fn drain(&mut self) -> Vec<(JobId, Job)> {
        self.free.clear();
        self.next = 1;
        std::mem::take(&mut self.jobs).into_iter().collect()
    }
}
