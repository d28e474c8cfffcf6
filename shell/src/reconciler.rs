//! Turns `SIGCHLD` deliveries into `(pid, WaitStatus)` pairs for the control thread.
//!
//! The signal handler only reaps children with `waitpid(WNOHANG)` and pushes the raw
//! `(pid, status)` pairs into [`StatusQueue`], a fixed-size single-producer/single-consumer
//! ring of atomics. The job table is never touched from handler context; the control thread
//! pulls the pairs out with `SIGCHLD` blocked and applies them itself.

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{SigSet, SigmaskHow, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use signal_hook::SigId;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

const QUEUE_CAPACITY: usize = 128;

struct Slot {
    pid: AtomicI32,
    status: AtomicI32,
}

impl Slot {
    const fn new() -> Self {
        Self {
            pid: AtomicI32::new(0),
            status: AtomicI32::new(0),
        }
    }
}

/// Lock-free ring of raw wait results.
///
/// `push` is called from the signal handler and `pop` from the control thread, which blocks
/// `SIGCHLD` while popping, so at most one side runs at a time on the single control thread.
pub struct StatusQueue {
    slots: [Slot; QUEUE_CAPACITY],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl StatusQueue {
    pub const fn new() -> Self {
        Self {
            slots: [const { Slot::new() }; QUEUE_CAPACITY],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub fn is_full(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) >= QUEUE_CAPACITY
    }

    /// Returns `false` if the ring is full and the pair was dropped.
    pub fn push(&self, pid: i32, status: i32) -> bool {
        if self.is_full() {
            return false;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail % QUEUE_CAPACITY];
        slot.pid.store(pid, Ordering::Relaxed);
        slot.status.store(status, Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    pub fn pop(&self) -> Option<(i32, i32)> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let slot = &self.slots[head % QUEUE_CAPACITY];
        let pair = (
            slot.pid.load(Ordering::Relaxed),
            slot.status.load(Ordering::Relaxed),
        );
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(pair)
    }
}

impl Default for StatusQueue {
    fn default() -> Self {
        Self::new()
    }
}

static PENDING: StatusQueue = StatusQueue::new();

fn wait_flags() -> WaitPidFlag {
    WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED
}

/// Runs in signal context: only async-signal-safe calls below.
fn on_sigchld() {
    while !PENDING.is_full() {
        let mut status: libc::c_int = 0;
        let flags = libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED;
        let pid = unsafe { libc::waitpid(-1, &mut status, flags) };
        if pid <= 0 {
            break;
        }
        PENDING.push(pid, status);
    }
}

/// Keeps `SIGCHLD` blocked on the control thread while alive.
pub struct SigchldBlock {
    previous: Option<SigSet>,
}

impl SigchldBlock {
    pub fn new() -> Self {
        let mut set = SigSet::empty();
        set.add(Signal::SIGCHLD);
        let previous = match set.thread_swap_mask(SigmaskHow::SIG_BLOCK) {
            Ok(previous) => Some(previous),
            Err(err) => {
                tracing::warn!(%err, "could not block SIGCHLD");
                None
            }
        };
        Self { previous }
    }
}

impl Default for SigchldBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SigchldBlock {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(err) = previous.thread_set_mask() {
                tracing::warn!(%err, "could not restore signal mask");
            }
        }
    }
}

/// Owner of the `SIGCHLD` handler registration and the two wait strategies.
#[derive(Debug, Default)]
pub struct Reconciler {
    handler: Option<SigId>,
}

impl Reconciler {
    /// A reconciler that only polls; no handler is installed.
    pub fn new() -> Self {
        Self { handler: None }
    }

    /// Install the `SIGCHLD` handler that records child status changes as they happen.
    pub fn install() -> std::io::Result<Self> {
        let id = unsafe { signal_hook::low_level::register(libc::SIGCHLD, on_sigchld)? };
        tracing::debug!("SIGCHLD handler installed");
        Ok(Self { handler: Some(id) })
    }

    /// Draining wait: everything the handler recorded plus whatever `waitpid(WNOHANG)` still
    /// reports, without blocking.
    pub fn drain(&self) -> Vec<(Pid, WaitStatus)> {
        let _block = SigchldBlock::new();
        let mut changes = self.take_recorded();
        loop {
            match waitpid(Pid::from_raw(-1), Some(wait_flags() | WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => match status.pid() {
                    Some(pid) => changes.push((pid, status)),
                    None => break,
                },
                Err(Errno::ECHILD) => break,
                Err(Errno::EINTR) => continue,
                Err(err) => {
                    tracing::warn!(%err, "waitpid failed");
                    break;
                }
            }
        }
        changes
    }

    /// Pairs queued by the signal handler, decoded.
    ///
    /// Callers should hold a [`SigchldBlock`] so the handler cannot push concurrently.
    pub fn take_recorded(&self) -> Vec<(Pid, WaitStatus)> {
        let mut changes = Vec::new();
        while let Some((raw_pid, raw_status)) = PENDING.pop() {
            let pid = Pid::from_raw(raw_pid);
            match WaitStatus::from_raw(pid, raw_status) {
                Ok(status) => changes.push((pid, status)),
                Err(err) => tracing::warn!(%pid, raw_status, %err, "undecodable wait status"),
            }
        }
        changes
    }

    /// Blocking wait for a status change of any child.
    ///
    /// Must be called with `SIGCHLD` blocked, otherwise the handler may reap the change this
    /// call is waiting for. `Ok(None)` means there are no children left.
    pub fn wait_any(&self) -> nix::Result<Option<(Pid, WaitStatus)>> {
        loop {
            match waitpid(Pid::from_raw(-1), Some(wait_flags())) {
                Ok(status) => return Ok(status.pid().map(|pid| (pid, status))),
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => return Ok(None),
                Err(err) => return Err(err),
            }
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if let Some(id) = self.handler.take() {
            signal_hook::low_level::unregister(id);
        }
    }
}
