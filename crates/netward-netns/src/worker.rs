//! Thread-affine namespace entry.
//!
//! `setns(2)` switches the namespace of the calling OS thread only, and the
//! switch persists until the thread switches back. Running it from an async
//! task would let the runtime migrate or interleave other tasks on a thread
//! whose namespace has been swapped out. Every namespace entry therefore
//! goes through a [`WorkerPool`] of dedicated `std::thread` workers: one
//! job at a time, pinned by construction, restored before reuse.

use netward_core::{Error, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, error, warn};

use nix::sched::{setns, CloneFlags};

/// Reference to the calling thread's current network namespace.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Scoped entry into a foreign network namespace.
///
/// Records the calling thread's namespace on entry and restores it via
/// [`NetnsGuard::restore`]. Dropping the guard without calling `restore`
/// attempts a best-effort switch back, but the caller cannot observe
/// whether it succeeded; the worker pool treats that path as poisoning.
pub struct NetnsGuard {
    original: OwnedFd,
    restored: bool,
}

impl NetnsGuard {
    /// Switch the calling thread into the namespace behind `target`.
    pub fn enter(target: BorrowedFd<'_>) -> Result<Self> {
        let original: OwnedFd = File::open(THREAD_NETNS)?.into();
        setns(target, CloneFlags::CLONE_NEWNET)
            .map_err(|e| Error::sys("setns(CLONE_NEWNET)", e))?;
        Ok(Self {
            original,
            restored: false,
        })
    }

    /// Switch the calling thread back to its original namespace.
    pub fn restore(mut self) -> Result<()> {
        setns(self.original.as_fd(), CloneFlags::CLONE_NEWNET)
            .map_err(|e| Error::sys("setns restore", e))?;
        self.restored = true;
        Ok(())
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(e) = setns(self.original.as_fd(), CloneFlags::CLONE_NEWNET) {
                error!(error = %e, "failed to restore thread namespace on drop");
            }
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// One pinned worker: a dedicated OS thread consuming jobs in order.
struct Worker {
    tx: mpsc::Sender<Job>,
    thread_name: String,
}

impl Worker {
    fn spawn(index: u64) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread_name = format!("netward-pinned-{index}");
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                // Ends when the pool drops the sender.
                while let Ok(job) = rx.recv() {
                    job();
                }
            })?;
        Ok(Self { tx, thread_name })
    }
}

/// Pool of pinned workers for in-namespace execution.
///
/// Workers are created on demand and returned to the pool only after their
/// namespace restoration has demonstrably completed. A worker whose job
/// overruns its budget, panics, or fails to restore is detached and never
/// reused; its thread exits once the stuck job (if any) finishes.
pub struct WorkerPool {
    idle: Mutex<Vec<Worker>>,
    max_idle: usize,
    spawned: std::sync::atomic::AtomicU64,
}

impl WorkerPool {
    /// Create a pool keeping at most `max_idle` workers for reuse.
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            spawned: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn checkout(&self) -> Result<Worker> {
        if let Some(worker) = self.idle.lock().pop() {
            return Ok(worker);
        }
        let index = self
            .spawned
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Worker::spawn(index)
    }

    fn check_in(&self, worker: Worker) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(worker);
        }
        // otherwise dropped: its thread exits on channel close
    }

    /// Run `work` inside the namespace behind `netns`, bounded by `budget`.
    ///
    /// The descriptor is duplicated into the worker; the caller's copy is
    /// untouched. On budget overrun the call returns [`Error::Timeout`] and
    /// the worker is retired, since its restore step cannot be assumed to
    /// have completed.
    pub fn run_in_netns<T, F>(&self, netns: BorrowedFd<'_>, budget: Duration, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let netns = netns.try_clone_to_owned()?;
        self.run_job(budget, move || {
            match NetnsGuard::enter(netns.as_fd()) {
                // Entry failed: the thread never switched, safe to reuse.
                Err(e) => (true, Err(e)),
                Ok(guard) => {
                    let value = work();
                    match guard.restore() {
                        Ok(()) => (true, Ok(value)),
                        // Restore failed: the worker is stranded in the
                        // foreign namespace and must never see another job.
                        Err(e) => (false, Err(e)),
                    }
                }
            }
        })
    }

    /// Run `work` on a pinned worker without switching namespace.
    ///
    /// Used for thread-scoped operations that must not migrate but stay in
    /// the current namespace, and by tests.
    pub fn run_pinned<T, F>(&self, budget: Duration, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.run_job(budget, move || (true, Ok(work())))
    }

    /// Execute one job, where the job reports `(reusable, outcome)`.
    fn run_job<T, F>(&self, budget: Duration, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> (bool, Result<T>) + Send + 'static,
    {
        let worker = self.checkout()?;
        let (done_tx, done_rx) = mpsc::channel::<(bool, Result<T>)>();

        let boxed: Job = Box::new(move || {
            let _ = done_tx.send(job());
        });

        if worker.tx.send(boxed).is_err() {
            return Err(Error::Sys("pinned worker exited unexpectedly".into()));
        }

        match done_rx.recv_timeout(budget) {
            Ok((reusable, outcome)) => {
                if reusable {
                    self.check_in(worker);
                } else {
                    warn!(worker = %worker.thread_name, "retiring worker: namespace not restored");
                    drop(worker);
                }
                outcome
            }
            Err(RecvTimeoutError::Timeout) => {
                // The worker may still be inside the foreign namespace.
                // Detach it; dropping the sender ends its loop once the
                // overrunning job finishes.
                warn!(worker = %worker.thread_name, ?budget, "retiring worker: budget exceeded");
                drop(worker);
                Err(Error::Timeout(budget))
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(worker = %worker.thread_name, "retiring worker: job panicked");
                drop(worker);
                Err(Error::Sys("in-namespace work unit panicked".into()))
            }
        }
    }
}
