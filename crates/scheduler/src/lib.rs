//! Fire-and-forget task execution for short-lived render-side work.
//!
//! The renderer never owns threads itself. Anything that wants to run work off
//! the render thread receives a [`TaskScheduler`] and keeps the returned
//! [`TaskHandle`]s until it needs the results:
//!
//! - [`WorkerPool`] runs jobs on a fixed set of named worker threads fed by a
//!   `crossbeam-channel` queue.
//! - [`InlineScheduler`] runs every job during `submit`, which keeps tests
//!   deterministic.
//!
//! Jobs cannot be cancelled and waiting has no timeout.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("worker pool needs at least one thread")]
    NoThreads,
    #[error("failed to spawn worker thread {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Submission interface shared by the render thread and its helpers.
pub trait TaskScheduler: Send + Sync {
    /// Queues `job` and returns a handle that completes once it has run.
    fn submit(&self, job: Job) -> TaskHandle;

    /// Blocks until every handle has completed.
    fn wait_all(&self, handles: Vec<TaskHandle>) {
        for handle in handles {
            handle.wait();
        }
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Completion signal for one submitted job.
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    done: Receiver<()>,
}

impl TaskHandle {
    fn pair() -> (Self, Sender<()>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            done: rx,
        };
        (handle, tx)
    }

    fn completed() -> Self {
        let (handle, tx) = Self::pair();
        let _ = tx.send(());
        handle
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true once the job ran (or was dropped without running).
    pub fn is_finished(&self) -> bool {
        !self.done.is_empty()
            || matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until the job has run. A job that panicked or was discarded
    /// also counts as finished.
    pub fn wait(self) {
        let _ = self.done.recv();
    }
}

struct Task {
    job: Job,
    done: Sender<()>,
}

impl Task {
    fn run(self, worker: &str) {
        let Task { job, done } = self;
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(worker, "scheduled job panicked");
        }
        let _ = done.send(());
    }
}

/// Fixed-size pool of worker threads.
pub struct WorkerPool {
    queue: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, SchedulerError> {
        if threads == 0 {
            return Err(SchedulerError::NoThreads);
        }

        let (tx, rx) = crossbeam_channel::unbounded::<Task>();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = rx.clone();
            let name = format!("lumiere-worker-{index}");
            let worker = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    for task in rx.iter() {
                        task.run(&name);
                    }
                })
                .map_err(|source| SchedulerError::Spawn { index, source })?;
            workers.push(worker);
        }

        tracing::debug!(threads, "worker pool started");
        Ok(Self {
            queue: Some(tx),
            workers,
        })
    }

    /// Pool sized to the machine's available parallelism.
    pub fn with_default_threads() -> Result<Self, SchedulerError> {
        let threads = thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(4);
        Self::new(threads)
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

impl TaskScheduler for WorkerPool {
    fn submit(&self, job: Job) -> TaskHandle {
        let (handle, done) = TaskHandle::pair();
        let task = Task { job, done };
        let rejected = match &self.queue {
            Some(queue) => match queue.send(task) {
                Ok(()) => None,
                Err(err) => Some(err.into_inner()),
            },
            None => Some(task),
        };
        if let Some(task) = rejected {
            tracing::warn!("worker queue closed; running job on the caller thread");
            task.run("caller");
        }
        handle
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.queue.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("worker thread exited abnormally");
            }
        }
    }
}

/// Runs each job immediately on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl TaskScheduler for InlineScheduler {
    fn submit(&self, job: Job) -> TaskHandle {
        job();
        TaskHandle::completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn rejects_empty_pool() {
        assert!(matches!(WorkerPool::new(0), Err(SchedulerError::NoThreads)));
    }

    #[test]
    fn pool_runs_every_job_before_wait_returns() {
        let pool = WorkerPool::new(3).expect("pool");
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let counter = Arc::clone(&counter);
                pool.submit(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
            })
            .collect();
        pool.wait_all(handles);
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn panicking_job_still_completes_and_pool_survives() {
        let pool = WorkerPool::new(1).expect("pool");
        let handle = pool.submit(Box::new(|| panic!("boom")));
        handle.wait();

        let counter = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&counter);
        pool.submit(Box::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        }))
        .wait();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn inline_scheduler_runs_during_submit() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&counter);
        let handle = InlineScheduler.submit(Box::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
    }

    #[test]
    fn handles_carry_distinct_ids() {
        let first = InlineScheduler.submit(Box::new(|| {}));
        let second = InlineScheduler.submit(Box::new(|| {}));
        assert_ne!(first.id(), second.id());
    }
}
