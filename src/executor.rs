//! The worker pool that runs task bodies, and the [`Scope`] used to track
//! how many tasks submitted under a queue are still outstanding.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::task::{CompletionTarget, Task, TaskKind};

/// Runs task bodies and forked command-buffer work on a shared thread pool.
///
/// Cheap to clone: internally just an `Arc` around the pool.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Executor {
    #[derivative(Debug = "ignore")]
    inner: Arc<rayon::ThreadPool>,
}

impl Executor {
    /// Build an executor backed by a rayon thread pool with `num_threads`
    /// workers. `0` defers to rayon's own default (one worker per core).
    pub fn new(num_threads: usize) -> Result<Executor> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("taskq-worker-{i}"));
        if num_threads > 0 {
            builder = builder.num_threads(num_threads);
        }
        let pool = builder
            .build()
            .map_err(|e| Error::Unavailable(format!("failed to start worker pool: {e}")))?;
        Ok(Executor { inner: Arc::new(pool) })
    }

    pub(crate) fn new_scope(&self, identifier: impl Into<String>) -> Scope {
        Scope::new(identifier)
    }

    /// Acquire a completion sink whose sole job is to decrement `scope`'s
    /// outstanding count once it runs. Queues wire this as an extra
    /// completion edge off of the retire task so that `wait_idle` observes
    /// retirement (and not merely issuing) as the end of a submission.
    pub(crate) fn acquire_fence(&self, scope: &Scope) -> Arc<Task> {
        Task::new(TaskKind::Fence, scope.clone(), |_| Ok(()), |_| {})
    }

    /// Hand a chain's head task to the executor. The task only actually
    /// runs once it has no unmet dependencies left - a FIFO-chained issue
    /// task is submitted here with a pending edge already registered
    /// against the previous batch's issue task, and must wait for that
    /// edge's `arrive` to dispatch it rather than running immediately.
    pub(crate) fn submit_task(&self, task: Arc<Task>) {
        task.submit(self);
    }

    pub(crate) fn dispatch(&self, task: Arc<Task>) {
        let exec = self.clone();
        self.inner.spawn(move || task.run(&exec));
    }

    /// Spawn an independent unit of work whose completion (success or
    /// failure) arrives at `target`. This is how a [`CommandBuffer`]
    /// (crate::command_buffer::CommandBuffer) forks its operations onto the
    /// pool: each forked closure holds one of `target`'s pending
    /// dependencies until it finishes.
    pub fn fork(&self, target: &CompletionTarget, body: impl FnOnce() -> Result<()> + Send + 'static) {
        target.task().add_dependency();
        let exec = self.clone();
        let target_task = target.task().clone();
        self.inner.spawn(move || {
            let result = body();
            target_task.arrive(&exec, result.err());
        });
    }

    /// No-op: this executor dispatches every ready task immediately, so
    /// there is no batched submission to release.
    pub(crate) fn flush(&self) {
        trace!("executor flush (no-op, dispatch is immediate)");
    }
}

/// Tracks how many tasks created under a queue have not yet finished
/// (cleanup included), so that `wait_idle` can block until the count
/// reaches zero.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub(crate) struct Scope {
    identifier: String,
    outstanding: Arc<AtomicUsize>,
    #[derivative(Debug = "ignore")]
    lock: Arc<Mutex<()>>,
    #[derivative(Debug = "ignore")]
    cv: Arc<Condvar>,
}

impl Scope {
    fn new(identifier: impl Into<String>) -> Scope {
        Scope {
            identifier: identifier.into(),
            outstanding: Arc::new(AtomicUsize::new(0)),
            lock: Arc::new(Mutex::new(())),
            cv: Arc::new(Condvar::new()),
        }
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn outstanding_count(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub(crate) fn begin(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn end(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.lock.lock().unwrap();
            self.cv.notify_all();
        }
    }

    /// Block until every task created under this scope has finished, or
    /// until `deadline` passes.
    pub(crate) fn wait_idle(&self, deadline: Option<Instant>) -> Result<()> {
        let mut guard = self.lock.lock().unwrap();
        loop {
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return Ok(());
            }
            guard = match deadline {
                None => self.cv.wait(guard).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::DeadlineExceeded);
                    }
                    let (guard, timeout) = self.cv.wait_timeout(guard, deadline - now).unwrap();
                    if timeout.timed_out() && self.outstanding.load(Ordering::Acquire) != 0 {
                        return Err(Error::DeadlineExceeded);
                    }
                    guard
                }
            };
        }
    }
}
