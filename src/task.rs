//! The generalized join/barrier primitive the rest of the crate is built on.
//!
//! Every node in a submission's wait -> issue -> retire chain, every forked
//! command-buffer operation, and the completion fence handed back to a
//! queue's scope are all the same underlying [`Task`]: a body gated behind a
//! dependency counter. A task becomes ready exactly when every dependency
//! registered against it has arrived, at which point its body is dispatched
//! to the executor. Failures accumulate first-wins, so a task's reported
//! status reflects the first failure among any of its dependencies or its
//! own run, not merely whether its own body happened to return an `Err`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::executor::{Executor, Scope};

/// What a task represents, for logging and for the FIFO tail-tracking logic
/// in [`crate::queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    Wait,
    Issue,
    Retire,
    Fence,
}

struct Body {
    run: Box<dyn FnOnce(&Executor) -> Result<(), Error> + Send>,
    cleanup: Box<dyn FnOnce(Option<&Error>) + Send>,
}

/// A unit of work gated behind a dependency count.
///
/// A task may be constructed long before it is ready to run: dependencies
/// are registered with [`Task::add_dependency`] (for a source that will
/// eventually call [`Task::arrive`]) or with [`Task::add_completion`], which
/// additionally remembers `self` as a downstream edge to notify once `self`
/// finishes. A task can have any number of downstream completion edges -
/// the originating design's single "completion task" pointer is generalized
/// here to a list because the FIFO issue-order chain needs to attach a
/// second edge (the next batch's issue task) to a task that already has its
/// own structural edge (to its own retire task).
pub(crate) struct Task {
    kind: TaskKind,
    scope: Scope,
    pending: AtomicUsize,
    status: Mutex<Option<Error>>,
    body: Mutex<Option<Body>>,
    completions: Mutex<Vec<Arc<Task>>>,
}

impl Task {
    pub(crate) fn new(
        kind: TaskKind,
        scope: Scope,
        run: impl FnOnce(&Executor) -> Result<(), Error> + Send + 'static,
        cleanup: impl FnOnce(Option<&Error>) + Send + 'static,
    ) -> Arc<Task> {
        scope.begin();
        Arc::new(Task {
            kind,
            scope,
            pending: AtomicUsize::new(0),
            status: Mutex::new(None),
            body: Mutex::new(Some(Body {
                run: Box::new(run),
                cleanup: Box::new(cleanup),
            })),
            completions: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Register one dependency that will later be satisfied by a call to
    /// [`Task::arrive`] on `self` (used by callers that hold `self` but are
    /// not themselves a `Task`, e.g. a semaphore timepoint or a forked
    /// command-buffer closure).
    pub(crate) fn add_dependency(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Arm `target` as a downstream completion edge: `target` gains one
    /// pending dependency now, satisfied when `self` finishes running.
    pub(crate) fn add_completion(&self, target: &Arc<Task>) {
        target.add_dependency();
        self.completions.lock().unwrap().push(target.clone());
    }

    fn fail(&self, err: Error) {
        let mut slot = self.status.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn status(&self) -> Option<Error> {
        self.status.lock().unwrap().clone()
    }

    /// Dispatch this task now if every dependency registered against it
    /// before submission has already arrived; otherwise leave it alone and
    /// let the edge that eventually drives `pending` to zero dispatch it
    /// via [`Task::arrive`]. This is the only entry point the executor
    /// uses for a chain's head task - everything downstream of the head is
    /// driven purely by `arrive`, never by a second call here.
    pub(crate) fn submit(self: &Arc<Task>, executor: &Executor) {
        if self.pending.load(Ordering::Acquire) == 0 {
            executor.dispatch(self.clone());
        }
    }

    /// Satisfy one pending dependency, optionally carrying a failure from
    /// whatever just finished. Once every dependency has arrived the task's
    /// body is dispatched on `executor`.
    pub(crate) fn arrive(self: &Arc<Task>, executor: &Executor, err: Option<Error>) {
        if let Some(err) = err {
            self.fail(err);
        }
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            executor.dispatch(self.clone());
        }
    }

    /// Run this task's body, then notify every registered completion edge.
    /// Called by the executor once the task has no pending dependencies
    /// left. Runs at most once per task.
    pub(crate) fn run(self: &Arc<Task>, executor: &Executor) {
        let body = self.body.lock().unwrap().take();
        let Some(Body { run, cleanup }) = body else {
            debug_assert!(false, "task dispatched more than once");
            return;
        };
        trace!(
            "task {:?} running in scope {}",
            self.kind,
            self.scope.identifier()
        );
        if let Err(err) = run(executor) {
            self.fail(err);
        }
        let final_status = self.status();
        cleanup(final_status.as_ref());
        let completions = std::mem::take(&mut *self.completions.lock().unwrap());
        self.scope.end();
        for target in completions {
            target.arrive(executor, final_status.clone());
        }
    }
}

/// Handle a [`CommandBuffer`](crate::command_buffer::CommandBuffer) uses to
/// report the outcome of forked work back to the task that is waiting on
/// it (the batch's retire task).
#[derive(Clone)]
pub struct CompletionTarget(pub(crate) Arc<Task>);

impl CompletionTarget {
    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;

    #[test]
    fn a_task_can_carry_more_than_one_completion_edge() {
        // The FIFO tail-chaining logic in `crate::queue` needs a single
        // issue task to notify both its own retire task and (when chained)
        // the next batch's issue task, so `completions` is a list rather
        // than a single slot.
        let executor = Executor::new(1).unwrap();
        let scope = executor.new_scope("test");
        let fired = Arc::new(AtomicUsize::new(0));

        let source = Task::new(TaskKind::Issue, scope.clone(), |_| Ok(()), |_| {});

        let mut downstream = Vec::new();
        for _ in 0..2 {
            let fired = fired.clone();
            let t = Task::new(
                TaskKind::Fence,
                scope.clone(),
                move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                |_| {},
            );
            source.add_completion(&t);
            downstream.push(t);
        }

        executor.submit_task(source);
        scope.wait_idle(None).unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn a_failure_latches_as_first_failure_and_propagates_to_completions() {
        let executor = Executor::new(1).unwrap();
        let scope = executor.new_scope("test");
        let observed = Arc::new(Mutex::new(None));

        let source = Task::new(
            TaskKind::Issue,
            scope.clone(),
            |_| Err(Error::Propagated("first".into())),
            |_| {},
        );
        let observed_in_cleanup = observed.clone();
        let downstream = Task::new(
            TaskKind::Fence,
            scope.clone(),
            |_| Ok(()),
            move |status| {
                *observed_in_cleanup.lock().unwrap() = status.cloned();
            },
        );
        source.add_completion(&downstream);

        executor.submit_task(source);
        scope.wait_idle(None).unwrap();

        assert!(matches!(
            observed.lock().unwrap().as_ref(),
            Some(Error::Propagated(msg)) if msg == "first"
        ));
    }
}
