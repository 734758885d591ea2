//! Monotonic timeline semaphores: the sole cross-task synchronization
//! primitive the queue uses to gate issuing on external (or same-queue)
//! progress.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::task::CompletionTarget;

struct State {
    current: u64,
    failure: Option<Error>,
    waiters: Vec<(u64, CompletionTarget)>,
}

/// A monotonically increasing counter that tasks can wait on reaching a
/// value, or fail, forwarding that failure to every waiter.
///
/// Retaining and releasing a semaphore is just cloning and dropping the
/// `Arc` this type is always handed out behind - Rust's ownership already
/// gives the originating design's manual retain/release counting for free.
pub struct Semaphore {
    inner: Mutex<State>,
}

impl Semaphore {
    pub fn new(initial_value: u64) -> Arc<Semaphore> {
        Arc::new(Semaphore {
            inner: Mutex::new(State {
                current: initial_value,
                failure: None,
                waiters: Vec::new(),
            }),
        })
    }

    pub fn current_value(&self) -> Result<u64> {
        let st = self.inner.lock().unwrap();
        match &st.failure {
            Some(err) => Err(Error::SemaphoreFailed(Box::new(err.clone()))),
            None => Ok(st.current),
        }
    }

    /// Advance the semaphore to `value`, which must exceed the current
    /// value, waking any timepoints this satisfies.
    pub fn signal(&self, value: u64, executor: &Executor) -> Result<()> {
        let mut st = self.inner.lock().unwrap();
        if let Some(err) = &st.failure {
            return Err(Error::SemaphoreFailed(Box::new(err.clone())));
        }
        if value <= st.current {
            return Err(Error::FailedPrecondition(format!(
                "signal value {value} does not exceed current value {}",
                st.current
            )));
        }
        st.current = value;
        let mut ready = Vec::new();
        st.waiters.retain(|(at, target)| {
            if *at <= value {
                ready.push(target.clone());
                false
            } else {
                true
            }
        });
        drop(st);
        for target in ready {
            target.task().arrive(executor, None);
        }
        Ok(())
    }

    /// Latch the semaphore into a permanent failure state, forwarding it to
    /// every timepoint currently waiting. Idempotent: once failed, later
    /// calls are no-ops. A signal that already happened before the failure
    /// is not retracted.
    pub fn fail(&self, err: Error, executor: &Executor) {
        let mut st = self.inner.lock().unwrap();
        if st.failure.is_some() {
            return;
        }
        st.failure = Some(err.clone());
        let waiters = std::mem::take(&mut st.waiters);
        drop(st);
        for (_, target) in waiters {
            target
                .task()
                .arrive(executor, Some(Error::SemaphoreFailed(Box::new(err.clone()))));
        }
    }

    /// Register `target` as waiting for this semaphore to reach `value`.
    ///
    /// If the value has already been reached, this resolves inline without
    /// storing any waiter entry (elision): a task's wait on an
    /// already-signalled same-queue semaphore costs nothing beyond this
    /// call, with no waiter bookkeeping left behind. If the semaphore has
    /// already failed, the failure is forwarded to `target` immediately and
    /// this call itself returns an error so the caller's timepoint loop
    /// stops issuing further waits.
    pub fn enqueue_timepoint(&self, value: u64, target: &CompletionTarget, executor: &Executor) -> Result<()> {
        target.task().add_dependency();
        let mut st = self.inner.lock().unwrap();
        if let Some(err) = &st.failure {
            let err = err.clone();
            drop(st);
            target
                .task()
                .arrive(executor, Some(Error::SemaphoreFailed(Box::new(err.clone()))));
            return Err(Error::SemaphoreFailed(Box::new(err)));
        }
        if st.current >= value {
            drop(st);
            target.task().arrive(executor, None);
            return Ok(());
        }
        st.waiters.push((value, target.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::task::{Task, TaskKind};

    fn completion_target(executor: &Executor) -> CompletionTarget {
        let scope = executor.new_scope("test");
        CompletionTarget(Task::new(TaskKind::Fence, scope, |_| Ok(()), |_| {}))
    }

    #[test]
    fn already_satisfied_timepoint_elides_without_registering_a_waiter() {
        let executor = Executor::new(1).unwrap();
        let sem = Semaphore::new(5);
        let target = completion_target(&executor);

        sem.enqueue_timepoint(5, &target, &executor).unwrap();

        assert!(sem.inner.lock().unwrap().waiters.is_empty());
    }

    #[test]
    fn unsatisfied_timepoint_registers_a_waiter_until_signaled() {
        let executor = Executor::new(1).unwrap();
        let sem = Semaphore::new(0);
        let target = completion_target(&executor);

        sem.enqueue_timepoint(3, &target, &executor).unwrap();
        assert_eq!(sem.inner.lock().unwrap().waiters.len(), 1);

        sem.signal(3, &executor).unwrap();
        assert!(sem.inner.lock().unwrap().waiters.is_empty());
    }

    #[test]
    fn signal_below_current_value_is_a_failed_precondition() {
        let executor = Executor::new(1).unwrap();
        let sem = Semaphore::new(5);

        let err = sem.signal(5, &executor).unwrap_err();
        assert!(matches!(err, Error::FailedPrecondition(_)));
        assert_eq!(sem.current_value().unwrap(), 5);
    }

    #[test]
    fn fail_is_idempotent_and_does_not_retract_an_earlier_signal() {
        let executor = Executor::new(1).unwrap();
        let sem = Semaphore::new(0);

        sem.signal(3, &executor).unwrap();
        sem.fail(Error::Propagated("first".into()), &executor);
        sem.fail(Error::Propagated("second".into()), &executor);

        match sem.current_value().unwrap_err() {
            Error::SemaphoreFailed(inner) => assert!(matches!(*inner, Error::Propagated(msg) if msg == "first")),
            other => panic!("expected SemaphoreFailed, got {other:?}"),
        }
    }

    #[test]
    fn enqueue_timepoint_on_a_failed_semaphore_forwards_the_failure() {
        let executor = Executor::new(1).unwrap();
        let sem = Semaphore::new(0);
        sem.fail(Error::Propagated("boom".into()), &executor);

        let target = completion_target(&executor);
        let err = sem.enqueue_timepoint(1, &target, &executor).unwrap_err();
        assert!(matches!(err, Error::SemaphoreFailed(_)));
    }
}
