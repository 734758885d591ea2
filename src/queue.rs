//! The task queue itself: lowers a submission batch into a wait -> issue ->
//! retire task chain, wires cross-batch FIFO ordering, and exposes
//! `wait_idle` over the queue's scope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::arena::{semaphore_list_charge, Arena, BlockPool};
use crate::command_buffer::CommandBuffer;
use crate::error::Result;
use crate::executor::{Executor, Scope};
use crate::semaphore::Semaphore;
use crate::task::{CompletionTarget, Task, TaskKind};

const RETIRE_RECORD_CHARGE: usize = 96;
const ISSUE_RECORD_CHARGE: usize = 64;
const WAIT_RECORD_CHARGE: usize = 48;
const COMMAND_BUFFER_SLOT_CHARGE: usize = std::mem::size_of::<usize>();

/// Opaque per-queue state handed to command buffers at issue time. Carries
/// nothing the core cares about; the reference
/// [`RecordedCommandBuffer`](crate::command_buffer::RecordedCommandBuffer)
/// uses it only to label forked operations for logging.
#[derive(Clone, Default)]
pub struct QueueState {
    inner: Arc<QueueStateInner>,
}

#[derive(Default)]
struct QueueStateInner {
    next_op_id: AtomicU64,
}

impl QueueState {
    pub fn new() -> QueueState {
        QueueState::default()
    }

    pub(crate) fn next_op_id(&self) -> u64 {
        self.inner.next_op_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// A list of `(semaphore, timeline value)` pairs, as used for both a
/// batch's wait and signal sets.
pub type SemaphoreList = Vec<(Arc<Semaphore>, u64)>;

/// One submission: command buffers to run, the timepoints they must wait
/// on before issuing, and the timepoints they signal once retired.
#[derive(Default)]
pub struct SubmissionBatch {
    pub wait_semaphores: SemaphoreList,
    pub signal_semaphores: SemaphoreList,
    pub command_buffers: Vec<Arc<dyn CommandBuffer>>,
}

impl SubmissionBatch {
    pub fn new() -> SubmissionBatch {
        SubmissionBatch::default()
    }
}

/// A CPU-executed, HAL-style task queue.
///
/// Submitting a batch lowers it into up to three tasks - an optional wait
/// task, an issue task, and a retire task - wired as a linear chain, plus a
/// same-queue FIFO edge from the previous batch's issue task so that issue
/// order always matches submission order even though retirement (and the
/// command buffers' own forked work) may complete out of order.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct QueueInner {
    identifier: String,
    #[derivative(Debug = "ignore")]
    executor: Executor,
    #[derivative(Debug = "ignore")]
    block_pool: Arc<BlockPool>,
    #[derivative(Debug = "ignore")]
    scope: Scope,
    state: QueueState,
    #[derivative(Debug = "ignore")]
    tail_issue: Mutex<Option<(Weak<Task>, u64)>>,
    seq: AtomicU64,
}

impl TaskQueue {
    pub fn new(identifier: impl Into<String>, executor: Executor, block_pool: Arc<BlockPool>) -> TaskQueue {
        let identifier = identifier.into();
        debug!("initializing task queue {identifier}");
        let scope = executor.new_scope(identifier.clone());
        TaskQueue {
            inner: Arc::new(QueueInner {
                identifier,
                executor,
                block_pool,
                scope,
                state: QueueState::new(),
                tail_issue: Mutex::new(None),
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    /// Submit every batch in order. Batches within the call are lowered and
    /// dispatched back to back; `wait_idle` is the only way to block for
    /// completion.
    pub fn submit(&self, batches: &[SubmissionBatch]) -> Result<()> {
        for batch in batches {
            self.submit_batch(batch)?;
        }
        self.inner.executor.flush();
        Ok(())
    }

    fn submit_batch(&self, batch: &SubmissionBatch) -> Result<()> {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        trace!("queue {} submitting batch {seq}", self.inner.identifier);

        // Arena allocation: charged in the same order the originating
        // design allocates it in, so a block-pool exhaustion surfaces at
        // the same point. Any `?` here drops `arena` immediately, releasing
        // whatever had already been charged - no explicit unwind needed.
        let mut arena = Arena::new(self.inner.block_pool.clone());
        arena.charge(RETIRE_RECORD_CHARGE)?;
        let signal_semaphores = batch.signal_semaphores.clone();
        arena.charge(semaphore_list_charge(signal_semaphores.len()))?;

        arena.charge(ISSUE_RECORD_CHARGE + batch.command_buffers.len() * COMMAND_BUFFER_SLOT_CHARGE)?;
        let command_buffers = batch.command_buffers.clone();

        let wait_semaphores = if batch.wait_semaphores.is_empty() {
            None
        } else {
            arena.charge(WAIT_RECORD_CHARGE)?;
            let cloned = batch.wait_semaphores.clone();
            arena.charge(semaphore_list_charge(cloned.len()))?;
            Some(cloned)
        };

        let retire_task = self.make_retire_task(seq, arena, signal_semaphores);
        let fence = self.inner.executor.acquire_fence(&self.inner.scope);
        retire_task.add_completion(&fence);

        let issue_task = self.make_issue_task(seq, &retire_task, command_buffers);

        let wait_task = wait_semaphores.map(|ws| self.make_wait_task(ws, &issue_task));
        let head = wait_task.unwrap_or_else(|| issue_task.clone());

        {
            let mut tail = self.inner.tail_issue.lock().unwrap();
            if let Some(prev) = tail.as_ref().and_then(|(weak, _)| weak.upgrade()) {
                // Same-queue FIFO ordering: the previous batch's issue task
                // gets a second completion edge, in addition to its own
                // structural edge to its own retire task, so the new
                // batch's issue can't start before the previous one has
                // finished issuing. This also leaves `issue_task` with a
                // pending dependency at submission time; `submit_task`
                // below only dispatches a task once `pending == 0`, so
                // `head` (== issue_task here, since there were no waits)
                // does not actually start until `prev`'s own completion
                // fires it.
                prev.add_completion(&issue_task);
            }
            *tail = Some((Arc::downgrade(&issue_task), seq));
        }

        self.inner.executor.submit_task(head);
        Ok(())
    }

    fn make_retire_task(&self, seq: u64, arena: Arena, signal_semaphores: SemaphoreList) -> Arc<Task> {
        let executor_for_run = self.inner.executor.clone();
        let executor_for_cleanup = self.inner.executor.clone();
        let identifier = self.inner.identifier.clone();
        let run_signals = signal_semaphores.clone();
        let cleanup_signals = signal_semaphores;

        Task::new(
            TaskKind::Retire,
            self.inner.scope.clone(),
            move |_executor| {
                for (semaphore, value) in &run_signals {
                    semaphore.signal(*value, &executor_for_run)?;
                }
                Ok(())
            },
            move |status| {
                if let Some(err) = status {
                    warn!(
                        "queue {identifier} batch {seq} retire failed ({err}); failing {} signal semaphores",
                        cleanup_signals.len()
                    );
                    for (semaphore, _) in &cleanup_signals {
                        semaphore.fail(err.clone(), &executor_for_cleanup);
                    }
                }
                // `arena` is dropped here, releasing its charged blocks -
                // the Rust-native replacement for the self-hosted arena
                // freeing itself as the retire command's last act.
                drop(arena);
            },
        )
    }

    fn make_issue_task(&self, seq: u64, retire_task: &Arc<Task>, command_buffers: Vec<Arc<dyn CommandBuffer>>) -> Arc<Task> {
        let state = self.inner.state.clone();
        let target = CompletionTarget(retire_task.clone());
        let inner = self.inner.clone();
        let identifier = self.inner.identifier.clone();

        let issue_task = Task::new(
            TaskKind::Issue,
            self.inner.scope.clone(),
            move |executor| {
                trace!(
                    "queue {identifier} batch {seq} issuing {} command buffer(s)",
                    command_buffers.len()
                );
                for cb in &command_buffers {
                    cb.issue(&state, &target, executor)?;
                }
                Ok(())
            },
            move |_status| {
                let mut tail = inner.tail_issue.lock().unwrap();
                if matches!(&*tail, Some((_, tail_seq)) if *tail_seq == seq) {
                    *tail = None;
                }
            },
        );
        issue_task.add_completion(retire_task);
        issue_task
    }

    fn make_wait_task(&self, wait_semaphores: SemaphoreList, issue_task: &Arc<Task>) -> Arc<Task> {
        let target = CompletionTarget(issue_task.clone());

        let wait_task = Task::new(
            TaskKind::Wait,
            self.inner.scope.clone(),
            move |executor| {
                for (semaphore, value) in &wait_semaphores {
                    semaphore.enqueue_timepoint(*value, &target, executor)?;
                }
                Ok(())
            },
            move |_status| {},
        );
        wait_task.add_completion(issue_task);
        wait_task
    }

    /// Block until every task submitted to this queue has fully finished
    /// (including retire cleanup), or until `timeout` elapses.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> Result<()> {
        debug!("queue {} wait_idle enter", self.inner.identifier);
        let deadline = timeout.map(|d| Instant::now() + d);
        let result = self.inner.scope.wait_idle(deadline);
        match &result {
            Ok(()) => debug!("queue {} wait_idle exit (idle)", self.inner.identifier),
            Err(err) => warn!("queue {} wait_idle exit ({err})", self.inner.identifier),
        }
        result
    }

    pub fn outstanding_count(&self) -> usize {
        self.inner.scope.outstanding_count()
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        debug!("deinitializing task queue {}", self.identifier);
        let _ = self.scope.wait_idle(None);
    }
}
