//! The external contract a submitted unit of work implements, plus a small
//! reference implementation used by the queue's own tests.

use std::sync::Arc;

use crate::error::Result;
use crate::executor::Executor;
use crate::queue::QueueState;
use crate::task::CompletionTarget;

/// A recorded unit of work a batch submits to a queue.
///
/// `issue` runs once, on an issue task's worker thread, and is responsible
/// for forking whatever actual work the command buffer represents onto
/// `executor` via [`Executor::fork`], each forked closure reporting back to
/// `target`. A command buffer with no work to fork (an empty recording) may
/// simply return `Ok(())`; the surrounding issue task's own structural edge
/// to the retire task still fires normally.
pub trait CommandBuffer: Send + Sync {
    fn issue(&self, state: &QueueState, target: &CompletionTarget, executor: &Executor) -> Result<()>;
}

/// A command buffer recorded as a flat list of closures, each becoming one
/// forked worker task when issued. Reusable across multiple submissions
/// since each op is an `Fn`, not an `FnOnce`.
#[derive(Default)]
pub struct RecordedCommandBuffer {
    ops: Vec<Arc<dyn Fn() -> Result<()> + Send + Sync>>,
}

impl RecordedCommandBuffer {
    pub fn new() -> RecordedCommandBuffer {
        RecordedCommandBuffer { ops: Vec::new() }
    }

    /// Append one operation to the recording. Returns `&mut self` for
    /// chaining.
    pub fn push(&mut self, op: impl Fn() -> Result<()> + Send + Sync + 'static) -> &mut Self {
        self.ops.push(Arc::new(op));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl CommandBuffer for RecordedCommandBuffer {
    fn issue(&self, state: &QueueState, target: &CompletionTarget, executor: &Executor) -> Result<()> {
        for op in &self.ops {
            let op = op.clone();
            let id = state.next_op_id();
            executor.fork(target, move || {
                trace!("running recorded op {id}");
                op()
            });
        }
        Ok(())
    }
}
