//! A CPU-executed, HAL-style task queue.
//!
//! This crate reimplements the scheduling core of a GPU command-submission
//! HAL backend entirely on the CPU: callers submit batches of command
//! buffers gated by timeline semaphores, and the queue lowers each batch
//! into a small task graph (an optional wait task, an issue task, and a
//! retire task) that a worker pool runs to completion. Same-queue
//! submissions are always issued in FIFO order even though the command
//! buffers they contain, and their eventual retirement, may complete out of
//! order.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use taskq_core::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let executor = Executor::new(0)?;
//! let block_pool = BlockPool::new_default();
//! let queue = TaskQueue::new("main", executor, block_pool);
//!
//! let done = Semaphore::new(0);
//! let mut cmd = RecordedCommandBuffer::new();
//! cmd.push(|| Ok(()));
//!
//! let mut batch = SubmissionBatch::new();
//! batch.command_buffers.push(Arc::new(cmd));
//! batch.signal_semaphores.push((done.clone(), 1));
//!
//! queue.submit(&[batch])?;
//! queue.wait_idle(None)?;
//! assert_eq!(done.current_value()?, 1);
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;
#[macro_use]
extern crate derivative;

pub mod arena;
pub mod command_buffer;
pub mod error;
pub mod executor;
pub mod prelude;
mod queue;
mod semaphore;
mod task;

pub use crate::arena::{Arena, BlockPool};
pub use crate::command_buffer::{CommandBuffer, RecordedCommandBuffer};
pub use crate::error::{Error, Result};
pub use crate::executor::Executor;
pub use crate::queue::{QueueState, SemaphoreList, SubmissionBatch, TaskQueue};
pub use crate::semaphore::Semaphore;
pub use crate::task::CompletionTarget;
