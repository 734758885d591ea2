//! Convenience re-export of the crate's everyday types.
//!
//! ```
//! use taskq_core::prelude::*;
//! ```

pub use crate::arena::{Arena, BlockPool};
pub use crate::command_buffer::{CommandBuffer, RecordedCommandBuffer};
pub use crate::error::{Error, Result};
pub use crate::executor::Executor;
pub use crate::queue::{QueueState, SemaphoreList, SubmissionBatch, TaskQueue};
pub use crate::semaphore::Semaphore;
pub use crate::task::CompletionTarget;
