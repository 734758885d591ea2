//! Error types returned by the task queue and its supporting primitives.

use thiserror::Error;

/// The closed set of failures this crate can produce.
///
/// Unlike a broad host application, a task queue has a small, fixed failure
/// taxonomy: every failure is one of "I ran out of a bounded resource", "the
/// caller gave me something invalid", "the queue isn't in a state that
/// permits this", "the executor can't currently serve requests", or "a
/// timed wait didn't complete in time" - plus two failures specific to the
/// semaphore/task-graph machinery below.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A bounded resource (most often a [`BlockPool`](crate::arena::BlockPool))
    /// has no more capacity to satisfy the request.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A caller-supplied argument violates a precondition that can be
    /// checked without looking at queue state (e.g. a malformed batch).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The call is individually well-formed but the queue is not in a state
    /// that permits it right now (e.g. signalling a semaphore backwards).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// The executor cannot currently accept or run work.
    #[error("executor unavailable: {0}")]
    Unavailable(String),

    /// A bounded wait did not complete before its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A wait or signal targeted a semaphore that has already transitioned
    /// to a failure state; carries that original failure.
    #[error("semaphore already failed: {0}")]
    SemaphoreFailed(Box<Error>),

    /// A status forwarded from a command buffer or executor callback that
    /// doesn't warrant its own variant.
    #[error("{0}")]
    Propagated(String),
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
