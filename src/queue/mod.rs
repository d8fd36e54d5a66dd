//! The durable task queue contract.
//!
//! At-least-once, FIFO-ish delivery with visibility timeouts: a taken task
//! stays invisible until it is deleted or its visibility expires, at which
//! point the queue redrives it. `size` is advisory (it may lag) and is
//! consumed by the producer purely as a backpressure signal.

use std::future::Future;

use thiserror::Error;

use crate::retry::{Classify, ErrorKind};
use crate::types::Task;

pub mod local;

/// Producer-side batch size for `put_batch`.
pub const PUT_BATCH_SIZE: usize = 10;

/// Errors surfaced by queue implementations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// `take` found nothing to deliver.
    #[error("timed out waiting for a task")]
    Timeout,

    /// The task is not currently in flight (already deleted, or its
    /// visibility expired and it was redriven).
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The queue backend is unreachable.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl Classify for QueueError {
    fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Timeout => ErrorKind::Transient,
            QueueError::TaskNotFound(_) => ErrorKind::NotFound,
            QueueError::Unavailable(_) => ErrorKind::Transient,
        }
    }
}

/// Durable, at-least-once task queue.
pub trait TaskQueue: Send + Sync {
    /// Enqueues a batch of tasks. Best-effort atomic; callers batch in
    /// groups of [`PUT_BATCH_SIZE`].
    fn put_batch(
        &self,
        tasks: Vec<Task>,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Takes the next visible task, failing with `Timeout` when empty.
    fn take(&self) -> impl Future<Output = Result<Task, QueueError>> + Send;

    /// Extends the visibility timeout of an in-flight task.
    fn extend_visibility(
        &self,
        task: &Task,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Acknowledges an in-flight task, removing it permanently.
    fn delete(&self, task: &Task) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Approximate count of visible tasks. Advisory: may lag reality.
    fn size(&self) -> impl Future<Output = Result<usize, QueueError>> + Send;
}
