//! The consumer-side harness around the task processor.
//!
//! Workers drain the duplication queue: take a task, resolve its source and
//! destination providers, run the [`DuplicationTaskProcessor`], and delete
//! the task on success. A failed task is simply left in flight: the queue's
//! visibility timeout redrives it, and the processor's idempotence absorbs
//! the re-execution. Dead-letter routing is a deployment concern and lives
//! outside this crate.
//!
//! Visibility is extended once before the processor runs, so long copies do
//! not expire mid-flight; each execution increments the task's attempt
//! counter.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::processor::DuplicationTaskProcessor;
use crate::queue::{QueueError, TaskQueue};
use crate::retry::RetryConfig;
use crate::storage::{StorageError, StorageProviderFactory};
use crate::types::{DuplicationTask, Task};

/// Errors that abort the worker loop itself (task-level failures do not).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Counters for one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    /// Tasks processed and acknowledged.
    pub succeeded: usize,

    /// Tasks that failed and were left for redelivery.
    pub failed: usize,

    /// Malformed envelopes deleted without processing.
    pub poisoned: usize,
}

/// Takes tasks from the queue and runs the processor over them.
pub struct TaskWorker<Q, F>
where
    Q: TaskQueue,
    F: StorageProviderFactory,
{
    queue: Q,
    factory: F,
    retry: RetryConfig,
}

impl<Q, F> TaskWorker<Q, F>
where
    Q: TaskQueue,
    F: StorageProviderFactory,
{
    pub fn new(queue: Q, factory: F) -> Self {
        TaskWorker {
            queue,
            factory,
            retry: RetryConfig::DEFAULT,
        }
    }

    /// Overrides the retry schedule (tests use a fast one).
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Processes tasks until the queue is empty or shutdown is requested.
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<DrainStats, WorkerError> {
        let mut stats = DrainStats::default();

        loop {
            if cancel.is_cancelled() {
                info!("shutdown requested, stopping worker");
                return Ok(stats);
            }

            let task = match self.queue.take().await {
                Ok(task) => task,
                Err(QueueError::Timeout) => return Ok(stats),
                Err(e) => return Err(e.into()),
            };

            self.process_one(task, &mut stats).await?;
        }
    }

    /// Runs one task through the processor and settles it with the queue.
    async fn process_one(&self, mut task: Task, stats: &mut DrainStats) -> Result<(), WorkerError> {
        task.attempts += 1;

        let dup_task = match DuplicationTask::read_task(&task) {
            Ok(dup_task) => dup_task,
            Err(e) => {
                // A malformed envelope can never succeed; deleting it is the
                // only way to keep it from cycling through redelivery.
                error!(%task, error = %e, "deleting malformed task envelope");
                self.queue.delete(&task).await?;
                stats.poisoned += 1;
                return Ok(());
            }
        };

        debug!(%dup_task, attempts = task.attempts, "processing task");

        // Give the processor a full visibility window even if the task sat
        // in flight before us.
        self.queue.extend_visibility(&task).await?;

        let source_store = self
            .factory
            .create(&dup_task.account, &dup_task.source_store_id)
            .await?;
        let dest_store = self
            .factory
            .create(&dup_task.account, &dup_task.dest_store_id)
            .await?;

        let processor = DuplicationTaskProcessor::new(dup_task, source_store, dest_store)
            .with_retry_config(self.retry);

        match processor.execute().await {
            Ok(()) => {
                self.queue.delete(&task).await?;
                stats.succeeded += 1;
            }
            Err(e) => {
                // Left in flight: the visibility timeout will redrive it.
                warn!(%task, attempts = task.attempts, error = %e, "task execution failed");
                stats.failed += 1;
            }
        }
        Ok(())
    }
}
