//! In-process task queue.
//!
//! Implements the full queue contract (visibility deadlines, redelivery,
//! completed-task accounting) against a mutex-guarded ring buffer. Backs the
//! driver binary in local deployments and every scenario test.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::types::Task;

use super::{QueueError, TaskQueue};

/// Default visibility window for taken tasks.
const DEFAULT_VISIBILITY: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct InFlight {
    task: Task,
    visible_again_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    ready: VecDeque<Task>,
    in_flight: Vec<InFlight>,
    completed: u64,
}

impl Inner {
    /// Moves expired in-flight tasks back to the tail of the ready queue.
    fn redrive_expired(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].visible_again_at <= now {
                let expired = self.in_flight.swap_remove(i);
                self.ready.push_back(expired.task);
            } else {
                i += 1;
            }
        }
    }
}

/// A mutex-guarded FIFO queue with visibility timeouts.
#[derive(Debug, Clone)]
pub struct LocalTaskQueue {
    inner: Arc<Mutex<Inner>>,
    visibility: Duration,
}

impl LocalTaskQueue {
    pub fn new() -> Self {
        Self::with_visibility(DEFAULT_VISIBILITY)
    }

    pub fn with_visibility(visibility: Duration) -> Self {
        LocalTaskQueue {
            inner: Arc::new(Mutex::new(Inner::default())),
            visibility,
        }
    }

    /// Number of tasks taken but not yet deleted.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().unwrap().in_flight.len()
    }

    /// Number of tasks acknowledged since construction.
    pub fn completed_count(&self) -> u64 {
        self.inner.lock().unwrap().completed
    }
}

impl Default for LocalTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue for LocalTaskQueue {
    async fn put_batch(&self, tasks: Vec<Task>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ready.extend(tasks);
        Ok(())
    }

    async fn take(&self) -> Result<Task, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        inner.redrive_expired(Instant::now());

        let task = inner.ready.pop_front().ok_or(QueueError::Timeout)?;
        inner.in_flight.push(InFlight {
            task: task.clone(),
            visible_again_at: Instant::now() + self.visibility,
        });
        Ok(task)
    }

    async fn extend_visibility(&self, task: &Task) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let deadline = Instant::now() + self.visibility;
        let entry = inner
            .in_flight
            .iter_mut()
            .find(|f| &f.task == task)
            .ok_or_else(|| QueueError::TaskNotFound(task.to_string()))?;
        entry.visible_again_at = deadline;
        Ok(())
    }

    async fn delete(&self, task: &Task) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner
            .in_flight
            .iter()
            .position(|f| &f.task == task)
            .ok_or_else(|| QueueError::TaskNotFound(task.to_string()))?;
        inner.in_flight.swap_remove(index);
        inner.completed += 1;
        Ok(())
    }

    async fn size(&self) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        inner.redrive_expired(Instant::now());
        Ok(inner.ready.len())
    }
}
