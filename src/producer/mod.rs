//! The looping task producer.
//!
//! Fills the duplication queue up to a configured ceiling by walking the
//! cartesian product (tenants × spaces × replication policies × content ids),
//! one morsel-sized bite at a time. Progress is persisted after every nibble,
//! so a killed producer resumes where it left off; the combination of
//! persisted morsels and re-expansion of the current policy snapshot always
//! covers at least the work a fresh enumeration would produce.
//!
//! # Run Shape
//!
//! 1. Load persisted morsels; skip the run entirely if the previous full
//!    pass completed within the configured frequency.
//! 2. Merge persisted morsels (first, markers preserved) with policy-derived
//!    morsels (marker null) into the [`MorselQueue`].
//! 3. While the advisory queue size is under the ceiling: poll a morsel,
//!    [`nibble`](LoopingTaskProducer::nibble) it, persist the remainder.
//! 4. On a clean drain, stamp the completion time so the next invocation is
//!    frequency-gated.
//!
//! Cancellation is cooperative: the shutdown signal is honored between
//! nibbles, never inside one.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProducerConfig;
use crate::queue::{QueueError, TaskQueue, PUT_BATCH_SIZE};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::state::{ProducerState, StateError, StateStore, SCHEMA_VERSION};
use crate::storage::{StorageError, StorageProviderFactory, StorageProvider};
use crate::types::{
    AccountId, ContentId, DuplicationTask, Morsel, MorselIdentity, PolicySnapshot, SpaceId,
    StorePolicy, Task,
};

pub mod morsel_queue;
pub mod sweep;

#[cfg(test)]
mod tests;

pub use morsel_queue::MorselQueue;

use sweep::DigestSet;

/// Deletion candidates are buffered and flushed in chunks of this size to
/// bound memory when a destination holds millions of stray items.
const DELETION_FLUSH_SIZE: usize = 10_000;

/// Errors that abort a producer run.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// State store failure; the run aborts without corrupting persisted
    /// state (writes are all-or-nothing).
    #[error("state store error: {0}")]
    State(#[from] StateError),

    /// Queue failure after retries.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Storage failure after retries.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// What a producer run accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Content duplication tasks enqueued.
    pub content_tasks: usize,

    /// Deletion-sweep tasks enqueued.
    pub deletion_tasks: usize,

    /// True when every morsel was exhausted (a full pass completed).
    pub completed: bool,

    /// True when the run was skipped by frequency gating.
    pub gated: bool,
}

/// Enumerates content per replication policy and feeds the duplication
/// queue. See the module docs for the run shape.
pub struct LoopingTaskProducer<Q, F>
where
    Q: TaskQueue,
    F: StorageProviderFactory,
{
    factory: F,
    policies: PolicySnapshot,
    queue: Q,
    state: StateStore,
    config: ProducerConfig,
    retry: RetryConfig,

    /// Identities enqueued in this run; prevents double-enqueueing a task.
    queued_tasks: HashSet<Task>,

    /// Morsels that still have work, waiting for their next slice.
    morsels_to_reload: Vec<Morsel>,
}

impl<Q, F> LoopingTaskProducer<Q, F>
where
    Q: TaskQueue,
    F: StorageProviderFactory,
{
    pub fn new(
        factory: F,
        policies: PolicySnapshot,
        queue: Q,
        state: StateStore,
        config: ProducerConfig,
    ) -> Self {
        LoopingTaskProducer {
            factory,
            policies,
            queue,
            state,
            config,
            retry: RetryConfig::DEFAULT,
            queued_tasks: HashSet::new(),
            morsels_to_reload: Vec::new(),
        }
    }

    /// Overrides the retry schedule (tests use a fast one).
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Executes one producer run.
    ///
    /// Returns normally both when the queue ceiling was reached and when
    /// every morsel was exhausted; the report says which.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunReport, ProducerError> {
        info!("starting producer run");
        let state = self.state.load()?;

        if let Some(report) = self.frequency_gate(&state) {
            return Ok(report);
        }

        let mut morsel_queue = self.load_morsel_queue(state.morsels);
        let mut report = RunReport::default();

        let completed = loop {
            if cancel.is_cancelled() {
                info!("shutdown requested, persisting progress and exiting");
                break false;
            }

            let queue_size = self.queue.size().await?;
            if queue_size >= self.config.max_task_queue_size {
                info!(
                    queue_size,
                    ceiling = self.config.max_task_queue_size,
                    "task queue has reached its ceiling"
                );
                break false;
            }

            if morsel_queue.is_empty() {
                morsel_queue = self.reload_morsel_queue();
                if morsel_queue.is_empty() {
                    break true;
                }
            }

            let Some(morsel) = morsel_queue.poll() else {
                break true;
            };
            self.nibble(morsel, &mut report).await?;
            self.persist(&morsel_queue, None)?;
        };

        let run_completed_at = completed.then(Utc::now);
        self.persist(&morsel_queue, run_completed_at)?;

        report.completed = completed;
        info!(
            content_tasks = report.content_tasks,
            deletion_tasks = report.deletion_tasks,
            completed,
            "producer run finished"
        );
        Ok(report)
    }

    /// Skips the run when the previous full pass completed too recently.
    fn frequency_gate(&self, state: &ProducerState) -> Option<RunReport> {
        if self.config.frequency.is_zero() {
            return None;
        }
        let completed_at = state.run_completed_at?;
        let elapsed = Utc::now()
            .signed_duration_since(completed_at)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        if elapsed < self.config.frequency {
            info!(
                ?elapsed,
                frequency = ?self.config.frequency,
                "previous pass completed within the configured frequency, nothing to do"
            );
            return Some(RunReport {
                gated: true,
                ..RunReport::default()
            });
        }
        None
    }

    /// Builds the startup morsel queue: persisted morsels first (their
    /// markers must win the identity dedup), then the current policy
    /// snapshot expanded with null markers. Both pass the path filter.
    fn load_morsel_queue(&self, persisted: Vec<Morsel>) -> MorselQueue {
        let mut morsel_queue = MorselQueue::new();

        morsel_queue.add_all(
            persisted
                .into_iter()
                .filter(|m| self.config.filter.allows(&m.account, &m.space_id)),
        );

        for (account, tenant) in self.policies.accounts() {
            for space_id in tenant.spaces() {
                if !self.config.filter.allows(account, space_id) {
                    continue;
                }
                for policy in tenant.store_policies(space_id) {
                    morsel_queue.add(Morsel::new(
                        account.clone(),
                        space_id.clone(),
                        None,
                        policy.clone(),
                    ));
                }
            }
        }

        morsel_queue
    }

    /// Swaps the reload list in as the next morsel queue.
    fn reload_morsel_queue(&mut self) -> MorselQueue {
        let mut queue = MorselQueue::new();
        queue.add_all(std::mem::take(&mut self.morsels_to_reload));
        queue
    }

    /// Persists the union of the queued and reload-pending morsels.
    fn persist(
        &self,
        morsel_queue: &MorselQueue,
        run_completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StateError> {
        let mut morsels: Vec<Morsel> = morsel_queue.iter().cloned().collect();
        let queued: HashSet<MorselIdentity> = morsels.iter().map(Morsel::identity).collect();
        morsels.extend(
            self.morsels_to_reload
                .iter()
                .filter(|m| !queued.contains(&m.identity()))
                .cloned(),
        );

        self.state.save(&ProducerState {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            run_completed_at,
            morsels,
        })
    }

    /// Takes one bite out of a morsel: run the deletion sweep if this is the
    /// first bite, then enqueue one source page of duplication tasks.
    async fn nibble(&mut self, mut morsel: Morsel, report: &mut RunReport) -> Result<(), ProducerError> {
        debug!(%morsel, "nibbling");

        let source = self
            .factory
            .create(&morsel.account, &morsel.store_policy.src_store_id)
            .await?;
        let dest = self
            .factory
            .create(&morsel.account, &morsel.store_policy.dest_store_id)
            .await?;

        // Deletions run once per pass, before the marker first moves.
        if morsel.marker.is_none() {
            report.deletion_tasks += self.deletion_sweep(&morsel, &source, &dest).await?;
        }

        let page = {
            let outcome = retry_with_backoff(self.retry, || {
                source.list_space_chunk(
                    &morsel.space_id,
                    morsel.marker.as_ref(),
                    self.config.source_page_size,
                )
            })
            .await;
            match outcome.into_result()? {
                Some(page) => page,
                None => {
                    warn!(%morsel, "source space not found, retiring morsel");
                    return Ok(());
                }
            }
        };

        if page.is_empty() {
            // Full pass over this space is done; the morsel is discarded by
            // not adding it to the reload list.
            info!(
                account = %morsel.account,
                space_id = %morsel.space_id,
                store_policy = %morsel.store_policy,
                "all tasks created for this morsel"
            );
            return Ok(());
        }

        let added = self
            .enqueue_tasks(&morsel.account, &morsel.space_id, &morsel.store_policy, &page)
            .await?;
        report.content_tasks += added;

        if added == 0 {
            // Every id in this page was already enqueued earlier in the run.
            // The marker still advances below: this is a no-progress page,
            // not a finished space.
            debug!(%morsel, "page contained only previously enqueued tasks");
        }

        if let Some(last) = page.last() {
            morsel.advance_to(last.clone());
        }
        self.morsels_to_reload.push(morsel);
        Ok(())
    }

    /// Enqueues deduplicated duplication tasks for `content_ids`, batching
    /// writes in groups of [`PUT_BATCH_SIZE`]. Returns how many tasks were
    /// new in this run.
    async fn enqueue_tasks(
        &mut self,
        account: &AccountId,
        space_id: &SpaceId,
        store_policy: &StorePolicy,
        content_ids: &[ContentId],
    ) -> Result<usize, ProducerError> {
        let mut batch = Vec::with_capacity(PUT_BATCH_SIZE);
        let mut added = 0;

        for content_id in content_ids {
            let task = DuplicationTask::new(
                account.clone(),
                space_id.clone(),
                content_id.clone(),
                store_policy,
            )
            .write_task();

            if self.queued_tasks.contains(&task) {
                continue;
            }
            self.queued_tasks.insert(task.clone());
            batch.push(task);
            added += 1;

            if batch.len() == PUT_BATCH_SIZE {
                self.queue.put_batch(std::mem::take(&mut batch)).await?;
            }
        }

        if !batch.is_empty() {
            self.queue.put_batch(batch).await?;
        }
        Ok(added)
    }

    /// Enqueues duplication tasks for destination content missing from the
    /// source, so the processor deletes it.
    ///
    /// The source space is enumerated in full into a compact digest set
    /// (bounded memory), then the destination is walked against it. A
    /// missing destination space means there is nothing to sweep.
    async fn deletion_sweep(
        &mut self,
        morsel: &Morsel,
        source: &F::Provider,
        dest: &F::Provider,
    ) -> Result<usize, ProducerError> {
        let space_id = &morsel.space_id;
        let page_size = self.config.source_page_size;

        let mut membership = DigestSet::new();
        let mut marker: Option<ContentId> = None;
        loop {
            let outcome = retry_with_backoff(self.retry, || {
                source.list_space_chunk(space_id, marker.as_ref(), page_size)
            })
            .await;
            let page = match outcome.into_result()? {
                Some(page) => page,
                None => {
                    warn!(%morsel, "source space not found, skipping deletion sweep");
                    return Ok(0);
                }
            };
            if page.is_empty() {
                break;
            }
            for content_id in &page {
                membership.insert(content_id);
            }
            let full = page.len() == page_size;
            marker = page.into_iter().last();
            if !full {
                break;
            }
        }
        membership.seal();

        let mut enqueued = 0;
        let mut deletions: Vec<ContentId> = Vec::new();
        let mut marker: Option<ContentId> = None;
        loop {
            let outcome = retry_with_backoff(self.retry, || {
                dest.list_space_chunk(space_id, marker.as_ref(), page_size)
            })
            .await;
            let page = match outcome.into_result()? {
                Some(page) => page,
                None => {
                    info!(
                        account = %morsel.account,
                        space_id = %space_id,
                        "space not found on destination provider, skipping deletion sweep"
                    );
                    membership.clear();
                    return Ok(0);
                }
            };
            if page.is_empty() {
                break;
            }

            for content_id in &page {
                if !membership.contains(content_id) {
                    deletions.push(content_id.clone());
                    // Flush periodically so a destination full of strays
                    // cannot exhaust memory.
                    if deletions.len() == DELETION_FLUSH_SIZE {
                        enqueued += self
                            .enqueue_tasks(
                                &morsel.account,
                                space_id,
                                &morsel.store_policy,
                                &deletions,
                            )
                            .await?;
                        deletions.clear();
                    }
                }
            }

            let full = page.len() == page_size;
            marker = page.into_iter().last();
            if !full {
                break;
            }
        }

        enqueued += self
            .enqueue_tasks(&morsel.account, space_id, &morsel.store_policy, &deletions)
            .await?;
        membership.clear();

        info!(
            deletion_tasks = enqueued,
            account = %morsel.account,
            space_id = %space_id,
            store_policy = %morsel.store_policy,
            "deletion sweep complete"
        );
        Ok(enqueued)
    }
}
