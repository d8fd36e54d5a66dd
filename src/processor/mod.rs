//! The duplication task processor.
//!
//! Given one (account, space, content, source store, destination store)
//! tuple, brings the destination into a state consistent with the source.
//! The reconciliation is a case analysis over presence and checksums:
//!
//! | source            | destination                       | action          |
//! |-------------------|-----------------------------------|-----------------|
//! | absent            | absent                            | nothing         |
//! | absent            | present                           | delete dest     |
//! | present, no checksum | any                            | fail the task   |
//! | present           | absent                            | copy            |
//! | present           | checksum differs                  | copy            |
//! | present           | checksum equal, props equal       | nothing         |
//! | present           | checksum equal, props differ      | copy properties |
//!
//! Property comparison happens after cleaning (see [`clean`]). An empty
//! content id requests space-level reconciliation instead. Re-running a
//! converged task lands in a no-op branch, which is what makes queue
//! redelivery safe.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::storage::{
    ContentProperties, StorageError, StorageProvider, PROP_CONTENT_CHECKSUM,
};
use crate::types::DuplicationTask;

pub mod clean;
mod copy;


pub use clean::clean_properties;
pub use copy::CopyError;

/// A task that cannot converge. The worker layer decides what happens next
/// (typically: leave it to the queue's redrive policy).
#[derive(Debug, Error)]
pub struct TaskExecutionError {
    pub reason: String,
    task: DuplicationTask,
    #[source]
    source: Option<StorageError>,
}

impl fmt::Display for TaskExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failure to duplicate content item: {} \
             (account: {}, source store: {}, destination store: {}, space: {}, content: {})",
            self.reason,
            self.task.account,
            self.task.source_store_id,
            self.task.dest_store_id,
            self.task.space_id,
            self.task.content_id,
        )
    }
}

/// Reconciles a single task between a source and destination provider.
pub struct DuplicationTaskProcessor<S: StorageProvider> {
    task: DuplicationTask,
    source_store: S,
    dest_store: S,
    retry: RetryConfig,
}

impl<S: StorageProvider> DuplicationTaskProcessor<S> {
    pub fn new(task: DuplicationTask, source_store: S, dest_store: S) -> Self {
        DuplicationTaskProcessor {
            task,
            source_store,
            dest_store,
            retry: RetryConfig::DEFAULT,
        }
    }

    /// Overrides the retry schedule (tests use a fast one).
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn fail(&self, reason: impl Into<String>, source: Option<StorageError>) -> TaskExecutionError {
        TaskExecutionError {
            reason: reason.into(),
            task: self.task.clone(),
            source,
        }
    }

    /// Executes the reconciliation. Idempotent: re-running a converged task
    /// succeeds without writing.
    pub async fn execute(&self) -> Result<(), TaskExecutionError> {
        if self.task.space_id.is_empty() {
            return Err(self.fail("spaceId value is null or empty", None));
        }

        if self.task.content_id.is_empty() {
            return self.reconcile_space().await;
        }
        self.reconcile_content().await
    }

    /// Space-level reconciliation: mirror the existence of the space itself.
    ///
    /// A present source ensures the destination space exists. An absent
    /// source deletes the destination space only when it is empty; content
    /// tasks own the removal of individual items.
    async fn reconcile_space(&self) -> Result<(), TaskExecutionError> {
        let space_id = &self.task.space_id;

        if self.space_exists(&self.source_store, "source").await? {
            self.ensure_dest_space().await?;
            return Ok(());
        }

        if !self.space_exists(&self.dest_store, "destination").await? {
            return Ok(());
        }

        let first = retry_with_backoff(self.retry, || {
            self.dest_store.list_space_chunk(space_id, None, 1)
        })
        .await
        .into_result()
        .map_err(|e| self.fail("error attempting to list the destination space", Some(e)))?;

        match first {
            // The space vanished between the existence check and the
            // listing; converged.
            None => Ok(()),
            Some(chunk) if chunk.is_empty() => {
                info!(space_id = %space_id, "deleting empty destination space");
                retry_with_backoff(self.retry, || self.dest_store.delete_space(space_id))
                    .await
                    .or_not_found(|| Ok(()))
                    .map_err(|e| {
                        self.fail("error attempting to delete the destination space", Some(e))
                    })
            }
            Some(_) => {
                debug!(
                    space_id = %space_id,
                    "source space is gone but destination is not empty, leaving it alone"
                );
                Ok(())
            }
        }
    }

    /// Content-level reconciliation: the case table from the module docs.
    async fn reconcile_content(&self) -> Result<(), TaskExecutionError> {
        let space_id = &self.task.space_id;
        let content_id = &self.task.content_id;

        self.ensure_dest_space().await?;

        let source_props = self.content_properties(&self.source_store, "source").await?;
        let dest_props = self.content_properties(&self.dest_store, "destination").await?;

        let Some(mut source_props) = source_props else {
            // Absent at source: the item was deleted. Mirror the deletion.
            if dest_props.is_some() {
                info!(
                    account = %self.task.account,
                    space_id = %space_id,
                    content_id = %content_id,
                    "duplicating deletion"
                );
                return retry_with_backoff(self.retry, || {
                    self.dest_store.delete_content(space_id, content_id)
                })
                .await
                .or_not_found(|| Ok(()))
                .map_err(|e| self.fail("error attempting to delete content", Some(e)));
            }
            return Ok(());
        };

        let source_checksum = source_props
            .get(PROP_CONTENT_CHECKSUM)
            .cloned()
            .ok_or_else(|| self.fail("source content item properties included no checksum", None))?;
        clean_properties(&mut source_props);

        let Some(mut dest_props) = dest_props else {
            return self.duplicate_content(&source_checksum, &source_props).await;
        };

        let dest_checksum = dest_props.get(PROP_CONTENT_CHECKSUM).cloned();
        clean_properties(&mut dest_props);

        if dest_checksum.as_deref() != Some(source_checksum.as_str()) {
            return self.duplicate_content(&source_checksum, &source_props).await;
        }

        if source_props == dest_props {
            debug!(
                space_id = %space_id,
                content_id = %content_id,
                "content and properties already consistent"
            );
            return Ok(());
        }

        info!(
            account = %self.task.account,
            space_id = %space_id,
            content_id = %content_id,
            "duplicating properties"
        );
        retry_with_backoff(self.retry, || {
            self.dest_store
                .set_content_properties(space_id, content_id, &source_props)
        })
        .await
        .or_not_found(|| {
            Err(StorageError::not_found(format!(
                "destination content {}/{}",
                space_id, content_id
            )))
        })
        .map_err(|e| self.fail("error attempting to duplicate content properties", Some(e)))
    }

    async fn duplicate_content(
        &self,
        source_checksum: &str,
        source_props: &ContentProperties,
    ) -> Result<(), TaskExecutionError> {
        info!(
            account = %self.task.account,
            space_id = %self.task.space_id,
            content_id = %self.task.content_id,
            "duplicating content"
        );
        copy::duplicate_content(
            &self.source_store,
            &self.dest_store,
            self.retry,
            &self.task.space_id,
            &self.task.content_id,
            source_checksum,
            source_props,
        )
        .await
        .map_err(|e| match e {
            CopyError::LocalChecksumMismatch { .. } => {
                self.fail(e.to_string(), None)
            }
            CopyError::Storage(e) => {
                self.fail("error attempting to add destination content", Some(e))
            }
            CopyError::Io(e) => self.fail(
                "unable to cache content file locally",
                Some(StorageError::Io(e)),
            ),
        })
    }

    async fn space_exists(&self, store: &S, which: &str) -> Result<bool, TaskExecutionError> {
        retry_with_backoff(self.retry, || store.space_exists(&self.task.space_id))
            .await
            .or_not_found(|| Ok(false))
            .map_err(|e| {
                self.fail(
                    format!("error attempting to check if {} space exists", which),
                    Some(e),
                )
            })
    }

    /// Idempotent create; a pre-existing destination space is success.
    async fn ensure_dest_space(&self) -> Result<(), TaskExecutionError> {
        retry_with_backoff(self.retry, || {
            self.dest_store.create_space(&self.task.space_id)
        })
        .await
        .into_result()
        .map(|_| ())
        .map_err(|e| self.fail("error attempting to create the destination space", Some(e)))
    }

    /// Content properties with absence made explicit: `Ok(None)` when the
    /// item does not exist.
    async fn content_properties(
        &self,
        store: &S,
        which: &str,
    ) -> Result<Option<ContentProperties>, TaskExecutionError> {
        retry_with_backoff(self.retry, || {
            store.get_content_properties(&self.task.space_id, &self.task.content_id)
        })
        .await
        .into_result()
        .map_err(|e| {
            self.fail(
                format!("error attempting to retrieve {} content properties", which),
                Some(e),
            )
        })
    }
}
