//! The storage provider contract.
//!
//! A [`StorageProvider`] is the uniform surface over one object-storage
//! backend: space create/delete/exists, chunked lexicographic listing,
//! content property get/set, and content get/put/delete. Concrete cloud
//! drivers live outside this crate; [`local::FsStorageProvider`] and
//! [`memory::MemoryStorageProvider`] are the in-tree implementations.
//!
//! All operations may fail transiently and callers wrap them in the retrier;
//! `NotFound` is a domain signal (see the processor's case analysis), so it
//! is a dedicated error variant rather than an exception path.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::io;

use md5::{Digest, Md5};
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::retry::{Classify, ErrorKind};
use crate::types::{AccountId, ContentId, SpaceId, StoreId};

pub mod local;
pub mod memory;

/// Content properties are a flat string map.
pub type ContentProperties = BTreeMap<String, String>;

/// Hex MD5 of the content bytes; required on the source side for content
/// reconciliation.
pub const PROP_CONTENT_CHECKSUM: &str = "content-checksum";

/// Mimetype recorded at upload time; propagated on copy.
pub const PROP_CONTENT_MIMETYPE: &str = "content-mimetype";

/// Synthesized by providers; stripped before property comparison.
pub const PROP_CONTENT_MD5: &str = "content-md5";
pub const PROP_CONTENT_SIZE: &str = "content-size";
pub const PROP_CONTENT_MODIFIED: &str = "content-modified";

/// Page size used when walking a whole space.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Errors surfaced by storage providers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The addressed space or content item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network trouble, 5xx, timeouts; safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// The backend rejected the operation; retrying cannot help.
    #[error("storage failure: {0}")]
    Permanent(String),

    /// Local I/O failure; treated as transient (disks and sockets both
    /// wobble).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn not_found(what: impl Into<String>) -> Self {
        StorageError::NotFound(what.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        StorageError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StorageError::Permanent(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl Classify for StorageError {
    fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Transient(_) | StorageError::Io(_) => ErrorKind::Transient,
            StorageError::Permanent(_) => ErrorKind::Permanent,
        }
    }
}

/// Uniform operations over one object store.
///
/// Listing is lexicographic by content id and restartable via an exclusive
/// marker; `list_space_chunk` must be deterministic for a given (space,
/// marker, limit). `create_space` is idempotent: a pre-existing space is not
/// an error.
pub trait StorageProvider: Send + Sync {
    /// The readable stream returned by [`StorageProvider::get_content`].
    type ContentStream: AsyncRead + Send + Unpin;

    fn space_exists(
        &self,
        space_id: &SpaceId,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn create_space(
        &self,
        space_id: &SpaceId,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn delete_space(
        &self,
        space_id: &SpaceId,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Returns up to `limit` content ids strictly after `marker`, in
    /// lexicographic order. An empty result means the space is exhausted.
    fn list_space_chunk(
        &self,
        space_id: &SpaceId,
        marker: Option<&ContentId>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ContentId>, StorageError>> + Send;

    /// Fails with `NotFound` when the item is absent.
    fn get_content_properties(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
    ) -> impl Future<Output = Result<ContentProperties, StorageError>> + Send;

    fn set_content_properties(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
        properties: &ContentProperties,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn get_content(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
    ) -> impl Future<Output = Result<Self::ContentStream, StorageError>> + Send;

    /// Stores `content`, verifying it against `expected_checksum` (hex MD5),
    /// and returns the checksum the backend recorded.
    fn put_content<R>(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
        mimetype: Option<&str>,
        properties: &ContentProperties,
        length: u64,
        expected_checksum: &str,
        content: R,
    ) -> impl Future<Output = Result<String, StorageError>> + Send
    where
        R: AsyncRead + Send + Unpin;

    /// Fails with `NotFound` when the item is absent (non-fatal for
    /// callers reconciling deletions).
    fn delete_content(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Resolves (account, store) to a provider instance.
///
/// Stands in for the credential-repository wiring that lives outside this
/// crate: the producer resolves each morsel's source and destination through
/// this seam, as does the worker for each task.
pub trait StorageProviderFactory: Send + Sync {
    type Provider: StorageProvider;

    fn create(
        &self,
        account: &AccountId,
        store_id: &StoreId,
    ) -> impl Future<Output = Result<Self::Provider, StorageError>> + Send;
}

/// A restartable lazy walk over a whole space, paging through
/// [`StorageProvider::list_space_chunk`].
pub struct SpaceListing<'a, S: StorageProvider> {
    provider: &'a S,
    space_id: &'a SpaceId,
    marker: Option<ContentId>,
    buffer: VecDeque<ContentId>,
    exhausted: bool,
    page_size: usize,
}

impl<'a, S: StorageProvider> SpaceListing<'a, S> {
    pub fn new(provider: &'a S, space_id: &'a SpaceId, marker: Option<ContentId>) -> Self {
        SpaceListing {
            provider,
            space_id,
            marker,
            buffer: VecDeque::new(),
            exhausted: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Returns the next content id, or `None` once the space is exhausted.
    ///
    /// The first fetch surfaces `NotFound` if the space does not exist;
    /// callers that need to distinguish a missing space must probe before
    /// iterating or handle that error on the first `next`.
    pub async fn next(&mut self) -> Result<Option<ContentId>, StorageError> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = self
                .provider
                .list_space_chunk(self.space_id, self.marker.as_ref(), self.page_size)
                .await?;
            if page.len() < self.page_size {
                self.exhausted = true;
            }
            self.marker = page.last().cloned();
            self.buffer.extend(page);
        }

        Ok(self.buffer.pop_front())
    }
}

/// Hex-encoded MD5 of a byte slice; the checksum format used throughout.
pub fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
