//! In-memory storage provider.
//!
//! The in-process stand-in for a real object store, in the same spirit as the
//! local task queue: it backs the scenario tests and local experimentation
//! with full contract fidelity (lexicographic chunked listing, checksum
//! verification on put, `NotFound` signaling).

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncReadExt;

use crate::types::{AccountId, ContentId, SpaceId, StoreId};

use super::{
    md5_hex, ContentProperties, StorageError, StorageProvider, StorageProviderFactory,
    PROP_CONTENT_CHECKSUM, PROP_CONTENT_MIMETYPE, PROP_CONTENT_SIZE,
};

#[derive(Debug, Clone)]
struct StoredItem {
    bytes: Vec<u8>,
    properties: ContentProperties,
}

#[derive(Debug, Default)]
struct Inner {
    spaces: BTreeMap<SpaceId, BTreeMap<ContentId, StoredItem>>,
    /// Fail the next N `put_content` calls with a transient error.
    put_faults: u32,
}

/// An object store held entirely in memory. Cloning shares the underlying
/// store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageProvider {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        MemoryStorageProvider::default()
    }

    /// Creates a space without going through the async contract; fixture
    /// setup runs in synchronous test helpers.
    pub fn ensure_space(&self, space_id: &SpaceId) {
        self.inner
            .lock()
            .unwrap()
            .spaces
            .entry(space_id.clone())
            .or_default();
    }

    /// Inserts an item without computing its checksum, so tests can seed
    /// content whose recorded checksum disagrees with its bytes.
    pub fn insert_raw(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
        bytes: Vec<u8>,
        properties: ContentProperties,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .spaces
            .entry(space_id.clone())
            .or_default()
            .insert(content_id.clone(), StoredItem { bytes, properties });
    }

    /// Makes the next `n` `put_content` calls fail transiently.
    pub fn fail_next_puts(&self, n: u32) {
        self.inner.lock().unwrap().put_faults = n;
    }

    /// Raw bytes of an item, for test assertions.
    pub fn content_bytes(&self, space_id: &SpaceId, content_id: &ContentId) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .spaces
            .get(space_id)
            .and_then(|space| space.get(content_id))
            .map(|item| item.bytes.clone())
    }

    /// Every content id in a space, for test assertions.
    pub fn content_ids(&self, space_id: &SpaceId) -> Vec<ContentId> {
        let inner = self.inner.lock().unwrap();
        inner
            .spaces
            .get(space_id)
            .map(|space| space.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl StorageProvider for MemoryStorageProvider {
    type ContentStream = Cursor<Vec<u8>>;

    async fn space_exists(&self, space_id: &SpaceId) -> Result<bool, StorageError> {
        Ok(self.inner.lock().unwrap().spaces.contains_key(space_id))
    }

    async fn create_space(&self, space_id: &SpaceId) -> Result<(), StorageError> {
        self.inner
            .lock()
            .unwrap()
            .spaces
            .entry(space_id.clone())
            .or_default();
        Ok(())
    }

    async fn delete_space(&self, space_id: &SpaceId) -> Result<(), StorageError> {
        self.inner
            .lock()
            .unwrap()
            .spaces
            .remove(space_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(format!("space {}", space_id)))
    }

    async fn list_space_chunk(
        &self,
        space_id: &SpaceId,
        marker: Option<&ContentId>,
        limit: usize,
    ) -> Result<Vec<ContentId>, StorageError> {
        let inner = self.inner.lock().unwrap();
        let space = inner
            .spaces
            .get(space_id)
            .ok_or_else(|| StorageError::not_found(format!("space {}", space_id)))?;

        let page = match marker {
            Some(marker) => space
                .range::<ContentId, _>((
                    std::ops::Bound::Excluded(marker),
                    std::ops::Bound::Unbounded,
                ))
                .take(limit)
                .map(|(id, _)| id.clone())
                .collect(),
            None => space.keys().take(limit).cloned().collect(),
        };
        Ok(page)
    }

    async fn get_content_properties(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
    ) -> Result<ContentProperties, StorageError> {
        let inner = self.inner.lock().unwrap();
        inner
            .spaces
            .get(space_id)
            .and_then(|space| space.get(content_id))
            .map(|item| item.properties.clone())
            .ok_or_else(|| {
                StorageError::not_found(format!("content {}/{}", space_id, content_id))
            })
    }

    async fn set_content_properties(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
        properties: &ContentProperties,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner
            .spaces
            .get_mut(space_id)
            .and_then(|space| space.get_mut(content_id))
            .ok_or_else(|| {
                StorageError::not_found(format!("content {}/{}", space_id, content_id))
            })?;

        // Checksum and size are derived from the stored bytes; a property
        // update cannot overwrite them.
        let mut updated = properties.clone();
        for key in [PROP_CONTENT_CHECKSUM, PROP_CONTENT_SIZE] {
            match item.properties.get(key) {
                Some(value) => {
                    updated.insert(key.to_string(), value.clone());
                }
                None => {
                    updated.remove(key);
                }
            }
        }
        item.properties = updated;
        Ok(())
    }

    async fn get_content(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
    ) -> Result<Self::ContentStream, StorageError> {
        let inner = self.inner.lock().unwrap();
        inner
            .spaces
            .get(space_id)
            .and_then(|space| space.get(content_id))
            .map(|item| Cursor::new(item.bytes.clone()))
            .ok_or_else(|| {
                StorageError::not_found(format!("content {}/{}", space_id, content_id))
            })
    }

    async fn put_content<R>(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
        mimetype: Option<&str>,
        properties: &ContentProperties,
        length: u64,
        expected_checksum: &str,
        mut content: R,
    ) -> Result<String, StorageError>
    where
        R: tokio::io::AsyncRead + Send + Unpin,
    {
        let mut bytes = Vec::with_capacity(length as usize);
        content.read_to_end(&mut bytes).await?;

        let checksum = md5_hex(&bytes);
        if !expected_checksum.is_empty() && checksum != expected_checksum {
            return Err(StorageError::transient(format!(
                "checksum mismatch on put: expected {}, computed {}",
                expected_checksum, checksum
            )));
        }

        let mut stored_props = properties.clone();
        stored_props.insert(PROP_CONTENT_CHECKSUM.to_string(), checksum.clone());
        stored_props.insert(PROP_CONTENT_SIZE.to_string(), bytes.len().to_string());
        if let Some(mimetype) = mimetype {
            stored_props.insert(PROP_CONTENT_MIMETYPE.to_string(), mimetype.to_string());
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.put_faults > 0 {
            inner.put_faults -= 1;
            return Err(StorageError::transient("injected put fault"));
        }
        let space = inner
            .spaces
            .get_mut(space_id)
            .ok_or_else(|| StorageError::not_found(format!("space {}", space_id)))?;
        space.insert(
            content_id.clone(),
            StoredItem {
                bytes,
                properties: stored_props,
            },
        );
        Ok(checksum)
    }

    async fn delete_content(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .spaces
            .get_mut(space_id)
            .and_then(|space| space.remove(content_id))
            .map(|_| ())
            .ok_or_else(|| {
                StorageError::not_found(format!("content {}/{}", space_id, content_id))
            })
    }
}

/// Resolves every (account, store) pair to a shared in-memory provider,
/// creating stores on first use.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageFactory {
    stores: Arc<Mutex<BTreeMap<(AccountId, StoreId), MemoryStorageProvider>>>,
}

impl MemoryStorageFactory {
    pub fn new() -> Self {
        MemoryStorageFactory::default()
    }

    /// The provider backing (account, store), created on first use. Handy
    /// for seeding fixtures before a run.
    pub fn provider(&self, account: &AccountId, store_id: &StoreId) -> MemoryStorageProvider {
        let mut stores = self.stores.lock().unwrap();
        stores
            .entry((account.clone(), store_id.clone()))
            .or_default()
            .clone()
    }
}

impl StorageProviderFactory for MemoryStorageFactory {
    type Provider = MemoryStorageProvider;

    async fn create(
        &self,
        account: &AccountId,
        store_id: &StoreId,
    ) -> Result<Self::Provider, StorageError> {
        Ok(self.provider(account, store_id))
    }
}
