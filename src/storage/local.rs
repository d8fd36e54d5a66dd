//! Filesystem-backed storage provider.
//!
//! Backs the driver binary the way the original tree ships a local queue
//! beside the cloud drivers: a space is a directory, a content item is a pair
//! of files (`<hex(id)>.dat` for the bytes, `<hex(id)>.props.json` for the
//! properties). File names are lowercase-hex encodings of the content id:
//! hex is order-preserving, so directory listings sort into the same
//! lexicographic order the contract requires, and ids containing `/` stay
//! representable.
//!
//! Writes follow the write-to-temp-then-rename pattern so a crash never
//! leaves a half-written item visible.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::types::{AccountId, ContentId, SpaceId, StoreId};

use super::{
    md5_hex, ContentProperties, StorageError, StorageProvider, StorageProviderFactory,
    PROP_CONTENT_CHECKSUM, PROP_CONTENT_MIMETYPE, PROP_CONTENT_SIZE,
};

const DATA_EXT: &str = "dat";
const PROPS_EXT: &str = "props.json";

/// An object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsStorageProvider {
    root: PathBuf,
}

impl FsStorageProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorageProvider { root: root.into() }
    }

    fn space_dir(&self, space_id: &SpaceId) -> PathBuf {
        self.root.join(space_id.as_str())
    }

    fn data_path(&self, space_id: &SpaceId, content_id: &ContentId) -> PathBuf {
        self.space_dir(space_id)
            .join(format!("{}.{}", hex::encode(content_id.as_str()), DATA_EXT))
    }

    fn props_path(&self, space_id: &SpaceId, content_id: &ContentId) -> PathBuf {
        self.space_dir(space_id)
            .join(format!("{}.{}", hex::encode(content_id.as_str()), PROPS_EXT))
    }

    async fn require_space(&self, space_id: &SpaceId) -> Result<PathBuf, StorageError> {
        let dir = self.space_dir(space_id);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::permanent(format!(
                "space path is not a directory: {}",
                dir.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(format!("space {}", space_id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Decodes a `<hex>.dat` file name back into a content id.
fn decode_data_file_name(file_name: &str) -> Option<ContentId> {
    let stem = file_name.strip_suffix(&format!(".{}", DATA_EXT))?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok().map(ContentId::new)
}

/// Writes `bytes` to `path` atomically: temp file in the same directory,
/// fsync, rename, directory fsync.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::permanent("path has no parent directory"))?;
    let tmp = path.with_extension("tmp");

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;

    let dir = std::fs::OpenOptions::new().read(true).open(parent)?;
    dir.sync_all()?;
    Ok(())
}

impl StorageProvider for FsStorageProvider {
    type ContentStream = tokio::fs::File;

    async fn space_exists(&self, space_id: &SpaceId) -> Result<bool, StorageError> {
        match tokio::fs::metadata(self.space_dir(space_id)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_space(&self, space_id: &SpaceId) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.space_dir(space_id)).await?;
        Ok(())
    }

    async fn delete_space(&self, space_id: &SpaceId) -> Result<(), StorageError> {
        let dir = self.require_space(space_id).await?;
        tokio::fs::remove_dir_all(dir).await?;
        Ok(())
    }

    async fn list_space_chunk(
        &self,
        space_id: &SpaceId,
        marker: Option<&ContentId>,
        limit: usize,
    ) -> Result<Vec<ContentId>, StorageError> {
        let dir = self.require_space(space_id).await?;

        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = decode_data_file_name(name) {
                if marker.is_none_or(|m| &id > m) {
                    ids.push(id);
                }
            }
        }

        ids.sort();
        ids.truncate(limit);
        Ok(ids)
    }

    async fn get_content_properties(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
    ) -> Result<ContentProperties, StorageError> {
        let path = self.props_path(space_id, content_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(format!(
                    "content {}/{}",
                    space_id, content_id
                )));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::permanent(format!("corrupt properties file: {}", e)))
    }

    async fn set_content_properties(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
        properties: &ContentProperties,
    ) -> Result<(), StorageError> {
        match tokio::fs::metadata(self.data_path(space_id, content_id)).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(format!(
                    "content {}/{}",
                    space_id, content_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        // Checksum and size are derived from the stored bytes; a property
        // update cannot overwrite them.
        let existing = self.get_content_properties(space_id, content_id).await?;
        let mut updated = properties.clone();
        for key in [PROP_CONTENT_CHECKSUM, PROP_CONTENT_SIZE] {
            match existing.get(key) {
                Some(value) => {
                    updated.insert(key.to_string(), value.clone());
                }
                None => {
                    updated.remove(key);
                }
            }
        }

        let bytes = serde_json::to_vec_pretty(&updated)
            .map_err(|e| StorageError::permanent(format!("unserializable properties: {}", e)))?;
        write_atomic(&self.props_path(space_id, content_id), &bytes).await
    }

    async fn get_content(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
    ) -> Result<Self::ContentStream, StorageError> {
        match tokio::fs::File::open(self.data_path(space_id, content_id)).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::not_found(
                format!("content {}/{}", space_id, content_id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_content<R>(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
        mimetype: Option<&str>,
        properties: &ContentProperties,
        _length: u64,
        expected_checksum: &str,
        mut content: R,
    ) -> Result<String, StorageError>
    where
        R: AsyncRead + Send + Unpin,
    {
        self.require_space(space_id).await?;

        // Buffering the item is acceptable here: this provider backs local
        // deployments, not the multi-million-object cloud path.
        let mut bytes = Vec::new();
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
        let props_bytes = serde_json::to_vec_pretty(&stored_props)
            .map_err(|e| StorageError::permanent(format!("unserializable properties: {}", e)))?;

        write_atomic(&self.data_path(space_id, content_id), &bytes).await?;
        write_atomic(&self.props_path(space_id, content_id), &props_bytes).await?;
        Ok(checksum)
    }

    async fn delete_content(
        &self,
        space_id: &SpaceId,
        content_id: &ContentId,
    ) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.data_path(space_id, content_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(format!(
                    "content {}/{}",
                    space_id, content_id
                )));
            }
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_file(self.props_path(space_id, content_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Resolves (account, store) to a provider rooted at
/// `<root>/<account>/<store>`.
#[derive(Debug, Clone)]
pub struct FsStorageFactory {
    root: PathBuf,
}

impl FsStorageFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorageFactory { root: root.into() }
    }
}

impl StorageProviderFactory for FsStorageFactory {
    type Provider = FsStorageProvider;

    async fn create(
        &self,
        account: &AccountId,
        store_id: &StoreId,
    ) -> Result<Self::Provider, StorageError> {
        let root = self.root.join(account.as_str()).join(store_id.as_str());
        tokio::fs::create_dir_all(&root).await?;
        Ok(FsStorageProvider::new(root))
    }
}
