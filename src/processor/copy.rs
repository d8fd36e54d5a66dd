//! The verified copy protocol.
//!
//! Object stores occasionally hand back corrupted reads, so a copy never
//! streams directly from source to destination. Instead:
//!
//! 1. Stream the source content to a local temp file.
//! 2. Compute its MD5 and compare against the source's recorded checksum;
//!    re-fetch up to 3 times, then fail the task.
//! 3. Upload the temp file with the expected checksum attached and verify
//!    the checksum the destination reports; transient disagreement is
//!    retried, persistent disagreement fails the task.
//!
//! The temp file is owned by the executing task and removed on every exit
//! path (RAII via `NamedTempFile`).

use std::io;
use std::path::Path;

use md5::{Digest, Md5};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::storage::{ContentProperties, StorageError, StorageProvider, PROP_CONTENT_MIMETYPE};
use crate::types::{ContentId, SpaceId};

/// Attempts to fetch a source copy whose bytes match the recorded checksum.
const LOCAL_CHECKSUM_ATTEMPTS: u32 = 3;

/// Errors from the copy protocol.
#[derive(Debug, Error)]
pub enum CopyError {
    /// Repeated fetches never produced bytes matching the source checksum.
    #[error(
        "unable to retrieve content matching the expected source checksum {expected} \
         after {attempts} attempts"
    )]
    LocalChecksumMismatch { expected: String, attempts: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Copies one content item from `source` to `dest`, verifying checksums at
/// both hops.
pub(super) async fn duplicate_content<S: StorageProvider>(
    source: &S,
    dest: &S,
    retry: RetryConfig,
    space_id: &SpaceId,
    content_id: &ContentId,
    source_checksum: &str,
    properties: &ContentProperties,
) -> Result<(), CopyError> {
    let staging = NamedTempFile::new()?;
    let staging_path = staging.path().to_path_buf();

    let mut verified = false;
    for attempt in 1..=LOCAL_CHECKSUM_ATTEMPTS {
        let outcome = retry_with_backoff(retry, || source.get_content(space_id, content_id)).await;
        let mut stream = outcome.or_not_found(|| {
            Err(StorageError::not_found(format!(
                "source content {}/{}",
                space_id, content_id
            )))
        })?;

        let mut file = tokio::fs::File::create(&staging_path).await?;
        tokio::io::copy(&mut stream, &mut file).await?;
        drop(file);

        let local_checksum = md5_hex_of_file(&staging_path).await?;
        if local_checksum == source_checksum {
            verified = true;
            break;
        }
        warn!(
            %space_id,
            %content_id,
            attempt,
            expected = source_checksum,
            computed = %local_checksum,
            "local checksum mismatch on fetched source content"
        );
    }

    if !verified {
        return Err(CopyError::LocalChecksumMismatch {
            expected: source_checksum.to_string(),
            attempts: LOCAL_CHECKSUM_ATTEMPTS,
        });
    }

    let length = tokio::fs::metadata(&staging_path).await?.len();
    let mimetype = properties.get(PROP_CONTENT_MIMETYPE).cloned();

    let outcome = retry_with_backoff(retry, || async {
        let file = tokio::fs::File::open(&staging_path).await?;
        let stored_checksum = dest
            .put_content(
                space_id,
                content_id,
                mimetype.as_deref(),
                properties,
                length,
                source_checksum,
                file,
            )
            .await?;
        if stored_checksum != source_checksum {
            return Err(StorageError::transient(format!(
                "checksum in destination ({}) does not match source ({})",
                stored_checksum, source_checksum
            )));
        }
        Ok(())
    })
    .await;

    outcome.or_not_found(|| {
        Err(StorageError::not_found(format!(
            "destination space {}",
            space_id
        )))
    })?;
    Ok(())
}

/// Streaming MD5 over a file, hex encoded.
async fn md5_hex_of_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
