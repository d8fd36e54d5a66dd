//! Persistent producer state.
//!
//! The producer's progress is a small set of in-flight morsels plus a stamp
//! recording when the last full pass completed. The whole set is persisted as
//! one JSON blob and replaced wholesale on every write.
//!
//! # Atomic Writes
//!
//! Writes use the write-to-temp-then-rename pattern:
//! 1. Write to `<state-file>.tmp`
//! 2. fsync the file
//! 3. Rename to `<state-file>`
//! 4. fsync the directory
//!
//! A reader therefore always sees either the old or the new state, never a
//! partial write, which is what lets the producer die at any point without
//! corrupting its resume position.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Morsel;

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur reading or writing producer state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// Result type for state-store operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// The persisted producer state blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerState {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    /// When this blob was written.
    pub saved_at: DateTime<Utc>,

    /// When the last full pass over every morsel completed. Used for
    /// frequency gating; cleared while a pass is in progress.
    pub run_completed_at: Option<DateTime<Utc>>,

    /// Morsels still in flight, in fairness order.
    pub morsels: Vec<Morsel>,
}

impl ProducerState {
    pub fn empty() -> Self {
        ProducerState {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            run_completed_at: None,
            morsels: Vec::new(),
        }
    }
}

/// File-backed store for [`ProducerState`], keyed by path (one file per
/// producer identity).
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the previously written state, or the empty state if the file
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Malformed JSON and schema mismatches are hard errors: resuming from a
    /// blob we cannot trust risks skipping work.
    pub fn load(&self) -> Result<ProducerState> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ProducerState::empty()),
            Err(e) => return Err(e.into()),
        };

        let state: ProducerState = serde_json::from_slice(&bytes)?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(StateError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                got: state.schema_version,
            });
        }
        Ok(state)
    }

    /// Replaces the persisted state atomically.
    pub fn save(&self, state: &ProducerState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            fsync_file(&file)?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            fsync_dir(parent)?;
        }

        Ok(())
    }
}

/// Syncs a file's contents and metadata to disk.
fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory, ensuring a rename within it is durable. Without this a
/// renamed file can revert to its old name after a power loss.
fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}
