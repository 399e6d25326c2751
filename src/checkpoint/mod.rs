//! Crash-safe persistence of tracker state.
//!
//! A checkpoint is written to `checkpoint.json.<uuid>.tmp` inside the
//! checkpoint directory and then renamed over `checkpoint.json`, so a reader
//! never sees a half-written document. Reading never fails: a missing or
//! corrupt checkpoint means "start fresh".

mod storage;

pub use storage::{FsStorage, MemoryStorage, Storage};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::CheckpointError;
use crate::tracker::TrackerSnapshot;

/// Name of the live checkpoint file inside the checkpoint directory.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Bumped when the document layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

/// When checkpoints are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointFrequency {
    /// After every phase-level transition
    #[default]
    PerPhase,
    /// Additionally after every subtask is checked off
    PerSubtask,
}

/// The persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    /// Unique per save; phases record the revision current when they start
    pub revision: String,
    pub saved_at: DateTime<Utc>,
    #[serde(flatten)]
    pub snapshot: TrackerSnapshot,
}

/// Saves and restores tracker snapshots through a [`Storage`] backend.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    storage: Arc<dyn Storage>,
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(storage: Arc<dyn Storage>, dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            dir: dir.into(),
        }
    }

    /// Store backed by the real filesystem.
    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FsStorage), dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the live checkpoint file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    /// Persist a snapshot. Returns the new revision.
    pub fn save(&self, snapshot: &TrackerSnapshot) -> Result<String, CheckpointError> {
        let revision = Uuid::new_v4().to_string();
        let document = Checkpoint {
            format_version: FORMAT_VERSION,
            revision: revision.clone(),
            saved_at: Utc::now(),
            snapshot: snapshot.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        self.storage
            .ensure_dir(&self.dir)
            .map_err(|source| CheckpointError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let live = self.path();
        let temp = self.dir.join(format!("{}.{}.tmp", CHECKPOINT_FILE, revision));
        self.storage
            .write_file_atomic(&temp, &bytes)
            .map_err(|source| CheckpointError::Io {
                path: temp.clone(),
                source,
            })?;

        if let Err(source) = self.storage.rename(&temp, &live, true) {
            let _ = self.storage.remove_file(&temp);
            return Err(CheckpointError::Io { path: live, source });
        }

        debug!(revision = %revision, path = %live.display(), "Checkpoint saved");
        Ok(revision)
    }

    /// Read the live checkpoint, reporting why it could not be used.
    pub fn try_load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path();
        let bytes = match self.storage.read_file(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };

        let document: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Unreadable {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if document.format_version != FORMAT_VERSION {
            return Err(CheckpointError::Unreadable {
                path,
                reason: format!(
                    "format version {} (expected {})",
                    document.format_version, FORMAT_VERSION
                ),
            });
        }
        Ok(Some(document))
    }

    /// Read the live checkpoint. Any failure is logged and treated as absence.
    pub fn load(&self) -> Option<Checkpoint> {
        match self.try_load() {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Ignoring unusable checkpoint; starting fresh");
                None
            }
        }
    }

    /// Remove the live checkpoint. Returns whether one existed.
    pub fn delete(&self) -> Result<bool, CheckpointError> {
        let path = self.path();
        match self.storage.remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CheckpointError::Io { path, source }),
        }
    }
}
