//! # File-backed Store
//!
//! One directory per run under a sessions root:
//!
//! ```text
//! <sessions root>/
//!   2026-03-01-checkout/stage-tracking.json
//!   2026-02-11-checkout~archived-1770800000/stage-tracking.json
//!   .locks/checkout.lock
//! ```
//!
//! Records are replaced whole: the new JSON is written to a temporary file
//! in the same directory, flushed, then renamed over the old file, so a
//! reader never observes a partially written record.

use super::{SessionKey, WorkflowStore, check_revision};
use crate::TrackError;
use crate::primitives::TRACKING_FILE_NAME;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const TEMP_SUFFIX: &str = ".tmp";

/// Directory-per-run store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Store rooted at `root`. Nothing is created until the first save.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the run at `key`.
    #[must_use]
    pub fn session_dir(&self, key: &SessionKey) -> PathBuf {
        self.root.join(key.name())
    }

    /// Path of the record file for `key`.
    #[must_use]
    pub fn record_path(&self, key: &SessionKey) -> PathBuf {
        self.session_dir(key).join(TRACKING_FILE_NAME)
    }

    fn write_atomic(&self, key: &SessionKey, bytes: &[u8]) -> Result<(), TrackError> {
        let dir = self.session_dir(key);
        fs::create_dir_all(&dir).map_err(|e| TrackError::IoError(e.to_string()))?;

        let target = dir.join(TRACKING_FILE_NAME);
        let temp = dir.join(format!("{}{}", TRACKING_FILE_NAME, TEMP_SUFFIX));
        {
            let mut file = fs::File::create(&temp).map_err(|e| TrackError::IoError(e.to_string()))?;
            file.write_all(bytes)
                .map_err(|e| TrackError::IoError(e.to_string()))?;
            file.sync_all()
                .map_err(|e| TrackError::IoError(e.to_string()))?;
        }
        fs::rename(&temp, &target).map_err(|e| TrackError::IoError(e.to_string()))?;
        Ok(())
    }
}

impl WorkflowStore for FileStore {
    fn keys(&self) -> Result<Vec<SessionKey>, TrackError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TrackError::IoError(e.to_string())),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TrackError::IoError(e.to_string()))?;
            let Some(key) = entry.file_name().to_str().and_then(SessionKey::parse) else {
                continue;
            };
            if entry.path().join(TRACKING_FILE_NAME).is_file() {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn read(&self, key: &SessionKey) -> Result<Option<Vec<u8>>, TrackError> {
        match fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackError::IoError(e.to_string())),
        }
    }

    fn commit(&mut self, key: &SessionKey, expected: u64, bytes: &[u8]) -> Result<(), TrackError> {
        // Cross-process exclusion is the caller's FeatureLock; this check
        // catches stale in-process copies.
        check_revision(self.read(key)?.as_deref(), expected)?;
        self.write_atomic(key, bytes)
    }

    fn relocate(&mut self, from: &SessionKey, to: &SessionKey) -> Result<(), TrackError> {
        let target = self.session_dir(to);
        if target.exists() {
            return Err(TrackError::IoError(format!(
                "location already exists: {}",
                target.display()
            )));
        }
        fs::rename(self.session_dir(from), target).map_err(|e| TrackError::IoError(e.to_string()))
    }

    fn contains(&self, key: &SessionKey) -> Result<bool, TrackError> {
        Ok(self.session_dir(key).exists())
    }
}
