//! # Feature Lock
//!
//! Advisory, exclusive, per-feature file lock. Mutating commands hold it
//! for the whole load-transition-save cycle so two processes cannot
//! interleave on the same feature. Contention fails immediately with
//! [`TrackError::Locked`]; nothing waits.
//!
//! The lock is released when the guard is dropped (or the process exits).

use crate::primitives::LOCKS_DIR_NAME;
use crate::{FeatureId, TrackError};
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file for one feature, `<root>/.locks/<feature>.lock`.
#[derive(Debug)]
pub struct FeatureLock {
    lock: RwLock<File>,
    path: PathBuf,
}

impl FeatureLock {
    /// Open (creating if needed) the lock file for `feature` under `root`.
    pub fn open(root: impl AsRef<Path>, feature: &FeatureId) -> Result<Self, TrackError> {
        let dir = root.as_ref().join(LOCKS_DIR_NAME);
        fs::create_dir_all(&dir).map_err(|e| TrackError::IoError(e.to_string()))?;

        let path = dir.join(format!("{}.lock", feature));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| TrackError::IoError(e.to_string()))?;

        Ok(Self {
            lock: RwLock::new(file),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock or fail with [`TrackError::Locked`].
    pub fn try_acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>, TrackError> {
        let path = self.path.display().to_string();
        self.lock.try_write().map_err(|_| TrackError::Locked(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_holder_is_refused() {
        let dir = TempDir::new().expect("tempdir");
        let feature = FeatureId::parse("checkout").expect("feature");

        let mut first = FeatureLock::open(dir.path(), &feature).expect("open");
        let mut second = FeatureLock::open(dir.path(), &feature).expect("open");

        let guard = first.try_acquire().expect("first acquire");
        assert!(matches!(second.try_acquire(), Err(TrackError::Locked(_))));

        drop(guard);
        assert!(second.try_acquire().is_ok());
    }

    #[test]
    fn features_lock_independently() {
        let dir = TempDir::new().expect("tempdir");
        let mut a = FeatureLock::open(dir.path(), &FeatureId::parse("a").expect("a")).expect("open");
        let mut b = FeatureLock::open(dir.path(), &FeatureId::parse("b").expect("b")).expect("open");

        assert!(a.path().ends_with(".locks/a.lock"));
        let _ga = a.try_acquire().expect("a");
        assert!(b.try_acquire().is_ok());
    }
}
