//! # Workflow Storage
//!
//! Persists one [`WorkflowTracking`] record per feature run.
//!
//! Every backend exposes the same four primitives (list, read, guarded
//! write, relocate); the workflow-level operations (`locate`, `load`,
//! `save`, `archive`, `history`) are provided on top of them by the
//! [`WorkflowStore`] trait so all backends share one set of semantics.
//!
//! ## Location Names
//!
//! A run lives under `{YYYY-MM-DD}-{feature}`. Archiving renames it to
//! `{YYYY-MM-DD}-{feature}~archived-{unix seconds}`; archived locations are
//! listed by `history` but never located.
//!
//! ## Lost Updates
//!
//! Each saved record carries a `revision`. A save is accepted only when the
//! stored revision still equals the one that was loaded, otherwise it fails
//! with [`TrackError::Conflict`] and nothing is written.

mod file_store;
mod lock;
mod memory;
mod redb_store;

pub use file_store::FileStore;
pub use lock::FeatureLock;
pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::formats::{tracking_from_json, tracking_to_json};
use crate::primitives::{ARCHIVE_MARKER, SESSION_DATE_FORMAT, SESSION_DATE_LEN};
use crate::{FeatureId, Timestamp, TrackError, WorkflowTracking};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::path::Path;

// =============================================================================
// SESSION KEY
// =============================================================================

/// Storage location of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionKey {
    date: NaiveDate,
    feature: FeatureId,
    #[serde(skip_serializing_if = "Option::is_none")]
    archived_at: Option<i64>,
}

impl SessionKey {
    /// A live location for `feature` created on `date`.
    #[must_use]
    pub fn new(date: NaiveDate, feature: FeatureId) -> Self {
        Self {
            date,
            feature,
            archived_at: None,
        }
    }

    /// Parse a location name. Names that are not session locations yield `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let date = NaiveDate::parse_from_str(name.get(..SESSION_DATE_LEN)?, SESSION_DATE_FORMAT)
            .ok()?;
        let rest = name.get(SESSION_DATE_LEN..)?.strip_prefix('-')?;

        let (feature, archived_at) = match rest.split_once(ARCHIVE_MARKER) {
            Some((feature, secs)) => (feature, Some(secs.parse::<i64>().ok()?)),
            None => (rest, None),
        };

        Some(Self {
            date,
            feature: FeatureId::parse(feature).ok()?,
            archived_at,
        })
    }

    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    #[must_use]
    pub fn feature(&self) -> &FeatureId {
        &self.feature
    }

    /// Unix seconds at which the run was archived.
    #[must_use]
    pub fn archived_at(&self) -> Option<i64> {
        self.archived_at
    }

    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// The archived form of this location.
    #[must_use]
    pub fn archived(&self, unix_seconds: i64) -> Self {
        Self {
            date: self.date,
            feature: self.feature.clone(),
            archived_at: Some(unix_seconds),
        }
    }

    /// The location name.
    #[must_use]
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Sort key: later dates first, and a live run is newer than any run
    /// archived on the same date.
    fn recency(&self) -> (NaiveDate, i64) {
        (self.date, self.archived_at.unwrap_or(i64::MAX))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.date.format(SESSION_DATE_FORMAT),
            self.feature
        )?;
        if let Some(secs) = self.archived_at {
            write!(f, "{}{}", ARCHIVE_MARKER, secs)?;
        }
        Ok(())
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// A place where tracking records live.
///
/// Implementors provide the raw primitives; the workflow operations are
/// default methods and should not be overridden.
pub trait WorkflowStore {
    /// Every location holding a record, live and archived, in no particular order.
    fn keys(&self) -> Result<Vec<SessionKey>, TrackError>;

    /// Raw record bytes at `key`, if any.
    fn read(&self, key: &SessionKey) -> Result<Option<Vec<u8>>, TrackError>;

    /// Replace the record at `key` with `bytes` if the stored revision is
    /// still `expected` (an absent record counts as revision 0).
    ///
    /// The check and the write must be one step as far as other users of the
    /// same backend can observe.
    fn commit(&mut self, key: &SessionKey, expected: u64, bytes: &[u8]) -> Result<(), TrackError>;

    /// Move the record at `from` to `to`. `to` must not exist.
    fn relocate(&mut self, from: &SessionKey, to: &SessionKey) -> Result<(), TrackError>;

    /// Whether a record exists at `key`.
    fn contains(&self, key: &SessionKey) -> Result<bool, TrackError> {
        Ok(self.keys()?.contains(key))
    }

    /// The live location of `feature`, if one exists.
    ///
    /// Matching is exact on the feature part of the name. Should several live
    /// locations exist, the newest wins.
    fn locate(&self, feature: &FeatureId) -> Result<Option<SessionKey>, TrackError> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| !k.is_archived() && k.feature() == feature)
            .max_by_key(SessionKey::recency))
    }

    /// The existing live location, or a fresh one dated `now`.
    ///
    /// A fresh location only materializes on the first `save`.
    fn create_or_reuse(
        &self,
        feature: &FeatureId,
        now: Timestamp,
    ) -> Result<SessionKey, TrackError> {
        match self.locate(feature)? {
            Some(key) => Ok(key),
            None => Ok(SessionKey::new(now.date_naive(), feature.clone())),
        }
    }

    /// Parse the record at `key`, if any.
    fn load_at(&self, key: &SessionKey) -> Result<Option<WorkflowTracking>, TrackError> {
        self.read(key)?
            .map(|bytes| tracking_from_json(&bytes))
            .transpose()
    }

    /// Locate and parse the live record of `feature`.
    fn load(&self, feature: &FeatureId) -> Result<(SessionKey, WorkflowTracking), TrackError> {
        let not_found = || TrackError::WorkflowNotFound {
            feature: feature.to_string(),
        };
        let key = self.locate(feature)?.ok_or_else(not_found)?;
        let tracking = self.load_at(&key)?.ok_or_else(not_found)?;
        tracing::debug!(location = %key, revision = tracking.revision, "loaded record");
        Ok((key, tracking))
    }

    /// Write `tracking` to `key`, stamping `updated_at` and bumping `revision`.
    ///
    /// On success `tracking` reflects exactly what was stored; on error it is
    /// left untouched.
    fn save(
        &mut self,
        key: &SessionKey,
        tracking: &mut WorkflowTracking,
        now: Timestamp,
    ) -> Result<(), TrackError> {
        let expected = tracking.revision;
        let mut next = tracking.clone();
        next.updated_at = now;
        next.revision = expected.saturating_add(1);

        let bytes = tracking_to_json(&next)?;
        self.commit(key, expected, &bytes)?;
        tracing::debug!(location = %key, revision = next.revision, "saved record");

        *tracking = next;
        Ok(())
    }

    /// Move the run at `key` aside, returning its archived location.
    fn archive(&mut self, key: &SessionKey, now: Timestamp) -> Result<SessionKey, TrackError> {
        let mut secs = now.timestamp();
        let mut target = key.archived(secs);
        while self.contains(&target)? {
            secs = secs.saturating_add(1);
            target = key.archived(secs);
        }
        self.relocate(key, &target)?;
        tracing::debug!(from = %key, to = %target, "archived record");
        Ok(target)
    }

    /// Every location of `feature`, newest first.
    fn history(&self, feature: &FeatureId) -> Result<Vec<SessionKey>, TrackError> {
        let mut keys: Vec<SessionKey> = self
            .keys()?
            .into_iter()
            .filter(|k| k.feature() == feature)
            .collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.recency()));
        Ok(keys)
    }
}

/// Compare-and-swap check shared by the backends.
pub(crate) fn check_revision(stored: Option<&[u8]>, expected: u64) -> Result<(), TrackError> {
    let found = match stored {
        Some(bytes) => tracking_from_json(bytes)?.revision,
        None => 0,
    };
    if found != expected {
        return Err(TrackError::Conflict { expected, found });
    }
    Ok(())
}

// =============================================================================
// BACKEND SWITCH
// =============================================================================

/// The storage backend selected at runtime.
#[derive(Debug)]
pub enum StoreBackend {
    /// One directory per run with a JSON record file.
    File(FileStore),
    /// Embedded redb database (ACID, single file).
    Redb(RedbStore),
    /// Volatile in-process map.
    Memory(MemoryStore),
}

impl StoreBackend {
    /// File-backed store rooted at `sessions_dir`.
    #[must_use]
    pub fn file(sessions_dir: impl AsRef<Path>) -> Self {
        Self::File(FileStore::new(sessions_dir))
    }

    /// Open or create a redb database at `path`.
    pub fn redb(path: impl AsRef<Path>) -> Result<Self, TrackError> {
        Ok(Self::Redb(RedbStore::open(path)?))
    }

    #[must_use]
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    /// Check if records survive the process.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        !matches!(self, StoreBackend::Memory(_))
    }
}

impl Default for StoreBackend {
    fn default() -> Self {
        Self::memory()
    }
}

impl WorkflowStore for StoreBackend {
    fn keys(&self) -> Result<Vec<SessionKey>, TrackError> {
        match self {
            StoreBackend::File(s) => s.keys(),
            StoreBackend::Redb(s) => s.keys(),
            StoreBackend::Memory(s) => s.keys(),
        }
    }

    fn read(&self, key: &SessionKey) -> Result<Option<Vec<u8>>, TrackError> {
        match self {
            StoreBackend::File(s) => s.read(key),
            StoreBackend::Redb(s) => s.read(key),
            StoreBackend::Memory(s) => s.read(key),
        }
    }

    fn commit(&mut self, key: &SessionKey, expected: u64, bytes: &[u8]) -> Result<(), TrackError> {
        match self {
            StoreBackend::File(s) => s.commit(key, expected, bytes),
            StoreBackend::Redb(s) => s.commit(key, expected, bytes),
            StoreBackend::Memory(s) => s.commit(key, expected, bytes),
        }
    }

    fn relocate(&mut self, from: &SessionKey, to: &SessionKey) -> Result<(), TrackError> {
        match self {
            StoreBackend::File(s) => s.relocate(from, to),
            StoreBackend::Redb(s) => s.relocate(from, to),
            StoreBackend::Memory(s) => s.relocate(from, to),
        }
    }

    fn contains(&self, key: &SessionKey) -> Result<bool, TrackError> {
        match self {
            StoreBackend::File(s) => s.contains(key),
            StoreBackend::Redb(s) => s.contains(key),
            StoreBackend::Memory(s) => s.contains(key),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
