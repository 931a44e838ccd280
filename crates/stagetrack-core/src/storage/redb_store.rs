//! # redb-backed Store
//!
//! All runs in a single embedded redb database file.
//!
//! - Table `sessions`: location name -> JSON record bytes
//!
//! The JSON bytes are the same document the file store writes, so a record
//! can be exported from one backend and imported into the other unchanged.
//! The revision check and the write share one write transaction, so
//! concurrent writers through the same database serialize cleanly.

use super::{SessionKey, WorkflowStore, check_revision};
use crate::TrackError;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};

/// Table for runs: location name -> serialized WorkflowTracking
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Single-file ACID store.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TrackError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| TrackError::IoError(e.to_string()))?;
        }
        let db = Database::create(&path).map_err(|e| TrackError::IoError(e.to_string()))?;

        // Initialize table if it doesn't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| TrackError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(SESSIONS)
                .map_err(|e| TrackError::IoError(e.to_string()))?;
            write_txn
                .commit()
                .map_err(|e| TrackError::IoError(e.to_string()))?;
        }

        Ok(Self { db, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkflowStore for RedbStore {
    fn keys(&self) -> Result<Vec<SessionKey>, TrackError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TrackError::IoError(e.to_string()))?;
        let table = read_txn
            .open_table(SESSIONS)
            .map_err(|e| TrackError::IoError(e.to_string()))?;

        let mut keys = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| TrackError::IoError(e.to_string()))?
        {
            let (name, _) = entry.map_err(|e| TrackError::IoError(e.to_string()))?;
            if let Some(key) = SessionKey::parse(name.value()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn read(&self, key: &SessionKey) -> Result<Option<Vec<u8>>, TrackError> {
        let name = key.name();
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TrackError::IoError(e.to_string()))?;
        let table = read_txn
            .open_table(SESSIONS)
            .map_err(|e| TrackError::IoError(e.to_string()))?;
        let bytes = table
            .get(name.as_str())
            .map_err(|e| TrackError::IoError(e.to_string()))?
            .map(|v| v.value().to_vec());
        Ok(bytes)
    }

    fn commit(&mut self, key: &SessionKey, expected: u64, bytes: &[u8]) -> Result<(), TrackError> {
        let name = key.name();
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| TrackError::IoError(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(SESSIONS)
                .map_err(|e| TrackError::IoError(e.to_string()))?;
            let stored = table
                .get(name.as_str())
                .map_err(|e| TrackError::IoError(e.to_string()))?
                .map(|v| v.value().to_vec());
            // Dropping the transaction on error aborts it.
            check_revision(stored.as_deref(), expected)?;
            table
                .insert(name.as_str(), bytes)
                .map_err(|e| TrackError::IoError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| TrackError::IoError(e.to_string()))?;
        Ok(())
    }

    fn relocate(&mut self, from: &SessionKey, to: &SessionKey) -> Result<(), TrackError> {
        let (from_name, to_name) = (from.name(), to.name());
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| TrackError::IoError(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(SESSIONS)
                .map_err(|e| TrackError::IoError(e.to_string()))?;
            if table
                .get(to_name.as_str())
                .map_err(|e| TrackError::IoError(e.to_string()))?
                .is_some()
            {
                return Err(TrackError::IoError(format!(
                    "location already exists: {}",
                    to_name
                )));
            }
            let bytes = table
                .remove(from_name.as_str())
                .map_err(|e| TrackError::IoError(e.to_string()))?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| TrackError::IoError(format!("no record at {}", from_name)))?;
            table
                .insert(to_name.as_str(), bytes.as_slice())
                .map_err(|e| TrackError::IoError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| TrackError::IoError(e.to_string()))?;
        Ok(())
    }
}
