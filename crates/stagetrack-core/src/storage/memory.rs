//! In-process store. Nothing survives the process.

use super::{SessionKey, WorkflowStore, check_revision};
use crate::TrackError;
use std::collections::BTreeMap;

/// Map from location name to raw record bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: BTreeMap<String, (SessionKey, Vec<u8>)>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Store raw bytes at `key` without any checks.
    pub fn insert_raw(&mut self, key: SessionKey, bytes: Vec<u8>) {
        self.records.insert(key.name(), (key, bytes));
    }
}

impl WorkflowStore for MemoryStore {
    fn keys(&self) -> Result<Vec<SessionKey>, TrackError> {
        Ok(self.records.values().map(|(k, _)| k.clone()).collect())
    }

    fn read(&self, key: &SessionKey) -> Result<Option<Vec<u8>>, TrackError> {
        Ok(self.records.get(&key.name()).map(|(_, b)| b.clone()))
    }

    fn commit(&mut self, key: &SessionKey, expected: u64, bytes: &[u8]) -> Result<(), TrackError> {
        check_revision(
            self.records.get(&key.name()).map(|(_, b)| b.as_slice()),
            expected,
        )?;
        self.insert_raw(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn relocate(&mut self, from: &SessionKey, to: &SessionKey) -> Result<(), TrackError> {
        if self.records.contains_key(&to.name()) {
            return Err(TrackError::IoError(format!("location already exists: {}", to)));
        }
        let (_, bytes) = self
            .records
            .remove(&from.name())
            .ok_or_else(|| TrackError::IoError(format!("no record at {}", from)))?;
        self.insert_raw(to.clone(), bytes);
        Ok(())
    }

    fn contains(&self, key: &SessionKey) -> Result<bool, TrackError> {
        Ok(self.records.contains_key(&key.name()))
    }
}
