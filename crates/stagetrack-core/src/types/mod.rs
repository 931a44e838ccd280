//! # Core Type Definitions
//!
//! This module contains all core types for the stagetrack state machine:
//! - Identifiers (`StageId`, `FeatureId`)
//! - Closed status enums (`StageState`, `WorkflowStatus`)
//! - The persisted record (`WorkflowTracking`, `StageStatus`, `RollbackEntry`)
//! - Error types (`TrackError`)
//!
//! ## Wire Compatibility
//!
//! Field names and enum spellings are the persisted JSON format. Optional
//! fields are omitted when absent and tolerated when missing, so records
//! written by earlier tooling load unchanged.

use crate::catalog::StageCatalog;
use crate::primitives::MAX_FEATURE_LENGTH;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Timestamps are always UTC.
pub type Timestamp = DateTime<Utc>;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Position of a stage in the catalog, starting at 1.
///
/// Ids define the total execution order of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub u32);

impl StageId {
    /// Create a stage id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// The id of the following stage.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated feature identifier.
///
/// The identifier becomes part of a storage location name, so it is limited
/// to ASCII alphanumerics, `-`, `_` and `.`, and may not start with `.` or `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeatureId(String);

impl FeatureId {
    /// Parse and validate a feature identifier.
    pub fn parse(raw: &str) -> Result<Self, TrackError> {
        if raw.is_empty() {
            return Err(TrackError::InvalidFeature(
                "feature name must not be empty".to_string(),
            ));
        }
        if raw.len() > MAX_FEATURE_LENGTH {
            return Err(TrackError::InvalidFeature(format!(
                "feature name is {} characters (maximum {})",
                raw.len(),
                MAX_FEATURE_LENGTH
            )));
        }
        if raw.starts_with('.') || raw.starts_with('-') {
            return Err(TrackError::InvalidFeature(format!(
                "feature name '{}' must not start with '.' or '-'",
                raw
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(TrackError::InvalidFeature(format!(
                "feature name '{}' contains invalid character {:?}",
                raw, bad
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FeatureId {
    type Error = TrackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FeatureId> for String {
    fn from(value: FeatureId) -> Self {
        value.0
    }
}

// =============================================================================
// STATUS ENUMS
// =============================================================================

/// Progress of a single stage within one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StageState {
    /// Wire spelling of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Pending => "pending",
            StageState::InProgress => "in_progress",
            StageState::Completed => "completed",
            StageState::Failed => "failed",
        }
    }

    /// Icon used by the progress report.
    #[must_use]
    pub fn icon(&self) -> &'static str {
        match self {
            StageState::Pending => "○",
            StageState::InProgress => "🔄",
            StageState::Completed => "✅",
            StageState::Failed => "❌",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a whole workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Completed,
    Aborted,
    Failed,
}

impl WorkflowStatus {
    /// Wire spelling of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Aborted => "aborted",
            WorkflowStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowStatus::Active)
    }

    /// Only aborted or failed runs may be resumed.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(self, WorkflowStatus::Aborted | WorkflowStatus::Failed)
    }

    /// A frozen run accepts no forward progress until it is resumed.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.is_resumable()
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// RECORD
// =============================================================================

/// Outcome of checking one validation criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub criterion: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn new(criterion: impl Into<String>, passed: bool) -> Self {
        Self {
            criterion: criterion.into(),
            passed,
            notes: None,
        }
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Per-run status of one catalog stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    pub id: StageId,
    pub name: String,
    pub status: StageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_results: Option<Vec<ValidationResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageStatus {
    /// A stage that has not been started.
    #[must_use]
    pub fn pending(id: StageId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: StageState::Pending,
            started_at: None,
            completed_at: None,
            outputs: None,
            validation_results: None,
            error: None,
        }
    }

    /// Return to `pending`, dropping timestamps, outputs, results and error.
    pub fn reset(&mut self) {
        self.status = StageState::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.outputs = None;
        self.validation_results = None;
        self.error = None;
    }

    /// Enter `in_progress` at `now`, dropping any earlier outputs and results.
    pub fn start(&mut self, now: Timestamp) {
        self.status = StageState::InProgress;
        self.started_at = Some(now);
        self.completed_at = None;
        self.outputs = None;
        self.validation_results = None;
        self.error = None;
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == StageState::Completed
    }
}

/// One entry of the append-only rollback audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub stage: StageId,
    pub timestamp: Timestamp,
    pub reason: String,
}

/// The tracking record of one workflow run for a feature.
///
/// `stages` is index-aligned with the catalog: `stages[i].id == catalog[i].id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTracking {
    pub feature: String,
    pub workflow_status: WorkflowStatus,
    pub current_stage: StageId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    pub stages: Vec<StageStatus>,
    #[serde(default)]
    pub rollback_history: Vec<RollbackEntry>,
    /// Reason given to the last abort, or error given to the last fail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    /// Save counter; a save only succeeds against the revision it loaded.
    #[serde(default)]
    pub revision: u64,
}

impl WorkflowTracking {
    /// Find the status entry for a stage.
    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&StageStatus> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Find the mutable status entry for a stage.
    pub fn stage_mut(&mut self, id: StageId) -> Option<&mut StageStatus> {
        self.stages.iter_mut().find(|s| s.id == id)
    }

    /// Number of stages in `completed` state.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.is_completed()).count()
    }

    /// Verify the record still lines up with `catalog`.
    ///
    /// A record that fails this check was written against a different
    /// catalog or damaged on disk; it is reported as [`TrackError::Corrupt`].
    pub fn check_alignment(&self, catalog: &StageCatalog) -> Result<(), TrackError> {
        if self.stages.len() != catalog.len() {
            return Err(TrackError::Corrupt(format!(
                "record for '{}' has {} stages, catalog defines {}",
                self.feature,
                self.stages.len(),
                catalog.len()
            )));
        }
        for (status, definition) in self.stages.iter().zip(catalog.iter()) {
            if status.id != definition.id {
                return Err(TrackError::Corrupt(format!(
                    "record for '{}' lists stage {} where catalog has stage {}",
                    self.feature, status.id, definition.id
                )));
            }
        }
        if catalog.get(self.current_stage).is_none() {
            return Err(TrackError::Corrupt(format!(
                "record for '{}' points at unknown current stage {}",
                self.feature, self.current_stage
            )));
        }
        Ok(())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// A prerequisite that blocked a stage, with the state it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmetPrerequisite {
    pub stage: StageId,
    pub name: String,
    pub status: StageState,
}

impl fmt::Display for UnmetPrerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({}): {}", self.stage, self.name, self.status)
    }
}

fn join_unmet(unmet: &[UnmetPrerequisite]) -> String {
    unmet
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur in the stagetrack system.
///
/// Every transition error is raised before the record is touched, so a
/// failed operation leaves the persisted record unchanged.
#[derive(Debug, Error)]
pub enum TrackError {
    /// No tracking record exists for the feature.
    #[error("No stage tracking found for feature: {feature}")]
    WorkflowNotFound { feature: String },

    /// The stage id is not part of the catalog.
    #[error("Invalid stage ID: {stage} (expected 1-{max})")]
    UnknownStage { stage: StageId, max: u32 },

    /// `init` found a run that is still active.
    #[error("Stage tracking already active for feature: {feature} (current stage: {current_stage} {stage_name})")]
    AlreadyActive {
        feature: String,
        current_stage: StageId,
        stage_name: String,
    },

    /// `init` found a finished run and the policy demands it be archived first.
    #[error("Previous run for feature {feature} is {status}; archive it before starting a new one")]
    ArchiveRequired {
        feature: String,
        status: WorkflowStatus,
    },

    /// One or more prerequisites of the stage are not completed.
    #[error("Prerequisites not met for stage {stage}: {}", join_unmet(.unmet))]
    PrerequisitesUnmet {
        stage: StageId,
        unmet: Vec<UnmetPrerequisite>,
    },

    /// Stages execute strictly in order.
    #[error("Stage {requested} is not the current stage (current stage: {current})")]
    OutOfSequence { requested: StageId, current: StageId },

    /// The operation is not allowed from the workflow's status.
    #[error("Cannot {operation} - workflow status is: {status}")]
    InvalidTransition {
        operation: &'static str,
        status: WorkflowStatus,
    },

    /// The stored record could not be read back.
    #[error("Corrupt tracking record: {0}")]
    Corrupt(String),

    #[error("Invalid feature: {0}")]
    InvalidFeature(String),

    #[error("Invalid stage catalog: {0}")]
    InvalidCatalog(String),

    /// Another writer saved the record after it was loaded.
    #[error("Record changed concurrently (expected revision {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },

    /// Another process holds the feature lock.
    #[error("Feature is locked by another process: {0}")]
    Locked(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl TrackError {
    /// Whether this is one of the not-found kinds (missing record or stage).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TrackError::WorkflowNotFound { .. } | TrackError::UnknownStage { .. }
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
