//! # stagetrack-core
//!
//! The stage workflow state machine for stagetrack - THE LOGIC.
//!
//! Tracks one run of an ordered delivery pipeline per feature: which stage
//! is current, which stages are done, what was produced, and every rollback
//! along the way.
//!
//! ## Layers
//!
//! - `catalog` → the static, validated stage definitions
//! - `types` + `formats` → the persisted record and its JSON document
//! - `storage` → where records live (files, redb, memory)
//! - `transition` → pure transitions over a loaded record
//! - `engine` → load, transition, save
//! - `report` → read-only renderings
//!
//! ## Constraints
//!
//! - Synchronous, no network
//! - Every refused transition leaves the stored record untouched
//! - Time is always passed in by the caller

// =============================================================================
// MODULES
// =============================================================================

pub mod catalog;
pub mod engine;
pub mod formats;
pub mod primitives;
pub mod report;
pub mod storage;
pub mod transition;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    FeatureId, RollbackEntry, StageId, StageState, StageStatus, Timestamp, TrackError,
    UnmetPrerequisite, ValidationResult, WorkflowStatus, WorkflowTracking,
};

// =============================================================================
// RE-EXPORTS: State Machine
// =============================================================================

pub use catalog::{StageCatalog, StageDefinition};
pub use engine::{
    CompleteOutcome, EngineConfig, InitOutcome, InitPolicy, ResumePolicy, StageReadiness,
    WorkflowEngine,
};
pub use report::{ProgressReport, ProgressSummary, format_timestamp};
pub use storage::{
    FeatureLock, FileStore, MemoryStore, RedbStore, SessionKey, StoreBackend, WorkflowStore,
};
pub use transition::{Advance, CompletionReport, StageMachine};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{tracking_from_json, tracking_to_json};
