//! # Workflow Engine
//!
//! Ties a [`WorkflowStore`] to a [`StageCatalog`]. Every mutating operation
//! follows the same cycle:
//!
//! 1. Parse the feature identifier
//! 2. Load the live record and check it against the catalog
//! 3. Apply a [`StageMachine`] transition to the loaded copy
//! 4. Save (compare-and-swap on `revision`)
//!
//! A refused transition returns before step 4, so the stored record is
//! never touched by a failed operation.

use crate::storage::{SessionKey, WorkflowStore};
use crate::transition::{Advance, CompletionReport, StageMachine};
use crate::{
    FeatureId, StageCatalog, StageId, Timestamp, TrackError, WorkflowStatus, WorkflowTracking,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// POLICIES
// =============================================================================

/// What `init` does when the feature's previous run is no longer active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitPolicy {
    /// Start over in the same location, replacing the finished run.
    #[default]
    Reuse,
    /// Refuse until the previous run has been archived.
    RequireArchive,
}

/// Whether `resume` re-checks the target stage's prerequisites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumePolicy {
    /// Refuse to resume at a stage whose prerequisites are not completed.
    #[default]
    Validate,
    /// Resume wherever the caller asks.
    Trust,
}

impl InitPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InitPolicy::Reuse => "reuse",
            InitPolicy::RequireArchive => "require-archive",
        }
    }
}

impl ResumePolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumePolicy::Validate => "validate",
            ResumePolicy::Trust => "trust",
        }
    }
}

impl fmt::Display for InitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ResumePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reuse" => Ok(InitPolicy::Reuse),
            "require-archive" | "require_archive" => Ok(InitPolicy::RequireArchive),
            other => Err(format!(
                "unknown init policy '{}' (expected reuse or require-archive)",
                other
            )),
        }
    }
}

impl FromStr for ResumePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validate" => Ok(ResumePolicy::Validate),
            "trust" => Ok(ResumePolicy::Trust),
            other => Err(format!(
                "unknown resume policy '{}' (expected validate or trust)",
                other
            )),
        }
    }
}

/// Engine behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub init_policy: InitPolicy,
    #[serde(default)]
    pub resume_policy: ResumePolicy,
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of `init`.
#[derive(Debug, Clone, Serialize)]
pub struct InitOutcome {
    pub location: SessionKey,
    pub tracking: WorkflowTracking,
    /// Status of the finished run this one replaced, if any.
    pub replaced: Option<WorkflowStatus>,
}

/// What the caller must produce to complete a ready stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReadiness {
    pub stage: StageId,
    pub name: String,
    pub description: String,
    pub expected_outputs: Vec<String>,
    pub validation_criteria: Vec<String>,
}

/// Result of `complete`.
#[derive(Debug, Clone, Serialize)]
pub struct CompleteOutcome {
    #[serde(flatten)]
    pub advance: Advance,
    pub tracking: WorkflowTracking,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Workflow operations over one store and one catalog.
#[derive(Debug)]
pub struct WorkflowEngine<S: WorkflowStore> {
    store: S,
    catalog: StageCatalog,
    config: EngineConfig,
}

impl<S: WorkflowStore> WorkflowEngine<S> {
    /// Engine with default policies.
    pub fn new(store: S, catalog: StageCatalog) -> Self {
        Self {
            store,
            catalog,
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Start a run for `feature` at stage 1.
    pub fn init(&mut self, feature: &str, now: Timestamp) -> Result<InitOutcome, TrackError> {
        let feature = FeatureId::parse(feature)?;
        let key = self.store.create_or_reuse(&feature, now)?;

        let mut revision = 0;
        let mut replaced = None;
        if let Some(previous) = self.store.load_at(&key)? {
            if previous.workflow_status.is_active() {
                tracing::warn!(feature = %feature, current_stage = %previous.current_stage, "init refused: run still active");
                return Err(TrackError::AlreadyActive {
                    feature: feature.to_string(),
                    current_stage: previous.current_stage,
                    stage_name: self.catalog.name_of(previous.current_stage).to_string(),
                });
            }
            if self.config.init_policy == InitPolicy::RequireArchive {
                tracing::warn!(feature = %feature, status = %previous.workflow_status, "init refused: previous run not archived");
                return Err(TrackError::ArchiveRequired {
                    feature: feature.to_string(),
                    status: previous.workflow_status,
                });
            }
            revision = previous.revision;
            replaced = Some(previous.workflow_status);
        }

        let mut tracking = StageMachine::new(&self.catalog).start(feature.as_str(), now);
        tracking.revision = revision;
        self.store.save(&key, &mut tracking, now)?;

        tracing::info!(feature = %feature, location = %key, replaced = ?replaced, "workflow initialized");
        Ok(InitOutcome {
            location: key,
            tracking,
            replaced,
        })
    }

    /// Load the live record of `feature`.
    pub fn status(&self, feature: &str) -> Result<(SessionKey, WorkflowTracking), TrackError> {
        let feature = FeatureId::parse(feature)?;
        self.load(&feature)
    }

    /// Read-only readiness check of `stage`.
    pub fn validate(&self, feature: &str, stage: StageId) -> Result<StageReadiness, TrackError> {
        let feature = FeatureId::parse(feature)?;
        let (_, tracking) = self.load(&feature)?;

        let definition = StageMachine::new(&self.catalog)
            .check_readiness(&tracking, stage)
            .inspect_err(|e| {
                tracing::warn!(feature = %feature, stage = %stage, error = %e, "stage not ready");
            })?;

        Ok(StageReadiness {
            stage,
            name: definition.name.clone(),
            description: definition.description.clone(),
            expected_outputs: definition.expected_outputs.clone(),
            validation_criteria: definition.validation_criteria.clone(),
        })
    }

    /// Complete the current stage.
    pub fn complete(
        &mut self,
        feature: &str,
        stage: StageId,
        report: CompletionReport,
        now: Timestamp,
    ) -> Result<CompleteOutcome, TrackError> {
        let (advance, tracking) = self.mutate(feature, "complete", now, |machine, tracking| {
            machine.complete(tracking, stage, report, now)
        })?;
        tracing::info!(
            feature = %tracking.feature,
            stage = %stage,
            workflow_completed = advance.workflow_completed,
            "stage completed"
        );
        Ok(CompleteOutcome { advance, tracking })
    }

    /// Roll back to `stage`, resetting it and every later stage.
    pub fn rollback(
        &mut self,
        feature: &str,
        stage: StageId,
        reason: Option<&str>,
        now: Timestamp,
    ) -> Result<WorkflowTracking, TrackError> {
        let (entry, tracking) = self.mutate(feature, "rollback", now, |machine, tracking| {
            machine.rollback(tracking, stage, reason, now)
        })?;
        tracing::info!(feature = %tracking.feature, stage = %stage, reason = %entry.reason, "rolled back");
        Ok(tracking)
    }

    /// Freeze the run.
    pub fn abort(
        &mut self,
        feature: &str,
        reason: Option<&str>,
        now: Timestamp,
    ) -> Result<WorkflowTracking, TrackError> {
        let ((), tracking) = self.mutate(feature, "abort", now, |machine, tracking| {
            machine.abort(tracking, reason, now);
            Ok(())
        })?;
        tracing::info!(feature = %tracking.feature, current_stage = %tracking.current_stage, "workflow aborted");
        Ok(tracking)
    }

    /// Record that the current stage failed.
    pub fn fail(
        &mut self,
        feature: &str,
        stage: StageId,
        error: &str,
        now: Timestamp,
    ) -> Result<WorkflowTracking, TrackError> {
        let ((), tracking) = self.mutate(feature, "fail", now, |machine, tracking| {
            machine.fail(tracking, stage, error, now)
        })?;
        tracing::info!(feature = %tracking.feature, stage = %stage, "stage failed");
        Ok(tracking)
    }

    /// Reactivate an aborted or failed run at `stage`.
    pub fn resume(
        &mut self,
        feature: &str,
        stage: StageId,
        now: Timestamp,
    ) -> Result<WorkflowTracking, TrackError> {
        let check = self.config.resume_policy == ResumePolicy::Validate;
        let ((), tracking) = self.mutate(feature, "resume", now, |machine, tracking| {
            machine.resume(tracking, stage, check, now)
        })?;
        tracing::info!(feature = %tracking.feature, stage = %stage, "workflow resumed");
        Ok(tracking)
    }

    /// Move the feature's finished run aside so `init` starts a fresh location.
    ///
    /// An unreadable record is archived as-is; an active run is refused.
    pub fn archive(&mut self, feature: &str, now: Timestamp) -> Result<SessionKey, TrackError> {
        let feature = FeatureId::parse(feature)?;
        let key = self
            .store
            .locate(&feature)?
            .ok_or_else(|| TrackError::WorkflowNotFound {
                feature: feature.to_string(),
            })?;

        match self.store.load_at(&key) {
            Ok(Some(tracking)) if tracking.workflow_status.is_active() => {
                tracing::warn!(feature = %feature, "archive refused: run still active");
                return Err(TrackError::InvalidTransition {
                    operation: "archive",
                    status: tracking.workflow_status,
                });
            }
            Ok(_) => {}
            Err(TrackError::Corrupt(reason)) => {
                tracing::warn!(feature = %feature, location = %key, %reason, "archiving unreadable record");
            }
            Err(e) => return Err(e),
        }

        let archived = self.store.archive(&key, now)?;
        tracing::info!(feature = %feature, location = %archived, "run archived");
        Ok(archived)
    }

    /// Every location of `feature`, newest first.
    pub fn history(&self, feature: &str) -> Result<Vec<SessionKey>, TrackError> {
        let feature = FeatureId::parse(feature)?;
        self.store.history(&feature)
    }

    fn load(&self, feature: &FeatureId) -> Result<(SessionKey, WorkflowTracking), TrackError> {
        let (key, tracking) = self.store.load(feature)?;
        tracking.check_alignment(&self.catalog)?;
        Ok((key, tracking))
    }

    /// Load, apply `apply`, and save only if it succeeded.
    fn mutate<T>(
        &mut self,
        feature: &str,
        operation: &'static str,
        now: Timestamp,
        apply: impl FnOnce(&StageMachine<'_>, &mut WorkflowTracking) -> Result<T, TrackError>,
    ) -> Result<(T, WorkflowTracking), TrackError> {
        let feature = FeatureId::parse(feature)?;
        let (key, mut tracking) = self.load(&feature)?;

        let machine = StageMachine::new(&self.catalog);
        let value = apply(&machine, &mut tracking).inspect_err(|e| {
            tracing::warn!(feature = %feature, operation, error = %e, "transition refused");
        })?;

        self.store.save(&key, &mut tracking, now)?;
        Ok((value, tracking))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::{StageState, ValidationResult};
    use chrono::{Duration, TimeZone, Utc};

    fn t(minutes: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid time")
            + Duration::minutes(minutes)
    }

    fn engine() -> WorkflowEngine<MemoryStore> {
        WorkflowEngine::new(MemoryStore::new(), StageCatalog::standard())
    }

    fn stored(engine: &WorkflowEngine<MemoryStore>) -> WorkflowTracking {
        engine.status("checkout").expect("status").1
    }

    #[test]
    fn init_then_status() {
        let mut engine = engine();
        let outcome = engine.init("checkout", t(0)).expect("init");

        assert_eq!(outcome.location.name(), "2026-03-01-checkout");
        assert_eq!(outcome.replaced, None);
        assert_eq!(outcome.tracking.revision, 1);
        assert_eq!(stored(&engine), outcome.tracking);
    }

    #[test]
    fn init_rejects_active_run() {
        let mut engine = engine();
        engine.init("checkout", t(0)).expect("init");

        match engine.init("checkout", t(1)) {
            Err(TrackError::AlreadyActive {
                current_stage,
                stage_name,
                ..
            }) => {
                assert_eq!(current_stage, StageId(1));
                assert_eq!(stage_name, "Architecture Decomposition");
            }
            other => panic!("expected AlreadyActive, got {other:?}"),
        }
    }

    #[test]
    fn init_reuses_finished_location() {
        let mut engine = engine();
        let first = engine.init("checkout", t(0)).expect("init");
        engine
            .complete("checkout", StageId(1), CompletionReport::new(), t(1))
            .expect("complete");
        engine.abort("checkout", None, t(2)).expect("abort");

        let second = engine.init("checkout", t(3)).expect("re-init");

        assert_eq!(second.location, first.location);
        assert_eq!(second.replaced, Some(WorkflowStatus::Aborted));
        assert_eq!(second.tracking.current_stage, StageId(1));
        assert_eq!(second.tracking.completed_count(), 0);
        assert_eq!(second.tracking.created_at, t(3));
    }

    #[test]
    fn init_require_archive_policy() {
        let mut engine = engine().with_config(EngineConfig {
            init_policy: InitPolicy::RequireArchive,
            ..EngineConfig::default()
        });
        engine.init("checkout", t(0)).expect("init");
        engine.abort("checkout", Some("pivot"), t(1)).expect("abort");

        assert!(matches!(
            engine.init("checkout", t(2)),
            Err(TrackError::ArchiveRequired {
                status: WorkflowStatus::Aborted,
                ..
            })
        ));

        engine.archive("checkout", t(3)).expect("archive");
        let fresh = engine.init("checkout", t(4)).expect("init after archive");
        assert_eq!(fresh.replaced, None);
        assert_eq!(engine.history("checkout").expect("history").len(), 2);
    }

    #[test]
    fn invalid_feature_rejected_everywhere() {
        let mut engine = engine();
        assert!(matches!(
            engine.init("../escape", t(0)),
            Err(TrackError::InvalidFeature(_))
        ));
        assert!(matches!(
            engine.status("a/b"),
            Err(TrackError::InvalidFeature(_))
        ));
    }

    #[test]
    fn missing_record_is_not_found() {
        let mut engine = engine();
        assert!(engine.status("checkout").expect_err("missing").is_not_found());
        assert!(
            engine
                .abort("checkout", None, t(0))
                .expect_err("missing")
                .is_not_found()
        );
        assert!(
            engine
                .archive("checkout", t(0))
                .expect_err("missing")
                .is_not_found()
        );
    }

    #[test]
    fn validate_returns_stage_contract() {
        let mut engine = engine();
        engine.init("checkout", t(0)).expect("init");

        let readiness = engine.validate("checkout", StageId(1)).expect("ready");
        assert_eq!(readiness.name, "Architecture Decomposition");
        assert_eq!(readiness.expected_outputs.len(), 3);
        assert_eq!(readiness.validation_criteria.len(), 4);
    }

    #[test]
    fn complete_persists_report() {
        let mut engine = engine();
        engine.init("checkout", t(0)).expect("init");

        let report = CompletionReport::new()
            .with_output("architecture.md")
            .with_result(ValidationResult::new("Integration points documented", false).with_notes("payments TBD"));
        let outcome = engine
            .complete("checkout", StageId(1), report, t(5))
            .expect("complete");

        assert_eq!(outcome.advance.next, Some(StageId(2)));
        let tracking = stored(&engine);
        assert_eq!(tracking, outcome.tracking);
        assert_eq!(tracking.updated_at, t(5));
        let results = tracking.stages[0].validation_results.clone().unwrap_or_default();
        assert_eq!(results[0].notes.as_deref(), Some("payments TBD"));
    }

    #[test]
    fn refused_transition_leaves_store_untouched() {
        let mut engine = engine();
        engine.init("checkout", t(0)).expect("init");
        let before = stored(&engine);

        assert!(
            engine
                .complete("checkout", StageId(2), CompletionReport::new(), t(1))
                .is_err()
        );
        assert!(engine.resume("checkout", StageId(1), t(1)).is_err());
        assert!(engine.rollback("checkout", StageId(4), None, t(1)).is_err());

        assert_eq!(stored(&engine), before);
    }

    #[test]
    fn resume_policy_controls_prerequisite_check() {
        let mut engine = engine();
        engine.init("checkout", t(0)).expect("init");
        engine.abort("checkout", None, t(1)).expect("abort");

        assert!(matches!(
            engine.resume("checkout", StageId(4), t(2)),
            Err(TrackError::PrerequisitesUnmet { .. })
        ));

        let mut trusting = engine.with_config(EngineConfig {
            resume_policy: ResumePolicy::Trust,
            ..EngineConfig::default()
        });
        let tracking = trusting
            .resume("checkout", StageId(4), t(3))
            .expect("trusting resume");
        assert_eq!(tracking.current_stage, StageId(4));
        assert_eq!(tracking.stages[3].status, StageState::InProgress);
    }

    #[test]
    fn fail_then_resume() {
        let mut engine = engine();
        engine.init("checkout", t(0)).expect("init");

        let failed = engine
            .fail("checkout", StageId(1), "scope unclear", t(1))
            .expect("fail");
        assert_eq!(failed.workflow_status, WorkflowStatus::Failed);
        assert_eq!(failed.status_reason.as_deref(), Some("scope unclear"));

        let resumed = engine.resume("checkout", StageId(1), t(2)).expect("resume");
        assert_eq!(resumed.workflow_status, WorkflowStatus::Active);
        assert_eq!(resumed.stages[0].status, StageState::InProgress);
    }

    #[test]
    fn archive_refuses_active_run() {
        let mut engine = engine();
        engine.init("checkout", t(0)).expect("init");

        assert!(matches!(
            engine.archive("checkout", t(1)),
            Err(TrackError::InvalidTransition {
                operation: "archive",
                status: WorkflowStatus::Active
            })
        ));
    }

    #[test]
    fn corrupt_record_blocks_init_until_archived() {
        let mut engine = engine();
        let feature = FeatureId::parse("checkout").expect("feature");
        engine
            .store_mut()
            .insert_raw(SessionKey::new(t(0).date_naive(), feature), b"{\"feature\":".to_vec());

        assert!(matches!(engine.init("checkout", t(1)), Err(TrackError::Corrupt(_))));
        assert!(matches!(engine.status("checkout"), Err(TrackError::Corrupt(_))));

        engine.archive("checkout", t(2)).expect("quarantine");
        engine.init("checkout", t(3)).expect("init after quarantine");
    }

    #[test]
    fn misaligned_record_is_corrupt() {
        let mut engine = engine();
        engine.init("checkout", t(0)).expect("init");

        let short = StageCatalog::new(StageCatalog::standard().stages()[..3].to_vec()).expect("catalog");
        let store = std::mem::take(engine.store_mut());
        let engine = WorkflowEngine::new(store, short);

        assert!(matches!(engine.status("checkout"), Err(TrackError::Corrupt(_))));
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("require-archive".parse::<InitPolicy>(), Ok(InitPolicy::RequireArchive));
        assert_eq!("Trust".parse::<ResumePolicy>(), Ok(ResumePolicy::Trust));
        assert!("sometimes".parse::<ResumePolicy>().is_err());
        assert_eq!(InitPolicy::default().to_string(), "reuse");
    }
}
