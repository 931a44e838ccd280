//! # Stage Transitions
//!
//! Pure state-machine transitions over a loaded [`WorkflowTracking`].
//!
//! State space: `workflow_status` × `current_stage` × per-stage `status`.
//!
//! | Operation | Allowed from | Effect |
//! |-----------|--------------|--------|
//! | `start` | - | fresh record, stage 1 current, all stages pending |
//! | `complete` | not frozen, stage == current and not yet completed | stage completed, next stage in progress or workflow completed |
//! | `rollback` | stage <= current | stage and all later stages pending, current = stage |
//! | `abort` | any | workflow aborted, stages untouched |
//! | `fail` | active, stage == current | stage failed, workflow failed |
//! | `resume` | aborted or failed | workflow active, stage in progress |
//!
//! All preconditions are checked before the first write, so an `Err` always
//! leaves the record exactly as it was. No I/O and no clock: the caller
//! passes `now`.

use crate::catalog::{StageCatalog, StageDefinition};
use crate::primitives::{DEFAULT_ABORT_REASON, DEFAULT_ROLLBACK_REASON};
use crate::{
    RollbackEntry, StageId, StageState, StageStatus, Timestamp, TrackError, UnmetPrerequisite,
    ValidationResult, WorkflowStatus, WorkflowTracking,
};
use serde::Serialize;

/// What the caller recorded when finishing a stage.
///
/// Outputs are opaque tokens; nothing here interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    pub outputs: Vec<String>,
    pub validation_results: Vec<ValidationResult>,
}

impl CompletionReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }

    #[must_use]
    pub fn with_result(mut self, result: ValidationResult) -> Self {
        self.validation_results.push(result);
        self
    }
}

/// Result of a successful `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Advance {
    pub completed: StageId,
    /// The new current stage, `None` when the workflow finished.
    pub next: Option<StageId>,
    pub workflow_completed: bool,
}

/// Applies transitions against one catalog.
#[derive(Debug, Clone, Copy)]
pub struct StageMachine<'a> {
    catalog: &'a StageCatalog,
}

impl<'a> StageMachine<'a> {
    #[must_use]
    pub fn new(catalog: &'a StageCatalog) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn catalog(&self) -> &'a StageCatalog {
        self.catalog
    }

    /// A fresh active record positioned at the first stage.
    #[must_use]
    pub fn start(&self, feature: &str, now: Timestamp) -> WorkflowTracking {
        WorkflowTracking {
            feature: feature.to_string(),
            workflow_status: WorkflowStatus::Active,
            current_stage: self.catalog.first_id(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            stages: self
                .catalog
                .iter()
                .map(|def| StageStatus::pending(def.id, def.name.clone()))
                .collect(),
            rollback_history: Vec::new(),
            status_reason: None,
            revision: 0,
        }
    }

    /// Prerequisites of `definition` that are not `completed`.
    #[must_use]
    pub fn unmet_prerequisites(
        &self,
        tracking: &WorkflowTracking,
        definition: &StageDefinition,
    ) -> Vec<UnmetPrerequisite> {
        definition
            .prerequisites
            .iter()
            .filter_map(|prereq| {
                let status = tracking
                    .stage(*prereq)
                    .map(|s| s.status)
                    .unwrap_or(StageState::Pending);
                (status != StageState::Completed).then(|| UnmetPrerequisite {
                    stage: *prereq,
                    name: self.catalog.name_of(*prereq).to_string(),
                    status,
                })
            })
            .collect()
    }

    /// Read-only readiness check for `stage`.
    ///
    /// Prerequisites are checked first, then sequence, so unmet prerequisites
    /// are reported even for the current stage.
    pub fn check_readiness(
        &self,
        tracking: &WorkflowTracking,
        stage: StageId,
    ) -> Result<&'a StageDefinition, TrackError> {
        let definition = self.catalog.require(stage)?;

        let unmet = self.unmet_prerequisites(tracking, definition);
        if !unmet.is_empty() {
            return Err(TrackError::PrerequisitesUnmet { stage, unmet });
        }

        if stage != tracking.current_stage {
            return Err(TrackError::OutOfSequence {
                requested: stage,
                current: tracking.current_stage,
            });
        }

        Ok(definition)
    }

    /// Mark the current stage completed and move forward.
    pub fn complete(
        &self,
        tracking: &mut WorkflowTracking,
        stage: StageId,
        report: CompletionReport,
        now: Timestamp,
    ) -> Result<Advance, TrackError> {
        self.catalog.require(stage)?;
        if tracking.workflow_status.is_frozen() {
            return Err(TrackError::InvalidTransition {
                operation: "complete",
                status: tracking.workflow_status,
            });
        }
        if stage != tracking.current_stage {
            return Err(TrackError::OutOfSequence {
                requested: stage,
                current: tracking.current_stage,
            });
        }
        // The last stage stays current once the workflow completes.
        if tracking.stage(stage).is_some_and(StageStatus::is_completed) {
            return Err(TrackError::InvalidTransition {
                operation: "complete",
                status: tracking.workflow_status,
            });
        }

        let next = (!self.catalog.is_last(stage)).then(|| stage.next());
        ensure_present(tracking, stage)?;
        if let Some(next) = next {
            ensure_present(tracking, next)?;
        }

        if let Some(entry) = tracking.stage_mut(stage) {
            entry.status = StageState::Completed;
            entry.completed_at = Some(now);
            entry.error = None;
            entry.outputs = (!report.outputs.is_empty()).then_some(report.outputs);
            entry.validation_results =
                (!report.validation_results.is_empty()).then_some(report.validation_results);
        }

        match next {
            Some(next) => {
                tracking.current_stage = next;
                if let Some(entry) = tracking.stage_mut(next) {
                    entry.start(now);
                }
            }
            None => {
                tracking.workflow_status = WorkflowStatus::Completed;
                tracking.completed_at = Some(now);
            }
        }

        Ok(Advance {
            completed: stage,
            next,
            workflow_completed: next.is_none(),
        })
    }

    /// Reset `stage` and every later stage to pending and make `stage` current.
    pub fn rollback(
        &self,
        tracking: &mut WorkflowTracking,
        stage: StageId,
        reason: Option<&str>,
        now: Timestamp,
    ) -> Result<RollbackEntry, TrackError> {
        self.catalog.require(stage)?;
        if stage > tracking.current_stage {
            return Err(TrackError::OutOfSequence {
                requested: stage,
                current: tracking.current_stage,
            });
        }

        for entry in tracking.stages.iter_mut().filter(|s| s.id >= stage) {
            entry.reset();
        }
        tracking.current_stage = stage;

        let entry = RollbackEntry {
            stage,
            timestamp: now,
            reason: reason.unwrap_or(DEFAULT_ROLLBACK_REASON).to_string(),
        };
        tracking.rollback_history.push(entry.clone());
        Ok(entry)
    }

    /// Freeze the workflow. Stage statuses and history are preserved.
    pub fn abort(&self, tracking: &mut WorkflowTracking, reason: Option<&str>, now: Timestamp) {
        tracking.workflow_status = WorkflowStatus::Aborted;
        tracking.completed_at = Some(now);
        tracking.status_reason = Some(reason.unwrap_or(DEFAULT_ABORT_REASON).to_string());
    }

    /// Record that the current stage failed, failing the workflow.
    pub fn fail(
        &self,
        tracking: &mut WorkflowTracking,
        stage: StageId,
        error: &str,
        now: Timestamp,
    ) -> Result<(), TrackError> {
        self.catalog.require(stage)?;
        if !tracking.workflow_status.is_active() {
            return Err(TrackError::InvalidTransition {
                operation: "fail",
                status: tracking.workflow_status,
            });
        }
        if stage != tracking.current_stage {
            return Err(TrackError::OutOfSequence {
                requested: stage,
                current: tracking.current_stage,
            });
        }
        ensure_present(tracking, stage)?;

        if let Some(entry) = tracking.stage_mut(stage) {
            entry.status = StageState::Failed;
            entry.error = Some(error.to_string());
        }
        tracking.workflow_status = WorkflowStatus::Failed;
        tracking.completed_at = Some(now);
        tracking.status_reason = Some(error.to_string());
        Ok(())
    }

    /// Reactivate an aborted or failed workflow at `stage`.
    ///
    /// With `check_prerequisites` the target stage must be ready exactly as
    /// `check_readiness` would demand (minus the sequence check).
    pub fn resume(
        &self,
        tracking: &mut WorkflowTracking,
        stage: StageId,
        check_prerequisites: bool,
        now: Timestamp,
    ) -> Result<(), TrackError> {
        let definition = self.catalog.require(stage)?;
        if !tracking.workflow_status.is_resumable() {
            return Err(TrackError::InvalidTransition {
                operation: "resume",
                status: tracking.workflow_status,
            });
        }
        if check_prerequisites {
            let unmet = self.unmet_prerequisites(tracking, definition);
            if !unmet.is_empty() {
                return Err(TrackError::PrerequisitesUnmet { stage, unmet });
            }
        }
        ensure_present(tracking, stage)?;

        tracking.workflow_status = WorkflowStatus::Active;
        tracking.current_stage = stage;
        tracking.completed_at = None;
        tracking.status_reason = None;
        if let Some(entry) = tracking.stage_mut(stage) {
            entry.start(now);
        }
        Ok(())
    }
}

fn ensure_present(tracking: &WorkflowTracking, stage: StageId) -> Result<(), TrackError> {
    match tracking.stage(stage) {
        Some(_) => Ok(()),
        None => Err(TrackError::Corrupt(format!(
            "record for '{}' has no entry for stage {}",
            tracking.feature, stage
        ))),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn t(minutes: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid time")
            + Duration::minutes(minutes)
    }

    fn advanced_to(machine: &StageMachine<'_>, stage: u32) -> WorkflowTracking {
        let mut tracking = machine.start("checkout", t(0));
        for id in 1..stage {
            machine
                .complete(&mut tracking, StageId(id), CompletionReport::new(), t(id as i64))
                .expect("complete");
        }
        tracking
    }

    #[test]
    fn start_positions_at_first_stage() {
        let catalog = StageCatalog::standard();
        let tracking = StageMachine::new(&catalog).start("checkout", t(0));

        assert_eq!(tracking.current_stage, StageId(1));
        assert_eq!(tracking.workflow_status, WorkflowStatus::Active);
        assert_eq!(tracking.stages.len(), catalog.len());
        assert!(tracking.stages.iter().all(|s| s.status == StageState::Pending));
        tracking.check_alignment(&catalog).expect("aligned");
    }

    #[test]
    fn complete_advances_exactly_one() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = machine.start("checkout", t(0));

        let advance = machine
            .complete(&mut tracking, StageId(1), CompletionReport::new(), t(5))
            .expect("complete");

        assert_eq!(advance.next, Some(StageId(2)));
        assert!(!advance.workflow_completed);
        assert_eq!(tracking.current_stage, StageId(2));
        assert_eq!(tracking.stages[0].status, StageState::Completed);
        assert_eq!(tracking.stages[0].completed_at, Some(t(5)));
        assert_eq!(tracking.stages[1].status, StageState::InProgress);
        assert_eq!(tracking.stages[1].started_at, Some(t(5)));
    }

    #[test]
    fn complete_records_report() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = machine.start("checkout", t(0));
        let report = CompletionReport::new()
            .with_output("architecture.md")
            .with_result(ValidationResult::new("All major components identified", true));

        machine
            .complete(&mut tracking, StageId(1), report, t(1))
            .expect("complete");

        let stage = &tracking.stages[0];
        assert_eq!(stage.outputs.as_deref(), Some(&["architecture.md".to_string()][..]));
        assert_eq!(stage.validation_results.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn completing_last_stage_finishes_workflow() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 8);

        let advance = machine
            .complete(&mut tracking, StageId(8), CompletionReport::new(), t(100))
            .expect("complete");

        assert!(advance.workflow_completed);
        assert_eq!(advance.next, None);
        assert_eq!(tracking.workflow_status, WorkflowStatus::Completed);
        assert_eq!(tracking.completed_at, Some(t(100)));
        assert_eq!(tracking.current_stage, StageId(8));
        assert_eq!(tracking.completed_count(), 8);
    }

    #[test]
    fn complete_rejects_other_stage_without_mutation() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 3);
        let before = tracking.clone();

        let result = machine.complete(&mut tracking, StageId(4), CompletionReport::new(), t(50));

        assert!(matches!(
            result,
            Err(TrackError::OutOfSequence {
                requested: StageId(4),
                current: StageId(3)
            })
        ));
        assert_eq!(tracking, before);
    }

    #[test]
    fn complete_rejected_while_aborted() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 2);
        machine.abort(&mut tracking, None, t(10));

        let result = machine.complete(&mut tracking, StageId(2), CompletionReport::new(), t(11));
        assert!(matches!(
            result,
            Err(TrackError::InvalidTransition {
                operation: "complete",
                status: WorkflowStatus::Aborted
            })
        ));

        let mut finished = advanced_to(&machine, 8);
        let report = CompletionReport::new().with_output("release-notes.md");
        machine
            .complete(&mut finished, StageId(8), report, t(20))
            .expect("complete last stage");
        let before = finished.clone();

        let again = machine.complete(&mut finished, StageId(8), CompletionReport::new(), t(30));
        assert!(matches!(
            again,
            Err(TrackError::InvalidTransition {
                operation: "complete",
                status: WorkflowStatus::Completed
            })
        ));
        assert_eq!(finished, before);
    }

    #[test]
    fn resume_at_completed_stage_drops_its_outputs() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = machine.start("checkout", t(0));
        let report = CompletionReport::new()
            .with_output("architecture.md")
            .with_result(ValidationResult::new("All major components identified", true));
        machine
            .complete(&mut tracking, StageId(1), report, t(1))
            .expect("complete");
        machine.abort(&mut tracking, None, t(2));

        machine
            .resume(&mut tracking, StageId(1), true, t(3))
            .expect("resume");

        let stage = &tracking.stages[0];
        assert_eq!(stage.status, StageState::InProgress);
        assert_eq!(stage.started_at, Some(t(3)));
        assert_eq!(stage.completed_at, None);
        assert_eq!(stage.outputs, None);
        assert_eq!(stage.validation_results, None);
    }

    #[test]
    fn readiness_checks_prerequisites_before_sequence() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let tracking = advanced_to(&machine, 3);

        // Stage 5's prerequisite (4) is pending: reported as unmet, not as out of sequence.
        match machine.check_readiness(&tracking, StageId(5)) {
            Err(TrackError::PrerequisitesUnmet { stage, unmet }) => {
                assert_eq!(stage, StageId(5));
                assert_eq!(unmet.len(), 1);
                assert_eq!(unmet[0].stage, StageId(4));
                assert_eq!(unmet[0].status, StageState::Pending);
            }
            other => panic!("expected unmet prerequisites, got {other:?}"),
        }

        // Stage 2's prerequisite is met but it is not current.
        assert!(matches!(
            machine.check_readiness(&tracking, StageId(2)),
            Err(TrackError::OutOfSequence { .. })
        ));

        let ready = machine.check_readiness(&tracking, StageId(3)).expect("ready");
        assert_eq!(ready.name, "Prioritization");
    }

    #[test]
    fn readiness_reports_unmet_even_for_current_stage() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 3);
        // Damage stage 2 by hand; stage 3 stays current.
        tracking.stages[1].status = StageState::Failed;

        assert!(matches!(
            machine.check_readiness(&tracking, StageId(3)),
            Err(TrackError::PrerequisitesUnmet { .. })
        ));
    }

    #[test]
    fn rollback_cascades_and_logs() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 5);

        let entry = machine
            .rollback(&mut tracking, StageId(2), Some("bad design"), t(60))
            .expect("rollback");

        assert_eq!(entry.reason, "bad design");
        assert_eq!(tracking.current_stage, StageId(2));
        assert_eq!(tracking.stages[0].status, StageState::Completed);
        for stage in &tracking.stages[1..] {
            assert_eq!(stage.status, StageState::Pending, "stage {}", stage.id);
            assert!(stage.started_at.is_none());
            assert!(stage.completed_at.is_none());
        }
        assert_eq!(tracking.rollback_history.len(), 1);
        assert_eq!(tracking.workflow_status, WorkflowStatus::Active);
    }

    #[test]
    fn rollback_default_reason() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 2);

        let entry = machine
            .rollback(&mut tracking, StageId(1), None, t(9))
            .expect("rollback");
        assert_eq!(entry.reason, DEFAULT_ROLLBACK_REASON);
    }

    #[test]
    fn rollback_beyond_current_rejected() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 2);
        let before = tracking.clone();

        let result = machine.rollback(&mut tracking, StageId(5), None, t(9));
        assert!(matches!(result, Err(TrackError::OutOfSequence { .. })));
        assert_eq!(tracking, before);
    }

    #[test]
    fn abort_preserves_stages() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 3);
        let stages_before = tracking.stages.clone();

        machine.abort(&mut tracking, Some("pivot"), t(30));

        assert_eq!(tracking.workflow_status, WorkflowStatus::Aborted);
        assert_eq!(tracking.completed_at, Some(t(30)));
        assert_eq!(tracking.status_reason.as_deref(), Some("pivot"));
        assert_eq!(tracking.stages, stages_before);
    }

    #[test]
    fn fail_marks_stage_and_workflow() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 4);

        machine
            .fail(&mut tracking, StageId(4), "task JSON invalid", t(40))
            .expect("fail");

        assert_eq!(tracking.workflow_status, WorkflowStatus::Failed);
        assert_eq!(tracking.stages[3].status, StageState::Failed);
        assert_eq!(tracking.stages[3].error.as_deref(), Some("task JSON invalid"));
        assert_eq!(tracking.completed_at, Some(t(40)));
    }

    #[test]
    fn fail_requires_active_current_stage() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 4);

        assert!(matches!(
            machine.fail(&mut tracking, StageId(2), "x", t(1)),
            Err(TrackError::OutOfSequence { .. })
        ));

        machine.abort(&mut tracking, None, t(2));
        assert!(matches!(
            machine.fail(&mut tracking, StageId(4), "x", t(3)),
            Err(TrackError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn resume_only_from_frozen_states() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 3);
        let before = tracking.clone();

        let result = machine.resume(&mut tracking, StageId(3), true, t(5));
        assert!(matches!(
            result,
            Err(TrackError::InvalidTransition {
                operation: "resume",
                status: WorkflowStatus::Active
            })
        ));
        assert_eq!(tracking, before);
    }

    #[test]
    fn resume_restarts_stage() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 3);
        machine
            .fail(&mut tracking, StageId(3), "flaky", t(20))
            .expect("fail");

        machine
            .resume(&mut tracking, StageId(3), true, t(25))
            .expect("resume");

        assert_eq!(tracking.workflow_status, WorkflowStatus::Active);
        assert_eq!(tracking.current_stage, StageId(3));
        assert!(tracking.completed_at.is_none());
        assert!(tracking.status_reason.is_none());
        let stage = &tracking.stages[2];
        assert_eq!(stage.status, StageState::InProgress);
        assert_eq!(stage.started_at, Some(t(25)));
        assert!(stage.error.is_none());
    }

    #[test]
    fn resume_prerequisite_check_is_optional() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = advanced_to(&machine, 2);
        machine.abort(&mut tracking, None, t(10));
        let before = tracking.clone();

        assert!(matches!(
            machine.resume(&mut tracking, StageId(6), true, t(11)),
            Err(TrackError::PrerequisitesUnmet { .. })
        ));
        assert_eq!(tracking, before);

        machine
            .resume(&mut tracking, StageId(6), false, t(12))
            .expect("trusting resume");
        assert_eq!(tracking.current_stage, StageId(6));
    }

    #[test]
    fn unknown_stage_is_not_found() {
        let catalog = StageCatalog::standard();
        let machine = StageMachine::new(&catalog);
        let mut tracking = machine.start("checkout", t(0));

        for result in [
            machine.check_readiness(&tracking, StageId(0)).map(|_| ()),
            machine
                .complete(&mut tracking, StageId(9), CompletionReport::new(), t(1))
                .map(|_| ()),
            machine.rollback(&mut tracking, StageId(42), None, t(1)).map(|_| ()),
            machine.fail(&mut tracking, StageId(9), "x", t(1)),
        ] {
            assert!(matches!(result, Err(e) if e.is_not_found()));
        }
    }
}
