//! # Progress Reporting
//!
//! Read-only views of a [`WorkflowTracking`] record:
//! - [`ProgressReport`]: the human-readable status listing
//! - [`ProgressSummary`]: a compact, serializable summary for machine output

use crate::{StageCatalog, StageId, StageState, Timestamp, WorkflowStatus, WorkflowTracking};
use chrono::SecondsFormat;
use serde::Serialize;
use std::fmt;

/// Render timestamps the way records store them (RFC 3339, milliseconds, `Z`).
#[must_use]
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The action that moves the workflow forward, if any.
fn next_action(tracking: &WorkflowTracking, catalog: &StageCatalog) -> Option<String> {
    let stage = tracking.current_stage;
    let name = catalog.name_of(stage);
    match tracking.workflow_status {
        WorkflowStatus::Active => Some(format!("Complete stage {} ({})", stage, name)),
        WorkflowStatus::Aborted | WorkflowStatus::Failed => {
            Some(format!("Resume at stage {} ({})", stage, name))
        }
        WorkflowStatus::Completed => None,
    }
}

// =============================================================================
// HUMAN REPORT
// =============================================================================

/// Multi-line status listing of one run.
#[derive(Debug, Clone, Copy)]
pub struct ProgressReport<'a> {
    tracking: &'a WorkflowTracking,
    catalog: &'a StageCatalog,
}

impl<'a> ProgressReport<'a> {
    #[must_use]
    pub fn new(tracking: &'a WorkflowTracking, catalog: &'a StageCatalog) -> Self {
        Self { tracking, catalog }
    }
}

impl fmt::Display for ProgressReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.tracking;

        writeln!(f, "[{}] Multi-Stage Orchestration Workflow", t.feature)?;
        writeln!(
            f,
            "  Status: {} | Current Stage: {}",
            t.workflow_status, t.current_stage
        )?;
        writeln!(f, "  Created: {}", format_timestamp(&t.created_at))?;
        if let Some(completed) = &t.completed_at {
            writeln!(f, "  Completed: {}", format_timestamp(completed))?;
        }
        if let Some(reason) = &t.status_reason {
            writeln!(f, "  Reason: {}", reason)?;
        }

        writeln!(f)?;
        writeln!(f, "  Stages:")?;
        for stage in &t.stages {
            writeln!(
                f,
                "  {} {}. {} [{}]",
                stage.status.icon(),
                stage.id,
                stage.name,
                stage.status
            )?;
            match stage.status {
                StageState::InProgress => {
                    if let Some(started) = &stage.started_at {
                        writeln!(f, "     Started: {}", format_timestamp(started))?;
                    }
                }
                StageState::Completed => {
                    if let Some(completed) = &stage.completed_at {
                        writeln!(f, "     Completed: {}", format_timestamp(completed))?;
                    }
                    if let Some(outputs) = stage.outputs.as_ref().filter(|o| !o.is_empty()) {
                        writeln!(f, "     Outputs: {}", outputs.join(", "))?;
                    }
                    if let Some(results) = stage.validation_results.as_ref().filter(|r| !r.is_empty()) {
                        let passed = results.iter().filter(|r| r.passed).count();
                        writeln!(f, "     Checks: {}/{} passed", passed, results.len())?;
                    }
                }
                StageState::Failed => {
                    if let Some(error) = &stage.error {
                        writeln!(f, "     Error: {}", error)?;
                    }
                }
                StageState::Pending => {}
            }
        }

        if !t.rollback_history.is_empty() {
            writeln!(f)?;
            writeln!(f, "  Rollback History:")?;
            for entry in &t.rollback_history {
                writeln!(
                    f,
                    "  - Stage {} rolled back at {}",
                    entry.stage,
                    format_timestamp(&entry.timestamp)
                )?;
                writeln!(f, "    Reason: {}", entry.reason)?;
            }
        }

        if let Some(action) = next_action(t, self.catalog) {
            writeln!(f)?;
            writeln!(f, "  Next Action: {}", action)?;
        }
        Ok(())
    }
}

// =============================================================================
// MACHINE SUMMARY
// =============================================================================

/// One-object summary of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub feature: String,
    pub status: WorkflowStatus,
    pub current_stage: StageId,
    pub current_stage_name: String,
    pub completed: usize,
    pub total: usize,
    /// Completed share of all stages, rounded down.
    pub percent: usize,
    pub next_action: Option<String>,
}

impl ProgressSummary {
    #[must_use]
    pub fn new(tracking: &WorkflowTracking, catalog: &StageCatalog) -> Self {
        let completed = tracking.completed_count();
        let total = tracking.stages.len();
        Self {
            feature: tracking.feature.clone(),
            status: tracking.workflow_status,
            current_stage: tracking.current_stage,
            current_stage_name: catalog.name_of(tracking.current_stage).to_string(),
            completed,
            total,
            percent: completed.saturating_mul(100).checked_div(total).unwrap_or(0),
            next_action: next_action(tracking, catalog),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
