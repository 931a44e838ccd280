//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//!
//! Every command opens the configured store, runs one engine operation and
//! renders the result. Mutating commands on the file backend hold the
//! feature's lock for the whole load-transition-save cycle.

use crate::config::{BackendKind, Settings};
use crate::error::AppError;
use chrono::Utc;
use serde::Serialize;
use stagetrack_core::{
    CompletionReport, FeatureId, FeatureLock, ProgressReport, ProgressSummary, SessionKey, StageId,
    StoreBackend, TrackError, ValidationResult, WorkflowEngine,
};
use std::fmt::Display;
use std::io::Write;

/// Everything a command needs: resolved settings and an output sink.
pub struct Context<'a> {
    pub settings: Settings,
    pub json_mode: bool,
    pub out: &'a mut dyn Write,
}

impl Context<'_> {
    fn engine(&self) -> Result<WorkflowEngine<StoreBackend>, AppError> {
        let store = self.settings.open_store()?;
        let catalog = self.settings.load_catalog()?;
        Ok(WorkflowEngine::new(store, catalog).with_config(self.settings.engine_config()))
    }

    /// Run a mutating operation under the feature lock.
    ///
    /// redb serializes writers itself, so only the file backend locks.
    fn locked<T>(
        &self,
        feature: &str,
        op: impl FnOnce(&mut WorkflowEngine<StoreBackend>) -> Result<T, TrackError>,
    ) -> Result<T, AppError> {
        let mut engine = self.engine()?;
        let mut lock = match self.settings.backend {
            BackendKind::File => Some(FeatureLock::open(
                &self.settings.sessions_dir,
                &FeatureId::parse(feature)?,
            )?),
            BackendKind::Redb => None,
        };
        let _guard = lock.as_mut().map(FeatureLock::try_acquire).transpose()?;
        Ok(op(&mut engine)?)
    }

    /// Human-readable location of a run.
    fn location(&self, key: &SessionKey) -> String {
        match self.settings.backend {
            BackendKind::File => self.settings.sessions_dir.join(key.name()).display().to_string(),
            BackendKind::Redb => format!("{}#{}", self.settings.database.display(), key),
        }
    }

    fn line(&mut self, text: impl Display) -> Result<(), AppError> {
        writeln!(self.out, "{}", text).map_err(|e| AppError::Output(e.to_string()))
    }

    fn emit_json(&mut self, value: &impl Serialize) -> Result<(), AppError> {
        let text =
            serde_json::to_string_pretty(value).map_err(|e| AppError::Output(e.to_string()))?;
        self.line(text)
    }
}

/// Parse a `--check` value: `pass:CRITERION` or `fail:CRITERION`, with an
/// optional `#NOTES` suffix.
pub fn parse_check(raw: &str) -> Result<ValidationResult, AppError> {
    let invalid = |why: &str| AppError::InvalidArgument(format!("check '{}': {}", raw, why));

    let (verdict, rest) = raw
        .split_once(':')
        .ok_or_else(|| invalid("expected pass:CRITERION or fail:CRITERION"))?;
    let passed = match verdict.trim().to_ascii_lowercase().as_str() {
        "pass" => true,
        "fail" => false,
        _ => return Err(invalid("verdict must be pass or fail")),
    };

    let (criterion, notes) = match rest.split_once('#') {
        Some((criterion, notes)) => (criterion.trim(), Some(notes.trim())),
        None => (rest.trim(), None),
    };
    if criterion.is_empty() {
        return Err(invalid("criterion is empty"));
    }

    let result = ValidationResult::new(criterion, passed);
    Ok(match notes.filter(|n| !n.is_empty()) {
        Some(notes) => result.with_notes(notes),
        None => result,
    })
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Start a run at stage 1.
pub fn cmd_init(ctx: &mut Context<'_>, feature: &str) -> Result<(), AppError> {
    let outcome = ctx.locked(feature, |engine| engine.init(feature, Utc::now()))?;
    let location = ctx.location(&outcome.location);

    if ctx.json_mode {
        return ctx.emit_json(&serde_json::json!({
            "feature": outcome.tracking.feature,
            "location": location,
            "replaced": outcome.replaced,
            "tracking": outcome.tracking,
        }));
    }

    let first = outcome.tracking.current_stage;
    let name = outcome
        .tracking
        .stage(first)
        .map(|s| s.name.clone())
        .unwrap_or_default();

    ctx.line(format_args!("✅ Stage tracking initialized for feature: {}", outcome.tracking.feature))?;
    ctx.line(format_args!("   Session: {}", location))?;
    ctx.line(format_args!("   Starting stage: {} ({})", first, name))?;
    if let Some(previous) = outcome.replaced {
        ctx.line(format_args!("   Replaced previous {} run", previous))?;
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show the progress report.
pub fn cmd_status(ctx: &mut Context<'_>, feature: &str) -> Result<(), AppError> {
    let engine = ctx.engine()?;
    let (key, tracking) = engine.status(feature)?;

    if ctx.json_mode {
        let summary = ProgressSummary::new(&tracking, engine.catalog());
        let location = ctx.location(&key);
        return ctx.emit_json(&serde_json::json!({
            "location": location,
            "summary": summary,
            "tracking": tracking,
        }));
    }

    let report = ProgressReport::new(&tracking, engine.catalog()).to_string();
    write!(ctx.out, "{}", report).map_err(|e| AppError::Output(e.to_string()))
}

// =============================================================================
// VALIDATE COMMAND
// =============================================================================

/// Check readiness of a stage.
pub fn cmd_validate(ctx: &mut Context<'_>, feature: &str, stage: u32) -> Result<(), AppError> {
    let readiness = ctx.engine()?.validate(feature, StageId(stage))?;

    if ctx.json_mode {
        return ctx.emit_json(&serde_json::json!({
            "ready": true,
            "stage": readiness,
        }));
    }

    ctx.line(format_args!(
        "✅ Stage {} ({}) is ready to execute",
        readiness.stage, readiness.name
    ))?;
    if !readiness.expected_outputs.is_empty() {
        ctx.line("   Expected outputs:")?;
        for output in &readiness.expected_outputs {
            ctx.line(format_args!("   - {}", output))?;
        }
    }
    if !readiness.validation_criteria.is_empty() {
        ctx.line("   Validation criteria:")?;
        for criterion in &readiness.validation_criteria {
            ctx.line(format_args!("   - {}", criterion))?;
        }
    }
    Ok(())
}

// =============================================================================
// COMPLETE COMMAND
// =============================================================================

/// Complete the current stage.
pub fn cmd_complete(
    ctx: &mut Context<'_>,
    feature: &str,
    stage: u32,
    outputs: Vec<String>,
    checks: &[String],
) -> Result<(), AppError> {
    let report = CompletionReport {
        outputs,
        validation_results: checks
            .iter()
            .map(|c| parse_check(c))
            .collect::<Result<_, _>>()?,
    };
    let stage = StageId(stage);
    let outcome = ctx.locked(feature, |engine| {
        engine.complete(feature, stage, report, Utc::now())
    })?;

    if ctx.json_mode {
        return ctx.emit_json(&outcome);
    }

    let name_of = |id: StageId| {
        outcome
            .tracking
            .stage(id)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    };

    ctx.line(format_args!("✅ Stage {} ({}) marked complete", stage, name_of(stage)))?;
    if outcome.advance.workflow_completed {
        ctx.line(format_args!("🎉 Workflow completed for feature: {}", outcome.tracking.feature))?;
        ctx.line(format_args!(
            "   All {} stages completed successfully",
            outcome.tracking.stages.len()
        ))?;
    } else if let Some(next) = outcome.advance.next {
        ctx.line(format_args!("   Next stage: {} ({})", next, name_of(next)))?;
    }
    Ok(())
}

// =============================================================================
// ROLLBACK / ABORT / FAIL / RESUME COMMANDS
// =============================================================================

/// Return to an earlier stage.
pub fn cmd_rollback(
    ctx: &mut Context<'_>,
    feature: &str,
    stage: u32,
    reason: Option<&str>,
) -> Result<(), AppError> {
    let stage = StageId(stage);
    let tracking = ctx.locked(feature, |engine| {
        engine.rollback(feature, stage, reason, Utc::now())
    })?;

    if ctx.json_mode {
        return ctx.emit_json(&tracking);
    }

    let name = tracking.stage(stage).map(|s| s.name.clone()).unwrap_or_default();
    ctx.line(format_args!("✅ Stage {} ({}) rolled back to pending", stage, name))?;
    ctx.line("   All subsequent stages reset")?;
    ctx.line(format_args!("   Current stage: {}", tracking.current_stage))
}

/// Freeze the run.
pub fn cmd_abort(ctx: &mut Context<'_>, feature: &str, reason: Option<&str>) -> Result<(), AppError> {
    let tracking = ctx.locked(feature, |engine| engine.abort(feature, reason, Utc::now()))?;

    if ctx.json_mode {
        return ctx.emit_json(&tracking);
    }

    ctx.line(format_args!("⚠️  Workflow aborted for feature: {}", tracking.feature))?;
    if let Some(reason) = &tracking.status_reason {
        ctx.line(format_args!("   Reason: {}", reason))?;
    }
    ctx.line(format_args!("   Current stage at abort: {}", tracking.current_stage))
}

/// Record a stage failure.
pub fn cmd_fail(ctx: &mut Context<'_>, feature: &str, stage: u32, error: &str) -> Result<(), AppError> {
    let stage = StageId(stage);
    let tracking = ctx.locked(feature, |engine| {
        engine.fail(feature, stage, error, Utc::now())
    })?;

    if ctx.json_mode {
        return ctx.emit_json(&tracking);
    }

    let name = tracking.stage(stage).map(|s| s.name.clone()).unwrap_or_default();
    ctx.line(format_args!("❌ Stage {} ({}) failed: {}", stage, name, error))?;
    ctx.line(format_args!("   Use 'resume {} {}' to retry", tracking.feature, stage))
}

/// Reactivate an aborted or failed run.
pub fn cmd_resume(ctx: &mut Context<'_>, feature: &str, stage: u32) -> Result<(), AppError> {
    let stage = StageId(stage);
    let tracking = ctx.locked(feature, |engine| engine.resume(feature, stage, Utc::now()))?;

    if ctx.json_mode {
        return ctx.emit_json(&tracking);
    }

    let name = tracking.stage(stage).map(|s| s.name.clone()).unwrap_or_default();
    ctx.line(format_args!("✅ Workflow resumed at stage {} ({})", stage, name))
}

// =============================================================================
// ARCHIVE / HISTORY COMMANDS
// =============================================================================

/// Move the finished run aside.
pub fn cmd_archive(ctx: &mut Context<'_>, feature: &str) -> Result<(), AppError> {
    let key = ctx.locked(feature, |engine| engine.archive(feature, Utc::now()))?;
    let location = ctx.location(&key);

    if ctx.json_mode {
        return ctx.emit_json(&serde_json::json!({
            "feature": key.feature().as_str(),
            "location": location,
        }));
    }

    ctx.line(format_args!("✅ Archived run for feature: {}", key.feature()))?;
    ctx.line(format_args!("   Location: {}", location))
}

/// List every run of a feature.
pub fn cmd_history(ctx: &mut Context<'_>, feature: &str) -> Result<(), AppError> {
    let keys = ctx.engine()?.history(feature)?;

    if ctx.json_mode {
        let runs: Vec<_> = keys
            .iter()
            .map(|k| {
                serde_json::json!({
                    "location": ctx.location(k),
                    "date": k.date(),
                    "archived": k.is_archived(),
                })
            })
            .collect();
        return ctx.emit_json(&runs);
    }

    if keys.is_empty() {
        return ctx.line(format_args!("No runs recorded for feature: {}", feature));
    }
    for key in &keys {
        let marker = if key.is_archived() { "archived" } else { "live" };
        let location = ctx.location(key);
        ctx.line(format_args!("  {} [{}]", location, marker))?;
    }
    Ok(())
}

// =============================================================================
// STAGES COMMAND
// =============================================================================

/// List the stage catalog.
pub fn cmd_stages(ctx: &mut Context<'_>) -> Result<(), AppError> {
    let catalog = ctx.settings.load_catalog()?;

    if ctx.json_mode {
        return ctx.emit_json(&catalog.stages());
    }

    for stage in catalog.iter() {
        ctx.line(format_args!("  {}. {}", stage.id, stage.name))?;
        if !stage.description.is_empty() {
            ctx.line(format_args!("     {}", stage.description))?;
        }
        if !stage.prerequisites.is_empty() {
            let requires = stage
                .prerequisites
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            ctx.line(format_args!("     Requires: {}", requires))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_with_notes() {
        let result = parse_check("pass:Contracts reviewed # by two people").expect("parse");
        assert_eq!(result, ValidationResult::new("Contracts reviewed", true).with_notes("by two people"));
    }

    #[test]
    fn failing_check_without_notes() {
        let result = parse_check("FAIL: Load test").expect("parse");
        assert_eq!(result, ValidationResult::new("Load test", false));
    }

    #[test]
    fn malformed_checks_rejected() {
        for raw in ["Load test", "maybe:Load test", "pass:", "pass: #notes"] {
            assert!(
                matches!(parse_check(raw), Err(AppError::InvalidArgument(_))),
                "{} should be rejected",
                raw
            );
        }
    }
}
