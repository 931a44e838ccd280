//! # stagetrack CLI Module
//!
//! This module implements the command-line interface.
//!
//! ## Available Commands
//!
//! - `init` - Start a workflow run for a feature
//! - `status` - Show the progress report
//! - `validate` - Check that a stage may be executed now
//! - `complete` - Mark the current stage complete
//! - `rollback` - Return to an earlier stage
//! - `abort` - Freeze the run
//! - `fail` - Record that the current stage failed
//! - `resume` - Reactivate an aborted or failed run
//! - `archive` - Move a finished run aside
//! - `history` - List every run of a feature
//! - `stages` - List the stage catalog

mod commands;

use crate::config::{BackendKind, FileConfig, Settings, find_project_root};
use crate::error::AppError;
use clap::{Parser, Subcommand};
use stagetrack_core::{InitPolicy, ResumePolicy};
use std::io::Write;
use std::path::{Path, PathBuf};

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// stagetrack - multi-stage delivery workflow tracker
///
/// Tracks each feature through the eight delivery stages, one stage at a
/// time, with prerequisites, rollbacks and resumable aborts.
#[derive(Parser, Debug)]
#[command(name = "stagetrack")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Project root (default: nearest ancestor with .git, package.json or stagetrack.toml)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Directory holding one subdirectory per run (file backend)
    #[arg(long, global = true)]
    pub sessions_dir: Option<PathBuf>,

    /// Storage backend
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<BackendKind>,

    /// Path to the redb database (redb backend)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// TOML file with a custom stage catalog
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// What init does after a finished run: reuse or require-archive
    #[arg(long, global = true)]
    pub init_policy: Option<InitPolicy>,

    /// Whether resume re-checks prerequisites: validate or trust
    #[arg(long, global = true)]
    pub resume_policy: Option<ResumePolicy>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a workflow run at stage 1
    Init {
        /// Feature name
        feature: String,
    },

    /// Show the progress report
    Status {
        /// Feature name
        feature: String,
    },

    /// Check that a stage may be executed now
    Validate {
        /// Feature name
        feature: String,
        /// Stage id
        stage: u32,
    },

    /// Mark the current stage complete and advance
    Complete {
        /// Feature name
        feature: String,
        /// Stage id (must be the current stage)
        stage: u32,

        /// Output produced by the stage (repeatable)
        #[arg(short, long = "output")]
        outputs: Vec<String>,

        /// Check result as pass:CRITERION or fail:CRITERION, optionally #NOTES (repeatable)
        #[arg(short, long = "check")]
        checks: Vec<String>,
    },

    /// Return to an earlier stage, resetting it and every later stage
    Rollback {
        /// Feature name
        feature: String,
        /// Stage id to return to
        stage: u32,

        /// Why the stage is being redone
        reason: Option<String>,
    },

    /// Freeze the run so no stage can be completed
    Abort {
        /// Feature name
        feature: String,

        /// Why the run is stopped
        reason: Option<String>,
    },

    /// Record that the current stage failed
    Fail {
        /// Feature name
        feature: String,
        /// Stage id (must be the current stage)
        stage: u32,

        /// What went wrong
        error: String,
    },

    /// Reactivate an aborted or failed run at a stage
    Resume {
        /// Feature name
        feature: String,
        /// Stage id to resume at
        stage: u32,
    },

    /// Move a finished run aside so init starts fresh
    Archive {
        /// Feature name
        feature: String,
    },

    /// List every run of a feature, newest first
    History {
        /// Feature name
        feature: String,
    },

    /// List the stage catalog
    Stages,
}

impl Cli {
    /// The command-line configuration layer.
    fn overrides(&self) -> FileConfig {
        FileConfig {
            sessions_dir: self.sessions_dir.clone(),
            backend: self.backend,
            database: self.database.clone(),
            init_policy: self.init_policy,
            resume_policy: self.resume_policy,
            catalog: self.catalog.clone(),
        }
    }

    /// Resolve settings relative to `cwd`, reading variables through `lookup`.
    pub fn settings(
        &self,
        cwd: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Settings, AppError> {
        let root = match &self.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => cwd.join(root),
            None => find_project_root(cwd),
        };
        Settings::resolve(&root, self.overrides(), lookup)
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Process exit code for an argument parsing outcome.
///
/// `--help` and `--version` exit 0; every usage error exits 1 like any other
/// failed command.
#[must_use]
pub fn usage_exit_code(err: &clap::Error) -> i32 {
    if err.exit_code() == 0 { 0 } else { 1 }
}

/// Execute the CLI against the process environment and stdout.
pub fn execute(cli: Cli) -> Result<(), AppError> {
    let cwd = std::env::current_dir()
        .map_err(|e| AppError::Config(format!("cannot read working directory: {}", e)))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(cli, &cwd, |name| std::env::var(name).ok(), &mut out)
}

/// Execute the CLI with an explicit working directory, environment and sink.
pub fn run(
    cli: Cli,
    cwd: &Path,
    lookup: impl Fn(&str) -> Option<String>,
    out: &mut dyn Write,
) -> Result<(), AppError> {
    let settings = cli.settings(cwd, lookup)?;
    tracing::debug!(
        root = %settings.project_root.display(),
        backend = %settings.backend,
        init_policy = %settings.init_policy,
        resume_policy = %settings.resume_policy,
        "settings resolved"
    );

    let mut ctx = Context {
        settings,
        json_mode: cli.json,
        out,
    };

    match cli.command {
        Commands::Init { feature } => cmd_init(&mut ctx, &feature),
        Commands::Status { feature } => cmd_status(&mut ctx, &feature),
        Commands::Validate { feature, stage } => cmd_validate(&mut ctx, &feature, stage),
        Commands::Complete {
            feature,
            stage,
            outputs,
            checks,
        } => cmd_complete(&mut ctx, &feature, stage, outputs, &checks),
        Commands::Rollback {
            feature,
            stage,
            reason,
        } => cmd_rollback(&mut ctx, &feature, stage, reason.as_deref()),
        Commands::Abort { feature, reason } => cmd_abort(&mut ctx, &feature, reason.as_deref()),
        Commands::Fail {
            feature,
            stage,
            error,
        } => cmd_fail(&mut ctx, &feature, stage, &error),
        Commands::Resume { feature, stage } => cmd_resume(&mut ctx, &feature, stage),
        Commands::Archive { feature } => cmd_archive(&mut ctx, &feature),
        Commands::History { feature } => cmd_history(&mut ctx, &feature),
        Commands::Stages => cmd_stages(&mut ctx),
    }
}
