//! Application-level errors.

use stagetrack_core::TrackError;
use thiserror::Error;

/// Errors surfaced by the stagetrack binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// A refused or failed workflow operation.
    #[error(transparent)]
    Track(#[from] TrackError),

    /// `stagetrack.toml`, an environment override or a catalog file is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command argument could not be interpreted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Rendering output failed.
    #[error("Output error: {0}")]
    Output(String),
}

impl AppError {
    /// Whether the error is a workflow refusal (as opposed to a setup problem).
    #[must_use]
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            AppError::Track(
                TrackError::AlreadyActive { .. }
                    | TrackError::ArchiveRequired { .. }
                    | TrackError::PrerequisitesUnmet { .. }
                    | TrackError::OutOfSequence { .. }
                    | TrackError::InvalidTransition { .. }
            )
        )
    }
}
