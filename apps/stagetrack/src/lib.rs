//! # stagetrack
//!
//! Command-line front end for the stagetrack workflow engine.
//!
//! - `config` → `stagetrack.toml`, `STAGETRACK_*` variables and flags
//! - `cli` → argument parsing and one handler per command
//! - `error` → the application error type
//!
//! The binary in `main.rs` only installs logging and calls [`cli::execute`].

pub mod cli;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands, execute, run};
pub use config::{BackendKind, FileConfig, Settings};
pub use error::AppError;
