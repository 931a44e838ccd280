//! # Configuration
//!
//! Settings are resolved in three layers, later layers winning:
//!
//! 1. `stagetrack.toml` at the project root (optional)
//! 2. `STAGETRACK_*` environment variables
//! 3. Command-line flags
//!
//! The project root is the nearest ancestor of the working directory that
//! contains `.git`, `package.json` or `stagetrack.toml`. Relative paths are
//! resolved against it.
//!
//! ```toml
//! sessions_dir = ".tmp/sessions"
//! backend = "redb"
//! database = ".tmp/stagetrack.redb"
//! init_policy = "require-archive"
//! resume_policy = "validate"
//! catalog = "stages.toml"
//! ```

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use stagetrack_core::primitives::DEFAULT_SESSIONS_DIR;
use stagetrack_core::{
    EngineConfig, InitPolicy, ResumePolicy, StageCatalog, StageDefinition, StoreBackend,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the optional project configuration file.
pub const CONFIG_FILE_NAME: &str = "stagetrack.toml";

/// Default redb database location, relative to the project root.
pub const DEFAULT_DATABASE: &str = ".tmp/stagetrack.redb";

/// Files or directories that mark a project root.
const ROOT_MARKERS: &[&str] = &[".git", "package.json", CONFIG_FILE_NAME];

/// Maximum size of a config or catalog file (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

pub const ENV_SESSIONS_DIR: &str = "STAGETRACK_SESSIONS_DIR";
pub const ENV_BACKEND: &str = "STAGETRACK_BACKEND";
pub const ENV_DATABASE: &str = "STAGETRACK_DATABASE";
pub const ENV_INIT_POLICY: &str = "STAGETRACK_INIT_POLICY";
pub const ENV_RESUME_POLICY: &str = "STAGETRACK_RESUME_POLICY";
pub const ENV_CATALOG: &str = "STAGETRACK_CATALOG";

// =============================================================================
// BACKEND KIND
// =============================================================================

/// Which store holds the records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One directory per run under the sessions directory.
    #[default]
    File,
    /// Single redb database file.
    Redb,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::File => f.write_str("file"),
            BackendKind::Redb => f.write_str("redb"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(BackendKind::File),
            "redb" => Ok(BackendKind::Redb),
            other => Err(format!("unknown backend '{}' (expected file or redb)", other)),
        }
    }
}

// =============================================================================
// LAYERS
// =============================================================================

/// Contents of `stagetrack.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub sessions_dir: Option<PathBuf>,
    pub backend: Option<BackendKind>,
    pub database: Option<PathBuf>,
    pub init_policy: Option<InitPolicy>,
    pub resume_policy: Option<ResumePolicy>,
    pub catalog: Option<PathBuf>,
}

impl FileConfig {
    /// Parse TOML text.
    pub fn parse(text: &str) -> Result<Self, AppError> {
        toml::from_str(text).map_err(|e| AppError::Config(format!("{}: {}", CONFIG_FILE_NAME, e)))
    }

    /// Read `<root>/stagetrack.toml`, or defaults if it does not exist.
    pub fn load(root: &Path) -> Result<Self, AppError> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        Self::parse(&read_limited(&path)?)
    }

    /// Overlay `STAGETRACK_*` variables obtained through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), AppError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var(ENV_SESSIONS_DIR) {
            self.sessions_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var(ENV_BACKEND) {
            self.backend = Some(v.parse().map_err(|e| env_error(ENV_BACKEND, e))?);
        }
        if let Some(v) = var(ENV_DATABASE) {
            self.database = Some(PathBuf::from(v));
        }
        if let Some(v) = var(ENV_INIT_POLICY) {
            self.init_policy = Some(v.parse().map_err(|e| env_error(ENV_INIT_POLICY, e))?);
        }
        if let Some(v) = var(ENV_RESUME_POLICY) {
            self.resume_policy = Some(v.parse().map_err(|e| env_error(ENV_RESUME_POLICY, e))?);
        }
        if let Some(v) = var(ENV_CATALOG) {
            self.catalog = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Overlay `other`'s set keys onto this layer.
    pub fn merge(&mut self, other: FileConfig) {
        if other.sessions_dir.is_some() {
            self.sessions_dir = other.sessions_dir;
        }
        if other.backend.is_some() {
            self.backend = other.backend;
        }
        if other.database.is_some() {
            self.database = other.database;
        }
        if other.init_policy.is_some() {
            self.init_policy = other.init_policy;
        }
        if other.resume_policy.is_some() {
            self.resume_policy = other.resume_policy;
        }
        if other.catalog.is_some() {
            self.catalog = other.catalog;
        }
    }
}

fn env_error(name: &str, reason: String) -> AppError {
    AppError::Config(format!("{}: {}", name, reason))
}

// =============================================================================
// RESOLVED SETTINGS
// =============================================================================

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub project_root: PathBuf,
    pub sessions_dir: PathBuf,
    pub backend: BackendKind,
    pub database: PathBuf,
    pub init_policy: InitPolicy,
    pub resume_policy: ResumePolicy,
    pub catalog: Option<PathBuf>,
}

impl Settings {
    /// Resolve settings for a project rooted at `root`.
    ///
    /// `flags` is the command-line layer; `lookup` reads environment variables.
    pub fn resolve(
        root: &Path,
        flags: FileConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        let mut layered = FileConfig::load(root)?;
        layered.apply_env(lookup)?;
        layered.merge(flags);

        let absolute = |p: PathBuf| if p.is_absolute() { p } else { root.join(p) };

        Ok(Self {
            project_root: root.to_path_buf(),
            sessions_dir: absolute(
                layered
                    .sessions_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSIONS_DIR)),
            ),
            backend: layered.backend.unwrap_or_default(),
            database: absolute(
                layered
                    .database
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            ),
            init_policy: layered.init_policy.unwrap_or_default(),
            resume_policy: layered.resume_policy.unwrap_or_default(),
            catalog: layered.catalog.map(absolute),
        })
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            init_policy: self.init_policy,
            resume_policy: self.resume_policy,
        }
    }

    /// The configured catalog, or the standard one.
    pub fn load_catalog(&self) -> Result<StageCatalog, AppError> {
        match &self.catalog {
            Some(path) => load_catalog_file(path),
            None => Ok(StageCatalog::standard()),
        }
    }

    /// Open the configured store.
    pub fn open_store(&self) -> Result<StoreBackend, AppError> {
        match self.backend {
            BackendKind::File => Ok(StoreBackend::file(&self.sessions_dir)),
            BackendKind::Redb => Ok(StoreBackend::redb(&self.database)?),
        }
    }
}

// =============================================================================
// PROJECT ROOT AND CATALOG FILES
// =============================================================================

/// Nearest ancestor of `start` holding a root marker, or `start` itself.
#[must_use]
pub fn find_project_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| ROOT_MARKERS.iter().any(|m| dir.join(m).exists()))
        .unwrap_or(start)
        .to_path_buf()
}

/// A stage catalog file: a list of `[[stage]]` tables.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    stage: Vec<StageDefinition>,
}

/// Parse catalog TOML and validate it.
pub fn parse_catalog(text: &str) -> Result<StageCatalog, AppError> {
    let file: CatalogFile =
        toml::from_str(text).map_err(|e| AppError::Config(format!("catalog: {}", e)))?;
    Ok(StageCatalog::new(file.stage)?)
}

/// Read and validate a catalog file.
pub fn load_catalog_file(path: &Path) -> Result<StageCatalog, AppError> {
    parse_catalog(&read_limited(path)?)
}

fn read_limited(path: &Path) -> Result<String, AppError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| AppError::Config(format!("cannot read '{}': {}", path.display(), e)))?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(AppError::Config(format!(
            "'{}' is {} bytes (maximum {})",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_SIZE
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read '{}': {}", path.display(), e)))
}

// =============================================================================
// TESTS
// =============================================================================
