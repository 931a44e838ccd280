//! # Fixed Primitives
//!
//! Hardcoded runtime constants for the stagetrack CORE.
//!
//! These values are compiled into the binary and are immutable at runtime.
//! They define the on-disk layout and the input limits that every store
//! and every transition relies on.

/// Name of the record file inside a file-backed session directory.
pub const TRACKING_FILE_NAME: &str = "stage-tracking.json";

/// Default sessions root, relative to the project root.
pub const DEFAULT_SESSIONS_DIR: &str = ".tmp/sessions";

/// Directory (inside the sessions root) holding per-feature lock files.
pub const LOCKS_DIR_NAME: &str = ".locks";

/// Marker separating a location name from its archive suffix.
///
/// `~` is rejected in feature identifiers, so an archived location can never
/// be mistaken for a live one.
pub const ARCHIVE_MARKER: &str = "~archived-";

/// Date format used as the location prefix (`{date}-{feature}`).
pub const SESSION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Length of a formatted [`SESSION_DATE_FORMAT`] date.
pub const SESSION_DATE_LEN: usize = 10;

/// Reason recorded when `rollback` is called without one.
pub const DEFAULT_ROLLBACK_REASON: &str = "Manual rollback";

/// Reason recorded when `abort` is called without one.
pub const DEFAULT_ABORT_REASON: &str = "Manual abort";

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a feature identifier.
pub const MAX_FEATURE_LENGTH: usize = 128;

/// Maximum size of a serialized tracking record (4 MiB).
///
/// Checked before parsing so a damaged or hostile file cannot force a huge
/// allocation.
pub const MAX_RECORD_SIZE: usize = 4 * 1024 * 1024;

/// Maximum number of stages a catalog may define.
pub const MAX_CATALOG_STAGES: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_marker_uses_forbidden_feature_char() {
        assert!(ARCHIVE_MARKER.starts_with('~'));
    }

    #[test]
    fn date_len_matches_format() {
        let formatted = chrono::NaiveDate::from_ymd_opt(2026, 1, 2)
            .expect("valid date")
            .format(SESSION_DATE_FORMAT)
            .to_string();
        assert_eq!(formatted.len(), SESSION_DATE_LEN);
    }
}
