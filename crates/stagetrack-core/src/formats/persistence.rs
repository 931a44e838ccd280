//! # Persistence Format
//!
//! JSON serialization for workflow tracking records.
//!
//! The document holds `feature`, `workflow_status`, `current_stage`,
//! `created_at`, `updated_at`, `completed_at?`, `stages[]` and
//! `rollback_history[]`, plus the additive `status_reason?` and `revision`.
//! Timestamps are RFC 3339 in UTC.
//!
//! ## Input Limits
//!
//! The size limit is checked BEFORE parsing, so damaged or hostile input is
//! rejected without allocating for it. Anything that does not parse is
//! reported as [`TrackError::Corrupt`]; the caller never sees a half-read
//! record.

use crate::primitives::MAX_RECORD_SIZE;
use crate::{TrackError, WorkflowTracking};

/// Serialize a record to pretty-printed JSON bytes.
///
/// This is a pure transformation - no file I/O.
pub fn tracking_to_json(tracking: &WorkflowTracking) -> Result<Vec<u8>, TrackError> {
    serde_json::to_vec_pretty(tracking).map_err(|e| TrackError::SerializationError(e.to_string()))
}

/// Deserialize a record from JSON bytes.
///
/// This is a pure transformation - no file I/O.
pub fn tracking_from_json(bytes: &[u8]) -> Result<WorkflowTracking, TrackError> {
    if bytes.len() > MAX_RECORD_SIZE {
        return Err(TrackError::Corrupt(format!(
            "record size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_RECORD_SIZE
        )));
    }
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(TrackError::Corrupt("record is empty".to_string()));
    }

    serde_json::from_slice(bytes)
        .map_err(|e| TrackError::Corrupt(format!("failed to parse tracking record: {}", e)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StageCatalog, StageId, StageMachine, StageState, WorkflowStatus};
    use chrono::Utc;

    /// A record in the older layout: millisecond timestamps, no revision or rollback log.
    const LEGACY_RECORD: &str = r#"{
  "feature": "checkout",
  "workflow_status": "active",
  "current_stage": 2,
  "created_at": "2025-03-01T09:15:00.000Z",
  "updated_at": "2025-03-01T10:00:00.000Z",
  "stages": [
    { "id": 1, "name": "Architecture Decomposition", "status": "completed",
      "completed_at": "2025-03-01T10:00:00.000Z" },
    { "id": 2, "name": "Story Mapping", "status": "in_progress",
      "started_at": "2025-03-01T10:00:00.000Z" },
    { "id": 3, "name": "Prioritization", "status": "pending" },
    { "id": 4, "name": "Enhanced Task Breakdown", "status": "pending" },
    { "id": 5, "name": "Contract Definition", "status": "pending" },
    { "id": 6, "name": "Parallel Execution", "status": "pending" },
    { "id": 7, "name": "Integration & Validation", "status": "pending" },
    { "id": 8, "name": "Release & Learning", "status": "pending" }
  ]
}"#;

    #[test]
    fn legacy_record_loads() {
        let tracking = tracking_from_json(LEGACY_RECORD.as_bytes()).expect("parse");

        assert_eq!(tracking.feature, "checkout");
        assert_eq!(tracking.workflow_status, WorkflowStatus::Active);
        assert_eq!(tracking.current_stage, StageId(2));
        assert_eq!(tracking.stages[1].status, StageState::InProgress);
        assert!(tracking.rollback_history.is_empty());
        assert_eq!(tracking.revision, 0);
        tracking
            .check_alignment(&StageCatalog::standard())
            .expect("aligned");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let catalog = StageCatalog::standard();
        let tracking = StageMachine::new(&catalog).start("checkout", Utc::now());

        let json = String::from_utf8(tracking_to_json(&tracking).expect("serialize"))
            .expect("utf8");

        assert!(json.contains("\"workflow_status\": \"active\""));
        assert!(json.contains("\"rollback_history\": []"));
        assert!(!json.contains("completed_at"));
        assert!(!json.contains("started_at"));
        assert!(!json.contains("status_reason"));
    }

    #[test]
    fn saved_record_reads_back_identically() {
        let catalog = StageCatalog::standard();
        let tracking = StageMachine::new(&catalog).start("checkout", Utc::now());

        let bytes = tracking_to_json(&tracking).expect("serialize");
        let restored = tracking_from_json(&bytes).expect("parse");

        assert_eq!(restored, tracking);
    }

    #[test]
    fn garbage_is_corrupt() {
        let result = tracking_from_json(b"{ not json");
        assert!(matches!(result, Err(TrackError::Corrupt(_))));
    }

    #[test]
    fn empty_is_corrupt() {
        let result = tracking_from_json(b"  \n");
        assert!(matches!(result, Err(TrackError::Corrupt(m)) if m.contains("empty")));
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let bad = LEGACY_RECORD.replace("\"active\"", "\"paused\"");
        let result = tracking_from_json(bad.as_bytes());
        assert!(matches!(result, Err(TrackError::Corrupt(_))));
    }

    #[test]
    fn oversized_input_rejected_before_parse() {
        let big = vec![b' '; MAX_RECORD_SIZE + 1];
        let result = tracking_from_json(&big);
        assert!(matches!(result, Err(TrackError::Corrupt(m)) if m.contains("exceeds")));
    }
}
