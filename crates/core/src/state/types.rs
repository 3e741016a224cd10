//! The persisted checkpoint record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::deletion::DeletionEntry;
use crate::orchestrator::{DeleteMode, Phase};
use crate::placer::PlannedCopy;

/// Durable workflow cursor plus the payload later phases need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    /// Last durably completed phase.
    #[serde(default)]
    pub checkpoint: Phase,

    /// Run identity; scopes deferred deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Warnings across all invocations so far.
    #[serde(default)]
    pub warnings_so_far: u64,

    /// Errors across all invocations so far.
    #[serde(default)]
    pub errors_so_far: u64,

    /// Source root the run was started with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_folder: Option<PathBuf>,

    /// Delete mode the run was started with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_mode: Option<DeleteMode>,

    /// Copy cap the run was started with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_files_to_copy: Option<u64>,

    /// Source files selected during enumeration.
    #[serde(default)]
    pub source_files: Vec<PathBuf>,

    /// Target subfolders known after subfolder creation.
    #[serde(default)]
    pub target_subfolders: Vec<PathBuf>,

    /// Copies of the batch in flight, saved before any of them starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub planned_copies: Vec<PlannedCopy>,

    /// Deferred deletion queue snapshot.
    #[serde(default)]
    pub deletion_queue: Vec<DeletionEntry>,

    /// Selected source file count at enumeration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_source_count: Option<u64>,

    /// Files already in the target tree at enumeration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_target_count: Option<u64>,

    /// When this snapshot was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl CheckpointRecord {
    /// Whether this record carries no progress at all.
    pub fn is_fresh(&self) -> bool {
        self.checkpoint == Phase::Init && self.session_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fresh() {
        let record = CheckpointRecord::default();
        assert!(record.is_fresh());
        assert_eq!(record.checkpoint, Phase::Init);
    }

    #[test]
    fn test_json_shape() {
        let record = CheckpointRecord {
            checkpoint: Phase::SubfoldersReady,
            session_id: Some("abc".to_string()),
            warnings_so_far: 2,
            delete_mode: Some(DeleteMode::EndOfScript),
            max_files_to_copy: Some(0),
            ..Default::default()
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["checkpoint"], 3);
        assert_eq!(json["sessionId"], "abc");
        assert_eq!(json["warningsSoFar"], 2);
        assert_eq!(json["deleteMode"], "EndOfScript");
        assert_eq!(json["maxFilesToCopy"], 0);

        let parsed: CheckpointRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_minimal_json_parses() {
        let parsed: CheckpointRecord = serde_json::from_str(r#"{"checkpoint": 5}"#).unwrap();
        assert_eq!(parsed.checkpoint, Phase::TargetRedistributed);
        assert!(parsed.source_files.is_empty());
        assert!(parsed.planned_copies.is_empty());
    }

    #[test]
    fn test_planned_copies_survive_a_save() {
        let record = CheckpointRecord {
            checkpoint: Phase::SubfoldersReady,
            planned_copies: vec![PlannedCopy {
                source: PathBuf::from("/src/a.jpg"),
                destination: PathBuf::from("/dst/1/k3j9.jpg"),
            }],
            ..Default::default()
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["plannedCopies"][0]["destination"], "/dst/1/k3j9.jpg");
        let parsed: CheckpointRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.planned_copies, record.planned_copies);

        let empty = serde_json::to_value(CheckpointRecord::default()).unwrap();
        assert!(empty.get("plannedCopies").is_none());
    }
}
