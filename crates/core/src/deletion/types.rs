//! Types for the deletion queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One pending disposal of a successfully copied original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionEntry {
    /// Original file to delete.
    pub source_path: PathBuf,
    /// Size in bytes when queued.
    pub size: u64,
    /// Modification time when queued.
    pub last_write_time_utc: DateTime<Utc>,
    /// When the entry was queued.
    pub queued_at_utc: DateTime<Utc>,
    /// Session that queued the entry.
    pub session_id: String,
    /// Failed deletion attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

/// What draining should do with an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainVerdict {
    /// Session and file metadata match; delete it.
    Delete,
    /// Queued by another session; never deleted by this run.
    SessionMismatch { queued_by: String },
    /// File changed since it was queued; never deleted.
    Modified { reason: String },
    /// File no longer exists.
    Missing,
    /// File could not be inspected.
    Unverifiable { reason: String },
}

/// Tally of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Files deleted.
    pub deleted: usize,
    /// Entries skipped because the file changed.
    pub modified: usize,
    /// Entries already gone from disk.
    pub missing: usize,
    /// Entries retained because another session queued them.
    pub foreign: usize,
    /// Entries retained because deletion failed or the file could not be checked.
    pub failed: usize,
}

impl DrainReport {
    /// Entries still queued after the pass.
    pub fn retained(&self) -> usize {
        self.foreign + self.failed
    }
}
