//! FIFO deletion queue with drain-time verification.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::types::{DeletionEntry, DrainReport, DrainVerdict};
use crate::context::RunContext;
use crate::retry::{RetryExecutor, RetryOutcome};

/// Session-scoped queue of originals awaiting end-of-run deletion.
#[derive(Debug, Clone, Default)]
pub struct DeletionQueue {
    session_id: String,
    entries: VecDeque<DeletionEntry>,
    queued: HashSet<PathBuf>,
}

impl DeletionQueue {
    /// Creates an empty queue owned by `session_id`.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: VecDeque::new(),
            queued: HashSet::new(),
        }
    }

    /// Restores a queue from a persisted snapshot.
    pub fn import(session_id: impl Into<String>, entries: Vec<DeletionEntry>) -> Self {
        Self {
            session_id: session_id.into(),
            queued: entries.iter().map(|e| e.source_path.clone()).collect(),
            entries: entries.into(),
        }
    }

    /// Snapshot for checkpointing, in queue order.
    pub fn export(&self) -> Vec<DeletionEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Session owning this queue.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `path` is already queued.
    pub fn contains(&self, path: &Path) -> bool {
        self.queued.contains(path)
    }

    /// Queues `path`, capturing its current size and modification time.
    pub fn enqueue(&mut self, path: &Path) -> io::Result<()> {
        let meta = fs::metadata(path)?;
        let entry = DeletionEntry {
            source_path: path.to_path_buf(),
            size: meta.len(),
            last_write_time_utc: DateTime::<Utc>::from(meta.modified()?),
            queued_at_utc: Utc::now(),
            session_id: self.session_id.clone(),
            attempts: 0,
        };
        debug!("Queued {} for end-of-run deletion", path.display());
        self.queued.insert(entry.source_path.clone());
        self.entries.push_back(entry);
        Ok(())
    }

    /// Takes the oldest entry.
    pub fn drain(&mut self) -> Option<DeletionEntry> {
        let entry = self.entries.pop_front()?;
        self.queued.remove(&entry.source_path);
        Some(entry)
    }

    /// Puts an entry back at the end of the queue.
    pub fn requeue(&mut self, entry: DeletionEntry) {
        self.queued.insert(entry.source_path.clone());
        self.entries.push_back(entry);
    }

    /// Decides whether `entry` may be deleted by this session right now.
    pub fn verdict(&self, entry: &DeletionEntry) -> DrainVerdict {
        if entry.session_id != self.session_id {
            return DrainVerdict::SessionMismatch {
                queued_by: entry.session_id.clone(),
            };
        }

        let meta = match fs::metadata(&entry.source_path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return DrainVerdict::Missing,
            Err(e) => {
                return DrainVerdict::Unverifiable {
                    reason: e.to_string(),
                }
            }
        };

        if meta.len() != entry.size {
            return DrainVerdict::Modified {
                reason: format!("size changed from {} to {}", entry.size, meta.len()),
            };
        }

        match meta.modified() {
            Ok(modified) => {
                let modified = DateTime::<Utc>::from(modified);
                if modified != entry.last_write_time_utc {
                    DrainVerdict::Modified {
                        reason: format!(
                            "modified at {} (queued with {})",
                            modified.to_rfc3339(),
                            entry.last_write_time_utc.to_rfc3339()
                        ),
                    }
                } else {
                    DrainVerdict::Delete
                }
            }
            Err(e) => DrainVerdict::Unverifiable {
                reason: e.to_string(),
            },
        }
    }

    /// Drains every entry, deleting the ones whose verdict allows it.
    ///
    /// Entries from other sessions and entries whose deletion failed stay
    /// queued; modified and missing entries are dropped.
    pub fn execute(&mut self, executor: &RetryExecutor, ctx: &mut RunContext) -> DrainReport {
        let mut report = DrainReport::default();
        let mut retained = Vec::new();

        while let Some(mut entry) = self.drain() {
            match self.verdict(&entry) {
                DrainVerdict::Delete => {
                    let description = format!("delete {}", entry.source_path.display());
                    let path = entry.source_path.clone();
                    match executor.execute(ctx, &description, || fs::remove_file(&path)) {
                        Ok(RetryOutcome::Completed(())) => report.deleted += 1,
                        Ok(RetryOutcome::Skipped) => report.missing += 1,
                        Err(e) => {
                            ctx.error(e);
                            entry.attempts += 1;
                            report.failed += 1;
                            retained.push(entry);
                        }
                    }
                }
                DrainVerdict::SessionMismatch { queued_by } => {
                    ctx.warn(format!(
                        "Not deleting {}: queued by session {} (current {})",
                        entry.source_path.display(),
                        queued_by,
                        self.session_id
                    ));
                    report.foreign += 1;
                    retained.push(entry);
                }
                DrainVerdict::Modified { reason } => {
                    ctx.warn(format!(
                        "Not deleting {}: {}",
                        entry.source_path.display(),
                        reason
                    ));
                    report.modified += 1;
                }
                DrainVerdict::Missing => {
                    debug!("{} already gone", entry.source_path.display());
                    report.missing += 1;
                }
                DrainVerdict::Unverifiable { reason } => {
                    ctx.warn(format!(
                        "Cannot verify {}: {}",
                        entry.source_path.display(),
                        reason
                    ));
                    entry.attempts += 1;
                    report.failed += 1;
                    retained.push(entry);
                }
            }
        }

        for entry in retained {
            self.requeue(entry);
        }

        info!(
            "Deferred deletion: {} deleted, {} modified, {} missing, {} retained",
            report.deleted,
            report.modified,
            report.missing,
            report.retained()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use tempfile::TempDir;

    fn executor() -> RetryExecutor {
        RetryExecutor::new(RetryConfig::immediate(2))
    }

    #[test]
    fn test_fifo_order_and_snapshot() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.jpg");
        let b = temp.path().join("b.jpg");
        fs::write(&a, "aaa").unwrap();
        fs::write(&b, "bb").unwrap();

        let mut queue = DeletionQueue::new("s1");
        queue.enqueue(&a).unwrap();
        queue.enqueue(&b).unwrap();
        assert!(queue.contains(&a));

        let snapshot = queue.export();
        assert_eq!(snapshot[0].size, 3);
        assert_eq!(snapshot[1].session_id, "s1");

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("lastWriteTimeUtc"));
        let restored: Vec<DeletionEntry> = serde_json::from_str(&json).unwrap();
        let mut queue = DeletionQueue::import("s1", restored);

        assert_eq!(queue.drain().unwrap().source_path, a);
        assert_eq!(queue.drain().unwrap().source_path, b);
        assert!(queue.drain().is_none());
    }

    #[test]
    fn test_enqueue_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let mut queue = DeletionQueue::new("s1");
        assert!(queue.enqueue(&temp.path().join("nope")).is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_execute_deletes_matching_entries() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.jpg");
        fs::write(&a, "aaa").unwrap();

        let mut queue = DeletionQueue::new("s1");
        queue.enqueue(&a).unwrap();

        let mut ctx = RunContext::new("s1");
        let report = queue.execute(&executor(), &mut ctx);
        assert_eq!(report.deleted, 1);
        assert!(!a.exists());
        assert!(queue.is_empty());
        assert_eq!(ctx.total_warnings(), 0);
    }

    #[test]
    fn test_modified_file_is_never_deleted() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.jpg");
        fs::write(&a, "original").unwrap();

        let mut queue = DeletionQueue::new("s1");
        queue.enqueue(&a).unwrap();
        fs::write(&a, "replaced with new data").unwrap();

        assert!(matches!(
            queue.verdict(&queue.export()[0]),
            DrainVerdict::Modified { .. }
        ));

        let mut ctx = RunContext::new("s1");
        let report = queue.execute(&executor(), &mut ctx);
        assert_eq!(report.modified, 1);
        assert_eq!(report.deleted, 0);
        assert!(a.exists());
        assert_eq!(ctx.total_warnings(), 1);
    }

    #[test]
    fn test_same_size_but_new_mtime_is_not_deleted() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.jpg");
        fs::write(&a, "1234").unwrap();

        let mut queue = DeletionQueue::new("s1");
        queue.enqueue(&a).unwrap();

        let mut entries = queue.export();
        entries[0].last_write_time_utc =
            entries[0].last_write_time_utc - chrono::Duration::seconds(30);
        let queue = DeletionQueue::import("s1", entries);

        assert!(matches!(
            queue.verdict(&queue.export()[0]),
            DrainVerdict::Modified { .. }
        ));
    }

    #[test]
    fn test_foreign_session_entries_are_retained() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.jpg");
        fs::write(&a, "aaa").unwrap();

        let mut queued_by_a = DeletionQueue::new("session-a");
        queued_by_a.enqueue(&a).unwrap();

        let mut run_b = DeletionQueue::import("session-b", queued_by_a.export());
        let mut ctx = RunContext::new("session-b");
        let report = run_b.execute(&executor(), &mut ctx);

        assert_eq!(report.foreign, 1);
        assert_eq!(report.deleted, 0);
        assert!(a.exists());
        assert_eq!(run_b.len(), 1);
    }

    #[test]
    fn test_missing_entries_are_dropped() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.jpg");
        fs::write(&a, "aaa").unwrap();

        let mut queue = DeletionQueue::new("s1");
        queue.enqueue(&a).unwrap();
        fs::remove_file(&a).unwrap();

        let mut ctx = RunContext::new("s1");
        let report = queue.execute(&executor(), &mut ctx);
        assert_eq!(report.missing, 1);
        assert!(queue.is_empty());
    }
}
