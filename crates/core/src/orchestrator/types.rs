//! Types for the distribution orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use super::phase::Phase;
use crate::deletion::DrainReport;
use crate::placer::{ConsolidationReport, PlacementReport, RandomizeReport, RebalanceReport};

/// Errors that abort a distribution run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The persisted run was started with different parameters.
    #[error("restart mismatch on {field}: state has {persisted}, invocation has {requested}")]
    RestartMismatch {
        field: &'static str,
        persisted: String,
        requested: String,
    },

    /// The source folder is missing.
    #[error("source folder not found: {0}")]
    SourceMissing(PathBuf),

    /// State store error.
    #[error("state store error: {0}")]
    State(#[from] crate::state::StateError),

    /// Placer setup error.
    #[error("placer error: {0}")]
    Placer(#[from] crate::placer::PlacerError),

    /// A retried file operation gave up outside the placer.
    #[error(transparent)]
    Retry(#[from] crate::retry::RetryError),

    /// I/O error while inspecting the trees.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What happened to the deferred deletion queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionStatus {
    /// The delete mode does not defer deletions.
    NotDeferred,
    /// The gate was not met; the queue was kept for a later run.
    GateNotMet { queued: usize },
    /// The queue was drained.
    Drained(DrainReport),
}

/// End-of-run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: String,
    /// Checkpoint found when this invocation started.
    pub resumed_from: Phase,
    /// Last phase durably recorded.
    pub last_phase: Phase,
    /// Whether every scheduled phase has run.
    pub completed: bool,
    pub copied: PlacementReport,
    pub redistributed: Option<PlacementReport>,
    pub consolidation: Option<ConsolidationReport>,
    pub rebalance: Option<RebalanceReport>,
    pub randomize: Option<RandomizeReport>,
    pub deletion: Option<DeletionStatus>,
    /// Selected source files plus files already in the target.
    pub expected_files: Option<u64>,
    /// Files found in the target after the last phase.
    pub final_files: Option<u64>,
    pub discrepancy: bool,
    /// Totals across every invocation of this run.
    pub warnings: u64,
    pub errors: u64,
    /// Whether the state file was removed.
    pub state_cleared: bool,
}

impl RunSummary {
    pub(crate) fn new(session_id: String, resumed_from: Phase) -> Self {
        Self {
            session_id,
            resumed_from,
            last_phase: resumed_from,
            completed: false,
            copied: PlacementReport::default(),
            redistributed: None,
            consolidation: None,
            rebalance: None,
            randomize: None,
            deletion: None,
            expected_files: None,
            final_files: None,
            discrepancy: false,
            warnings: 0,
            errors: 0,
            state_cleared: false,
        }
    }

    /// Whether the run finished without errors.
    pub fn is_clean(&self) -> bool {
        self.completed && self.errors == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session:        {}", self.session_id)?;
        writeln!(
            f,
            "Phases:         {} -> {}{}",
            self.resumed_from,
            self.last_phase,
            if self.completed { "" } else { " (stopped early)" }
        )?;
        writeln!(
            f,
            "Copied:         {} of {} ({} skipped, {} failed, {} bytes)",
            self.copied.placed,
            self.copied.requested,
            self.copied.skipped,
            self.copied.failed,
            self.copied.bytes
        )?;
        if let Some(report) = &self.redistributed {
            writeln!(
                f,
                "Redistributed:  {} of {} ({} failed)",
                report.placed, report.requested, report.failed
            )?;
        }
        if let Some(report) = &self.consolidation {
            writeln!(
                f,
                "Consolidated:   {} moved into {} folders, {} folders removed",
                report.moved, report.keepers, report.folders_removed
            )?;
        }
        if let Some(report) = &self.rebalance {
            writeln!(
                f,
                "Rebalanced:     {:?}, {} of {} moved, band [{}, {}]",
                report.outcome, report.moved, report.planned, report.lower, report.upper
            )?;
        }
        if let Some(report) = &self.randomize {
            writeln!(
                f,
                "Randomized:     {} moved, {} unchanged of {}",
                report.moved, report.unchanged, report.total
            )?;
        }
        match &self.deletion {
            Some(DeletionStatus::Drained(report)) => writeln!(
                f,
                "Deleted:        {} ({} modified, {} missing, {} retained)",
                report.deleted,
                report.modified,
                report.missing,
                report.retained()
            )?,
            Some(DeletionStatus::GateNotMet { queued }) => {
                writeln!(f, "Deleted:        none, gate not met ({} queued)", queued)?
            }
            Some(DeletionStatus::NotDeferred) | None => {}
        }
        if let (Some(expected), Some(actual)) = (self.expected_files, self.final_files) {
            writeln!(
                f,
                "Target files:   {} (expected {}){}",
                actual,
                expected,
                if self.discrepancy { " DISCREPANCY" } else { "" }
            )?;
        }
        writeln!(f, "Warnings:       {}", self.warnings)?;
        write!(f, "Errors:         {}", self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let mut summary = RunSummary::new("abc".to_string(), Phase::Init);
        summary.last_phase = Phase::TargetRedistributed;
        summary.completed = true;
        summary.expected_files = Some(10);
        summary.final_files = Some(9);
        summary.discrepancy = true;
        summary.warnings = 1;

        let text = summary.to_string();
        assert!(text.contains("Session:        abc"));
        assert!(text.contains("init (0) -> target-redistributed (5)"));
        assert!(text.contains("9 (expected 10) DISCREPANCY"));
        assert!(text.ends_with("Errors:         0"));
        assert!(summary.is_clean());
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::RestartMismatch {
            field: "deleteMode",
            persisted: "Immediate".to_string(),
            requested: "EndOfScript".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "restart mismatch on deleteMode: state has Immediate, invocation has EndOfScript"
        );
    }
}
