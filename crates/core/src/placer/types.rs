//! Types for the placer module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::deletion::DeletionQueue;
use crate::orchestrator::DeleteMode;

/// What happens to a source file once its copy is in place.
#[derive(Debug)]
pub enum Disposal<'a> {
    /// Send it to the recycle bin.
    Recycle,
    /// Delete it at once.
    Delete,
    /// Record it for end-of-run deletion.
    Defer(&'a mut DeletionQueue),
}

impl<'a> Disposal<'a> {
    /// Disposal matching a configured delete mode.
    pub fn for_mode(mode: DeleteMode, queue: &'a mut DeletionQueue) -> Self {
        match mode {
            DeleteMode::RecycleBin => Disposal::Recycle,
            DeleteMode::Immediate => Disposal::Delete,
            DeleteMode::EndOfScript => Disposal::Defer(queue),
        }
    }
}

/// A copy whose destination was chosen before the copy started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedCopy {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Destinations chosen for one batch of source files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyPlan {
    pub copies: Vec<PlannedCopy>,
    /// Files for which no destination could be chosen.
    pub unassigned: usize,
}

/// Outcome of a copy or relocation batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementReport {
    /// Files handed to the batch.
    pub requested: usize,
    /// Files now at their destination.
    pub placed: usize,
    /// Files that disappeared before they could be handled.
    pub skipped: usize,
    /// Files whose copy or move failed.
    pub failed: usize,
    /// Sources whose disposal failed after a good copy.
    pub dispose_failed: usize,
    /// Bytes written.
    pub bytes: u64,
}

impl PlacementReport {
    pub fn absorb(&mut self, other: &PlacementReport) {
        self.requested += other.requested;
        self.placed += other.placed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.dispose_failed += other.dispose_failed;
        self.bytes += other.bytes;
    }
}

/// Why a rebalance did or did not move files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceOutcome {
    /// Every folder already sits inside the tolerance band.
    AlreadyBalanced,
    /// Some folders are over the band but none are under it.
    NoReceivers,
    /// Some folders are under the band but none are over it.
    NoDonors,
    /// Moves were planned and bring every folder into the band.
    Planned,
    /// Moves were planned, but the band cannot be reached: surplus and
    /// deficit differ, so some folders stay outside it.
    PartiallyBalanced,
}

/// Result of a rebalance pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub outcome: RebalanceOutcome,
    pub lower: usize,
    pub upper: usize,
    pub planned: usize,
    pub moved: usize,
    pub failed: usize,
}

/// Result of a consolidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub keepers: usize,
    pub moved: usize,
    pub failed: usize,
    pub folders_removed: usize,
    pub folders_left: usize,
}

/// Result of a randomization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomizeReport {
    pub total: usize,
    pub moved: usize,
    pub unchanged: usize,
    pub failed: usize,
}
