//! Workflow phases and their ordering.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::DistributionMode;

/// A durably completed workflow step.
///
/// Persisted as its integer tag (`checkpoint` in the state file). A recorded
/// phase means every side effect of that phase has happened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Phase {
    /// Nothing done yet.
    #[default]
    Init = 0,
    /// Target root prepared and stale partial copies swept.
    RenamePrep = 1,
    /// Source selection and initial counts recorded.
    Enumerate = 2,
    /// Target subfolders exist for the expected total.
    SubfoldersReady = 3,
    /// Every selected source file copied into the target.
    SourceCopied = 4,
    /// Over-limit folders and stray root files redistributed.
    TargetRedistributed = 5,
    /// Target shrunk to the minimum folder count.
    Consolidated = 6,
    /// Folder counts brought within tolerance of the average.
    Rebalanced = 7,
    /// Every target file reshuffled.
    Randomized = 8,
}

/// Phases every run goes through, in order.
const MANDATORY: [Phase; 5] = [
    Phase::RenamePrep,
    Phase::Enumerate,
    Phase::SubfoldersReady,
    Phase::SourceCopied,
    Phase::TargetRedistributed,
];

impl Phase {
    /// Integer tag stored in the state file.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// The optional terminal phase for a mode.
    pub fn for_mode(mode: DistributionMode) -> Phase {
        match mode {
            DistributionMode::ConsolidateToMinimum => Phase::Consolidated,
            DistributionMode::RebalanceToAverage => Phase::Rebalanced,
            DistributionMode::RandomizeDistribution => Phase::Randomized,
        }
    }

    /// Ordered phases a run with `mode` executes.
    pub fn schedule(mode: Option<DistributionMode>) -> Vec<Phase> {
        let mut phases = MANDATORY.to_vec();
        if let Some(mode) = mode {
            phases.push(Phase::for_mode(mode));
        }
        phases
    }

    /// Phases still to run after `last` was recorded.
    ///
    /// Each phase is gated independently by `last < phase`, so the optional
    /// terminal phases are skipped only if their own tag was reached.
    pub fn remaining(last: Phase, mode: Option<DistributionMode>) -> Vec<Phase> {
        Self::schedule(mode)
            .into_iter()
            .filter(|phase| last < *phase)
            .collect()
    }
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        phase.tag()
    }
}

impl TryFrom<u8> for Phase {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Phase::Init,
            1 => Phase::RenamePrep,
            2 => Phase::Enumerate,
            3 => Phase::SubfoldersReady,
            4 => Phase::SourceCopied,
            5 => Phase::TargetRedistributed,
            6 => Phase::Consolidated,
            7 => Phase::Rebalanced,
            8 => Phase::Randomized,
            other => return Err(format!("unknown checkpoint {}", other)),
        })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::RenamePrep => "rename-prep",
            Phase::Enumerate => "enumerate",
            Phase::SubfoldersReady => "subfolders-ready",
            Phase::SourceCopied => "source-copied",
            Phase::TargetRedistributed => "target-redistributed",
            Phase::Consolidated => "consolidated",
            Phase::Rebalanced => "rebalanced",
            Phase::Randomized => "randomized",
        };
        write!(f, "{} ({})", name, self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_without_mode() {
        assert_eq!(
            Phase::schedule(None),
            vec![
                Phase::RenamePrep,
                Phase::Enumerate,
                Phase::SubfoldersReady,
                Phase::SourceCopied,
                Phase::TargetRedistributed
            ]
        );
    }

    #[test]
    fn test_remaining_resumes_after_last() {
        let remaining = Phase::remaining(
            Phase::SubfoldersReady,
            Some(DistributionMode::RebalanceToAverage),
        );
        assert_eq!(
            remaining,
            vec![
                Phase::SourceCopied,
                Phase::TargetRedistributed,
                Phase::Rebalanced
            ]
        );
    }

    #[test]
    fn test_optional_phase_gated_by_own_tag() {
        // A consolidated run restarted with rebalance still owes the rebalance.
        let remaining = Phase::remaining(
            Phase::Consolidated,
            Some(DistributionMode::RebalanceToAverage),
        );
        assert_eq!(remaining, vec![Phase::Rebalanced]);

        let remaining = Phase::remaining(
            Phase::Rebalanced,
            Some(DistributionMode::ConsolidateToMinimum),
        );
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_serializes_as_integer() {
        let json = serde_json::to_string(&Phase::SourceCopied).unwrap();
        assert_eq!(json, "4");
        let parsed: Phase = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, Phase::Rebalanced);
        assert!(serde_json::from_str::<Phase>("9").is_err());
    }
}
