//! Distribution run parameters.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How an original is disposed of after it was copied successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteMode {
    /// Move the original to the platform recycle bin / trash.
    #[default]
    RecycleBin,
    /// Delete the original right after the copy.
    Immediate,
    /// Queue the original and delete it at the end of the run.
    EndOfScript,
}

/// Condition under which end-of-run deletions are carried out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionGate {
    /// Only when the run produced neither warnings nor errors.
    #[default]
    NoWarnings,
    /// When the run produced no errors; warnings are tolerated.
    WarningsOnly,
}

impl DeletionGate {
    /// Whether queued deletions may proceed given the run's totals.
    pub fn permits(&self, warnings: u64, errors: u64) -> bool {
        match self {
            Self::NoWarnings => warnings == 0 && errors == 0,
            Self::WarningsOnly => errors == 0,
        }
    }
}

/// Optional post-distribution pass over the target tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionMode {
    /// Shrink to the minimum number of folders that can hold every file.
    ConsolidateToMinimum,
    /// Move files from crowded folders to sparse ones.
    RebalanceToAverage,
    /// Reshuffle every file across the existing folders.
    RandomizeDistribution,
}

/// Configuration for a distribution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Tree the files are taken from.
    pub source_folder: PathBuf,

    /// Tree whose subfolders receive the files.
    pub target_folder: PathBuf,

    /// Maximum files per target subfolder.
    #[serde(default = "default_files_per_folder")]
    pub files_per_folder: usize,

    /// Disposal policy for copied originals.
    #[serde(default)]
    pub delete_mode: DeleteMode,

    /// Gate for end-of-run deletions (only used with `EndOfScript`).
    #[serde(default)]
    pub end_of_script_deletion_condition: DeletionGate,

    /// Maximum source files to copy (0 = all).
    #[serde(default)]
    pub max_files_to_copy: u64,

    /// Consolidate the target to the minimum folder count after distribution.
    #[serde(default)]
    pub consolidate_to_minimum: bool,

    /// Rebalance folder counts toward the average after distribution.
    #[serde(default)]
    pub rebalance_to_average: bool,

    /// Reshuffle all target files after distribution.
    #[serde(default)]
    pub randomize_distribution: bool,

    /// Tolerance band around the average for rebalancing, in percent.
    #[serde(default = "default_tolerance")]
    pub rebalance_tolerance_pct: f64,
}

fn default_files_per_folder() -> usize {
    20_000
}

fn default_tolerance() -> f64 {
    10.0
}

impl DistributionConfig {
    /// Creates a config with defaults for everything but the two roots.
    pub fn new(source_folder: impl Into<PathBuf>, target_folder: impl Into<PathBuf>) -> Self {
        Self {
            source_folder: source_folder.into(),
            target_folder: target_folder.into(),
            files_per_folder: default_files_per_folder(),
            delete_mode: DeleteMode::default(),
            end_of_script_deletion_condition: DeletionGate::default(),
            max_files_to_copy: 0,
            consolidate_to_minimum: false,
            rebalance_to_average: false,
            randomize_distribution: false,
            rebalance_tolerance_pct: default_tolerance(),
        }
    }

    /// Sets the per-folder limit.
    pub fn with_files_per_folder(mut self, limit: usize) -> Self {
        self.files_per_folder = limit;
        self
    }

    /// Sets the delete mode.
    pub fn with_delete_mode(mut self, mode: DeleteMode) -> Self {
        self.delete_mode = mode;
        self
    }

    /// Sets the end-of-run deletion gate.
    pub fn with_deletion_gate(mut self, gate: DeletionGate) -> Self {
        self.end_of_script_deletion_condition = gate;
        self
    }

    /// Caps the number of source files copied.
    pub fn with_max_files_to_copy(mut self, max: u64) -> Self {
        self.max_files_to_copy = max;
        self
    }

    /// Selects the post-distribution mode (clears the other switches).
    pub fn with_mode(mut self, mode: DistributionMode) -> Self {
        self.consolidate_to_minimum = mode == DistributionMode::ConsolidateToMinimum;
        self.rebalance_to_average = mode == DistributionMode::RebalanceToAverage;
        self.randomize_distribution = mode == DistributionMode::RandomizeDistribution;
        self
    }

    /// Sets the rebalance tolerance.
    pub fn with_tolerance(mut self, pct: f64) -> Self {
        self.rebalance_tolerance_pct = pct;
        self
    }

    /// Modes whose switch is set. Valid configs have at most one.
    pub fn selected_modes(&self) -> Vec<DistributionMode> {
        let mut modes = Vec::new();
        if self.consolidate_to_minimum {
            modes.push(DistributionMode::ConsolidateToMinimum);
        }
        if self.rebalance_to_average {
            modes.push(DistributionMode::RebalanceToAverage);
        }
        if self.randomize_distribution {
            modes.push(DistributionMode::RandomizeDistribution);
        }
        modes
    }

    /// The selected post-distribution mode, if any.
    pub fn mode(&self) -> Option<DistributionMode> {
        self.selected_modes().first().copied()
    }
}
