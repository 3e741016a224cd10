//! Shuffling every target file across the existing folders.

use rand::seq::SliceRandom;
use std::path::PathBuf;
use tracing::info;

use super::folders::{list_files, FolderSet};
use super::fs_placer::FsPlacer;
use super::types::RandomizeReport;
use crate::context::RunContext;

/// Round-robin folder index for each of `files` shuffled files.
///
/// Every folder ends up with `files / folders` or one more.
pub fn round_robin(files: usize, folders: usize) -> Vec<usize> {
    if folders == 0 {
        return Vec::new();
    }
    (0..files).map(|i| i % folders).collect()
}

impl FsPlacer {
    /// Redistributes all files in `folders` uniformly at random.
    ///
    /// Files already assigned to their own folder stay where they are.
    pub fn randomize(&mut self, folders: &mut FolderSet, ctx: &mut RunContext) -> RandomizeReport {
        let mut all: Vec<(PathBuf, usize)> = Vec::new();
        for index in 0..folders.len() {
            let dir = folders.slot(index).path.clone();
            match list_files(&dir) {
                Ok(files) => all.extend(files.into_iter().map(|f| (f, index))),
                Err(e) => ctx.warn(format!("Cannot list {}: {}", dir.display(), e)),
            }
        }
        all.shuffle(self.rng());

        let assignment = round_robin(all.len(), folders.len());
        let mut report = RandomizeReport {
            total: all.len(),
            ..Default::default()
        };

        for ((file, current), dest) in all.iter().zip(assignment) {
            if *current == dest {
                report.unchanged += 1;
                continue;
            }
            match self.move_into(file, folders, dest, ctx) {
                Ok(Some(_)) => report.moved += 1,
                Ok(None) => report.failed += 1,
                Err(e) => {
                    ctx.error(format!("Randomize move of {} failed: {}", file.display(), e));
                    report.failed += 1;
                }
            }
        }

        info!(
            "Randomized {} files across {} folders ({} moved)",
            report.total,
            folders.len(),
            report.moved
        );
        report
    }
}
