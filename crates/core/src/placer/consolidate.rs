//! Consolidating the target into the fewest folders that fit.

use rand::seq::SliceRandom;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::folders::{list_files, FolderSet};
use super::fs_placer::FsPlacer;
use super::types::ConsolidationReport;
use crate::context::RunContext;
use crate::retry::RetryOutcome;

/// Folders needed to hold `total` files at `limit` per folder; never below one.
pub fn keepers_needed(total: usize, limit: usize) -> usize {
    if limit == 0 {
        return 1;
    }
    total.div_ceil(limit).max(1)
}

/// Picks `needed` keeper indices out of `len` folders at random.
///
/// When there are no more folders than needed, all of them are kept.
pub fn select_keepers<R: rand::Rng + ?Sized>(len: usize, needed: usize, rng: &mut R) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    if len <= needed {
        return indices;
    }
    indices.shuffle(rng);
    indices.truncate(needed);
    indices.sort_unstable();
    indices
}

fn is_empty_dir(path: &Path) -> std::io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

impl FsPlacer {
    /// Packs every file into the fewest folders that hold them at `limit`.
    ///
    /// Files from non-keeper folders and `stray` files (for instance loose in
    /// the target root) each go to the keeper with the fewest files that
    /// still has room. Emptied non-keepers are removed; a non-keeper that
    /// still holds anything is left with a warning.
    pub fn consolidate(
        &mut self,
        folders: &FolderSet,
        stray: &[PathBuf],
        limit: usize,
        ctx: &mut RunContext,
    ) -> ConsolidationReport {
        let total = folders.total_files() + stray.len();
        let needed = keepers_needed(total, limit);
        let keeper_indices = select_keepers(folders.len(), needed, self.rng());

        let mut keepers = folders.subset(&keeper_indices);
        let others: Vec<PathBuf> = (0..folders.len())
            .filter(|i| !keeper_indices.contains(i))
            .map(|i| folders.slot(i).path.clone())
            .collect();

        let mut report = ConsolidationReport {
            keepers: keepers.len(),
            ..Default::default()
        };
        info!(
            "Consolidating {} files into {} of {} folders",
            total,
            keepers.len(),
            folders.len()
        );

        if keepers.is_empty() {
            match self.create_folder(&mut keepers, limit, ctx) {
                Ok(_) => report.keepers = 1,
                Err(e) => {
                    ctx.error(format!("Cannot create a folder to consolidate into: {}", e));
                    return report;
                }
            }
        }

        let mut pending: Vec<PathBuf> = stray.to_vec();
        for dir in &others {
            match list_files(dir) {
                Ok(files) => pending.extend(files),
                Err(e) => ctx.warn(format!("Cannot list {}: {}", dir.display(), e)),
            }
        }

        for file in &pending {
            let Some(index) = keepers.least_filled() else {
                break;
            };
            match self.move_into(file, &mut keepers, index, ctx) {
                Ok(Some(_)) => report.moved += 1,
                Ok(None) => report.failed += 1,
                Err(e) => {
                    ctx.error(format!("Consolidation move of {} failed: {}", file.display(), e));
                    report.failed += 1;
                }
            }
        }

        for dir in &others {
            match is_empty_dir(dir) {
                Ok(true) => {
                    let description = format!("remove folder {}", dir.display());
                    match self
                        .executor()
                        .execute(ctx, &description, || fs::remove_dir(dir))
                    {
                        Ok(RetryOutcome::Completed(())) => report.folders_removed += 1,
                        Ok(RetryOutcome::Skipped) => {}
                        Err(e) => {
                            ctx.error(format!("Failed to remove {}: {}", dir.display(), e));
                            report.folders_left += 1;
                        }
                    }
                }
                Ok(false) => {
                    ctx.warn(format!("Leaving non-empty folder {}", dir.display()));
                    report.folders_left += 1;
                }
                Err(e) => {
                    ctx.warn(format!("Cannot inspect {}: {}", dir.display(), e));
                    report.folders_left += 1;
                }
            }
        }

        info!(
            "Consolidated {} files into {} folders; removed {} folders",
            report.moved, report.keepers, report.folders_removed
        );
        report
    }
}
