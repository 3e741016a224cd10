//! Rebalancing folder counts toward the average.

use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

use super::folders::{list_files, FolderSet};
use super::fs_placer::FsPlacer;
use super::types::{RebalanceOutcome, RebalanceReport};
use crate::context::RunContext;

/// Slack for float rounding when deriving integer bounds.
const EPSILON: f64 = 1e-9;

/// A single planned file move between slot indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedMove {
    pub from: usize,
    pub to: usize,
}

/// Moves that bring donors down and receivers up.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalancePlan {
    pub outcome: RebalanceOutcome,
    pub average: f64,
    pub lower: usize,
    pub upper: usize,
    pub moves: Vec<PlannedMove>,
}

/// Integer band `[floor(avg*(1-t)), ceil(avg*(1+t))]` for `tolerance_pct` percent.
pub fn tolerance_bounds(average: f64, tolerance_pct: f64) -> (usize, usize) {
    let t = tolerance_pct / 100.0;
    let lower = (average * (1.0 - t) + EPSILON).floor().max(0.0) as usize;
    let upper = (average * (1.0 + t) - EPSILON).ceil().max(0.0) as usize;
    (lower, upper)
}

/// Plans moves from folders above the band to folders below it.
///
/// The number of moves is `min(total surplus, total deficit)`. Donors are
/// drained largest surplus first; each file goes to the receiver with the
/// largest remaining deficit, ties to the lower index.
pub fn plan_rebalance(counts: &[usize], tolerance_pct: f64) -> RebalancePlan {
    if counts.is_empty() {
        return RebalancePlan {
            outcome: RebalanceOutcome::AlreadyBalanced,
            average: 0.0,
            lower: 0,
            upper: 0,
            moves: Vec::new(),
        };
    }

    let total: usize = counts.iter().sum();
    let average = total as f64 / counts.len() as f64;
    let (lower, upper) = tolerance_bounds(average, tolerance_pct);

    let mut donors: Vec<(usize, usize)> = counts
        .iter()
        .enumerate()
        .filter(|(_, &c)| c > upper)
        .map(|(i, &c)| (i, c - upper))
        .collect();
    let mut receivers: Vec<(usize, usize)> = counts
        .iter()
        .enumerate()
        .filter(|(_, &c)| c < lower)
        .map(|(i, &c)| (i, lower - c))
        .collect();

    let outcome = match (donors.is_empty(), receivers.is_empty()) {
        (true, true) => RebalanceOutcome::AlreadyBalanced,
        (false, true) => RebalanceOutcome::NoReceivers,
        (true, false) => RebalanceOutcome::NoDonors,
        (false, false) => RebalanceOutcome::Planned,
    };
    let mut plan = RebalancePlan {
        outcome,
        average,
        lower,
        upper,
        moves: Vec::new(),
    };
    if outcome != RebalanceOutcome::Planned {
        return plan;
    }

    let surplus: usize = donors.iter().map(|(_, s)| s).sum();
    let deficit: usize = receivers.iter().map(|(_, d)| d).sum();
    let mut remaining = surplus.min(deficit);

    donors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    'donors: for (from, surplus) in donors {
        for _ in 0..surplus {
            if remaining == 0 {
                break 'donors;
            }
            let Some(receiver) = receivers
                .iter_mut()
                .filter(|(_, d)| *d > 0)
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            else {
                break 'donors;
            };
            receiver.1 -= 1;
            plan.moves.push(PlannedMove {
                from,
                to: receiver.0,
            });
            remaining -= 1;
        }
    }

    let mut projected = counts.to_vec();
    for mv in &plan.moves {
        projected[mv.from] -= 1;
        projected[mv.to] += 1;
    }
    if projected.iter().any(|&c| c < lower || c > upper) {
        plan.outcome = RebalanceOutcome::PartiallyBalanced;
    }

    plan
}

impl FsPlacer {
    /// Evens out folder counts within `tolerance_pct` of the average.
    ///
    /// Files leave each donor in random order and keep their names unless
    /// the receiver already has one.
    pub fn rebalance(
        &mut self,
        folders: &mut FolderSet,
        tolerance_pct: f64,
        ctx: &mut RunContext,
    ) -> RebalanceReport {
        let plan = plan_rebalance(&folders.counts(), tolerance_pct);
        let mut report = RebalanceReport {
            outcome: plan.outcome,
            lower: plan.lower,
            upper: plan.upper,
            planned: plan.moves.len(),
            moved: 0,
            failed: 0,
        };

        match plan.outcome {
            RebalanceOutcome::Planned | RebalanceOutcome::PartiallyBalanced => {}
            RebalanceOutcome::AlreadyBalanced => {
                info!(
                    "Folders already within [{}, {}] around {:.1}",
                    plan.lower, plan.upper, plan.average
                );
                return report;
            }
            RebalanceOutcome::NoReceivers | RebalanceOutcome::NoDonors => {
                info!(
                    "Nothing to rebalance ({:?}) within [{}, {}]",
                    plan.outcome, plan.lower, plan.upper
                );
                return report;
            }
        }

        let mut pools: HashMap<usize, Vec<PathBuf>> = HashMap::new();
        for mv in &plan.moves {
            if !pools.contains_key(&mv.from) {
                let dir = folders.slot(mv.from).path.clone();
                let mut files = match list_files(&dir) {
                    Ok(files) => files,
                    Err(e) => {
                        ctx.warn(format!("Cannot list {}: {}", dir.display(), e));
                        Vec::new()
                    }
                };
                files.shuffle(self.rng());
                pools.insert(mv.from, files);
            }
            let Some(file) = pools.get_mut(&mv.from).and_then(|p| p.pop()) else {
                report.failed += 1;
                continue;
            };

            match self.move_into(&file, folders, mv.to, ctx) {
                Ok(Some(_)) => report.moved += 1,
                Ok(None) => report.failed += 1,
                Err(e) => {
                    ctx.error(format!("Rebalance move of {} failed: {}", file.display(), e));
                    report.failed += 1;
                }
            }
        }

        info!(
            "Rebalanced {}/{} files into [{}, {}]",
            report.moved, report.planned, report.lower, report.upper
        );
        if plan.outcome == RebalanceOutcome::PartiallyBalanced {
            let outside = folders
                .counts()
                .into_iter()
                .filter(|&c| c < plan.lower || c > plan.upper)
                .count();
            ctx.warn(format!(
                "Rebalance band [{}, {}] is unreachable: {} folders remain outside it",
                plan.lower, plan.upper, outside
            ));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placer::{PlacerConfig, RandomNameProvider};
    use crate::retry::{RetryConfig, RetryExecutor};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;
    use tempfile::TempDir;

    fn apply(counts: &[usize], plan: &RebalancePlan) -> Vec<usize> {
        let mut after = counts.to_vec();
        for mv in &plan.moves {
            after[mv.from] -= 1;
            after[mv.to] += 1;
        }
        after
    }

    #[test]
    fn test_bounds_are_exact_for_round_numbers() {
        assert_eq!(tolerance_bounds(100.0, 10.0), (90, 110));
        assert_eq!(tolerance_bounds(17.5, 10.0), (15, 20));
        assert_eq!(tolerance_bounds(5.0, 0.0), (5, 5));
    }

    #[test]
    fn test_already_balanced() {
        let plan = plan_rebalance(&[100, 95, 105], 10.0);
        assert_eq!(plan.outcome, RebalanceOutcome::AlreadyBalanced);
        assert!(plan.moves.is_empty());
    }

    #[test]
    fn test_no_receivers() {
        // avg 20, band [18, 22]: one donor, nobody below 18
        let plan = plan_rebalance(&[25, 18, 19, 18], 10.0);
        assert_eq!(plan.outcome, RebalanceOutcome::NoReceivers);
        assert!(plan.moves.is_empty());
    }

    #[test]
    fn test_no_donors() {
        // avg 20, band [18, 22]: one receiver, nobody above 22
        let plan = plan_rebalance(&[22, 22, 21, 15], 10.0);
        assert_eq!(plan.outcome, RebalanceOutcome::NoDonors);
    }

    #[test]
    fn test_plan_brings_folders_into_band() {
        let counts = [30, 10, 20, 20];
        let plan = plan_rebalance(&counts, 10.0);
        assert_eq!(plan.outcome, RebalanceOutcome::Planned);
        assert_eq!((plan.lower, plan.upper), (18, 22));
        assert_eq!(plan.moves.len(), 8);
        assert!(plan.moves.iter().all(|m| m.from == 0 && m.to == 1));

        let after = apply(&counts, &plan);
        assert_eq!(after, vec![22, 18, 20, 20]);
        assert_eq!(after.iter().sum::<usize>(), 80);
    }

    #[test]
    fn test_moves_capped_by_smaller_side() {
        // avg 17.5, band [15, 20]: surplus 20, deficit 15
        let counts = [40, 10, 10, 10];
        let plan = plan_rebalance(&counts, 10.0);
        assert_eq!(plan.outcome, RebalanceOutcome::PartiallyBalanced);
        assert_eq!(plan.moves.len(), 15);
        assert_eq!(apply(&counts, &plan), vec![25, 15, 15, 15]);
    }

    #[test]
    fn test_receivers_filled_largest_deficit_first() {
        // avg 20, band [18, 22]
        let counts = [30, 12, 16, 22];
        let plan = plan_rebalance(&counts, 10.0);
        assert_eq!(plan.outcome, RebalanceOutcome::Planned);
        assert_eq!(plan.moves[0].to, 1);
        assert_eq!(apply(&counts, &plan), vec![22, 18, 18, 22]);
    }

    #[test]
    fn test_rebalance_moves_files_on_disk() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("target");
        for (folder, n) in [("1", 12), ("2", 2), ("3", 4)] {
            let dir = root.join(folder);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..n {
                fs::write(dir.join(format!("f{}.txt", i)), "x").unwrap();
            }
        }

        let mut ctx = RunContext::new("s");
        let mut placer = FsPlacer::new(
            PlacerConfig::default(),
            RetryExecutor::new(RetryConfig::immediate(2)),
        )
        .with_rng(StdRng::seed_from_u64(3))
        .with_name_provider(Box::new(RandomNameProvider::seeded(3)));
        let candidates: Vec<_> = ["1", "2", "3"].iter().map(|n| root.join(n)).collect();
        let mut folders = placer
            .prepare_folders(&root, &candidates, 100, &mut ctx)
            .unwrap();

        // avg 6, band [5, 7]: surplus 5 but deficit 4, so folder 1 stays at 8
        let report = placer.rebalance(&mut folders, 10.0, &mut ctx);
        assert_eq!(report.outcome, RebalanceOutcome::PartiallyBalanced);
        assert_eq!(report.moved, 4);
        assert_eq!(folders.counts(), vec![8, 5, 5]);
        for (i, slot) in folders.slots().iter().enumerate() {
            assert_eq!(list_files(&slot.path).unwrap().len(), folders.counts()[i]);
        }
        assert_eq!(ctx.current_errors(), 0);
        assert_eq!(ctx.current_warnings(), 1);
    }

    #[test]
    fn test_reachable_band_does_not_warn() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("target");
        for (folder, n) in [("1", 9), ("2", 1)] {
            let dir = root.join(folder);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..n {
                fs::write(dir.join(format!("f{}.txt", i)), "x").unwrap();
            }
        }

        let mut ctx = RunContext::new("s");
        let mut placer = FsPlacer::new(
            PlacerConfig::default(),
            RetryExecutor::new(RetryConfig::immediate(2)),
        )
        .with_rng(StdRng::seed_from_u64(4));
        let candidates: Vec<_> = ["1", "2"].iter().map(|n| root.join(n)).collect();
        let mut folders = placer
            .prepare_folders(&root, &candidates, 100, &mut ctx)
            .unwrap();

        // avg 5, band [5, 5]
        let report = placer.rebalance(&mut folders, 0.0, &mut ctx);
        assert_eq!(report.outcome, RebalanceOutcome::Planned);
        assert_eq!(folders.counts(), vec![5, 5]);
        assert_eq!(ctx.current_warnings(), 0);
    }
}
