//! File system placer implementation.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use super::config::PlacerConfig;
use super::error::PlacerError;
use super::folders::{count_files, next_folder_name, partial_path, FolderSet, FolderSlot};
use super::naming::{preserve_or_rename, unique_destination, NameProvider, RandomNameProvider};
use super::types::{CopyPlan, Disposal, PlacementReport, PlannedCopy};
use crate::context::RunContext;
use crate::retry::{RetryExecutor, RetryOutcome};

/// Places files into a [`FolderSet`] by weighted random choice.
///
/// Every mutating file system call goes through the [`RetryExecutor`], so a
/// locked file is retried and a vanished one is logged and skipped.
pub struct FsPlacer {
    config: PlacerConfig,
    executor: RetryExecutor,
    names: Box<dyn NameProvider>,
    rng: StdRng,
}

impl FsPlacer {
    /// Creates a placer seeded from the OS.
    pub fn new(config: PlacerConfig, executor: RetryExecutor) -> Self {
        Self {
            config,
            executor,
            names: Box::new(RandomNameProvider::new()),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Replaces the folder-choice RNG.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Replaces the destination name source.
    pub fn with_name_provider(mut self, names: Box<dyn NameProvider>) -> Self {
        self.names = names;
        self
    }

    pub fn config(&self) -> &PlacerConfig {
        &self.config
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Builds the folder set for `root` from `candidates`.
    ///
    /// Candidates are created when missing, canonicalized and deduplicated.
    /// Anything that resolves outside `root`, or to `root` itself, is dropped
    /// with a warning. Each kept folder is counted once here; callers update
    /// the counts as they place files.
    pub fn prepare_folders(
        &mut self,
        root: &Path,
        candidates: &[PathBuf],
        capacity: usize,
        ctx: &mut RunContext,
    ) -> Result<FolderSet, PlacerError> {
        let canonical_root = fs::canonicalize(root).map_err(|source| PlacerError::InvalidRoot {
            path: root.to_path_buf(),
            source,
        })?;
        let mut folders = FolderSet::new(canonical_root);
        let mut seen = HashSet::new();

        for candidate in candidates {
            if !candidate.is_dir() {
                let description = format!("create folder {}", candidate.display());
                if let Err(e) = self
                    .executor
                    .execute(ctx, &description, || fs::create_dir_all(candidate))
                {
                    ctx.error(format!("Dropping target folder {}: {}", candidate.display(), e));
                    continue;
                }
            }

            let path = match fs::canonicalize(candidate) {
                Ok(path) => path,
                Err(e) => {
                    ctx.warn(format!(
                        "Dropping target folder {}: {}",
                        candidate.display(),
                        e
                    ));
                    continue;
                }
            };
            if !folders.is_under_root(&path) {
                ctx.warn(format!(
                    "Dropping target folder {}: not under {}",
                    path.display(),
                    folders.root().display()
                ));
                continue;
            }
            if !seen.insert(path.clone()) {
                continue;
            }

            let count = match count_files(&path) {
                Ok(count) => count,
                Err(e) => {
                    ctx.warn(format!("Cannot count files in {}: {}", path.display(), e));
                    0
                }
            };
            folders.push(FolderSlot {
                path,
                count,
                capacity,
            });
        }

        debug!(
            "Prepared {} target folders under {}",
            folders.len(),
            folders.root().display()
        );
        Ok(folders)
    }

    /// Creates the next numbered folder under the root and adds it to the set.
    pub fn create_folder(
        &mut self,
        folders: &mut FolderSet,
        capacity: usize,
        ctx: &mut RunContext,
    ) -> Result<usize, PlacerError> {
        let name = next_folder_name(folders.root())?;
        let path = folders.root().join(name);
        let description = format!("create folder {}", path.display());
        self.executor
            .execute(ctx, &description, || fs::create_dir(&path))
            .map_err(|source| PlacerError::EmergencyFolderFailed {
                root: folders.root().to_path_buf(),
                source,
            })?;
        debug!("Created target folder {}", path.display());
        Ok(folders.push(FolderSlot {
            path,
            count: 0,
            capacity,
        }))
    }

    /// Whether slot `index` can receive a file right now.
    fn usable(&self, folders: &FolderSet, index: usize, ctx: &mut RunContext) -> bool {
        let path = &folders.slot(index).path;
        if !folders.is_under_root(path) {
            return false;
        }
        if path.is_dir() {
            return true;
        }
        let description = format!("recreate folder {}", path.display());
        matches!(
            self.executor
                .execute(ctx, &description, || fs::create_dir_all(path)),
            Ok(RetryOutcome::Completed(()))
        )
    }

    /// Chooses a destination folder.
    ///
    /// Weighted pick among folders below capacity; if the pick is unusable,
    /// any other usable folder; if none, a freshly created emergency folder.
    pub fn choose_destination(
        &mut self,
        folders: &mut FolderSet,
        ctx: &mut RunContext,
    ) -> Result<usize, PlacerError> {
        if !folders.is_empty() {
            let eligible = folders.eligible();
            if let Some(index) = folders.pick_weighted(&eligible, &mut self.rng) {
                if self.usable(folders, index, ctx) {
                    return Ok(index);
                }
                let mut others: Vec<usize> = (0..folders.len()).filter(|&i| i != index).collect();
                others.shuffle(&mut self.rng);
                for other in others {
                    if self.usable(folders, other, ctx) {
                        return Ok(other);
                    }
                }
            }
        }

        ctx.warn(format!(
            "No usable target folder under {}; creating an emergency folder",
            folders.root().display()
        ));
        let capacity = folders.slots().first().map(|s| s.capacity).unwrap_or(usize::MAX);
        self.create_folder(folders, capacity, ctx)
    }

    /// Chooses a destination for each of `files`, in random order.
    ///
    /// Each chosen destination is counted against its folder right away, so
    /// a plan can be persisted before any byte is copied.
    pub fn plan(
        &mut self,
        files: &[PathBuf],
        folders: &mut FolderSet,
        ctx: &mut RunContext,
    ) -> CopyPlan {
        let mut order = files.to_vec();
        order.shuffle(&mut self.rng);

        let mut plan = CopyPlan::default();
        let mut taken = HashSet::new();
        for file in order {
            let destination = self.choose_destination(folders, ctx).and_then(|index| {
                let dir = folders.slot(index).path.clone();
                let dest = unique_destination(
                    &dir,
                    file.extension(),
                    self.names.as_mut(),
                    self.config.max_name_attempts,
                    &taken,
                )?;
                folders.record_added(index);
                Ok(dest)
            });
            match destination {
                Ok(destination) => {
                    taken.insert(destination.clone());
                    plan.copies.push(PlannedCopy {
                        source: file,
                        destination,
                    });
                }
                Err(e) => {
                    ctx.error(format!("No destination for {}: {}", file.display(), e));
                    plan.unassigned += 1;
                }
            }
        }
        plan
    }

    /// Counts the not yet written destinations of a persisted plan.
    ///
    /// Copies whose folder is no longer in the set are dropped; their sources
    /// are planned again with the remaining files.
    pub fn reserve(&self, copies: Vec<PlannedCopy>, folders: &mut FolderSet) -> Vec<PlannedCopy> {
        copies
            .into_iter()
            .filter(|copy| {
                let Some(index) = copy.destination.parent().and_then(|p| folders.index_of(p))
                else {
                    debug!(
                        "Replanning {}: {} is gone",
                        copy.source.display(),
                        copy.destination.display()
                    );
                    return false;
                };
                if !copy.destination.is_file() {
                    folders.record_added(index);
                }
                true
            })
            .collect()
    }

    /// Carries out planned copies and disposes of each source.
    ///
    /// A destination that already holds a complete copy of its source (left
    /// by an interrupted batch) is not copied again; only the disposal runs.
    pub fn execute_plan(
        &mut self,
        copies: &[PlannedCopy],
        folders: &mut FolderSet,
        disposal: &mut Disposal<'_>,
        ctx: &mut RunContext,
    ) -> PlacementReport {
        let start = Instant::now();
        let mut report = PlacementReport {
            requested: copies.len(),
            ..Default::default()
        };

        for (done, copy) in copies.iter().enumerate() {
            let PlannedCopy {
                source,
                destination,
            } = copy;
            let index = destination.parent().and_then(|p| folders.index_of(p));

            if let Some(bytes) = completed_copy(source, destination) {
                report.placed += 1;
                debug!("{} already copied to {}", source.display(), destination.display());
                if bytes.is_some() && !self.dispose(source, disposal, ctx) {
                    report.dispose_failed += 1;
                }
                continue;
            }
            let reserved = !destination.exists();

            match self.copy_to(source, destination, ctx) {
                Ok(Some(bytes)) => {
                    report.placed += 1;
                    report.bytes += bytes;
                    debug!("Copied {} -> {}", source.display(), destination.display());
                    if !self.dispose(source, disposal, ctx) {
                        report.dispose_failed += 1;
                    }
                }
                Ok(None) => {
                    report.skipped += 1;
                    release(folders, index, reserved);
                }
                Err(e) => {
                    ctx.error(format!("Copy of {} failed: {}", source.display(), e));
                    report.failed += 1;
                    release(folders, index, reserved);
                }
            }

            self.log_progress("Copied", done + 1, copies.len());
        }

        info!(
            "Copied {}/{} files ({} bytes) in {:?}",
            report.placed,
            report.requested,
            report.bytes,
            start.elapsed()
        );
        report
    }

    /// Moves files already in the target tree into `folders`.
    pub fn relocate(
        &mut self,
        files: &[PathBuf],
        folders: &mut FolderSet,
        ctx: &mut RunContext,
    ) -> PlacementReport {
        let mut report = PlacementReport {
            requested: files.len(),
            ..Default::default()
        };

        for (done, file) in files.iter().enumerate() {
            let outcome = self
                .choose_destination(folders, ctx)
                .and_then(|index| self.move_into(file, folders, index, ctx));
            match outcome {
                Ok(Some(_)) => report.placed += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    ctx.error(format!("Move of {} failed: {}", file.display(), e));
                    report.failed += 1;
                }
            }
            self.log_progress("Moved", done + 1, files.len());
        }

        report
    }

    /// Moves one file into slot `index`, keeping its name unless it collides.
    ///
    /// Counts are updated for the destination and, when the file came from a
    /// folder in the set, for its source. Returns `None` if the file vanished.
    pub fn move_into(
        &mut self,
        file: &Path,
        folders: &mut FolderSet,
        index: usize,
        ctx: &mut RunContext,
    ) -> Result<Option<PathBuf>, PlacerError> {
        let dir = folders.slot(index).path.clone();
        let origin = file.parent().and_then(|p| folders.index_of(p));
        if origin == Some(index) {
            return Ok(Some(file.to_path_buf()));
        }

        let dest = preserve_or_rename(
            file,
            &dir,
            self.names.as_mut(),
            self.config.max_name_attempts,
        )?;
        let description = format!("move {}", file.display());
        match self
            .executor
            .execute(ctx, &description, || fs::rename(file, &dest))?
        {
            RetryOutcome::Completed(()) => {
                folders.record_added(index);
                if let Some(origin) = origin {
                    folders.record_removed(origin);
                }
                debug!("Moved {} -> {}", file.display(), dest.display());
                Ok(Some(dest))
            }
            RetryOutcome::Skipped => Ok(None),
        }
    }

    /// Copies `src` to `dest` via a partial file next to it.
    ///
    /// Returns the byte count, or `None` if the source vanished. The partial
    /// file is removed on every failure path.
    fn copy_to(
        &mut self,
        src: &Path,
        dest: &Path,
        ctx: &mut RunContext,
    ) -> Result<Option<u64>, PlacerError> {
        let partial = partial_path(dest);

        let description = format!("copy {}", src.display());
        let bytes = match self
            .executor
            .execute(ctx, &description, || fs::copy(src, &partial))
        {
            Ok(RetryOutcome::Completed(bytes)) => bytes,
            Ok(RetryOutcome::Skipped) => {
                discard(&partial);
                return Ok(None);
            }
            Err(e) => {
                discard(&partial);
                return Err(e.into());
            }
        };

        if let Err(e) = self.verify(src, &partial, bytes) {
            discard(&partial);
            return Err(e);
        }

        let description = format!("finalize {}", dest.display());
        match self
            .executor
            .execute(ctx, &description, || fs::rename(&partial, dest))
        {
            Ok(RetryOutcome::Completed(())) => Ok(Some(bytes)),
            Ok(RetryOutcome::Skipped) => Ok(None),
            Err(e) => {
                discard(&partial);
                Err(e.into())
            }
        }
    }

    /// Checks the partial copy against its source.
    fn verify(&self, src: &Path, partial: &Path, copied: u64) -> Result<(), PlacerError> {
        let expected = fs::metadata(src)?.len();
        let actual = fs::metadata(partial)?.len();
        if copied != expected || actual != expected {
            return Err(PlacerError::SizeMismatch {
                path: src.to_path_buf(),
                expected,
                actual,
            });
        }

        if self.config.verify_checksums {
            let expected = self.file_digest(src)?;
            let actual = self.file_digest(partial)?;
            if expected != actual {
                return Err(PlacerError::ChecksumMismatch {
                    path: src.to_path_buf(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// SHA-256 of a file as lowercase hex.
    fn file_digest(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.config.buffer_size.clamp(4096, 8 * 1024 * 1024)];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Applies `disposal` to a source whose copy is in place. Returns false on failure.
    fn dispose(&self, src: &Path, disposal: &mut Disposal<'_>, ctx: &mut RunContext) -> bool {
        let result = match disposal {
            Disposal::Recycle => {
                let description = format!("recycle {}", src.display());
                self.executor
                    .execute(ctx, &description, || recycle(src))
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            Disposal::Delete => {
                let description = format!("delete {}", src.display());
                self.executor
                    .execute(ctx, &description, || fs::remove_file(src))
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            Disposal::Defer(queue) => {
                if queue.contains(src) {
                    return true;
                }
                queue.enqueue(src).map_err(|e| e.to_string())
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                ctx.error(format!("Failed to dispose of {}: {}", src.display(), e));
                false
            }
        }
    }

    fn log_progress(&self, verb: &str, done: usize, total: usize) {
        let interval = self.config.progress_interval;
        if interval > 0 && done % interval == 0 && done < total {
            info!("{} {}/{} files", verb, done, total);
        }
    }
}

/// Moves a file to the platform recycle bin.
fn recycle(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        ));
    }
    trash::delete(path).map_err(|e| io::Error::other(format!("trash error: {}", e)))
}

/// Whether `dest` already holds the copy of `src`.
///
/// `Some(None)` means the source is gone too (disposed before the
/// interruption), `Some(Some(len))` that it is still there with the same
/// length. `None` means the copy still has to be made.
fn completed_copy(src: &Path, dest: &Path) -> Option<Option<u64>> {
    let copied = fs::metadata(dest).ok().filter(|m| m.is_file())?;
    match fs::metadata(src) {
        Ok(meta) if meta.len() == copied.len() => Some(Some(meta.len())),
        Ok(_) => None,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Some(None),
        Err(_) => None,
    }
}

/// Gives back a slot reservation for a copy that did not happen.
fn release(folders: &mut FolderSet, index: Option<usize>, reserved: bool) {
    if let (Some(index), true) = (index, reserved) {
        folders.record_removed(index);
    }
}

/// Best-effort removal of a leftover partial copy.
fn discard(partial: &Path) {
    if partial.exists() {
        if let Err(e) = fs::remove_file(partial) {
            debug!("Could not remove {}: {}", partial.display(), e);
        }
    }
}
