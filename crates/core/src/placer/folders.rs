//! Target subfolder bookkeeping.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;

/// Suffix of in-flight copies. Files carrying it are never counted.
pub const PARTIAL_SUFFIX: &str = ".fanout-partial";

/// Whether `path` names an in-flight copy.
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n.ends_with(PARTIAL_SUFFIX))
        .unwrap_or(false)
}

/// In-flight sibling of `dest`: `dir/.{name}.fanout-partial`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}{}", name, PARTIAL_SUFFIX))
}

/// Regular files directly inside `dir`, excluding partial copies, sorted.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let path = entry.path();
            if !is_partial(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Number of regular files directly inside `dir`.
pub fn count_files(dir: &Path) -> io::Result<usize> {
    Ok(list_files(dir)?.len())
}

/// Immediate subdirectories of `root`, numbered names first in numeric order.
pub fn list_subfolders(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort_by(|a, b| folder_order(a, b));
    Ok(dirs)
}

fn folder_number(path: &Path) -> Option<u64> {
    path.file_name()?.to_str()?.parse().ok()
}

fn folder_order(a: &Path, b: &Path) -> Ordering {
    match (folder_number(a), folder_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Next unused integer folder name under `root`.
pub fn next_folder_name(root: &Path) -> io::Result<String> {
    let mut highest = 0u64;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if let Some(n) = folder_number(&entry.path()) {
            highest = highest.max(n);
        }
    }
    Ok((highest + 1).to_string())
}

/// A target subfolder with its running file count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSlot {
    pub path: PathBuf,
    pub count: usize,
    pub capacity: usize,
}

impl FolderSlot {
    /// Free places before the folder reaches its capacity.
    pub fn headroom(&self) -> usize {
        self.capacity.saturating_sub(self.count)
    }

    /// Whether the folder can take another file without exceeding capacity.
    pub fn has_room(&self) -> bool {
        self.count < self.capacity
    }

    /// Selection weight; never zero so full folders stay selectable as a last resort.
    pub fn weight(&self) -> u64 {
        self.headroom().max(1) as u64
    }
}

/// Validated, canonical target subfolders under one root.
///
/// Slots are addressed by index; counts are updated by the caller after
/// each successful placement or move so they stay in step with the disk.
#[derive(Debug, Clone)]
pub struct FolderSet {
    root: PathBuf,
    slots: Vec<FolderSlot>,
}

impl FolderSet {
    /// Creates an empty set under a canonical `root`.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            slots: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slots(&self) -> &[FolderSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> &FolderSlot {
        &self.slots[index]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether `path` is a proper descendant of the root.
    pub fn is_under_root(&self, path: &Path) -> bool {
        path != self.root && path.starts_with(&self.root)
    }

    /// Adds a slot unless its path is already present. Returns its index.
    pub fn push(&mut self, slot: FolderSlot) -> usize {
        if let Some(index) = self.index_of(&slot.path) {
            return index;
        }
        self.slots.push(slot);
        self.slots.len() - 1
    }

    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.slots.iter().position(|s| s.path == path)
    }

    pub fn counts(&self) -> Vec<usize> {
        self.slots.iter().map(|s| s.count).collect()
    }

    pub fn total_files(&self) -> usize {
        self.slots.iter().map(|s| s.count).sum()
    }

    pub fn record_added(&mut self, index: usize) {
        self.slots[index].count += 1;
    }

    pub fn record_removed(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.count = slot.count.saturating_sub(1);
    }

    /// Indices of folders below capacity; every folder when none are.
    pub fn eligible(&self) -> Vec<usize> {
        let open: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i].has_room())
            .collect();
        if open.is_empty() {
            (0..self.slots.len()).collect()
        } else {
            open
        }
    }

    /// Index of the open folder with the fewest files, ties to the lowest index.
    pub fn least_filled(&self) -> Option<usize> {
        let candidates = self.eligible();
        candidates
            .into_iter()
            .min_by_key(|&i| (self.slots[i].count, i))
    }

    /// Picks one of `candidates` with probability proportional to its weight.
    pub fn pick_weighted<R: Rng + ?Sized>(&self, candidates: &[usize], rng: &mut R) -> Option<usize> {
        let total: u64 = candidates.iter().map(|&i| self.slots[i].weight()).sum();
        if total == 0 {
            return None;
        }
        let mut ticket = rng.random_range(0..total);
        for &i in candidates {
            let weight = self.slots[i].weight();
            if ticket < weight {
                return Some(i);
            }
            ticket -= weight;
        }
        candidates.last().copied()
    }

    /// A new set holding only the slots at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> FolderSet {
        FolderSet {
            root: self.root.clone(),
            slots: indices.iter().map(|&i| self.slots[i].clone()).collect(),
        }
    }
}
