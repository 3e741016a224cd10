//! Destination file naming.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use super::error::PlacerError;
use super::folders::partial_path;

/// Source of candidate base names for placed files.
pub trait NameProvider: Send {
    /// Returns a candidate base name without extension.
    fn generate(&mut self) -> String;
}

/// Random alphanumeric names.
pub struct RandomNameProvider {
    rng: StdRng,
    length: usize,
}

impl RandomNameProvider {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            length: 16,
        }
    }

    /// Deterministic names for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            length: 16,
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length.max(1);
        self
    }
}

impl Default for RandomNameProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NameProvider for RandomNameProvider {
    fn generate(&mut self) -> String {
        (0..self.length)
            .map(|_| self.rng.sample(Alphanumeric) as char)
            .collect()
    }
}

/// Strips anything that is not safe in a file name.
fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

fn candidate(dir: &Path, base: &str, extension: Option<&OsStr>) -> PathBuf {
    let mut path = dir.join(base);
    if let Some(ext) = extension.filter(|e| !e.is_empty()) {
        path.set_extension(ext);
    }
    path
}

fn is_free(path: &Path) -> bool {
    !path.exists() && !partial_path(path).exists()
}

/// Finds a destination in `dir` that collides with neither a file, an
/// in-flight copy nor a path in `taken`, keeping `extension`.
///
/// Generated names are tried up to `max_attempts` times, then a UUID.
pub fn unique_destination(
    dir: &Path,
    extension: Option<&OsStr>,
    names: &mut dyn NameProvider,
    max_attempts: u32,
    taken: &HashSet<PathBuf>,
) -> Result<PathBuf, PlacerError> {
    let available = |path: &PathBuf| is_free(path) && !taken.contains(path);

    for _ in 0..max_attempts {
        let base = sanitize(&names.generate());
        if base.is_empty() {
            continue;
        }
        let path = candidate(dir, &base, extension);
        if available(&path) {
            return Ok(path);
        }
    }

    let path = candidate(dir, &Uuid::new_v4().simple().to_string(), extension);
    if available(&path) {
        return Ok(path);
    }
    Err(PlacerError::NamesExhausted {
        dir: dir.to_path_buf(),
        attempts: max_attempts + 1,
    })
}

/// Keeps the current file name in `dir` when free, otherwise generates one.
pub fn preserve_or_rename(
    file: &Path,
    dir: &Path,
    names: &mut dyn NameProvider,
    max_attempts: u32,
) -> Result<PathBuf, PlacerError> {
    if let Some(name) = file.file_name() {
        let path = dir.join(name);
        if is_free(&path) {
            return Ok(path);
        }
    }
    unique_destination(dir, file.extension(), names, max_attempts, &HashSet::new())
}
