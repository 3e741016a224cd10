use std::path::{Component, Path, PathBuf};

use super::{types::Config, ConfigError};

/// Lexically normalized absolute form of `path`, resolving symlinks where it exists.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Validate configuration
/// Currently validates:
/// - Both roots are set; source and target differ and neither contains the other
/// - files_per_folder is not 0
/// - rebalance_tolerance_pct is in [0, 100)
/// - At most one of consolidate/rebalance/randomize is selected
/// - The state file lives outside both roots
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let run = &config.distribution;

    if run.source_folder.as_os_str().is_empty() || run.target_folder.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "source_folder and target_folder must be set".to_string(),
        ));
    }

    if run.files_per_folder == 0 {
        return Err(ConfigError::ValidationError(
            "files_per_folder cannot be 0".to_string(),
        ));
    }

    let tolerance = run.rebalance_tolerance_pct;
    if !(0.0..100.0).contains(&tolerance) {
        return Err(ConfigError::ValidationError(format!(
            "rebalance_tolerance_pct must be in [0, 100), got {}",
            tolerance
        )));
    }

    let modes = run.selected_modes();
    if modes.len() > 1 {
        return Err(ConfigError::ValidationError(format!(
            "only one of consolidate_to_minimum, rebalance_to_average, randomize_distribution may be set (got {:?})",
            modes
        )));
    }

    let source = resolve(&run.source_folder);
    let target = resolve(&run.target_folder);
    if source == target {
        return Err(ConfigError::ValidationError(
            "source_folder and target_folder are the same".to_string(),
        ));
    }
    if target.starts_with(&source) || source.starts_with(&target) {
        return Err(ConfigError::ValidationError(format!(
            "source_folder {} and target_folder {} are nested",
            source.display(),
            target.display()
        )));
    }

    let state = resolve(&config.state.path);
    if state.starts_with(&source) || state.starts_with(&target) {
        return Err(ConfigError::ValidationError(format!(
            "state.path {} must be outside source_folder and target_folder",
            state.display()
        )));
    }

    Ok(())
}
