use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

use super::{types::Config, ConfigError};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "FANOUT_CONFIG";

/// Config file used when `FANOUT_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "fanout.toml";

/// Resolve the config file path from the environment
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from file with environment variable overrides
///
/// `FANOUT_FILES_PER_FOLDER=500` overrides a top-level key,
/// `FANOUT_STATE__PATH=...` a nested one.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(
            Env::prefixed("FANOUT_")
                .ignore(&["CONFIG", "LOG_FORMAT"])
                .split("__"),
        )
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
source_folder = "/in"
target_folder = "/out"
files_per_folder = 9000
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.distribution.files_per_folder, 9000);
    }

    #[test]
    fn test_load_config_from_str_bad_mode() {
        let toml = r#"
source_folder = "/in"
target_folder = "/out"
delete_mode = "Shred"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/fanout.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
source_folder = "/in"
target_folder = "/out"

[placer]
progress_interval = 10
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.distribution.target_folder, Path::new("/out"));
        assert_eq!(config.placer.progress_interval, 10);
    }
}
