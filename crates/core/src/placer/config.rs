//! Configuration for the placer module.

use serde::{Deserialize, Serialize};

/// Configuration for the file system placer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacerConfig {
    /// Log progress every this many files.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,

    /// Whether to compare SHA-256 of source and copy before accepting it.
    #[serde(default)]
    pub verify_checksums: bool,

    /// Files copied between intermediate checkpoint saves.
    #[serde(default = "default_batch_size")]
    pub checkpoint_batch_size: usize,

    /// Generated names tried before falling back to a UUID.
    #[serde(default = "default_name_attempts")]
    pub max_name_attempts: u32,

    /// Buffer size for checksum reads in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_progress_interval() -> usize {
    1000
}

fn default_batch_size() -> usize {
    500
}

fn default_name_attempts() -> u32 {
    100
}

fn default_buffer_size() -> usize {
    8 * 1024 * 1024 // 8 MB
}

impl Default for PlacerConfig {
    fn default() -> Self {
        Self {
            progress_interval: default_progress_interval(),
            verify_checksums: false,
            checkpoint_batch_size: default_batch_size(),
            max_name_attempts: default_name_attempts(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl PlacerConfig {
    /// Enables checksum verification.
    pub fn with_checksum_verification(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    /// Sets the progress interval.
    pub fn with_progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the checkpoint batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.checkpoint_batch_size = size;
        self
    }

    /// Sets the buffer size for checksum reads.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlacerConfig::default();
        assert_eq!(config.progress_interval, 1000);
        assert!(!config.verify_checksums);
        assert_eq!(config.checkpoint_batch_size, 500);
        assert_eq!(config.buffer_size, 8 * 1024 * 1024);
    }

    #[test]
    fn test_config_builder() {
        let config = PlacerConfig::default()
            .with_checksum_verification(true)
            .with_progress_interval(10)
            .with_batch_size(25)
            .with_buffer_size(1024);

        assert!(config.verify_checksums);
        assert_eq!(config.progress_interval, 10);
        assert_eq!(config.checkpoint_batch_size, 25);
        assert_eq!(config.buffer_size, 1024);
    }
}
