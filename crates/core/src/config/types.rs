use serde::{Deserialize, Serialize};

use crate::hooks::CleanupConfig;
use crate::orchestrator::DistributionConfig;
use crate::placer::PlacerConfig;
use crate::retry::RetryConfig;
use crate::state::StateConfig;

/// Root configuration
///
/// Run parameters live at the top level; everything else has its own table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(flatten)]
    pub distribution: DistributionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub placer: PlacerConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl Config {
    /// Config with defaults for everything but the run parameters.
    pub fn new(distribution: DistributionConfig) -> Self {
        Self {
            distribution,
            retry: RetryConfig::default(),
            state: StateConfig::default(),
            placer: PlacerConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}
