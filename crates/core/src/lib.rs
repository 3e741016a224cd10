pub mod config;
pub mod context;
pub mod deletion;
pub mod hooks;
pub mod orchestrator;
pub mod placer;
pub mod retry;
pub mod state;

pub use config::{
    config_path, load_config, load_config_from_str, validate_config, Config, ConfigError,
};
pub use context::RunContext;
pub use hooks::{run_post_hooks, CleanupConfig, HookOutcome, HookStatus};
pub use orchestrator::{
    DeleteMode, DeletionGate, DeletionStatus, DistributionConfig, DistributionMode, Distributor,
    OrchestratorError, Phase, RunSummary,
};
pub use retry::{RetryConfig, RetryExecutor};
pub use state::{StateConfig, StateStore};
