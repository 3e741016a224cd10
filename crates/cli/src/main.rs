use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fanout_core::{config_path, load_config, run_post_hooks, validate_config, Distributor};

/// Environment variable selecting the log format (`json` or plain text)
const LOG_FORMAT_ENV: &str = "FANOUT_LOG_FORMAT";

fn main() {
    init_logging();

    match run() {
        Ok(clean) => {
            if !clean {
                warn!("Run finished with errors");
            }
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Runs one distribution. Returns whether it finished without errors.
fn run() -> Result<bool> {
    let config_path = config_path();
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Source: {:?}", config.distribution.source_folder);
    info!("Target: {:?}", config.distribution.target_folder);
    info!(
        "Limit: {} files per folder, delete mode {:?}",
        config.distribution.files_per_folder, config.distribution.delete_mode
    );

    let cleanup = config.cleanup.clone();
    let target = config.distribution.target_folder.clone();

    let mut distributor = Distributor::new(config);
    let summary = distributor.run().context("Distribution failed")?;

    println!("{}", summary);

    if summary.completed {
        for outcome in run_post_hooks(&cleanup, &target) {
            if !outcome.succeeded() {
                warn!("Cleanup step {} did not succeed: {:?}", outcome.name, outcome.status);
            }
        }
    }

    Ok(summary.is_clean())
}
