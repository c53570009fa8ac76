//! Structured logging setup.
//!
//! `RUST_LOG` wins over the configured level when it is set.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global `tracing` subscriber described by `config`.
///
/// Returns `false` when a subscriber was already installed; the existing one is kept.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if installed.is_ok() {
        tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    }
    installed.is_ok()
}
