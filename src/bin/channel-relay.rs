//! Channel Relay Binary
//!
//! Runs a relay until Ctrl-C.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: listen on 0.0.0.0:7700
//! channel-relay
//!
//! # From a TOML file
//! channel-relay relay.toml
//!
//! # From the environment
//! CHANNEL_RELAY_ADDRESS=127.0.0.1:9000 CHANNEL_RELAY_LOG_LEVEL=debug channel-relay
//! ```

use std::process::ExitCode;

use channel_relay::config::NetworkConfig;
use channel_relay::utils::logging::init_logging;
use channel_relay::Relay;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match std::env::args().nth(1) {
        Some(path) => NetworkConfig::from_file(path),
        None => NetworkConfig::from_env(),
    };
    let config = match config.and_then(|c| c.validate_strict().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("channel-relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging);

    let relay = match Relay::from_config(&config.server, &config.transport).await {
        Ok(relay) => relay,
        Err(e) => {
            error!(error = %e, "Failed to start relay");
            return ExitCode::FAILURE;
        }
    };
    info!(address = %relay.local_addr(), "Relay running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    } else {
        info!("Received CTRL+C signal, shutting down");
    }

    relay.metrics().log_summary();
    relay.shutdown().await;
    ExitCode::SUCCESS
}
