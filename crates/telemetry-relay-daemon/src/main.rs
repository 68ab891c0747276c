// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_relay::{
    config::RelayConfig,
    relay::{RelayHandle, TelemetryRelay},
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let (config, config_warnings) = match RelayConfig::from_env_with_warnings() {
        Ok(loaded) => loaded,
        Err(e) => {
            // The subscriber isn't up yet, so go straight to stderr.
            eprintln!("Error loading telemetry relay configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = format!("telemetry_relay={0},telemetry_relay_daemon={0}", config.log_level);

    let subscriber = match EnvFilter::try_new(env_filter) {
        Ok(filter) => tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_level(true)
            .with_thread_names(false)
            .with_thread_ids(false)
            .with_line_number(false)
            .with_file(false)
            .with_target(true)
            .finish(),
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");
    for warning in config_warnings {
        warn!("{warning}");
    }
    info!("Starting telemetry relay");

    let status_interval = config.status_interval;
    let handle = match TelemetryRelay::new(config).start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Error starting telemetry relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    wait_for_stop(&handle, status_interval).await;

    match handle.shutdown().await {
        Ok(()) => {
            info!("Telemetry relay stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Telemetry relay stopped with error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Logs link status periodically until Ctrl-C or until the forwarder gives up.
async fn wait_for_stop(handle: &RelayHandle, status_interval: std::time::Duration) {
    let mut status_ticker = interval(status_interval);
    status_ticker.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Shutting down..."),
                    Err(e) => error!("Unable to listen for shutdown signal: {e}"),
                }
                return;
            }
            _ = handle.forwarder_stopped() => {
                error!("Earth forwarder stopped, shutting down relay");
                return;
            }
            _ = status_ticker.tick() => {
                let stats = handle.stats();
                info!(
                    "Link status: {} (buffered {}, received {}, forwarded {}, evicted {})",
                    handle.link_status(),
                    handle.buffered(),
                    stats.received,
                    stats.forwarded,
                    stats.evicted,
                );
            }
        }
    }
}
