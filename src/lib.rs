pub mod commands;
pub mod error;
pub mod models;
pub mod modules;
pub mod proxy; // Proxy service module
pub mod utils;

use anyhow::Context;
use commands::{ProxyServiceState, ServiceOptions};
use tracing::{error, info};

/// Run the proxy until Ctrl-C: load config, start the service, stop it cleanly
pub async fn run() -> anyhow::Result<()> {
    let log_dir = modules::get_log_dir().context("Failed to prepare log directory")?;
    let _log_guard = modules::init_logger(&log_dir);

    let config = modules::load_app_config().context("Failed to load configuration")?;
    info!(
        "Upstream {} ({}), model {}, mock mode {}",
        config.upstream.base_url,
        config.upstream.wire_api,
        config.upstream.model,
        config.oauth.mock_mode
    );

    let state = ProxyServiceState::new();
    let options = ServiceOptions {
        exchange_log_dir: Some(log_dir),
        ..ServiceOptions::default()
    };
    let status = commands::start_proxy_service(&state, config, options)
        .await
        .context("Failed to start proxy service")?;
    info!(
        "Point the CLI at {} (status: {}/api/state)",
        status.base_url, status.base_url
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    if let Err(e) = commands::stop_proxy_service(&state).await {
        error!("Failed to stop proxy service cleanly: {}", e);
    }
    Ok(())
}
