use anyhow::Result;
use tracing::{info, instrument, warn};

use sdnmon_backend::bridge::Bridge;
use sdnmon_backend::config::{AppConfig, CliConfig, ConfigManager};

/// Resolves on Ctrl-C; never resolves if the signal cannot be watched
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    let cli_config = CliConfig::from_args()?;
    let env = |name: &str| std::env::var(name).ok();

    // Before loading parameters, which warn on fallbacks
    AppConfig::from_cli(&cli_config, &env).init_logging()?;

    // Load configuration from file, environment and CLI
    let config_manager = ConfigManager::from_sources(&cli_config, &env)?;

    // Validate configuration
    config_manager.validate()?;

    let controller = &config_manager.controller;
    info!(
        "Starting sdnmon-backend as {} / {}",
        controller.controller_mac, controller.controller_ip
    );
    info!(
        "Monitor period {:?}, {} samples, ARP refresh {:?}",
        controller.monitor_period, controller.monitor_samples, controller.arp_refresh
    );

    let (bridge, commands) = Bridge::new(controller.clone());
    bridge
        .run(
            commands,
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            ctrl_c(),
        )
        .await?;

    info!("sdnmon-backend stopped");
    Ok(())
}
