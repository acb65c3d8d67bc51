//! Configuration management module for the sdnmon backend.
//!
//! This module provides centralized configuration management with support for:
//! - CLI argument parsing
//! - Environment variable configuration
//! - JSON5 configuration files
//! - Configuration validation

pub mod app_config;
pub mod cli;
pub mod file;

pub use app_config::{AppConfig, ControllerConfig, LogLevel};
pub use cli::CliConfig;

use anyhow::{Context, Result};
use std::sync::Arc;

/// Flattened parameter names, shared by the file sections and the environment
pub mod keys {
    pub const CONTROLLER_MAC: &str = "NETWORK_CONTROLLER_MAC";
    pub const CONTROLLER_IP: &str = "NETWORK_CONTROLLER_IP";
    pub const ARP_REFRESH: &str = "NETWORK_ARP_REFRESH";
    pub const IP_POOL: &str = "NETWORK_IP_POOL";
    pub const MONITOR_PERIOD: &str = "MONITOR_PERIOD";
    pub const MONITOR_SAMPLES: &str = "MONITOR_SAMPLES";

    pub const ALL: [&str; 6] = [
        CONTROLLER_MAC,
        CONTROLLER_IP,
        ARP_REFRESH,
        IP_POOL,
        MONITOR_PERIOD,
        MONITOR_SAMPLES,
    ];

    /// Split a flattened name into its section and parameter
    pub fn split(name: &str) -> (&str, &str) {
        name.split_once('_').unwrap_or(("", name))
    }
}

/// Main configuration manager that combines all configuration sources
#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub app: AppConfig,
    pub controller: Arc<ControllerConfig>,
}

impl ConfigManager {
    /// Build from an explicit CLI config and environment lookup
    pub fn from_sources(cli: &CliConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let app = AppConfig::from_cli(cli, env);
        let params = file::merge_parameters(cli, env).context("Failed to load configuration")?;
        let controller =
            ControllerConfig::from_params(&params).context("Invalid controller configuration")?;

        Ok(Self {
            app,
            controller: Arc::new(controller),
        })
    }

    /// Validates the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.controller
            .validate()
            .map_err(|e| anyhow::anyhow!("Controller configuration error: {}", e))
    }
}
