//! Application and engine configuration for the sdnmon backend.
//!
//! [`AppConfig`] covers process concerns such as logging. [`ControllerConfig`]
//! is the single settings struct every engine component receives at
//! construction.

use anyhow::Result;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use sdnmon_shared::MacAddr;
use sdnmon_shared::config_json::parse_duration_value;
use sdnmon_shared::errors::{ConfigError, ConfigResult};

use super::cli::CliConfig;
use super::keys;
use crate::utils::error_handling::RetryPolicy;

pub const DEFAULT_ARP_REFRESH: Duration = Duration::from_secs(60);
pub const DEFAULT_MONITOR_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_MONITOR_SAMPLES: usize = 5;
pub const MIN_MONITOR_SAMPLES: usize = 2;

/// Log level enumeration
#[derive(Debug, Clone, PartialEq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing level filter string
    pub fn to_filter_string(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse the leading level of a `RUST_LOG`-style directive list
    pub fn parse(level_str: &str) -> LogLevel {
        let main_level = level_str
            .split(',')
            .next()
            .unwrap_or(level_str)
            .split('=')
            .next()
            .unwrap_or(level_str)
            .trim()
            .to_lowercase();

        match main_level.as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// Process-level configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: LogLevel,
    /// Raw `RUST_LOG` directives, honoured unless verbose mode is on
    pub log_directives: Option<String>,
}

impl AppConfig {
    /// Create application configuration from CLI config and an environment lookup
    pub fn from_cli(cli_config: &CliConfig, env: &dyn Fn(&str) -> Option<String>) -> Self {
        let log_directives = env("RUST_LOG").filter(|s| !s.trim().is_empty());
        let log_level = if cli_config.verbose {
            LogLevel::Debug
        } else {
            log_directives
                .as_deref()
                .map(LogLevel::parse)
                .unwrap_or(LogLevel::Info)
        };

        Self {
            log_level,
            log_directives: if cli_config.verbose {
                None
            } else {
                log_directives
            },
        }
    }

    /// Filter handed to the subscriber
    pub fn env_filter(&self) -> EnvFilter {
        self.log_directives
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(self.log_level.to_filter_string()))
    }

    /// Initialize logging based on configuration.
    ///
    /// Output goes to stderr; stdout belongs to the command stream.
    pub fn init_logging(&self) -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(self.env_filter())
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(false)
            .event_format(
                tracing_subscriber::fmt::format()
                    .with_target(false)
                    .compact(),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))?;

        tracing::info!("Logging initialized with level: {:?}", self.log_level);
        Ok(())
    }
}

/// Settings shared by every engine component
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Identity the controller probes and answers ARP as
    pub controller_mac: MacAddr,
    pub controller_ip: Ipv4Addr,
    /// ARP probe interval once at least one host is known
    pub arp_refresh: Duration,
    /// ARP probe interval while the table is empty
    pub empty_table_probe_interval: Duration,
    pub monitor_period: Duration,
    pub monitor_samples: usize,
    /// Raw discovery pool, parsed by host discovery
    pub ip_pool: String,
    /// Pause between consecutive probes in one round
    pub probe_stagger: Duration,
    pub flow_priority: u16,
    pub flow_install_retry: RetryPolicy,
}

impl ControllerConfig {
    /// Configuration with defaults for everything but the controller identity
    pub fn new(controller_mac: MacAddr, controller_ip: Ipv4Addr) -> Self {
        Self {
            controller_mac,
            controller_ip,
            arp_refresh: DEFAULT_ARP_REFRESH,
            empty_table_probe_interval: Duration::from_secs(10),
            monitor_period: DEFAULT_MONITOR_PERIOD,
            monitor_samples: DEFAULT_MONITOR_SAMPLES,
            ip_pool: String::new(),
            probe_stagger: Duration::from_millis(50),
            flow_priority: 65535,
            flow_install_retry: RetryPolicy::default(),
        }
    }

    /// Build from merged `SECTION_PARAM -> value` parameters.
    ///
    /// Missing or malformed required values are errors. Malformed optional
    /// values are logged and replaced by their defaults.
    pub fn from_params(params: &BTreeMap<String, String>) -> ConfigResult<Self> {
        let controller_mac = required(params, keys::CONTROLLER_MAC)?;
        let controller_mac = controller_mac.parse::<MacAddr>().map_err(|e| {
            let (section, key) = keys::split(keys::CONTROLLER_MAC);
            ConfigError::invalid(section, key, &controller_mac, e.to_string())
        })?;

        let controller_ip = required(params, keys::CONTROLLER_IP)?;
        let controller_ip = controller_ip.trim().parse::<Ipv4Addr>().map_err(|e| {
            let (section, key) = keys::split(keys::CONTROLLER_IP);
            ConfigError::invalid(section, key, &controller_ip, e.to_string())
        })?;

        let mut config = Self::new(controller_mac, controller_ip);
        config.arp_refresh = optional_duration(params, keys::ARP_REFRESH, DEFAULT_ARP_REFRESH);
        config.monitor_period =
            optional_duration(params, keys::MONITOR_PERIOD, DEFAULT_MONITOR_PERIOD);
        config.monitor_samples = optional_samples(params);
        config.ip_pool = params.get(keys::IP_POOL).cloned().unwrap_or_default();
        Ok(config)
    }

    /// Validate engine configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let zero_checks = [
            (keys::ARP_REFRESH, self.arp_refresh),
            (keys::MONITOR_PERIOD, self.monitor_period),
        ];
        for (name, value) in zero_checks {
            if value.is_zero() {
                let (section, key) = keys::split(name);
                return Err(ConfigError::invalid(
                    section,
                    key,
                    "0",
                    "interval must be greater than 0",
                ));
            }
        }
        if self.monitor_samples < MIN_MONITOR_SAMPLES {
            let (section, key) = keys::split(keys::MONITOR_SAMPLES);
            return Err(ConfigError::invalid(
                section,
                key,
                &self.monitor_samples.to_string(),
                "at least 2 samples are needed for jitter and rates",
            ));
        }
        if self.empty_table_probe_interval.is_zero() {
            return Err(ConfigError::Parse(
                "empty-table probe interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn required(params: &BTreeMap<String, String>, name: &str) -> ConfigResult<String> {
    match params.get(name).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => {
            let (section, key) = keys::split(name);
            Err(ConfigError::missing(section, key))
        }
    }
}

fn optional_duration(params: &BTreeMap<String, String>, name: &str, default: Duration) -> Duration {
    let Some(raw) = params.get(name) else {
        return default;
    };
    match parse_duration_value(raw) {
        Ok(value) if !value.is_zero() => value,
        Ok(_) => {
            warn!(parameter = name, "Zero interval configured, using {:?}", default);
            default
        }
        Err(e) => {
            warn!(parameter = name, value = %raw, "{}, using {:?}", e, default);
            default
        }
    }
}

fn optional_samples(params: &BTreeMap<String, String>) -> usize {
    let Some(raw) = params.get(keys::MONITOR_SAMPLES) else {
        return DEFAULT_MONITOR_SAMPLES;
    };
    // Files may carry integers as JSON numbers, which flatten to "5" or "5.0"
    let parsed = raw
        .trim()
        .parse::<usize>()
        .ok()
        .or_else(|| {
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0 && *v >= 0.0)
                .map(|v| v as usize)
        });
    match parsed {
        Some(samples) if samples >= MIN_MONITOR_SAMPLES => samples,
        _ => {
            warn!(
                value = %raw,
                "Sample count must be an integer of at least {}, using {}",
                MIN_MONITOR_SAMPLES,
                DEFAULT_MONITOR_SAMPLES
            );
            DEFAULT_MONITOR_SAMPLES
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn identity() -> Vec<(&'static str, &'static str)> {
        vec![
            (keys::CONTROLLER_MAC, "00:00:00:00:00:fe"),
            (keys::CONTROLLER_IP, "10.0.0.254"),
        ]
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("warn,sdnmon_backend=trace"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("bogus"), LogLevel::Info);
    }

    #[test]
    fn test_app_config_verbose_wins_over_rust_log() {
        let cli = CliConfig {
            verbose: true,
            ..Default::default()
        };
        let app = AppConfig::from_cli(&cli, &|_| Some("error".to_string()));
        assert_eq!(app.log_level, LogLevel::Debug);
        assert!(app.log_directives.is_none());

        let quiet = AppConfig::from_cli(&CliConfig::default(), &|_| Some("warn".to_string()));
        assert_eq!(quiet.log_level, LogLevel::Warn);
        assert_eq!(quiet.log_directives.as_deref(), Some("warn"));
    }

    #[test]
    fn test_defaults_apply() {
        let config = ControllerConfig::from_params(&params(&identity())).unwrap();
        assert_eq!(config.controller_ip, Ipv4Addr::new(10, 0, 0, 254));
        assert_eq!(config.arp_refresh, Duration::from_secs(60));
        assert_eq!(config.monitor_period, Duration::from_secs(2));
        assert_eq!(config.monitor_samples, 5);
        assert_eq!(config.probe_stagger, Duration::from_millis(50));
        assert_eq!(config.empty_table_probe_interval, Duration::from_secs(10));
        assert_eq!(config.flow_priority, 65535);
        assert!(config.ip_pool.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_controller_ip_is_fatal() {
        let err = ControllerConfig::from_params(&params(&[(
            keys::CONTROLLER_MAC,
            "00:00:00:00:00:fe",
        )]))
        .unwrap_err();
        assert_eq!(err, ConfigError::missing("NETWORK", "CONTROLLER_IP"));
        assert_eq!(err.to_string(), "NETWORK:CONTROLLER_IP parameter missing");
    }

    #[test]
    fn test_invalid_controller_mac_is_fatal() {
        let err = ControllerConfig::from_params(&params(&[
            (keys::CONTROLLER_MAC, "not-a-mac"),
            (keys::CONTROLLER_IP, "10.0.0.254"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameter { .. }));
    }

    #[test]
    fn test_optional_values_parse() {
        let mut pairs = identity();
        pairs.extend([
            (keys::ARP_REFRESH, "30s"),
            (keys::MONITOR_PERIOD, "0.5"),
            (keys::MONITOR_SAMPLES, "8"),
            (keys::IP_POOL, "10.0.0.1:10.0.0.3"),
        ]);
        let config = ControllerConfig::from_params(&params(&pairs)).unwrap();
        assert_eq!(config.arp_refresh, Duration::from_secs(30));
        assert_eq!(config.monitor_period, Duration::from_millis(500));
        assert_eq!(config.monitor_samples, 8);
        assert_eq!(config.ip_pool, "10.0.0.1:10.0.0.3");
    }

    #[test]
    fn test_bad_optional_values_fall_back() {
        let mut pairs = identity();
        pairs.extend([
            (keys::ARP_REFRESH, "soon"),
            (keys::MONITOR_PERIOD, "0"),
            (keys::MONITOR_SAMPLES, "1"),
        ]);
        let config = ControllerConfig::from_params(&params(&pairs)).unwrap();
        assert_eq!(config.arp_refresh, DEFAULT_ARP_REFRESH);
        assert_eq!(config.monitor_period, DEFAULT_MONITOR_PERIOD);
        assert_eq!(config.monitor_samples, DEFAULT_MONITOR_SAMPLES);
    }

    #[test]
    fn test_samples_from_json_number() {
        let mut pairs = identity();
        pairs.push((keys::MONITOR_SAMPLES, "7.0"));
        let config = ControllerConfig::from_params(&params(&pairs)).unwrap();
        assert_eq!(config.monitor_samples, 7);
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        let mut config =
            ControllerConfig::new(MacAddr([0, 0, 0, 0, 0, 0xfe]), Ipv4Addr::new(10, 0, 0, 254));
        config.monitor_period = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
