//! CLI argument parsing for the sdnmon backend.
//!
//! Every engine parameter can be given on the command line, where it takes
//! priority over the environment and the configuration file.

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

use super::keys;

/// CLI configuration structure containing all parsed command line arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
    pub controller_mac: Option<String>,
    pub controller_ip: Option<String>,
    pub arp_refresh: Option<String>,
    pub ip_pool: Option<String>,
    pub monitor_period: Option<String>,
    pub monitor_samples: Option<String>,
}

impl CliConfig {
    /// Parse CLI arguments and create CliConfig
    pub fn from_args() -> Result<Self> {
        let matches = Self::build_cli().get_matches();
        Self::from_matches(&matches)
    }

    /// Create CliConfig from pre-parsed ArgMatches (useful for testing)
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            verbose: matches.get_flag("verbose"),
            config_path: matches.get_one::<String>("config").map(PathBuf::from),
            controller_mac: matches.get_one::<String>("controller-mac").cloned(),
            controller_ip: matches.get_one::<String>("controller-ip").cloned(),
            arp_refresh: matches.get_one::<String>("arp-refresh").cloned(),
            ip_pool: matches.get_one::<String>("ip-pool").cloned(),
            monitor_period: matches.get_one::<String>("monitor-period").cloned(),
            monitor_samples: matches.get_one::<String>("monitor-samples").cloned(),
        })
    }

    /// Parameter overrides given on the command line, keyed like the config file
    pub fn overrides(&self) -> Vec<(&'static str, String)> {
        [
            (keys::CONTROLLER_MAC, &self.controller_mac),
            (keys::CONTROLLER_IP, &self.controller_ip),
            (keys::ARP_REFRESH, &self.arp_refresh),
            (keys::IP_POOL, &self.ip_pool),
            (keys::MONITOR_PERIOD, &self.monitor_period),
            (keys::MONITOR_SAMPLES, &self.monitor_samples),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|v| (key, v)))
        .collect()
    }

    /// Build the clap Command structure
    pub fn build_cli() -> Command {
        Command::new("sdnmon-backend")
            .version(env!("CARGO_PKG_VERSION"))
            .about("sdnmon backend - SDN host discovery and link telemetry")
            .long_about("Probes switches and hosts through an OpenFlow controller to discover hosts, \
                       measure link and host delays with jitter, and estimate per-port free bandwidth \
                       and loss. Controller events are read as JSON lines on stdin and commands are \
                       written as JSON lines on stdout.")
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .action(clap::ArgAction::SetTrue)
                    .help("Enable verbose logging")
                    .long_help("Enable verbose debug logging, including every probe sent and \
                              every telemetry snapshot."),
            )
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("JSON5 configuration file")
                    .long_help("JSON5 configuration file with NETWORK and MONITOR sections. \
                              Environment variables and command line flags override its values."),
            )
            .arg(
                Arg::new("controller-mac")
                    .long("controller-mac")
                    .value_name("MAC")
                    .help("MAC address the controller probes and answers ARP as"),
            )
            .arg(
                Arg::new("controller-ip")
                    .long("controller-ip")
                    .value_name("IPV4")
                    .help("IPv4 address the controller probes and answers ARP as"),
            )
            .arg(
                Arg::new("arp-refresh")
                    .long("arp-refresh")
                    .value_name("DURATION")
                    .help("Interval between ARP probe rounds once hosts are known (default 60s)")
                    .long_help("Interval between ARP probe rounds once at least one host has \
                              been resolved. Plain seconds or duration strings like '30s', '2m'. \
                              While the ARP table is empty, probes go out every 10 seconds."),
            )
            .arg(
                Arg::new("ip-pool")
                    .long("ip-pool")
                    .value_name("POOL")
                    .help("Comma-separated addresses and START:END ranges to probe")
                    .long_help("Addresses to resolve with ARP, as a comma-separated list of \
                              single addresses and inclusive START:END ranges, e.g. \
                              '10.0.0.1:10.0.0.20,10.0.1.5'."),
            )
            .arg(
                Arg::new("monitor-period")
                    .long("monitor-period")
                    .value_name("DURATION")
                    .help("Measurement poll period (default 2s)"),
            )
            .arg(
                Arg::new("monitor-samples")
                    .long("monitor-samples")
                    .value_name("COUNT")
                    .help("Samples kept per history key, at least 2 (default 5)"),
            )
    }
}
