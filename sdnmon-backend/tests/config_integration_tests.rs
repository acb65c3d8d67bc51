//! Integration tests for configuration loading and the binary's stdio bridge.
//!
//! These run the built `sdnmon-backend` binary with explicit arguments and a
//! scrubbed environment, and load configuration files from temp directories.

use anyhow::Result;
use std::io::Write;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use sdnmon_backend::config::{CliConfig, ConfigManager, keys};
use sdnmon_shared::{ArpFrame, ControlCommand, ControllerEvent, Dpid, Frame, OutputPort};

const BINARY: &str = env!("CARGO_BIN_EXE_sdnmon-backend");

fn backend() -> Command {
    let mut command = Command::new(BINARY);
    for name in keys::ALL {
        command.env_remove(name);
    }
    command.env_remove("RUST_LOG");
    command
}

/// Run the binary with `input` on stdin and wait for it to exit
fn run_with_input(args: &[&str], input: &str) -> Result<Output> {
    let mut child = backend()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
    }
    Ok(child.wait_with_output()?)
}

fn config_file(contents: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".json5").tempfile()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

#[test]
fn test_backend_cli_help_works() -> Result<()> {
    let output = backend().arg("--help").output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sdnmon-backend"));
    assert!(stdout.contains("--controller-mac"));
    assert!(stdout.contains("--monitor-period"));
    Ok(())
}

#[test]
fn test_backend_requires_controller_identity() -> Result<()> {
    let output = run_with_input(&[], "")?;
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("CONTROLLER_MAC parameter missing"), "{}", stderr);
    Ok(())
}

#[test]
fn test_backend_rejects_malformed_mac() -> Result<()> {
    let output = run_with_input(
        &[
            "--controller-mac",
            "00:00:00:00:fe",
            "--controller-ip",
            "10.0.0.254",
        ],
        "",
    )?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("NETWORK:CONTROLLER_MAC parameter invalid"), "{}", stderr);
    Ok(())
}

#[test]
fn test_zero_period_falls_back_to_default() -> Result<()> {
    let cli = CliConfig {
        controller_mac: Some("00:00:00:00:00:fe".to_string()),
        controller_ip: Some("10.0.0.254".to_string()),
        monitor_period: Some("0".to_string()),
        ..Default::default()
    };
    let manager = ConfigManager::from_sources(&cli, &|_| None)?;
    manager.validate()?;
    assert_eq!(manager.controller.monitor_period, Duration::from_secs(2));
    Ok(())
}

#[test]
fn test_backend_exits_cleanly_on_eof() -> Result<()> {
    let file = config_file(
        r#"{
            NETWORK: { CONTROLLER_MAC: "00:00:00:00:00:fe", CONTROLLER_IP: "10.0.0.254" },
        }"#,
    )?;
    let path = file.path().to_string_lossy().to_string();
    let output = run_with_input(&["--config", &path], "")?;

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(output.stdout.is_empty());
    Ok(())
}

#[test]
fn test_backend_answers_arp_for_controller() -> Result<()> {
    let asker = "00:00:00:00:00:01".parse()?;
    let request = ArpFrame::request(asker, "10.0.0.1".parse()?, "10.0.0.254".parse()?);
    let input = [
        ControllerEvent::SwitchAttached { dpid: Dpid(7) },
        ControllerEvent::PacketIn {
            dpid: Dpid(7),
            in_port: 3,
            timestamp: 0.0,
            frame: Frame::Arp(request),
        },
    ]
    .iter()
    .map(serde_json::to_string)
    .collect::<Result<Vec<_>, _>>()?
    .join("\n");

    let output = run_with_input(
        &[
            "--controller-mac",
            "00:00:00:00:00:fe",
            "--controller-ip",
            "10.0.0.254",
        ],
        &input,
    )?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let commands = String::from_utf8(output.stdout)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<Vec<ControlCommand>, _>>()?;
    let reply = commands.iter().find_map(|command| match command {
        ControlCommand::PacketOut {
            dpid: Dpid(7),
            frame: Frame::Arp(arp),
            out_port: OutputPort::Port(3),
        } if arp.target_mac == asker => Some(arp),
        _ => None,
    });
    let reply = reply.expect("ARP reply for the asking host");
    assert_eq!(reply.sender_ip, "10.0.0.254".parse::<std::net::Ipv4Addr>()?);
    Ok(())
}

#[test]
fn test_file_env_and_cli_layering() -> Result<()> {
    let file = config_file(
        r#"{
            // comments are allowed
            NETWORK: {
                CONTROLLER_MAC: "00:00:00:00:00:fe",
                CONTROLLER_IP: "10.0.0.254",
                ARP_REFRESH: "1m",
                IP_POOL: "10.0.0.1:10.0.0.3, 10.0.1.1",
            },
            MONITOR: { PERIOD: "500ms", SAMPLES: 1 },
        }"#,
    )?;
    let cli = CliConfig {
        config_path: Some(file.path().to_path_buf()),
        monitor_period: Some("3".to_string()),
        ..Default::default()
    };
    let env = |name: &str| (name == keys::MONITOR_PERIOD).then(|| "750ms".to_string());

    let manager = ConfigManager::from_sources(&cli, &env)?;
    manager.validate()?;

    let controller = &manager.controller;
    assert_eq!(controller.arp_refresh, Duration::from_secs(60));
    assert_eq!(controller.monitor_period, Duration::from_secs(3));
    // Below the minimum, so the default applies
    assert_eq!(controller.monitor_samples, 5);
    assert_eq!(controller.ip_pool, "10.0.0.1:10.0.0.3, 10.0.1.1");
    Ok(())
}

#[test]
fn test_env_overrides_file() -> Result<()> {
    let file = config_file(
        r#"{ NETWORK: { CONTROLLER_MAC: "00:00:00:00:00:fe", CONTROLLER_IP: "10.0.0.254" },
             MONITOR: { PERIOD: 4 } }"#,
    )?;
    let cli = CliConfig {
        config_path: Some(file.path().to_path_buf()),
        ..Default::default()
    };
    let env = |name: &str| match name {
        keys::MONITOR_PERIOD => Some("750ms".to_string()),
        keys::MONITOR_SAMPLES => Some("8".to_string()),
        _ => None,
    };

    let manager = ConfigManager::from_sources(&cli, &env)?;
    assert_eq!(manager.controller.monitor_period, Duration::from_millis(750));
    assert_eq!(manager.controller.monitor_samples, 8);
    Ok(())
}

#[test]
fn test_unreadable_file_is_reported() {
    let cli = CliConfig {
        config_path: Some("/nonexistent/sdnmon.json5".into()),
        ..Default::default()
    };
    let err = ConfigManager::from_sources(&cli, &|_| None).unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/sdnmon.json5"));
}
