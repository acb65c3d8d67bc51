//! Published telemetry state.
//!
//! A [`TelemetrySnapshot`] is a point-in-time copy of every derived metric,
//! suitable for handing to a metrics forwarder or dumping as JSON.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::{Dpid, LinkKey, MacAddr, PortKey, Timestamp};

/// Administrative state of a port, from its OFPPC_* config bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortConfigState {
    Up,
    Down,
    NoRecv,
    NoFwd,
    NoPacketIn,
}

impl PortConfigState {
    const OFPPC_PORT_DOWN: u32 = 1 << 0;
    const OFPPC_NO_RECV: u32 = 1 << 2;
    const OFPPC_NO_FWD: u32 = 1 << 5;
    const OFPPC_NO_PACKET_IN: u32 = 1 << 6;

    /// Only a single recognised bit maps to a tag; anything else reads as up.
    pub fn from_bits(config: u32) -> Self {
        match config {
            Self::OFPPC_PORT_DOWN => PortConfigState::Down,
            Self::OFPPC_NO_RECV => PortConfigState::NoRecv,
            Self::OFPPC_NO_FWD => PortConfigState::NoFwd,
            Self::OFPPC_NO_PACKET_IN => PortConfigState::NoPacketIn,
            _ => PortConfigState::Up,
        }
    }
}

/// Physical link state of a port, from its OFPPS_* state bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortLinkState {
    Up,
    Down,
    Blocked,
    Live,
}

impl PortLinkState {
    const OFPPS_LINK_DOWN: u32 = 1 << 0;
    const OFPPS_BLOCKED: u32 = 1 << 1;
    const OFPPS_LIVE: u32 = 1 << 2;

    pub fn from_bits(state: u32) -> Self {
        match state {
            Self::OFPPS_LINK_DOWN => PortLinkState::Down,
            Self::OFPPS_BLOCKED => PortLinkState::Blocked,
            Self::OFPPS_LIVE => PortLinkState::Live,
            _ => PortLinkState::Up,
        }
    }
}

/// Capability data learned from a port-description reply
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortFeatures {
    pub config_state: PortConfigState,
    pub link_state: PortLinkState,
    /// Link capacity in Mbit/s
    pub capacity_mbps: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub attachment: PortKey,
}

/// One-way delay of a switch-to-switch link, in seconds.
///
/// `None` means the delay cannot currently be estimated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDelayRecord {
    pub src: Dpid,
    pub dst: Dpid,
    pub delay: Option<f64>,
    pub jitter: Option<f64>,
}

/// Round-trip switch-to-host delay, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostDelayRecord {
    pub ip: Ipv4Addr,
    pub delay: f64,
    pub jitter: Option<f64>,
}

/// Port capability and available bandwidth in Mbit/s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    pub port: PortKey,
    pub features: Option<PortFeatures>,
    pub free_up_mbps: Option<f64>,
    pub free_down_mbps: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    pub link: LinkKey,
    pub loss_rate: f64,
}

/// Every published metric at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub taken_at: Timestamp,
    pub hosts: Vec<HostRecord>,
    pub link_delays: Vec<LinkDelayRecord>,
    pub host_delays: Vec<HostDelayRecord>,
    pub ports: Vec<PortRecord>,
    pub loss_rates: Vec<LossRecord>,
}

impl TelemetrySnapshot {
    /// Whether any record references `dpid`
    pub fn references_switch(&self, dpid: Dpid) -> bool {
        self.hosts.iter().any(|h| h.attachment.dpid == dpid)
            || self
                .link_delays
                .iter()
                .any(|l| l.src == dpid || l.dst == dpid)
            || self.ports.iter().any(|p| p.port.dpid == dpid)
            || self.loss_rates.iter().any(|l| l.link.touches_switch(dpid))
    }
}
