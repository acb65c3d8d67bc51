//! Shared types for the sdnmon telemetry engine.
//!
//! This crate contains the identifiers, decoded frames, controller events,
//! outbound control commands and published snapshot records that are passed
//! between the measurement engine and whatever carries OpenFlow traffic to
//! and from the switches (a controller shim, a replay file, a test harness).
//!
//! # Key Components
//!
//! * [`Dpid`], [`PortNo`], [`PortKey`], [`LinkKey`] - Switch, port and link identifiers
//! * [`MacAddr`] - Ethernet address with colon-hex text form
//! * [`frames`] - Frames already decoded by the protocol stack
//! * [`events`] - Inbound lifecycle events and protocol replies
//! * [`commands`] - Outbound packet-out, flow-install and request commands
//! * [`snapshot`] - Read-only published telemetry state
//! * [`config_json`] - JSON5 configuration file parsing
//!
//! # Data Flow
//!
//! ```text
//! Protocol stack                     Engine
//!    │ ──── ControllerEvent ──────► │
//!    │ ◄──── ControlCommand ─────── │
//!    │                              │
//!                       Metrics ◄── TelemetrySnapshot
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod commands;
pub mod config_json;
pub mod errors;
pub mod events;
pub mod frames;
pub mod snapshot;

pub use commands::{ControlCommand, FlowMatch, FlowRule, OutputPort};
pub use events::{ControllerEvent, EventKind, PortDescription, PortStatsEntry};
pub use frames::{ArpFrame, ArpOp, Frame, IcmpEchoFrame, LldpFrame};
pub use snapshot::TelemetrySnapshot;

/// Seconds since the Unix epoch, with sub-second precision.
///
/// Arrival timestamps on events and the tokens embedded in probes share this
/// representation so that latencies are plain subtractions.
pub type Timestamp = f64;

/// Current wall-clock time as a [`Timestamp`].
pub fn now_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// OpenFlow 1.3 reserved port: the switch's local networking stack.
pub const OFPP_LOCAL: u32 = 0xffff_fffe;

/// Datapath identifier of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dpid(pub u64);

impl fmt::Display for Dpid {
    /// Decimal, zero-padded to 16 digits
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016}", self.0)
    }
}

impl From<u64> for Dpid {
    fn from(value: u64) -> Self {
        Dpid(value)
    }
}

/// Port number on a switch.
pub type PortNo = u32;

/// A port addressed by its switch and port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortKey {
    pub dpid: Dpid,
    pub port_no: PortNo,
}

impl PortKey {
    pub fn new(dpid: impl Into<Dpid>, port_no: PortNo) -> Self {
        Self {
            dpid: dpid.into(),
            port_no,
        }
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dpid, self.port_no)
    }
}

/// A directed switch-to-switch link, from `src` port to `dst` port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub src: PortKey,
    pub dst: PortKey,
}

impl LinkKey {
    pub fn new(src: PortKey, dst: PortKey) -> Self {
        Self { src, dst }
    }

    /// Whether either end of the link sits on `dpid`
    pub fn touches_switch(&self, dpid: Dpid) -> bool {
        self.src.dpid == dpid || self.dst.dpid == dpid
    }

    /// Whether either end of the link is `port`
    pub fn touches_port(&self, port: PortKey) -> bool {
        self.src == port || self.dst == port
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// 48-bit Ethernet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Error returned when a MAC address string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacParseError(pub String);

impl fmt::Display for MacParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid MAC address '{}'", self.0)
    }
}

impl std::error::Error for MacParseError {}

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut bytes = [0u8; 6];
        let mut parts = trimmed.split([':', '-']);
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| MacParseError(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MacParseError(s.to_string()));
        }
        Ok(MacAddr(bytes))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
