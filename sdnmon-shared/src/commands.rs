//! Outbound commands the engine asks the control plane to deliver.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::{Dpid, Frame, PortNo};

/// Where a packet-out or flow action sends its packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPort {
    Port(PortNo),
    Flood,
    Controller,
}

/// Match predicates the engine installs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowMatch {
    /// ARP packets whose target protocol address is `ip`
    ArpTarget { ip: Ipv4Addr },
    /// IPv4 ICMP packets destined to `ip`
    IcmpDestination { ip: Ipv4Addr },
}

/// Single-action flow entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRule {
    pub priority: u16,
    #[serde(rename = "match")]
    pub matches: FlowMatch,
    pub output: OutputPort,
}

/// Command addressed to one switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    PacketOut {
        dpid: Dpid,
        frame: Frame,
        out_port: OutputPort,
    },
    FlowInstall {
        dpid: Dpid,
        rule: FlowRule,
    },
    PortStatsRequest {
        dpid: Dpid,
    },
    PortDescRequest {
        dpid: Dpid,
    },
    /// The switch echoes `payload` back verbatim in an echo reply
    EchoRequest {
        dpid: Dpid,
        payload: Vec<u8>,
    },
}

impl ControlCommand {
    pub fn dpid(&self) -> Dpid {
        match self {
            ControlCommand::PacketOut { dpid, .. }
            | ControlCommand::FlowInstall { dpid, .. }
            | ControlCommand::PortStatsRequest { dpid }
            | ControlCommand::PortDescRequest { dpid }
            | ControlCommand::EchoRequest { dpid, .. } => *dpid,
        }
    }
}
