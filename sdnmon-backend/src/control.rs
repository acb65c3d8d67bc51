//! Contracts with the collaborators around the engine.
//!
//! The engine never talks to switches directly. It hands [`ControlCommand`]s
//! to a [`ControlPlane`] and asks a [`TopologyView`] which switches are live
//! and when LLDP frames left each port. Components that depend on each other
//! do so through the narrow [`AttachmentLookup`] and [`EchoLatencyLookup`]
//! traits, injected at construction.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use sdnmon_shared::errors::{ControlPlaneError, ControlPlaneResult};
use sdnmon_shared::snapshot::HostRecord;
use sdnmon_shared::{ControlCommand, ControllerEvent, Dpid, LinkKey, PortKey, PortNo, Timestamp};

use crate::utils::locks;

/// Delivers commands to switches
pub trait ControlPlane: Send + Sync {
    fn send(&self, command: ControlCommand) -> ControlPlaneResult<()>;
}

/// Read access to the topology service's inventory
pub trait TopologyView: Send + Sync {
    /// Currently attached switches
    fn switches(&self) -> Vec<Dpid>;

    fn is_switch_live(&self, dpid: Dpid) -> bool;

    /// When the topology service last sent an LLDP frame out of `port`
    fn lldp_send_timestamp(&self, port: PortKey) -> Option<Timestamp>;
}

/// Host attachment table, published by host discovery
pub trait AttachmentLookup: Send + Sync {
    /// Every resolved host with a known attachment point
    fn hosts(&self) -> Vec<HostRecord>;

    fn is_resolved(&self, ip: Ipv4Addr) -> bool;
}

/// Controller-to-switch round trip latency, published by the link delay detector
pub trait EchoLatencyLookup: Send + Sync {
    /// Round trip to `dpid` in seconds, if measured
    fn echo_latency(&self, dpid: Dpid) -> Option<f64>;
}

/// [`ControlPlane`] that queues commands on a channel for a writer task
#[derive(Debug, Clone)]
pub struct ChannelControlPlane {
    sender: mpsc::UnboundedSender<ControlCommand>,
}

impl ChannelControlPlane {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ControlCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ControlPlane for ChannelControlPlane {
    fn send(&self, command: ControlCommand) -> ControlPlaneResult<()> {
        self.sender
            .send(command)
            .map_err(|_| ControlPlaneError::ChannelClosed)
    }
}

#[derive(Debug, Default)]
struct TopologyState {
    switches: BTreeMap<Dpid, BTreeSet<PortNo>>,
    links: HashSet<LinkKey>,
    lldp_sent: HashMap<PortKey, Timestamp>,
}

/// In-memory [`TopologyView`] rebuilt from the lifecycle event stream.
#[derive(Debug, Default)]
pub struct TopologyCache {
    state: RwLock<TopologyState>,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a lifecycle event into the inventory; other events are ignored.
    pub fn apply(&self, event: &ControllerEvent) {
        let mut state = locks::write(&self.state);
        match event {
            ControllerEvent::SwitchAttached { dpid } => {
                state.switches.entry(*dpid).or_default();
            }
            ControllerEvent::SwitchDetached { dpid } => {
                state.switches.remove(dpid);
                state.links.retain(|link| !link.touches_switch(*dpid));
                state.lldp_sent.retain(|port, _| port.dpid != *dpid);
            }
            ControllerEvent::PortAdded { port } => match state.switches.get_mut(&port.dpid) {
                Some(ports) => {
                    ports.insert(port.port_no);
                }
                None => debug!(port = %port, "Port added on unknown switch ignored"),
            },
            ControllerEvent::PortRemoved { port } => {
                if let Some(ports) = state.switches.get_mut(&port.dpid) {
                    ports.remove(&port.port_no);
                }
                state.links.retain(|link| !link.touches_port(*port));
                state.lldp_sent.remove(port);
            }
            ControllerEvent::LinkAdded { link } => {
                state.links.insert(*link);
            }
            ControllerEvent::LinkDeleted { link } => {
                state.links.remove(link);
            }
            _ => {}
        }
    }

    /// Record that an LLDP frame left `port` at `timestamp`.
    pub fn record_lldp_sent(&self, port: PortKey, timestamp: Timestamp) {
        let mut state = locks::write(&self.state);
        if !state.switches.contains_key(&port.dpid) {
            debug!(port = %port, "LLDP send time for unknown switch ignored");
            return;
        }
        state.lldp_sent.insert(port, timestamp);
    }

    pub fn ports(&self, dpid: Dpid) -> Vec<PortNo> {
        locks::read(&self.state)
            .switches
            .get(&dpid)
            .map(|ports| ports.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn links(&self) -> Vec<LinkKey> {
        let mut links: Vec<LinkKey> = locks::read(&self.state).links.iter().copied().collect();
        links.sort();
        links
    }
}

impl TopologyView for TopologyCache {
    fn switches(&self) -> Vec<Dpid> {
        locks::read(&self.state).switches.keys().copied().collect()
    }

    fn is_switch_live(&self, dpid: Dpid) -> bool {
        locks::read(&self.state).switches.contains_key(&dpid)
    }

    fn lldp_send_timestamp(&self, port: PortKey) -> Option<Timestamp> {
        locks::read(&self.state).lldp_sent.get(&port).copied()
    }
}
