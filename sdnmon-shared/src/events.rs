//! Inbound events from the control plane and the topology service.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::{Dpid, Frame, LinkKey, MacAddr, PortKey, PortNo, Timestamp};

/// One port's counters from a port-statistics reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatsEntry {
    pub port_no: PortNo,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    /// Time the port has been alive, whole seconds part
    pub duration_sec: u32,
    /// Time the port has been alive, nanoseconds beyond `duration_sec`
    pub duration_nsec: u32,
}

/// One port's description from a port-description reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescription {
    pub port_no: PortNo,
    #[serde(default)]
    pub name: String,
    /// OFPPC_* administrative config bits
    pub config: u32,
    /// OFPPS_* link state bits
    pub state: u32,
    /// Current link speed in kbit/s
    pub curr_speed: u32,
}

/// Everything the engine can react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    SwitchAttached {
        dpid: Dpid,
    },
    SwitchDetached {
        dpid: Dpid,
    },
    PortAdded {
        port: PortKey,
    },
    PortRemoved {
        port: PortKey,
    },
    LinkAdded {
        link: LinkKey,
    },
    LinkDeleted {
        link: LinkKey,
    },
    HostAdded {
        mac: MacAddr,
        port: PortKey,
        #[serde(default)]
        ipv4: Vec<Ipv4Addr>,
    },
    /// The topology service invalidated a host (or its ARP entry)
    HostRemoved {
        mac: MacAddr,
    },
    PacketIn {
        dpid: Dpid,
        in_port: PortNo,
        timestamp: Timestamp,
        frame: Frame,
    },
    PortStatsReply {
        dpid: Dpid,
        timestamp: Timestamp,
        stats: Vec<PortStatsEntry>,
    },
    PortDescReply {
        dpid: Dpid,
        timestamp: Timestamp,
        ports: Vec<PortDescription>,
    },
    EchoReply {
        dpid: Dpid,
        timestamp: Timestamp,
        payload: Vec<u8>,
    },
}

/// Discriminant of [`ControllerEvent`], used to build dispatch tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SwitchAttached,
    SwitchDetached,
    PortAdded,
    PortRemoved,
    LinkAdded,
    LinkDeleted,
    HostAdded,
    HostRemoved,
    PacketIn,
    PortStatsReply,
    PortDescReply,
    EchoReply,
}

impl ControllerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ControllerEvent::SwitchAttached { .. } => EventKind::SwitchAttached,
            ControllerEvent::SwitchDetached { .. } => EventKind::SwitchDetached,
            ControllerEvent::PortAdded { .. } => EventKind::PortAdded,
            ControllerEvent::PortRemoved { .. } => EventKind::PortRemoved,
            ControllerEvent::LinkAdded { .. } => EventKind::LinkAdded,
            ControllerEvent::LinkDeleted { .. } => EventKind::LinkDeleted,
            ControllerEvent::HostAdded { .. } => EventKind::HostAdded,
            ControllerEvent::HostRemoved { .. } => EventKind::HostRemoved,
            ControllerEvent::PacketIn { .. } => EventKind::PacketIn,
            ControllerEvent::PortStatsReply { .. } => EventKind::PortStatsReply,
            ControllerEvent::PortDescReply { .. } => EventKind::PortDescReply,
            ControllerEvent::EchoReply { .. } => EventKind::EchoReply,
        }
    }

    /// Switch the event originates from or refers to, if a single one
    pub fn dpid(&self) -> Option<Dpid> {
        match self {
            ControllerEvent::SwitchAttached { dpid }
            | ControllerEvent::SwitchDetached { dpid }
            | ControllerEvent::PacketIn { dpid, .. }
            | ControllerEvent::PortStatsReply { dpid, .. }
            | ControllerEvent::PortDescReply { dpid, .. }
            | ControllerEvent::EchoReply { dpid, .. } => Some(*dpid),
            ControllerEvent::PortAdded { port }
            | ControllerEvent::PortRemoved { port }
            | ControllerEvent::HostAdded { port, .. } => Some(port.dpid),
            ControllerEvent::LinkAdded { .. }
            | ControllerEvent::LinkDeleted { .. }
            | ControllerEvent::HostRemoved { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LldpFrame;

    #[test]
    fn test_event_json_shape() {
        let json = r#"{
            "event": "packet_in",
            "dpid": 2,
            "in_port": 3,
            "timestamp": 100.5,
            "frame": { "type": "lldp", "chassis_id": "dpid:0000000000000001", "port_id": [0, 0, 0, 1] }
        }"#;
        let event: ControllerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), EventKind::PacketIn);
        assert_eq!(event.dpid(), Some(Dpid(2)));
        match event {
            ControllerEvent::PacketIn { frame, .. } => assert_eq!(
                frame,
                Frame::Lldp(LldpFrame {
                    chassis_id: "dpid:0000000000000001".to_string(),
                    port_id: vec![0, 0, 0, 1],
                })
            ),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_host_added_defaults_ipv4() {
        let json = r#"{"event": "host_added", "mac": "00:00:00:00:00:01",
                       "port": {"dpid": 1, "port_no": 1}}"#;
        let event: ControllerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ControllerEvent::HostAdded {
                mac: "00:00:00:00:00:01".parse().unwrap(),
                port: PortKey::new(1, 1),
                ipv4: vec![],
            }
        );
    }

    #[test]
    fn test_link_events_have_no_single_dpid() {
        let link = LinkKey::new(PortKey::new(1, 1), PortKey::new(2, 1));
        assert_eq!(ControllerEvent::LinkAdded { link }.dpid(), None);
        assert_eq!(
            ControllerEvent::PortRemoved {
                port: PortKey::new(7, 1)
            }
            .dpid(),
            Some(Dpid(7))
        );
    }
}
