//! Harness that drives a full [`Controller`] the way the bridge does.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use sdnmon_backend::config::ControllerConfig;
use sdnmon_backend::control::{ChannelControlPlane, TopologyCache};
use sdnmon_backend::controller::Controller;
use sdnmon_backend::probe_token;
use sdnmon_shared::{
    ArpFrame, ArpOp, ControlCommand, ControllerEvent, Dpid, Frame, IcmpEchoFrame, LinkKey,
    LldpFrame, MacAddr, PortDescription, PortKey, PortStatsEntry, Timestamp,
};

pub const CONTROLLER_MAC: MacAddr = MacAddr([0, 0, 0, 0, 0, 0xfe]);
pub const CONTROLLER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 254);

pub fn config() -> ControllerConfig {
    let mut config = ControllerConfig::new(CONTROLLER_MAC, CONTROLLER_IP);
    config.ip_pool = "10.0.0.1:10.0.0.3".to_string();
    config
}

pub struct Harness {
    pub controller: Controller,
    pub topology: Arc<TopologyCache>,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        let (control, commands) = ChannelControlPlane::new();
        let topology = Arc::new(TopologyCache::new());
        let controller = Controller::new(Arc::new(config), Arc::new(control), topology.clone());
        Self {
            controller,
            topology,
            commands,
        }
    }

    /// Update the topology cache, then deliver to the services
    pub async fn feed(&self, event: ControllerEvent) {
        self.topology.apply(&event);
        self.controller.handle_event(&event).await;
    }

    pub async fn attach(&self, dpids: &[u64]) {
        for dpid in dpids {
            self.feed(ControllerEvent::SwitchAttached { dpid: Dpid(*dpid) })
                .await;
        }
    }

    /// Let spawned probe and install tasks run
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    pub fn drain(&mut self) -> Vec<ControlCommand> {
        let mut sent = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            sent.push(command);
        }
        sent
    }
}

pub fn mac(last: u8) -> MacAddr {
    MacAddr([0, 0, 0, 0, 0, last])
}

pub fn host_ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

pub fn link(src: (u64, u32), dst: (u64, u32)) -> LinkKey {
    LinkKey::new(PortKey::new(src.0, src.1), PortKey::new(dst.0, dst.1))
}

/// LLDP frame sent from `src` arriving at switch `dst` on `in_port`
pub fn lldp_in(src: (u64, u32), dst: u64, in_port: u32, arrival: Timestamp) -> ControllerEvent {
    ControllerEvent::PacketIn {
        dpid: Dpid(dst),
        in_port,
        timestamp: arrival,
        frame: Frame::Lldp(LldpFrame {
            chassis_id: format!("dpid:{:016x}", src.0),
            port_id: src.1.to_be_bytes().to_vec(),
        }),
    }
}

pub fn echo_reply(dpid: u64, sent: Timestamp, arrival: Timestamp) -> ControllerEvent {
    ControllerEvent::EchoReply {
        dpid: Dpid(dpid),
        timestamp: arrival,
        payload: probe_token::encode(sent),
    }
}

/// ARP reply from a host answering one of the controller's probes
pub fn arp_reply(dpid: u64, in_port: u32, host: u8) -> ControllerEvent {
    ControllerEvent::PacketIn {
        dpid: Dpid(dpid),
        in_port,
        timestamp: 0.0,
        frame: Frame::Arp(ArpFrame {
            eth_src: mac(host),
            eth_dst: CONTROLLER_MAC,
            op: ArpOp::Reply,
            sender_mac: mac(host),
            sender_ip: host_ip(host),
            target_mac: CONTROLLER_MAC,
            target_ip: CONTROLLER_IP,
        }),
    }
}

pub fn icmp_reply(dpid: u64, host: u8, sent: Timestamp, arrival: Timestamp) -> ControllerEvent {
    ControllerEvent::PacketIn {
        dpid: Dpid(dpid),
        in_port: 1,
        timestamp: arrival,
        frame: Frame::IcmpEcho(IcmpEchoFrame {
            eth_src: mac(host),
            eth_dst: CONTROLLER_MAC,
            ip_src: host_ip(host),
            ip_dst: CONTROLLER_IP,
            is_reply: true,
            payload: probe_token::encode(sent),
        }),
    }
}

pub fn stats(port_no: u32, tx_packets: u64, rx_packets: u64, tx_bytes: u64, secs: u32) -> PortStatsEntry {
    PortStatsEntry {
        port_no,
        tx_packets,
        rx_packets,
        tx_bytes,
        duration_sec: secs,
        ..Default::default()
    }
}

pub fn stats_reply(dpid: u64, entries: Vec<PortStatsEntry>) -> ControllerEvent {
    ControllerEvent::PortStatsReply {
        dpid: Dpid(dpid),
        timestamp: 0.0,
        stats: entries,
    }
}

/// Port description advertising `speed_kbps` as the current link speed
pub fn desc_reply(dpid: u64, port_no: u32, speed_kbps: u32) -> ControllerEvent {
    ControllerEvent::PortDescReply {
        dpid: Dpid(dpid),
        timestamp: 0.0,
        ports: vec![PortDescription {
            port_no,
            curr_speed: speed_kbps,
            ..Default::default()
        }],
    }
}
