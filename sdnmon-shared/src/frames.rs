//! Frames exchanged with switches, in decoded form.
//!
//! Encoding to and from raw bytes belongs to the protocol stack. The engine
//! only ever sees and builds these values.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::MacAddr;

/// ARP operation code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArpOp {
    Request,
    Reply,
}

/// Ethernet + ARP frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpFrame {
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    pub op: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpFrame {
    /// Broadcast who-has `target_ip`, asked on behalf of `(mac, ip)`.
    pub fn request(mac: MacAddr, ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            eth_src: mac,
            eth_dst: MacAddr::BROADCAST,
            op: ArpOp::Request,
            sender_mac: mac,
            sender_ip: ip,
            target_mac: MacAddr::BROADCAST,
            target_ip,
        }
    }

    /// Unicast `ip is-at mac`, addressed to `(dst_mac, dst_ip)`.
    pub fn reply(mac: MacAddr, ip: Ipv4Addr, dst_mac: MacAddr, dst_ip: Ipv4Addr) -> Self {
        Self {
            eth_src: mac,
            eth_dst: dst_mac,
            op: ArpOp::Reply,
            sender_mac: mac,
            sender_ip: ip,
            target_mac: dst_mac,
            target_ip: dst_ip,
        }
    }
}

/// LLDP frame as carried by the topology service's link discovery.
///
/// The TLVs are left raw: the chassis id is expected to read
/// `dpid:<16 hex digits>` and the port id to hold a big-endian port number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LldpFrame {
    pub chassis_id: String,
    pub port_id: Vec<u8>,
}

/// Ethernet + IPv4 + ICMP echo frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcmpEchoFrame {
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub is_reply: bool,
    pub payload: Vec<u8>,
}

/// Any frame the engine knows about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Arp(ArpFrame),
    Lldp(LldpFrame),
    IcmpEcho(IcmpEchoFrame),
    /// Anything the protocol stack could not classify
    Other,
}
