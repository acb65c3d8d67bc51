//! Host Discovery Service
//!
//! Resolves the configured address pool with controller-originated ARP
//! requests and learns hosts from the unicast replies:
//! - One probing task per attached switch, replaced on re-attach
//! - A one-off probe out of a newly reported host's port, cancelled with its switch
//! - ARP proxying for the controller's own address
//! - ARP from switches that are no longer attached is dropped
//! - Eviction when a switch leaves or a host is invalidated

pub mod ip_pool;

use anyhow::Result;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument, warn};

use sdnmon_shared::snapshot::HostRecord;
use sdnmon_shared::{
    ArpFrame, ArpOp, ControlCommand, ControllerEvent, Dpid, EventKind, FlowMatch, FlowRule, Frame,
    MacAddr, OutputPort, PortKey, PortNo,
};

use super::{Service, ServiceFuture, ServiceHealth, install_flow, send_or_log, stagger};
use crate::config::ControllerConfig;
use crate::control::{AttachmentLookup, ControlPlane, TopologyView};
use crate::tasks::TaskRegistry;
use crate::utils::locks;

pub use ip_pool::parse_ip_pool;

const SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::SwitchAttached,
    EventKind::SwitchDetached,
    EventKind::HostAdded,
    EventKind::HostRemoved,
    EventKind::PacketIn,
];

/// The three mutually consistent discovery tables
#[derive(Debug, Default)]
struct ArpTables {
    arp: HashMap<Ipv4Addr, MacAddr>,
    reverse: HashMap<MacAddr, Ipv4Addr>,
    attachment: HashMap<MacAddr, PortKey>,
}

impl ArpTables {
    /// Record `ip is-at mac`, seen on `port`, dropping any mapping it supersedes
    fn learn(&mut self, ip: Ipv4Addr, mac: MacAddr, port: PortKey) {
        if let Some(old_mac) = self.arp.get(&ip).copied().filter(|old| *old != mac) {
            self.reverse.remove(&old_mac);
            self.attachment.remove(&old_mac);
        }
        if let Some(old_ip) = self.reverse.get(&mac).copied().filter(|old| *old != ip) {
            self.arp.remove(&old_ip);
        }
        self.arp.insert(ip, mac);
        self.reverse.insert(mac, ip);
        self.attachment.insert(mac, port);
    }

    fn forget_mac(&mut self, mac: MacAddr) -> bool {
        let attached = self.attachment.remove(&mac).is_some();
        let resolved = match self.reverse.remove(&mac) {
            Some(ip) => {
                if self.arp.get(&ip) == Some(&mac) {
                    self.arp.remove(&ip);
                }
                true
            }
            None => false,
        };
        attached || resolved
    }

    /// Forget every host attached to `dpid`; returns how many were dropped
    fn forget_switch(&mut self, dpid: Dpid) -> usize {
        let macs: Vec<MacAddr> = self
            .attachment
            .iter()
            .filter(|(_, port)| port.dpid == dpid)
            .map(|(mac, _)| *mac)
            .collect();
        for mac in &macs {
            self.forget_mac(*mac);
        }
        macs.len()
    }

    fn hosts(&self) -> Vec<HostRecord> {
        let mut hosts: Vec<HostRecord> = self
            .arp
            .iter()
            .filter_map(|(ip, mac)| {
                self.attachment.get(mac).map(|port| HostRecord {
                    ip: *ip,
                    mac: *mac,
                    attachment: *port,
                })
            })
            .collect();
        hosts.sort_by_key(|host| host.ip);
        hosts
    }
}

/// State shared with the per-switch probing tasks
struct DiscoveryInner {
    config: Arc<ControllerConfig>,
    control: Arc<dyn ControlPlane>,
    topology: Arc<dyn TopologyView>,
    pool: Vec<Ipv4Addr>,
    tables: RwLock<ArpTables>,
}

impl DiscoveryInner {
    /// Send one ARP request per target out of `out_port`, staggered
    async fn probe_round(&self, dpid: Dpid, out_port: OutputPort, targets: &[Ipv4Addr]) {
        let mut sent = 0usize;
        for target in targets {
            let frame = ArpFrame::request(
                self.config.controller_mac,
                self.config.controller_ip,
                *target,
            );
            if send_or_log(
                self.control.as_ref(),
                ControlCommand::PacketOut {
                    dpid,
                    frame: Frame::Arp(frame),
                    out_port,
                },
            ) {
                sent += 1;
            }
            stagger(self.config.probe_stagger).await;
        }
        debug!(%dpid, ?out_port, sent, "ARP probe round finished");
    }

    fn table_is_empty(&self) -> bool {
        locks::read(&self.tables).arp.is_empty()
    }

    /// Install the ARP flow, then probe the pool through `dpid` forever
    async fn probe_loop(self: Arc<Self>, dpid: Dpid) {
        let rule = FlowRule {
            priority: self.config.flow_priority,
            matches: FlowMatch::ArpTarget {
                ip: self.config.controller_ip,
            },
            output: OutputPort::Controller,
        };
        // Probing still goes out; replies may just not reach us yet
        let _ = install_flow(
            self.control.as_ref(),
            dpid,
            rule,
            &self.config.flow_install_retry,
            "install ARP flow",
        )
        .await;

        loop {
            self.probe_round(dpid, OutputPort::Flood, &self.pool).await;
            let wait = if self.table_is_empty() {
                self.config.empty_table_probe_interval
            } else {
                self.config.arp_refresh
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Host Discovery Service publishing the attachment table
pub struct HostDiscoveryService {
    inner: Arc<DiscoveryInner>,
    tasks: TaskRegistry<Dpid>,
    host_probes: TaskRegistry<PortKey>,
}

impl HostDiscoveryService {
    /// Create a new host discovery service
    pub fn new(
        config: Arc<ControllerConfig>,
        control: Arc<dyn ControlPlane>,
        topology: Arc<dyn TopologyView>,
    ) -> Self {
        let pool = parse_ip_pool(&config.ip_pool);
        if pool.is_empty() {
            warn!("Discovery IP pool is empty; hosts are only learned passively");
        } else {
            info!(addresses = pool.len(), "Discovery IP pool parsed");
        }
        Self {
            inner: Arc::new(DiscoveryInner {
                config,
                control,
                topology,
                pool,
                tables: RwLock::new(ArpTables::default()),
            }),
            tasks: TaskRegistry::new(),
            host_probes: TaskRegistry::new(),
        }
    }

    /// Addresses probed on every round
    pub fn pool(&self) -> &[Ipv4Addr] {
        &self.inner.pool
    }

    /// Current IP -> MAC table
    pub fn arp_table(&self) -> HashMap<Ipv4Addr, MacAddr> {
        locks::read(&self.inner.tables).arp.clone()
    }

    pub fn resolve(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        locks::read(&self.inner.tables).arp.get(&ip).copied()
    }

    pub fn ip_of(&self, mac: MacAddr) -> Option<Ipv4Addr> {
        locks::read(&self.inner.tables).reverse.get(&mac).copied()
    }

    pub fn attachment_of(&self, mac: MacAddr) -> Option<PortKey> {
        locks::read(&self.inner.tables).attachment.get(&mac).copied()
    }

    /// Whether a probing task is registered for `dpid`
    pub fn is_probing(&self, dpid: Dpid) -> bool {
        self.tasks.contains(&dpid)
    }

    /// Whether any table entry references `dpid`
    pub fn references_switch(&self, dpid: Dpid) -> bool {
        locks::read(&self.inner.tables)
            .attachment
            .values()
            .any(|port| port.dpid == dpid)
    }

    #[instrument(skip(self), fields(service = "host_discovery"))]
    fn on_switch_attached(&self, dpid: Dpid) {
        let inner = self.inner.clone();
        self.tasks.replace(dpid, tokio::spawn(inner.probe_loop(dpid)));
        info!(%dpid, "Started ARP probing");
    }

    fn on_switch_detached(&self, dpid: Dpid) {
        self.tasks.cancel(&dpid);
        self.host_probes.cancel_where(|port| port.dpid == dpid);
        let evicted = locks::write(&self.inner.tables).forget_switch(dpid);
        info!(%dpid, evicted, "Stopped ARP probing");
    }

    /// Probe a newly reported host right away instead of waiting a full cycle
    fn on_host_added(&self, mac: MacAddr, port: PortKey, ipv4: &[Ipv4Addr]) {
        if !self.inner.topology.is_switch_live(port.dpid) {
            debug!(%mac, %port, "Host reported on a detached switch");
            return;
        }
        let targets: Vec<Ipv4Addr> = {
            let tables = locks::read(&self.inner.tables);
            if tables.reverse.contains_key(&mac) {
                return;
            }
            if ipv4.is_empty() {
                self.inner.pool.clone()
            } else {
                ipv4.iter()
                    .filter(|ip| !tables.arp.contains_key(*ip))
                    .copied()
                    .collect()
            }
        };
        if targets.is_empty() {
            return;
        }
        debug!(%mac, %port, targets = targets.len(), "Probing new host");
        let inner = self.inner.clone();
        self.host_probes.replace(
            port,
            tokio::spawn(async move {
                inner
                    .probe_round(port.dpid, OutputPort::Port(port.port_no), &targets)
                    .await;
            }),
        );
    }

    fn on_host_removed(&self, mac: MacAddr) {
        if locks::write(&self.inner.tables).forget_mac(mac) {
            info!(%mac, "Host invalidated");
        }
    }

    fn on_arp(&self, dpid: Dpid, in_port: PortNo, frame: &ArpFrame) {
        if !self.inner.topology.is_switch_live(dpid) {
            return;
        }
        if !frame.eth_dst.is_broadcast() {
            // Unicast ARP is a reply to one of our probes
            let port = PortKey::new(dpid, in_port);
            let mut tables = locks::write(&self.inner.tables);
            let known = tables.arp.get(&frame.sender_ip) == Some(&frame.sender_mac)
                && tables.attachment.get(&frame.sender_mac) == Some(&port);
            tables.learn(frame.sender_ip, frame.sender_mac, port);
            if !known {
                info!(ip = %frame.sender_ip, mac = %frame.sender_mac, %port, "Learned host");
            }
            return;
        }

        if frame.op == ArpOp::Request && frame.target_ip == self.inner.config.controller_ip {
            let reply = ArpFrame::reply(
                self.inner.config.controller_mac,
                self.inner.config.controller_ip,
                frame.eth_src,
                frame.sender_ip,
            );
            debug!(%dpid, asker = %frame.sender_ip, "Answering ARP for the controller");
            send_or_log(
                self.inner.control.as_ref(),
                ControlCommand::PacketOut {
                    dpid,
                    frame: Frame::Arp(reply),
                    out_port: OutputPort::Port(in_port),
                },
            );
        }
    }
}

impl AttachmentLookup for HostDiscoveryService {
    fn hosts(&self) -> Vec<HostRecord> {
        locks::read(&self.inner.tables).hosts()
    }

    fn is_resolved(&self, ip: Ipv4Addr) -> bool {
        locks::read(&self.inner.tables).arp.contains_key(&ip)
    }
}

impl Service for HostDiscoveryService {
    fn name(&self) -> &'static str {
        "host_discovery"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn handle_event<'a>(&'a self, event: &'a ControllerEvent) -> ServiceFuture<'a> {
        Box::pin(async move {
            match event {
                ControllerEvent::SwitchAttached { dpid } => self.on_switch_attached(*dpid),
                ControllerEvent::SwitchDetached { dpid } => self.on_switch_detached(*dpid),
                ControllerEvent::HostAdded { mac, port, ipv4 } => {
                    self.on_host_added(*mac, *port, ipv4)
                }
                ControllerEvent::HostRemoved { mac } => self.on_host_removed(*mac),
                ControllerEvent::PacketIn {
                    dpid,
                    in_port,
                    frame: Frame::Arp(arp),
                    ..
                } => self.on_arp(*dpid, *in_port, arp),
                _ => {}
            }
            Ok(())
        })
    }

    fn start(&self) -> Result<()> {
        // Probing is driven by switch attach events
        Ok(())
    }

    fn shutdown(&self) -> ServiceFuture<'_> {
        Box::pin(async move {
            info!("Shutting down host discovery service");
            self.tasks.cancel_all();
            self.host_probes.cancel_all();
            Ok(())
        })
    }

    fn health_check(&self) -> ServiceHealth {
        ServiceHealth::Healthy
    }
}
