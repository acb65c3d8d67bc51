//! Host Delay Service
//!
//! Pings every discovered host from the controller's decoy identity, out of
//! the host's attachment port. The round trip measured at the controller
//! includes the controller-to-switch leg, so the ingress switch's echo
//! latency is subtracted to leave the switch-to-host delay.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, trace};

use sdnmon_shared::snapshot::{HostDelayRecord, HostRecord};
use sdnmon_shared::{
    ControlCommand, ControllerEvent, Dpid, EventKind, FlowMatch, FlowRule, Frame, IcmpEchoFrame,
    MacAddr, OutputPort, Timestamp, now_timestamp,
};

use super::{Service, ServiceFuture, ServiceHealth, install_flow, send_or_log, stagger};
use crate::config::ControllerConfig;
use crate::control::{AttachmentLookup, ControlPlane, EchoLatencyLookup, TopologyView};
use crate::history::{SampleHistory, jitter_of};
use crate::probe_token;
use crate::tasks::TaskRegistry;
use crate::utils::locks;

const SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::SwitchAttached,
    EventKind::SwitchDetached,
    EventKind::HostRemoved,
    EventKind::PacketIn,
];

/// Switch-to-host delay from a ping round trip.
///
/// `echo_latency` is the controller-to-switch round trip; unknown counts as
/// zero. Never negative.
pub fn host_delay(arrival: Timestamp, sent: Timestamp, echo_latency: Option<f64>) -> f64 {
    let echo = echo_latency.filter(|e| e.is_finite()).unwrap_or(0.0);
    (arrival - sent - echo).max(0.0)
}

#[derive(Debug, Default)]
struct HostDelayState {
    delay: HashMap<Ipv4Addr, f64>,
    jitter: HashMap<Ipv4Addr, f64>,
    history: SampleHistory<Ipv4Addr, f64>,
    /// Host MAC and ingress switch of the latest reply
    origin: HashMap<Ipv4Addr, (MacAddr, Dpid)>,
}

impl HostDelayState {
    fn record(&mut self, ip: Ipv4Addr, mac: MacAddr, dpid: Dpid, delay: f64, samples: usize) {
        self.delay.insert(ip, delay);
        self.origin.insert(ip, (mac, dpid));
        self.history.record(ip, delay, samples);
        if let Some(jitter) = jitter_of(&self.history, &ip) {
            self.jitter.insert(ip, jitter);
        }
    }

    fn forget(&mut self, ip: &Ipv4Addr) {
        self.delay.remove(ip);
        self.jitter.remove(ip);
        self.history.remove(ip);
        self.origin.remove(ip);
    }

    /// Keep only the addresses in `known`; returns how many were dropped
    fn retain(&mut self, known: &HashSet<Ipv4Addr>) -> usize {
        let stale: Vec<Ipv4Addr> = self
            .delay
            .keys()
            .chain(self.origin.keys())
            .chain(self.history.keys())
            .filter(|ip| !known.contains(*ip))
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for ip in &stale {
            self.forget(ip);
        }
        stale.len()
    }

    fn ips_where(&self, mut pred: impl FnMut(MacAddr, Dpid) -> bool) -> Vec<Ipv4Addr> {
        self.origin
            .iter()
            .filter(|(_, (mac, dpid))| pred(*mac, *dpid))
            .map(|(ip, _)| *ip)
            .collect()
    }
}

struct HostDelayInner {
    config: Arc<ControllerConfig>,
    control: Arc<dyn ControlPlane>,
    topology: Arc<dyn TopologyView>,
    attachments: Arc<dyn AttachmentLookup>,
    echo: Arc<dyn EchoLatencyLookup>,
    state: RwLock<HostDelayState>,
}

impl HostDelayInner {
    /// Drop measurements for hosts discovery no longer knows
    fn prune(&self, hosts: &[HostRecord]) {
        let known: HashSet<Ipv4Addr> = hosts.iter().map(|h| h.ip).collect();
        let dropped = locks::write(&self.state).retain(&known);
        if dropped > 0 {
            debug!(dropped, "Pruned host delay entries");
        }
    }

    fn ping(&self, host: &HostRecord) -> bool {
        let frame = IcmpEchoFrame {
            eth_src: self.config.controller_mac,
            eth_dst: host.mac,
            ip_src: self.config.controller_ip,
            ip_dst: host.ip,
            is_reply: false,
            payload: probe_token::encode(now_timestamp()),
        };
        send_or_log(
            self.control.as_ref(),
            ControlCommand::PacketOut {
                dpid: host.attachment.dpid,
                frame: Frame::IcmpEcho(frame),
                out_port: OutputPort::Port(host.attachment.port_no),
            },
        )
    }

    async fn poll_once(&self) {
        let hosts = self.attachments.hosts();
        self.prune(&hosts);
        for host in &hosts {
            if self.topology.is_switch_live(host.attachment.dpid) {
                self.ping(host);
            }
            stagger(self.config.probe_stagger).await;
        }
        trace!(hosts = hosts.len(), "Host ping round finished");
    }

    async fn monitor_loop(self: Arc<Self>) {
        loop {
            self.poll_once().await;
            tokio::time::sleep(self.config.monitor_period).await;
        }
    }

    async fn install_icmp_flow(self: Arc<Self>, dpid: Dpid) {
        let rule = FlowRule {
            priority: self.config.flow_priority,
            matches: FlowMatch::IcmpDestination {
                ip: self.config.controller_ip,
            },
            output: OutputPort::Controller,
        };
        let _ = install_flow(
            self.control.as_ref(),
            dpid,
            rule,
            &self.config.flow_install_retry,
            "install ICMP flow",
        )
        .await;
    }
}

/// Host Delay Service publishing per-host delay and jitter
pub struct HostDelayService {
    inner: Arc<HostDelayInner>,
    monitor: TaskRegistry<&'static str>,
    flow_installs: TaskRegistry<Dpid>,
    started: AtomicBool,
}

impl HostDelayService {
    /// Create a new host delay service
    pub fn new(
        config: Arc<ControllerConfig>,
        control: Arc<dyn ControlPlane>,
        topology: Arc<dyn TopologyView>,
        attachments: Arc<dyn AttachmentLookup>,
        echo: Arc<dyn EchoLatencyLookup>,
    ) -> Self {
        Self {
            inner: Arc::new(HostDelayInner {
                config,
                control,
                topology,
                attachments,
                echo,
                state: RwLock::new(HostDelayState::default()),
            }),
            monitor: TaskRegistry::new(),
            flow_installs: TaskRegistry::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Run one monitor cycle: prune departed hosts, then ping the rest
    pub async fn poll_once(&self) {
        self.inner.poll_once().await;
    }

    pub fn delay(&self, ip: Ipv4Addr) -> Option<f64> {
        locks::read(&self.inner.state).delay.get(&ip).copied()
    }

    pub fn jitter(&self, ip: Ipv4Addr) -> Option<f64> {
        locks::read(&self.inner.state).jitter.get(&ip).copied()
    }

    /// Published delay and jitter per host, sorted by address
    pub fn host_delays(&self) -> Vec<HostDelayRecord> {
        let state = locks::read(&self.inner.state);
        let mut records: Vec<HostDelayRecord> = state
            .delay
            .iter()
            .map(|(ip, delay)| HostDelayRecord {
                ip: *ip,
                delay: *delay,
                jitter: state
                    .jitter
                    .get(ip)
                    .copied()
                    .filter(|j| j.is_finite()),
            })
            .collect();
        records.sort_by_key(|r| r.ip);
        records
    }

    /// Whether any entry was measured through `dpid`
    pub fn references_switch(&self, dpid: Dpid) -> bool {
        locks::read(&self.inner.state)
            .origin
            .values()
            .any(|(_, origin)| *origin == dpid)
    }

    fn on_switch_attached(&self, dpid: Dpid) {
        let inner = self.inner.clone();
        self.flow_installs
            .replace(dpid, tokio::spawn(inner.install_icmp_flow(dpid)));
    }

    fn on_switch_detached(&self, dpid: Dpid) {
        self.flow_installs.cancel(&dpid);
        let attached: Vec<Ipv4Addr> = self
            .inner
            .attachments
            .hosts()
            .into_iter()
            .filter(|h| h.attachment.dpid == dpid)
            .map(|h| h.ip)
            .collect();
        let mut state = locks::write(&self.inner.state);
        let mut stale = state.ips_where(|_, origin| origin == dpid);
        stale.extend(attached);
        for ip in &stale {
            state.forget(ip);
        }
    }

    fn on_host_removed(&self, mac: MacAddr) {
        let attached: Vec<Ipv4Addr> = self
            .inner
            .attachments
            .hosts()
            .into_iter()
            .filter(|h| h.mac == mac)
            .map(|h| h.ip)
            .collect();
        let mut state = locks::write(&self.inner.state);
        let mut stale = state.ips_where(|origin, _| origin == mac);
        stale.extend(attached);
        for ip in &stale {
            state.forget(ip);
        }
    }

    fn on_icmp(&self, dpid: Dpid, arrival: Timestamp, frame: &IcmpEchoFrame) {
        if !frame.is_reply || frame.eth_dst != self.inner.config.controller_mac {
            return;
        }
        let Some(sent) = probe_token::decode(&frame.payload) else {
            trace!(ip = %frame.ip_src, "ICMP reply without a send-time token");
            return;
        };
        let inner = &self.inner;
        if !inner.topology.is_switch_live(dpid) || !inner.attachments.is_resolved(frame.ip_src) {
            return;
        }
        let delay = host_delay(arrival, sent, inner.echo.echo_latency(dpid));
        locks::write(&inner.state).record(
            frame.ip_src,
            frame.eth_src,
            dpid,
            delay,
            inner.config.monitor_samples,
        );
        trace!(ip = %frame.ip_src, delay, "Host delay");
    }
}

impl Service for HostDelayService {
    fn name(&self) -> &'static str {
        "host_delay"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn handle_event<'a>(&'a self, event: &'a ControllerEvent) -> ServiceFuture<'a> {
        Box::pin(async move {
            match event {
                ControllerEvent::SwitchAttached { dpid } => self.on_switch_attached(*dpid),
                ControllerEvent::SwitchDetached { dpid } => self.on_switch_detached(*dpid),
                ControllerEvent::HostRemoved { mac } => self.on_host_removed(*mac),
                ControllerEvent::PacketIn {
                    dpid,
                    timestamp,
                    frame: Frame::IcmpEcho(icmp),
                    ..
                } => self.on_icmp(*dpid, *timestamp, icmp),
                _ => {}
            }
            Ok(())
        })
    }

    fn start(&self) -> Result<()> {
        let inner = self.inner.clone();
        self.monitor
            .replace("monitor", tokio::spawn(inner.monitor_loop()));
        self.started.store(true, Ordering::SeqCst);
        info!(period = ?self.inner.config.monitor_period, "Host delay monitor started");
        Ok(())
    }

    fn shutdown(&self) -> ServiceFuture<'_> {
        Box::pin(async move {
            info!("Shutting down host delay service");
            self.monitor.cancel_all();
            self.flow_installs.cancel_all();
            Ok(())
        })
    }

    fn health_check(&self) -> ServiceHealth {
        ServiceHealth::of_monitor_loop(
            self.started.load(Ordering::SeqCst),
            self.monitor.active_count() > 0,
        )
    }
}
