//! Link Delay Service
//!
//! Estimates the one-way delay of every switch-to-switch link. The LLDP
//! latency seen by the controller for a link includes the extra hop from the
//! receiving switch up to the controller; half of that switch's echo round
//! trip is subtracted to remove it.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, trace};

use sdnmon_shared::snapshot::LinkDelayRecord;
use sdnmon_shared::{
    ControlCommand, ControllerEvent, Dpid, EventKind, Frame, LinkKey, LldpFrame, PortKey,
    Timestamp, now_timestamp,
};

use super::{Service, ServiceFuture, ServiceHealth, send_or_log, stagger};
use crate::config::ControllerConfig;
use crate::control::{ControlPlane, EchoLatencyLookup, TopologyView};
use crate::history::{SampleHistory, jitter_of};
use crate::probe_token;
use crate::tasks::TaskRegistry;
use crate::utils::locks;

const SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::SwitchDetached,
    EventKind::LinkDeleted,
    EventKind::PacketIn,
    EventKind::EchoReply,
];

/// Ordered (src, dst) switch pair
pub type SwitchPair = (Dpid, Dpid);

/// One-way link delay from an LLDP latency and the receiving switch's echo RTT.
///
/// Never negative. Infinite when the echo latency is unknown.
pub fn one_way_delay(lldp_latency: f64, echo_latency: Option<f64>) -> f64 {
    match echo_latency {
        Some(echo) if echo.is_finite() => (lldp_latency - echo / 2.0).max(0.0),
        _ => f64::INFINITY,
    }
}

/// Sending port of an LLDP frame built by the topology service.
///
/// The chassis id must read `dpid:` followed by 16 hex digits and the port id
/// must be a 4-byte big-endian port number.
pub fn parse_lldp(frame: &LldpFrame) -> Option<PortKey> {
    let hex = frame.chassis_id.strip_prefix("dpid:")?;
    if hex.len() != 16 {
        return None;
    }
    let dpid = u64::from_str_radix(hex, 16).ok()?;
    let port_no = u32::from_be_bytes(frame.port_id.as_slice().try_into().ok()?);
    Some(PortKey::new(dpid, port_no))
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

#[derive(Debug, Default)]
struct DelayState {
    lldp_latency: HashMap<SwitchPair, f64>,
    echo_latency: HashMap<Dpid, f64>,
    delay: HashMap<SwitchPair, f64>,
    jitter: HashMap<SwitchPair, f64>,
    history: SampleHistory<SwitchPair, f64>,
}

impl DelayState {
    fn recompute(&mut self, samples: usize) -> usize {
        let pairs: Vec<(SwitchPair, f64)> =
            self.lldp_latency.iter().map(|(k, v)| (*k, *v)).collect();
        for (pair, lldp) in &pairs {
            let delay = one_way_delay(*lldp, self.echo_latency.get(&pair.1).copied());
            self.delay.insert(*pair, delay);
            self.history.record(*pair, delay, samples);
            if let Some(jitter) = jitter_of(&self.history, pair) {
                self.jitter.insert(*pair, jitter);
            }
        }
        pairs.len()
    }

    fn forget_switch(&mut self, dpid: Dpid) {
        let touches = |pair: &SwitchPair| pair.0 == dpid || pair.1 == dpid;
        self.lldp_latency.retain(|pair, _| !touches(pair));
        self.delay.retain(|pair, _| !touches(pair));
        self.jitter.retain(|pair, _| !touches(pair));
        self.history.retain_keys(|pair| !touches(pair));
        self.echo_latency.remove(&dpid);
    }

    fn forget_pair(&mut self, pair: SwitchPair) {
        self.lldp_latency.remove(&pair);
        self.delay.remove(&pair);
        self.jitter.remove(&pair);
        self.history.remove(&pair);
    }
}

struct LinkDelayInner {
    config: Arc<ControllerConfig>,
    control: Arc<dyn ControlPlane>,
    topology: Arc<dyn TopologyView>,
    state: RwLock<DelayState>,
}

impl LinkDelayInner {
    async fn send_echo_requests(&self) {
        for dpid in self.topology.switches() {
            send_or_log(
                self.control.as_ref(),
                ControlCommand::EchoRequest {
                    dpid,
                    payload: probe_token::encode(now_timestamp()),
                },
            );
            stagger(self.config.probe_stagger).await;
        }
    }

    fn recompute_delays(&self) {
        let pairs = locks::write(&self.state).recompute(self.config.monitor_samples);
        trace!(pairs, "Recomputed link delays");
    }

    async fn poll_once(&self) {
        self.send_echo_requests().await;
        self.recompute_delays();
    }

    async fn monitor_loop(self: Arc<Self>) {
        loop {
            self.poll_once().await;
            tokio::time::sleep(self.config.monitor_period).await;
        }
    }
}

/// Link Delay Service publishing link delay, jitter and echo latency
pub struct LinkDelayService {
    inner: Arc<LinkDelayInner>,
    tasks: TaskRegistry<&'static str>,
    started: AtomicBool,
}

impl LinkDelayService {
    /// Create a new link delay service
    pub fn new(
        config: Arc<ControllerConfig>,
        control: Arc<dyn ControlPlane>,
        topology: Arc<dyn TopologyView>,
    ) -> Self {
        Self {
            inner: Arc::new(LinkDelayInner {
                config,
                control,
                topology,
                state: RwLock::new(DelayState::default()),
            }),
            tasks: TaskRegistry::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Run one monitor cycle: probe every switch, then recompute all delays
    pub async fn poll_once(&self) {
        self.inner.poll_once().await;
    }

    /// Recompute delays from the current latencies without probing
    pub fn recompute_delays(&self) {
        self.inner.recompute_delays();
    }

    pub fn lldp_latency(&self, src: Dpid, dst: Dpid) -> Option<f64> {
        locks::read(&self.inner.state)
            .lldp_latency
            .get(&(src, dst))
            .copied()
    }

    /// Current delay for a pair; infinite while it cannot be estimated
    pub fn delay(&self, src: Dpid, dst: Dpid) -> Option<f64> {
        locks::read(&self.inner.state).delay.get(&(src, dst)).copied()
    }

    pub fn jitter(&self, src: Dpid, dst: Dpid) -> Option<f64> {
        locks::read(&self.inner.state).jitter.get(&(src, dst)).copied()
    }

    /// Published delay and jitter per pair, sorted
    pub fn link_delays(&self) -> Vec<LinkDelayRecord> {
        let state = locks::read(&self.inner.state);
        let mut records: Vec<LinkDelayRecord> = state
            .delay
            .iter()
            .map(|((src, dst), delay)| LinkDelayRecord {
                src: *src,
                dst: *dst,
                delay: finite(*delay),
                jitter: state.jitter.get(&(*src, *dst)).copied().and_then(finite),
            })
            .collect();
        records.sort_by_key(|r| (r.src, r.dst));
        records
    }

    /// Whether any map still holds a key referencing `dpid`
    pub fn references_switch(&self, dpid: Dpid) -> bool {
        let state = locks::read(&self.inner.state);
        let touches = |pair: &SwitchPair| pair.0 == dpid || pair.1 == dpid;
        state.echo_latency.contains_key(&dpid)
            || state.lldp_latency.keys().any(touches)
            || state.delay.keys().any(touches)
            || state.jitter.keys().any(touches)
            || state.history.keys().any(touches)
    }

    fn on_lldp(&self, dpid: Dpid, arrival: Timestamp, frame: &LldpFrame) {
        let Some(src) = parse_lldp(frame) else {
            trace!(%dpid, "Ignoring unrecognised LLDP payload");
            return;
        };
        let topology = &self.inner.topology;
        if !topology.is_switch_live(dpid) {
            return;
        }
        let Some(sent) = topology.lldp_send_timestamp(src) else {
            trace!(port = %src, "No LLDP send time for port");
            return;
        };
        let latency = arrival - sent;
        locks::write(&self.inner.state)
            .lldp_latency
            .insert((src.dpid, dpid), latency);
        trace!(src = %src.dpid, dst = %dpid, latency, "LLDP latency");
    }

    fn on_echo_reply(&self, dpid: Dpid, arrival: Timestamp, payload: &[u8]) {
        let Some(sent) = probe_token::decode(payload) else {
            debug!(%dpid, "Echo reply without a send-time token");
            return;
        };
        if !self.inner.topology.is_switch_live(dpid) {
            return;
        }
        locks::write(&self.inner.state)
            .echo_latency
            .insert(dpid, arrival - sent);
    }

    fn on_switch_detached(&self, dpid: Dpid) {
        locks::write(&self.inner.state).forget_switch(dpid);
        debug!(%dpid, "Dropped link delay state for switch");
    }

    fn on_link_deleted(&self, link: LinkKey) {
        locks::write(&self.inner.state).forget_pair((link.src.dpid, link.dst.dpid));
    }
}

impl EchoLatencyLookup for LinkDelayService {
    fn echo_latency(&self, dpid: Dpid) -> Option<f64> {
        locks::read(&self.inner.state)
            .echo_latency
            .get(&dpid)
            .copied()
    }
}

impl Service for LinkDelayService {
    fn name(&self) -> &'static str {
        "link_delay"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn handle_event<'a>(&'a self, event: &'a ControllerEvent) -> ServiceFuture<'a> {
        Box::pin(async move {
            match event {
                ControllerEvent::PacketIn {
                    dpid,
                    timestamp,
                    frame: Frame::Lldp(lldp),
                    ..
                } => self.on_lldp(*dpid, *timestamp, lldp),
                ControllerEvent::EchoReply {
                    dpid,
                    timestamp,
                    payload,
                } => self.on_echo_reply(*dpid, *timestamp, payload),
                ControllerEvent::SwitchDetached { dpid } => self.on_switch_detached(*dpid),
                ControllerEvent::LinkDeleted { link } => self.on_link_deleted(*link),
                _ => {}
            }
            Ok(())
        })
    }

    fn start(&self) -> Result<()> {
        let inner = self.inner.clone();
        self.tasks
            .replace("monitor", tokio::spawn(inner.monitor_loop()));
        self.started.store(true, Ordering::SeqCst);
        info!(period = ?self.inner.config.monitor_period, "Link delay monitor started");
        Ok(())
    }

    fn shutdown(&self) -> ServiceFuture<'_> {
        Box::pin(async move {
            info!("Shutting down link delay service");
            self.tasks.cancel_all();
            Ok(())
        })
    }

    fn health_check(&self) -> ServiceHealth {
        ServiceHealth::of_monitor_loop(
            self.started.load(Ordering::SeqCst),
            self.tasks.active_count() > 0,
        )
    }
}
