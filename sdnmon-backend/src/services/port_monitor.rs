//! Port Monitor Service
//!
//! This service polls port descriptions and statistics from every switch:
//! - Port state and capacity from description replies
//! - Up/down throughput from counter deltas over the reported port duration
//! - Free bandwidth per direction against the port's capacity
//! - Packet loss inferred between the two ends of each known link

use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, trace};

use sdnmon_shared::snapshot::{
    LossRecord, PortConfigState, PortFeatures, PortLinkState, PortRecord,
};
use sdnmon_shared::{
    ControlCommand, ControllerEvent, Dpid, EventKind, LinkKey, OFPP_LOCAL, PortDescription,
    PortKey, PortStatsEntry,
};

use super::{Service, ServiceFuture, ServiceHealth, send_or_log, stagger};
use crate::config::ControllerConfig;
use crate::control::{ControlPlane, TopologyView};
use crate::history::SampleHistory;
use crate::tasks::TaskRegistry;
use crate::utils::locks;

const SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::SwitchDetached,
    EventKind::PortRemoved,
    EventKind::LinkAdded,
    EventKind::LinkDeleted,
    EventKind::PortStatsReply,
    EventKind::PortDescReply,
];

/// Up and down throughput in bytes per second
pub type PortSpeed = (f64, f64);

fn port_duration(entry: &PortStatsEntry) -> f64 {
    f64::from(entry.duration_sec) + f64::from(entry.duration_nsec) / 1e9
}

/// Throughput between two counter samples of the same port.
///
/// The period comes from the counters' own duration fields. Counters that went
/// backwards count as no traffic; a non-positive period yields zero speed.
pub fn port_speed(previous: &PortStatsEntry, current: &PortStatsEntry) -> PortSpeed {
    let period = port_duration(current) - port_duration(previous);
    if period <= 0.0 {
        return (0.0, 0.0);
    }
    let up = current.tx_bytes.saturating_sub(previous.tx_bytes) as f64 / period;
    let down = current.rx_bytes.saturating_sub(previous.rx_bytes) as f64 / period;
    (up, down)
}

/// Free (up, down) bandwidth in Mbit/s, within `[0, capacity]`
pub fn free_bandwidth(capacity_mbps: f64, speed: PortSpeed) -> (f64, f64) {
    let capacity = capacity_mbps.max(0.0);
    let free = |bytes_per_sec: f64| {
        let used = bytes_per_sec * 8.0 / 1e6;
        (capacity - used).clamp(0.0, capacity)
    };
    (free(speed.0), free(speed.1))
}

/// Fraction of packets sent by one end that the other end did not receive.
///
/// Cumulative counters are compared directly, so this is an approximation:
/// the two switches may have reset their counters at different times. No
/// transmissions count as total loss.
pub fn loss_rate(tx_packets: u64, rx_packets: u64) -> f64 {
    if tx_packets == 0 {
        return 1.0;
    }
    let tx = tx_packets as f64;
    ((tx - rx_packets as f64) / tx).clamp(0.0, 1.0)
}

fn features_of(desc: &PortDescription) -> PortFeatures {
    PortFeatures {
        config_state: PortConfigState::from_bits(desc.config),
        link_state: PortLinkState::from_bits(desc.state),
        capacity_mbps: f64::from(desc.curr_speed) / 1e3,
    }
}

#[derive(Debug, Default)]
struct PortState {
    features: HashMap<PortKey, PortFeatures>,
    stats: SampleHistory<PortKey, PortStatsEntry>,
    speed: SampleHistory<PortKey, PortSpeed>,
    free_bandwidth: HashMap<PortKey, (f64, f64)>,
    /// Directed link ends: sending port -> receiving port
    link_ports: HashMap<PortKey, PortKey>,
    loss_rate: HashMap<LinkKey, f64>,
}

impl PortState {
    fn record_stats(&mut self, port: PortKey, entry: &PortStatsEntry, samples: usize) {
        self.stats.record(port, entry.clone(), samples);
        let speed = match self.stats.latest(&port, 2).as_slice() {
            [previous, current] => port_speed(previous, current),
            _ => return,
        };
        self.speed.record(port, speed, samples);
        if let Some(features) = self.features.get(&port) {
            self.free_bandwidth
                .insert(port, free_bandwidth(features.capacity_mbps, speed));
        }
    }

    /// Recompute loss for every link with an end on `dpid`
    fn recompute_loss(&mut self, dpid: Dpid) {
        let links: Vec<LinkKey> = self
            .link_ports
            .iter()
            .map(|(src, dst)| LinkKey::new(*src, *dst))
            .filter(|link| link.touches_switch(dpid))
            .collect();
        for link in links {
            let tx = self.stats.last(&link.src).map(|s| s.tx_packets);
            let rx = self.stats.last(&link.dst).map(|s| s.rx_packets);
            if let (Some(tx), Some(rx)) = (tx, rx) {
                self.loss_rate.insert(link, loss_rate(tx, rx));
            }
        }
    }

    fn forget_switch(&mut self, dpid: Dpid) {
        self.features.retain(|port, _| port.dpid != dpid);
        self.stats.retain_keys(|port| port.dpid != dpid);
        self.speed.retain_keys(|port| port.dpid != dpid);
        self.free_bandwidth.retain(|port, _| port.dpid != dpid);
        self.link_ports
            .retain(|src, dst| src.dpid != dpid && dst.dpid != dpid);
        self.loss_rate.retain(|link, _| !link.touches_switch(dpid));
    }

    fn forget_port(&mut self, port: PortKey) {
        self.features.remove(&port);
        self.stats.remove(&port);
        self.speed.remove(&port);
        self.free_bandwidth.remove(&port);
        self.link_ports.retain(|src, dst| *src != port && *dst != port);
        self.loss_rate.retain(|link, _| !link.touches_port(port));
    }
}

struct PortMonitorInner {
    config: Arc<ControllerConfig>,
    control: Arc<dyn ControlPlane>,
    topology: Arc<dyn TopologyView>,
    state: RwLock<PortState>,
}

impl PortMonitorInner {
    async fn poll_once(&self) {
        for dpid in self.topology.switches() {
            send_or_log(
                self.control.as_ref(),
                ControlCommand::PortDescRequest { dpid },
            );
            send_or_log(
                self.control.as_ref(),
                ControlCommand::PortStatsRequest { dpid },
            );
            stagger(self.config.probe_stagger).await;
        }
    }

    async fn monitor_loop(self: Arc<Self>) {
        loop {
            self.poll_once().await;
            tokio::time::sleep(self.config.monitor_period).await;
        }
    }
}

/// Port Monitor Service publishing free bandwidth and loss rates
pub struct PortMonitorService {
    inner: Arc<PortMonitorInner>,
    tasks: TaskRegistry<&'static str>,
    started: AtomicBool,
}

impl PortMonitorService {
    /// Create a new port monitor service
    pub fn new(
        config: Arc<ControllerConfig>,
        control: Arc<dyn ControlPlane>,
        topology: Arc<dyn TopologyView>,
    ) -> Self {
        Self {
            inner: Arc::new(PortMonitorInner {
                config,
                control,
                topology,
                state: RwLock::new(PortState::default()),
            }),
            tasks: TaskRegistry::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Request port descriptions and statistics from every switch once
    pub async fn poll_once(&self) {
        self.inner.poll_once().await;
    }

    pub fn features(&self, port: PortKey) -> Option<PortFeatures> {
        locks::read(&self.inner.state).features.get(&port).copied()
    }

    /// Current free (up, down) bandwidth in Mbit/s
    pub fn free_bandwidth(&self, port: PortKey) -> Option<(f64, f64)> {
        locks::read(&self.inner.state)
            .free_bandwidth
            .get(&port)
            .copied()
    }

    /// Recorded speed samples for `port`, oldest first
    pub fn speeds(&self, port: PortKey) -> Vec<PortSpeed> {
        let state = locks::read(&self.inner.state);
        state.speed.latest(&port, state.speed.len(&port))
    }

    pub fn loss_rate(&self, link: LinkKey) -> Option<f64> {
        locks::read(&self.inner.state).loss_rate.get(&link).copied()
    }

    /// Published per-port features and free bandwidth, sorted
    pub fn ports(&self) -> Vec<PortRecord> {
        let state = locks::read(&self.inner.state);
        let keys: BTreeSet<PortKey> = state
            .features
            .keys()
            .chain(state.free_bandwidth.keys())
            .copied()
            .collect();
        keys.into_iter()
            .map(|port| {
                let free = state.free_bandwidth.get(&port);
                PortRecord {
                    port,
                    features: state.features.get(&port).copied(),
                    free_up_mbps: free.map(|f| f.0),
                    free_down_mbps: free.map(|f| f.1),
                }
            })
            .collect()
    }

    /// Published loss rates, sorted by link
    pub fn loss_rates(&self) -> Vec<LossRecord> {
        let state = locks::read(&self.inner.state);
        let mut records: Vec<LossRecord> = state
            .loss_rate
            .iter()
            .map(|(link, loss_rate)| LossRecord {
                link: *link,
                loss_rate: *loss_rate,
            })
            .collect();
        records.sort_by_key(|r| r.link);
        records
    }

    /// Whether any map still holds a key referencing `dpid`
    pub fn references_switch(&self, dpid: Dpid) -> bool {
        let state = locks::read(&self.inner.state);
        state.features.keys().any(|p| p.dpid == dpid)
            || state.stats.keys().any(|p| p.dpid == dpid)
            || state.speed.keys().any(|p| p.dpid == dpid)
            || state.free_bandwidth.keys().any(|p| p.dpid == dpid)
            || state
                .link_ports
                .iter()
                .any(|(src, dst)| src.dpid == dpid || dst.dpid == dpid)
            || state.loss_rate.keys().any(|l| l.touches_switch(dpid))
    }

    /// Whether any map still holds a key for `port`
    pub fn references_port(&self, port: PortKey) -> bool {
        let state = locks::read(&self.inner.state);
        state.features.contains_key(&port)
            || state.stats.contains_key(&port)
            || state.speed.contains_key(&port)
            || state.free_bandwidth.contains_key(&port)
            || state
                .link_ports
                .iter()
                .any(|(src, dst)| *src == port || *dst == port)
            || state.loss_rate.keys().any(|l| l.touches_port(port))
    }

    fn on_port_desc(&self, dpid: Dpid, ports: &[PortDescription]) {
        if !self.inner.topology.is_switch_live(dpid) {
            return;
        }
        let mut state = locks::write(&self.inner.state);
        for desc in ports.iter().filter(|d| d.port_no != OFPP_LOCAL) {
            state
                .features
                .insert(PortKey::new(dpid, desc.port_no), features_of(desc));
        }
        trace!(%dpid, ports = ports.len(), "Port descriptions updated");
    }

    fn on_port_stats(&self, dpid: Dpid, stats: &[PortStatsEntry]) {
        if !self.inner.topology.is_switch_live(dpid) {
            return;
        }
        let samples = self.inner.config.monitor_samples;
        let mut state = locks::write(&self.inner.state);
        for entry in stats.iter().filter(|e| e.port_no != OFPP_LOCAL) {
            state.record_stats(PortKey::new(dpid, entry.port_no), entry, samples);
        }
        state.recompute_loss(dpid);
        trace!(%dpid, ports = stats.len(), "Port statistics updated");
    }

    fn on_link_added(&self, link: LinkKey) {
        locks::write(&self.inner.state)
            .link_ports
            .insert(link.src, link.dst);
    }

    fn on_link_deleted(&self, link: LinkKey) {
        let mut state = locks::write(&self.inner.state);
        if state.link_ports.get(&link.src) == Some(&link.dst) {
            state.link_ports.remove(&link.src);
        }
        state.loss_rate.remove(&link);
    }
}

impl Service for PortMonitorService {
    fn name(&self) -> &'static str {
        "port_monitor"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn handle_event<'a>(&'a self, event: &'a ControllerEvent) -> ServiceFuture<'a> {
        Box::pin(async move {
            match event {
                ControllerEvent::PortDescReply { dpid, ports, .. } => {
                    self.on_port_desc(*dpid, ports)
                }
                ControllerEvent::PortStatsReply { dpid, stats, .. } => {
                    self.on_port_stats(*dpid, stats)
                }
                ControllerEvent::LinkAdded { link } => self.on_link_added(*link),
                ControllerEvent::LinkDeleted { link } => self.on_link_deleted(*link),
                ControllerEvent::SwitchDetached { dpid } => {
                    locks::write(&self.inner.state).forget_switch(*dpid);
                    debug!(%dpid, "Dropped port state for switch");
                }
                ControllerEvent::PortRemoved { port } => {
                    locks::write(&self.inner.state).forget_port(*port);
                }
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
        info!(period = ?self.inner.config.monitor_period, "Port monitor started");
        Ok(())
    }

    fn shutdown(&self) -> ServiceFuture<'_> {
        Box::pin(async move {
            info!("Shutting down port monitor service");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{RecordingControl, StaticTopology, config};
    use std::time::Duration;

    fn stats(port_no: u32, tx_bytes: u64, rx_bytes: u64, secs: u32) -> PortStatsEntry {
        PortStatsEntry {
            port_no,
            tx_bytes,
            rx_bytes,
            duration_sec: secs,
            ..Default::default()
        }
    }

    fn desc(port_no: u32, curr_speed_kbps: u32) -> PortDescription {
        PortDescription {
            port_no,
            name: format!("s-eth{}", port_no),
            config: 0,
            state: 4,
            curr_speed: curr_speed_kbps,
        }
    }

    fn setup() -> (PortMonitorService, Arc<RecordingControl>) {
        let control = Arc::new(RecordingControl::default());
        let topology = Arc::new(StaticTopology::with_switches(&[1, 2]));
        (
            PortMonitorService::new(config(), control.clone(), topology),
            control,
        )
    }

    async fn feed(service: &PortMonitorService, event: ControllerEvent) {
        service.handle_event(&event).await.unwrap();
    }

    fn stats_reply(dpid: u64, stats: Vec<PortStatsEntry>) -> ControllerEvent {
        ControllerEvent::PortStatsReply {
            dpid: Dpid(dpid),
            timestamp: 0.0,
            stats,
        }
    }

    #[test]
    fn test_port_speed_uses_counter_duration() {
        let previous = stats(1, 1_000, 500, 10);
        let mut current = stats(1, 3_000, 1_500, 12);
        assert_eq!(port_speed(&previous, &current), (1_000.0, 500.0));

        current.duration_sec = 10;
        current.duration_nsec = 500_000_000;
        assert_eq!(port_speed(&previous, &current), (4_000.0, 2_000.0));
    }

    #[test]
    fn test_port_speed_degenerate_inputs() {
        let previous = stats(1, 1_000, 500, 10);
        assert_eq!(port_speed(&previous, &stats(1, 2_000, 600, 10)), (0.0, 0.0));
        assert_eq!(port_speed(&previous, &stats(1, 2_000, 600, 9)), (0.0, 0.0));
        // Counter reset
        assert_eq!(port_speed(&previous, &stats(1, 10, 10, 11)), (0.0, 0.0));
    }

    #[test]
    fn test_free_bandwidth() {
        assert_eq!(free_bandwidth(100.0, (1_500_000.0, 0.0)), (88.0, 100.0));
        assert_eq!(free_bandwidth(10.0, (1e9, 1e9)), (0.0, 0.0));
        assert_eq!(free_bandwidth(0.0, (0.0, 10.0)), (0.0, 0.0));
    }

    #[test]
    fn test_loss_rate_bounds() {
        assert!((loss_rate(100, 95) - 0.05).abs() < 1e-12);
        assert_eq!(loss_rate(0, 0), 1.0);
        assert_eq!(loss_rate(0, 50), 1.0);
        assert_eq!(loss_rate(50, 80), 0.0);
        assert_eq!(loss_rate(50, 50), 0.0);
    }

    #[tokio::test]
    async fn test_description_reply_skips_local_port() {
        let (service, _) = setup();
        feed(
            &service,
            ControllerEvent::PortDescReply {
                dpid: Dpid(1),
                timestamp: 0.0,
                ports: vec![desc(1, 100_000), desc(OFPP_LOCAL, 0)],
            },
        )
        .await;

        let features = service.features(PortKey::new(1, 1)).unwrap();
        assert_eq!(features.capacity_mbps, 100.0);
        assert_eq!(features.link_state, PortLinkState::Live);
        assert_eq!(features.config_state, PortConfigState::Up);
        assert!(service.features(PortKey::new(1, OFPP_LOCAL)).is_none());
    }

    #[tokio::test]
    async fn test_free_bandwidth_needs_capacity_and_two_samples() {
        let (service, _) = setup();
        let port = PortKey::new(1, 1);
        feed(&service, stats_reply(1, vec![stats(1, 0, 0, 10)])).await;
        feed(&service, stats_reply(1, vec![stats(1, 3_000_000, 0, 12)])).await;
        // Speed known, capacity not
        assert_eq!(service.speeds(port), vec![(1_500_000.0, 0.0)]);
        assert_eq!(service.free_bandwidth(port), None);

        feed(
            &service,
            ControllerEvent::PortDescReply {
                dpid: Dpid(1),
                timestamp: 0.0,
                ports: vec![desc(1, 100_000)],
            },
        )
        .await;
        feed(&service, stats_reply(1, vec![stats(1, 6_000_000, 0, 14)])).await;
        assert_eq!(service.free_bandwidth(port), Some((88.0, 100.0)));
        assert_eq!(service.speeds(port).len(), 2);
    }

    #[tokio::test]
    async fn test_speed_history_is_capped() {
        let (service, _) = setup();
        let port = PortKey::new(1, 1);
        for i in 0..20u32 {
            feed(
                &service,
                stats_reply(1, vec![stats(1, u64::from(i) * 1_000, 0, i)]),
            )
            .await;
        }
        assert_eq!(service.speeds(port).len(), 5);
    }

    #[tokio::test]
    async fn test_loss_between_linked_ports() {
        let (service, _) = setup();
        let link = LinkKey::new(PortKey::new(1, 1), PortKey::new(2, 1));
        feed(&service, ControllerEvent::LinkAdded { link }).await;

        let mut sent = stats(1, 0, 0, 1);
        sent.tx_packets = 100;
        feed(&service, stats_reply(1, vec![sent])).await;
        // Remote end not reported yet
        assert_eq!(service.loss_rate(link), None);

        let mut received = stats(1, 0, 0, 1);
        received.rx_packets = 95;
        feed(&service, stats_reply(2, vec![received])).await;
        assert!((service.loss_rate(link).unwrap() - 0.05).abs() < 1e-12);

        feed(&service, ControllerEvent::LinkDeleted { link }).await;
        assert_eq!(service.loss_rate(link), None);
        assert!(service.loss_rates().is_empty());
    }

    #[tokio::test]
    async fn test_switch_detach_purges_everything() {
        let (service, _) = setup();
        let link = LinkKey::new(PortKey::new(1, 1), PortKey::new(2, 1));
        feed(&service, ControllerEvent::LinkAdded { link }).await;
        for dpid in [1, 2] {
            feed(
                &service,
                ControllerEvent::PortDescReply {
                    dpid: Dpid(dpid),
                    timestamp: 0.0,
                    ports: vec![desc(1, 1_000)],
                },
            )
            .await;
            feed(&service, stats_reply(dpid, vec![stats(1, 0, 0, 1)])).await;
            feed(&service, stats_reply(dpid, vec![stats(1, 10, 10, 2)])).await;
        }
        assert!(service.references_switch(Dpid(2)));

        feed(&service, ControllerEvent::SwitchDetached { dpid: Dpid(2) }).await;
        assert!(!service.references_switch(Dpid(2)));
        assert!(service.features(PortKey::new(1, 1)).is_some());
        assert!(service.loss_rates().is_empty());
    }

    #[tokio::test]
    async fn test_port_removal_purges_port() {
        let (service, _) = setup();
        let port = PortKey::new(1, 2);
        feed(
            &service,
            ControllerEvent::LinkAdded {
                link: LinkKey::new(port, PortKey::new(2, 2)),
            },
        )
        .await;
        feed(&service, stats_reply(1, vec![stats(2, 0, 0, 1), stats(1, 0, 0, 1)])).await;
        feed(&service, stats_reply(1, vec![stats(2, 5, 5, 2), stats(1, 0, 0, 2)])).await;
        assert!(service.references_port(port));

        feed(&service, ControllerEvent::PortRemoved { port }).await;
        assert!(!service.references_port(port));
        assert!(service.references_port(PortKey::new(1, 1)));
    }

    #[tokio::test]
    async fn test_replies_from_unknown_switch_are_ignored() {
        let (service, _) = setup();
        feed(&service, stats_reply(9, vec![stats(1, 0, 0, 1)])).await;
        assert!(!service.references_switch(Dpid(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_requests_every_switch() {
        let (service, control) = setup();
        service.start().unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            control.sent(),
            vec![
                ControlCommand::PortDescRequest { dpid: Dpid(1) },
                ControlCommand::PortStatsRequest { dpid: Dpid(1) },
                ControlCommand::PortDescRequest { dpid: Dpid(2) },
                ControlCommand::PortStatsRequest { dpid: Dpid(2) },
            ]
        );
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(control.sent().len(), 8);
        service.shutdown().await.unwrap();
    }
}
