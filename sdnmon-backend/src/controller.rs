//! Event dispatch across the engine's services.
//!
//! The [`Controller`] owns one instance of each service, wires the narrow
//! lookups between them at construction, and routes every inbound event to
//! the services subscribed to its kind. A failing or panicking handler is
//! logged and does not keep the event from reaching the remaining services.

use anyhow::Result;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use sdnmon_shared::{ControllerEvent, Dpid, EventKind, TelemetrySnapshot, now_timestamp};

use crate::config::ControllerConfig;
use crate::control::{AttachmentLookup, ControlPlane, EchoLatencyLookup, TopologyView};
use crate::services::{
    HostDelayService, HostDiscoveryService, LinkDelayService, PortMonitorService, Service,
    ServiceHealth,
};

/// The measurement engine: every service plus the dispatch table
pub struct Controller {
    config: Arc<ControllerConfig>,
    discovery: Arc<HostDiscoveryService>,
    link_delay: Arc<LinkDelayService>,
    host_delay: Arc<HostDelayService>,
    port_monitor: Arc<PortMonitorService>,
    services: Vec<Arc<dyn Service>>,
    dispatch: HashMap<EventKind, Vec<Arc<dyn Service>>>,
}

impl Controller {
    /// Build every service around the given collaborators
    pub fn new(
        config: Arc<ControllerConfig>,
        control: Arc<dyn ControlPlane>,
        topology: Arc<dyn TopologyView>,
    ) -> Self {
        let discovery = Arc::new(HostDiscoveryService::new(
            config.clone(),
            control.clone(),
            topology.clone(),
        ));
        let link_delay = Arc::new(LinkDelayService::new(
            config.clone(),
            control.clone(),
            topology.clone(),
        ));
        let host_delay = Arc::new(HostDelayService::new(
            config.clone(),
            control.clone(),
            topology.clone(),
            discovery.clone() as Arc<dyn AttachmentLookup>,
            link_delay.clone() as Arc<dyn EchoLatencyLookup>,
        ));
        let port_monitor = Arc::new(PortMonitorService::new(config.clone(), control, topology));

        let mut controller = Self {
            config,
            discovery: discovery.clone(),
            link_delay: link_delay.clone(),
            host_delay: host_delay.clone(),
            port_monitor: port_monitor.clone(),
            services: Vec::new(),
            dispatch: HashMap::new(),
        };
        // Registration order is delivery order for a shared event kind
        controller.register(discovery);
        controller.register(link_delay);
        controller.register(host_delay);
        controller.register(port_monitor);
        controller
    }

    /// Add a service to the dispatch table under each of its subscriptions
    pub fn register(&mut self, service: Arc<dyn Service>) {
        for kind in service.subscriptions() {
            self.dispatch
                .entry(*kind)
                .or_default()
                .push(service.clone());
        }
        debug!(
            service = service.name(),
            kinds = service.subscriptions().len(),
            "Registered service"
        );
        self.services.push(service);
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn discovery(&self) -> &HostDiscoveryService {
        &self.discovery
    }

    pub fn link_delay(&self) -> &LinkDelayService {
        &self.link_delay
    }

    pub fn host_delay(&self) -> &HostDelayService {
        &self.host_delay
    }

    pub fn port_monitor(&self) -> &PortMonitorService {
        &self.port_monitor
    }

    /// Names of the services subscribed to `kind`, in delivery order
    pub fn subscribers(&self, kind: EventKind) -> Vec<&'static str> {
        self.dispatch
            .get(&kind)
            .map(|services| services.iter().map(|s| s.name()).collect())
            .unwrap_or_default()
    }

    /// Deliver `event` to every subscribed service.
    ///
    /// Returns how many handlers completed without error.
    pub async fn handle_event(&self, event: &ControllerEvent) -> usize {
        let Some(handlers) = self.dispatch.get(&event.kind()) else {
            return 0;
        };
        let mut succeeded = 0;
        for service in handlers {
            match AssertUnwindSafe(service.handle_event(event))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => warn!(
                    service = service.name(),
                    kind = ?event.kind(),
                    "Event handler failed: {:#}",
                    e
                ),
                Err(_) => error!(
                    service = service.name(),
                    kind = ?event.kind(),
                    "Event handler panicked"
                ),
            }
        }
        succeeded
    }

    /// Deliver events from `events` until the channel closes
    pub async fn run(&self, mut events: mpsc::Receiver<ControllerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(&event).await;
        }
        debug!("Event channel closed");
    }

    /// Start every service's periodic tasks
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        for service in &self.services {
            service.start()?;
        }
        info!(services = self.services.len(), "Controller started");
        Ok(())
    }

    /// Shut services down in reverse registration order
    pub async fn shutdown(&self) {
        for service in self.services.iter().rev() {
            if let Err(e) = service.shutdown().await {
                warn!(service = service.name(), "Shutdown failed: {:#}", e);
            }
        }
        info!("Controller shut down");
    }

    pub fn health_check(&self) -> Vec<(&'static str, ServiceHealth)> {
        self.services
            .iter()
            .map(|s| (s.name(), s.health_check()))
            .collect()
    }

    /// Point-in-time copy of every published metric
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            taken_at: now_timestamp(),
            hosts: self.discovery.hosts(),
            link_delays: self.link_delay.link_delays(),
            host_delays: self.host_delay.host_delays(),
            ports: self.port_monitor.ports(),
            loss_rates: self.port_monitor.loss_rates(),
        }
    }

    /// Whether any service still holds state keyed by `dpid`
    pub fn references_switch(&self, dpid: Dpid) -> bool {
        self.discovery.references_switch(dpid)
            || self.discovery.is_probing(dpid)
            || self.link_delay.references_switch(dpid)
            || self.host_delay.references_switch(dpid)
            || self.port_monitor.references_switch(dpid)
    }
}
