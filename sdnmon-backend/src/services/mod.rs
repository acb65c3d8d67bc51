//! Service layer for the sdnmon backend.
//!
//! Each engine component is a [`Service`]: it names the event kinds it
//! consumes, folds those events into state it owns exclusively, and may run
//! background probing tasks between `start` and `shutdown`. Other components
//! read that state only through the narrow lookup traits in
//! [`crate::control`].

pub mod host_delay;
pub mod host_discovery;
pub mod link_delay;
pub mod port_monitor;

pub use host_delay::HostDelayService;
pub use host_discovery::HostDiscoveryService;
pub use link_delay::LinkDelayService;
pub use port_monitor::PortMonitorService;

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

use sdnmon_shared::errors::ControlPlaneResult;
use sdnmon_shared::{ControlCommand, ControllerEvent, Dpid, EventKind, FlowRule};

use crate::control::ControlPlane;
use crate::utils::error_handling::{RetryPolicy, retry_async};

/// Boxed future returned by service entry points
pub type ServiceFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Base trait for all services
pub trait Service: Send + Sync {
    /// Service name for logging and identification
    fn name(&self) -> &'static str;

    /// Event kinds this service wants to receive
    fn subscriptions(&self) -> &'static [EventKind];

    /// Fold one event into the service's state.
    ///
    /// Errors are logged by the caller and never stop event delivery.
    fn handle_event<'a>(&'a self, event: &'a ControllerEvent) -> ServiceFuture<'a>;

    /// Spawn the service's periodic tasks. Requires a Tokio runtime.
    fn start(&self) -> Result<()>;

    /// Stop every background task owned by the service
    fn shutdown(&self) -> ServiceFuture<'_>;

    /// Get service health status
    fn health_check(&self) -> ServiceHealth;
}

/// Service health status
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceHealth {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceHealth::Healthy)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ServiceHealth::Healthy => None,
            ServiceHealth::Degraded { reason } => Some(reason),
            ServiceHealth::Unhealthy { reason } => Some(reason),
        }
    }

    /// Health of a service whose monitor loop should be running once started
    pub(crate) fn of_monitor_loop(started: bool, running: bool) -> Self {
        match (started, running) {
            (false, _) => ServiceHealth::Degraded {
                reason: "not started".to_string(),
            },
            (true, true) => ServiceHealth::Healthy,
            (true, false) => ServiceHealth::Unhealthy {
                reason: "monitor loop stopped".to_string(),
            },
        }
    }
}

/// Send a probe or request, logging instead of failing when it cannot go out.
///
/// Returns whether the command was handed to the control plane.
pub(crate) fn send_or_log(control: &dyn ControlPlane, command: ControlCommand) -> bool {
    let dpid = command.dpid();
    match control.send(command) {
        Ok(()) => true,
        Err(e) => {
            debug!(%dpid, "Command not delivered: {}", e);
            false
        }
    }
}

/// Install `rule` on `dpid`, retrying while the switch settles after attach
pub(crate) async fn install_flow(
    control: &dyn ControlPlane,
    dpid: Dpid,
    rule: FlowRule,
    policy: &RetryPolicy,
    operation_name: &str,
) -> ControlPlaneResult<()> {
    let result = retry_async(
        move || async move { control.send(ControlCommand::FlowInstall { dpid, rule }) },
        policy,
        operation_name,
    )
    .await;
    match &result {
        Ok(()) => info!(%dpid, ?rule, "Installed flow"),
        Err(e) => warn!(%dpid, "Giving up on flow install: {}", e),
    }
    result
}

/// Sleep between consecutive probes of one round
pub(crate) async fn stagger(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingControl;
    use super::*;
    use sdnmon_shared::{FlowMatch, OutputPort};
    use std::net::Ipv4Addr;

    #[test]
    fn test_service_health_is_healthy() {
        assert!(ServiceHealth::Healthy.is_healthy());
        assert!(
            !ServiceHealth::Degraded {
                reason: "test".to_string()
            }
            .is_healthy()
        );
        assert_eq!(
            ServiceHealth::of_monitor_loop(true, false).reason(),
            Some("monitor loop stopped")
        );
        assert!(ServiceHealth::of_monitor_loop(true, true).is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_flow_retries_until_accepted() {
        let control = RecordingControl::default();
        *control.refuse.lock().unwrap() = 2;
        let rule = FlowRule {
            priority: 65535,
            matches: FlowMatch::ArpTarget {
                ip: Ipv4Addr::new(10, 0, 0, 254),
            },
            output: OutputPort::Controller,
        };

        install_flow(&control, Dpid(1), rule, &RetryPolicy::default(), "test")
            .await
            .unwrap();
        assert_eq!(
            control.sent(),
            vec![ControlCommand::FlowInstall {
                dpid: Dpid(1),
                rule
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_flow_gives_up() {
        let control = RecordingControl::default();
        *control.refuse.lock().unwrap() = 10;
        let rule = FlowRule {
            priority: 1,
            matches: FlowMatch::IcmpDestination {
                ip: Ipv4Addr::new(10, 0, 0, 254),
            },
            output: OutputPort::Controller,
        };
        assert!(
            install_flow(&control, Dpid(1), rule, &RetryPolicy::default(), "test")
                .await
                .is_err()
        );
        assert!(control.sent().is_empty());
    }
}
