//! JSON-lines adapter between a protocol shim and the engine.
//!
//! Each input line is a [`BridgeMessage`]: either a [`ControllerEvent`] or
//! an LLDP send time reported by the topology service. Every
//! [`ControlCommand`] the engine emits is written back as one JSON line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use sdnmon_shared::errors::SdnmonResult;
use sdnmon_shared::{ControlCommand, ControllerEvent, PortKey, Timestamp};

use crate::config::ControllerConfig;
use crate::control::{ChannelControlPlane, TopologyCache};
use crate::controller::Controller;

/// Topology-service notices that are not controller events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TopologyNotice {
    LldpSent { port: PortKey, timestamp: Timestamp },
}

/// One inbound line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeMessage {
    Topology(TopologyNotice),
    Event(ControllerEvent),
}

impl BridgeMessage {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).with_context(|| format!("Unrecognised bridge line: {}", line))
    }
}

/// Owns the engine plus the topology cache fed from the input stream
pub struct Bridge {
    controller: Arc<Controller>,
    topology: Arc<TopologyCache>,
}

impl Bridge {
    /// Build the engine, returning the stream of commands it will emit
    pub fn new(config: Arc<ControllerConfig>) -> (Self, mpsc::UnboundedReceiver<ControlCommand>) {
        let (control, commands) = ChannelControlPlane::new();
        let topology = Arc::new(TopologyCache::new());
        let controller = Arc::new(Controller::new(config, Arc::new(control), topology.clone()));
        (
            Self {
                controller,
                topology,
            },
            commands,
        )
    }

    pub fn controller(&self) -> Arc<Controller> {
        self.controller.clone()
    }

    /// Apply one inbound line. Unparseable lines are logged and skipped.
    pub async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match BridgeMessage::parse(line) {
            Ok(BridgeMessage::Topology(TopologyNotice::LldpSent { port, timestamp })) => {
                self.topology.record_lldp_sent(port, timestamp);
            }
            Ok(BridgeMessage::Event(event)) => {
                self.topology.apply(&event);
                self.controller.handle_event(&event).await;
            }
            Err(e) => warn!("{:#}", e),
        }
    }

    /// Run until the input ends or `shutdown` resolves, returning the writer.
    #[instrument(skip_all)]
    pub async fn run<R, W, S>(
        &self,
        commands: mpsc::UnboundedReceiver<ControlCommand>,
        reader: R,
        writer: W,
        shutdown: S,
    ) -> Result<W>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let writer_task = tokio::spawn(write_commands(commands, writer, stop_rx));

        self.controller.start()?;
        info!("Bridge started");

        let mut lines = reader.lines();
        let mut snapshot_interval = interval(self.controller.config().monitor_period);
        snapshot_interval.tick().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line.context("Failed to read bridge input")? {
                        Some(line) => self.handle_line(&line).await,
                        None => {
                            info!("Bridge input closed");
                            break;
                        }
                    }
                }
                _ = snapshot_interval.tick() => {
                    match serde_json::to_string(&self.controller.snapshot()) {
                        Ok(json) => debug!(snapshot = %json, "Telemetry snapshot"),
                        Err(e) => warn!("Failed to serialize snapshot: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.controller.shutdown().await;
        let _ = stop_tx.send(());
        let writer = writer_task
            .await
            .context("Command writer task failed")??;
        Ok(writer)
    }
}

/// Write commands as JSON lines until told to stop, then drain what is queued
async fn write_commands<W>(
    mut commands: mpsc::UnboundedReceiver<ControlCommand>,
    mut writer: W,
    mut stop: oneshot::Receiver<()>,
) -> SdnmonResult<W>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => write_line(&mut writer, &command).await?,
                None => break,
            },
            _ = &mut stop => {
                while let Ok(command) = commands.try_recv() {
                    write_line(&mut writer, &command).await?;
                }
                break;
            }
        }
    }
    writer.flush().await?;
    Ok(writer)
}

async fn write_line<W>(writer: &mut W, command: &ControlCommand) -> SdnmonResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(command)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
