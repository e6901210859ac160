// src/telemetry.rs - Position heartbeat and job event forwarding
use crate::motion::{ArmPosition, MotionController, StopSignal};
use crate::path_job::JobEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Outbound state reporting, e.g. an MQTT bridge.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish_position(&self, position: ArmPosition);
    async fn publish_event(&self, event: &JobEvent);
}

/// Sink that writes everything to the log.
#[derive(Debug, Default, Clone)]
pub struct LogTelemetry;

#[async_trait]
impl TelemetrySink for LogTelemetry {
    async fn publish_position(&self, position: ArmPosition) {
        tracing::info!("Position: {}", position);
    }

    async fn publish_event(&self, event: &JobEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!("Job event: {}", json),
            Err(e) => tracing::warn!("Unserializable job event {:?}: {}", event, e),
        }
    }
}

/// Periodically publish the arm position. Never issues motor commands and never
/// waits for the arm: while a move holds it, the last published position is used.
pub fn spawn_heartbeat(
    controller: Arc<Mutex<MotionController>>,
    interval: Duration,
    sink: Arc<dyn TelemetrySink>,
    mut shutdown: StopSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let position_rx = controller.lock().await.subscribe_position();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.raised() => break,
                _ = ticker.tick() => {
                    let position = match controller.try_lock() {
                        Ok(mut controller) => controller.read_position().await,
                        Err(_) => *position_rx.borrow(),
                    };
                    sink.publish_position(position).await;
                }
            }
        }
        tracing::debug!("Heartbeat stopped");
    })
}

/// Forward job events from the manager to the sink until shutdown.
pub fn spawn_event_forwarder(
    mut events: broadcast::Receiver<JobEvent>,
    sink: Arc<dyn TelemetrySink>,
    mut shutdown: StopSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.raised() => break,
                received = events.recv() => match received {
                    Ok(event) => sink.publish_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Telemetry lagged, {} job events dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
