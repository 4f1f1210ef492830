//! Telemetry loop
//!
//! Composes the sampler, the sensor registry and the broker publisher:
//! connection events re-emit discovery, poll ticks publish one state message,
//! and a shutdown signal ends the loop with one clean disconnect.

use crate::discovery::DiscoveryPublisher;
use crate::metrics::Sampler;
use crate::mqtt::{LinkEvent, Publisher, OFFLINE, ONLINE};
use crate::registry::SensorRegistry;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Broker link state as observed through [`LinkEvent`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Lifecycle of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Connecting,
    Registered,
    Publishing,
    Disconnected,
    ShuttingDown,
    Stopped,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    PublishDiscovery,
}

impl LoopState {
    /// Apply a link event. Only a fresh connection asks for discovery.
    pub fn on_link(self, event: &LinkEvent) -> (LoopState, Option<LoopAction>) {
        use LoopState::*;

        match (self, event) {
            (ShuttingDown | Stopped, _) => (self, None),
            (Idle | Connecting | Disconnected, LinkEvent::Connected) => {
                (Registered, Some(LoopAction::PublishDiscovery))
            }
            (Registered | Publishing, LinkEvent::Connected) => (self, None),
            (Registered | Publishing, LinkEvent::Connecting) => (self, None),
            (_, LinkEvent::Connecting) => (Connecting, None),
            (_, LinkEvent::Disconnected { .. }) => (Disconnected, None),
        }
    }

    pub fn on_tick(self) -> LoopState {
        match self {
            LoopState::Registered => LoopState::Publishing,
            other => other,
        }
    }

    pub fn connection(self) -> ConnectionState {
        match self {
            LoopState::Registered | LoopState::Publishing => ConnectionState::Connected,
            LoopState::Connecting => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Counters returned when the loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ticks: u64,
    pub published: u64,
    pub failed_publishes: u64,
    pub skipped_ticks: u64,
    pub discovery_batches: u64,
}

pub struct TelemetryLoop {
    publisher: Arc<dyn Publisher>,
    sampler: Box<dyn Sampler>,
    registry: Arc<SensorRegistry>,
    discovery: DiscoveryPublisher,
    state_topic: String,
    availability_topic: Option<String>,
    poll_interval: Duration,
    state: LoopState,
    report: RunReport,
}

impl TelemetryLoop {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        sampler: Box<dyn Sampler>,
        registry: Arc<SensorRegistry>,
        discovery: DiscoveryPublisher,
        state_topic: impl Into<String>,
        availability_topic: Option<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            publisher,
            sampler,
            registry,
            discovery,
            state_topic: state_topic.into(),
            availability_topic,
            poll_interval,
            state: LoopState::Idle,
            report: RunReport::default(),
        }
    }

    /// Run until `shutdown` fires (or its sender is dropped)
    pub async fn run(
        mut self,
        mut links: mpsc::UnboundedReceiver<LinkEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> RunReport {
        info!(
            "Starting telemetry loop: {} sensors, every {:?} to {}",
            self.registry.sensor_count(),
            self.poll_interval,
            self.state_topic
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => break,

                Some(event) = links.recv() => self.handle_link(event).await,

                _ = ticker.tick() => self.tick().await,
            }
        }

        self.shutdown().await;
        self.report
    }

    async fn handle_link(&mut self, event: LinkEvent) {
        if let LinkEvent::Disconnected { reason } = &event {
            warn!("Broker link lost: {}", reason);
        }
        let (next, action) = self.state.on_link(&event);
        if next != self.state {
            info!("Link {:?}: {:?} -> {:?}", event, self.state, next);
        }
        self.state = next;

        if action == Some(LoopAction::PublishDiscovery) {
            if let Some(topic) = self.availability_topic.clone() {
                self.publish(&topic, QoS::AtLeastOnce, true, ONLINE.as_bytes().to_vec())
                    .await;
            }
            let batch = self
                .discovery
                .publish_all(self.publisher.as_ref(), &self.registry)
                .await;
            self.report.published += batch.published as u64;
            self.report.failed_publishes += batch.failed as u64;
            self.report.discovery_batches += 1;
        }
    }

    async fn tick(&mut self) {
        self.state = self.state.on_tick();
        self.report.ticks += 1;

        let snapshot = match self.sampler.sample().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Skipping tick {}: {}", self.report.ticks, e);
                self.report.skipped_ticks += 1;
                return;
            }
        };

        // Nothing drains the request queue while the link is down: enqueuing
        // there would leave no room for the discovery batch on reconnect.
        let connection = self.state.connection();
        if connection != ConnectionState::Connected {
            debug!("Dropping telemetry tick {} ({:?})", self.report.ticks, connection);
            self.report.failed_publishes += 1;
            return;
        }

        match serde_json::to_vec(&snapshot) {
            Ok(payload) => {
                let topic = self.state_topic.clone();
                if self.publish(&topic, QoS::AtMostOnce, false, payload).await {
                    debug!("Telemetry published");
                }
            }
            Err(e) => {
                warn!("Failed to serialize snapshot: {}", e);
                self.report.skipped_ticks += 1;
            }
        }
    }

    async fn publish(&mut self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> bool {
        match self.publisher.publish(topic, qos, retain, payload).await {
            Ok(()) => {
                self.report.published += 1;
                true
            }
            Err(e) => {
                warn!("Failed to publish to {}: {}", topic, e);
                self.report.failed_publishes += 1;
                false
            }
        }
    }

    async fn shutdown(&mut self) {
        self.state = LoopState::ShuttingDown;
        info!("Shutting down telemetry loop");

        if let Some(topic) = self.availability_topic.clone() {
            self.publish(&topic, QoS::AtLeastOnce, true, OFFLINE.as_bytes().to_vec())
                .await;
        }
        if let Err(e) = self.publisher.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }

        self.state = LoopState::Stopped;
    }
}
