//! Broker client plumbing
//!
//! - [`Publisher`]: the only operations the core needs from the client
//! - [`build_client`]: rumqttc client + event loop from the agent config
//! - [`spawn_event_loop`]: drives rumqttc I/O in the background and turns
//!   connection changes into [`LinkEvent`]s for the telemetry loop
//!
//! Reconnection is left to rumqttc: polling again after an error reconnects.

use crate::config::AgentConfig;
use crate::error::PublishError;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing,
    QoS,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Availability payloads
pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Connection changes reported by the client's I/O task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connecting,
    Connected,
    Disconnected { reason: String },
}

/// Publish side of the broker connection.
///
/// Implementations must be safe to call from the telemetry loop and from
/// discovery concurrently; the core adds no locking of its own.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), PublishError>;

    async fn disconnect(&self) -> Result<(), PublishError>;
}

#[async_trait]
impl Publisher for AsyncClient {
    // Non-blocking enqueue: a full request queue fails the publish instead of
    // stalling the poll loop while the broker is away.
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        AsyncClient::try_publish(self, topic, qos, retain, payload)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PublishError> {
        AsyncClient::try_disconnect(self)?;
        Ok(())
    }
}

/// Build MQTT options from configuration
pub fn mqtt_options(config: &AgentConfig) -> MqttOptions {
    let mut options = MqttOptions::new(
        config.client_id(),
        &config.mqtt.broker_host,
        config.mqtt.broker_port,
    );
    options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
    options.set_clean_session(true);
    options.set_credentials(
        config.mqtt.username.clone(),
        config.mqtt.password.clone().unwrap_or_default(),
    );

    if let Some(topic) = &config.topics.availability {
        options.set_last_will(LastWill::new(topic, OFFLINE, QoS::AtLeastOnce, true));
    }
    options
}

/// Client plus its event loop. The request queue holds a full discovery
/// batch with headroom for telemetry.
pub fn build_client(config: &AgentConfig, sensor_count: usize) -> (AsyncClient, EventLoop) {
    let capacity = sensor_count * 2 + 16;
    AsyncClient::new(mqtt_options(config), capacity)
}

/// Drive the rumqttc event loop until a clean disconnect has been sent or the
/// receiving side goes away.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    links: mpsc::UnboundedSender<LinkEvent>,
    retry_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if links.send(LinkEvent::Connecting).is_err() {
            return;
        }

        loop {
            let event = match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("MQTT connected (session present: {})", ack.session_present);
                        Some(LinkEvent::Connected)
                    } else {
                        warn!("MQTT connection refused: {:?}", ack.code);
                        None
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("MQTT disconnect sent, stopping event loop");
                    break;
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("MQTT connection error: {}", e);
                    let reason = e.to_string();
                    if links.send(LinkEvent::Disconnected { reason }).is_err() {
                        break;
                    }
                    tokio::time::sleep(retry_delay).await;
                    Some(LinkEvent::Connecting)
                }
            };

            if let Some(event) = event {
                if links.send(event).is_err() {
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
#[async_trait]
impl Publisher for hostwatch_devkit::MockMqttClient {
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        hostwatch_devkit::MockMqttClient::publish(self, topic, qos, retain, payload)
            .await
            .map_err(|e| PublishError::Simulated(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), PublishError> {
        hostwatch_devkit::MockMqttClient::disconnect(self)
            .await
            .map_err(|e| PublishError::Simulated(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(extra_topics: &str) -> AgentConfig {
        AgentConfig::from_toml_str(&format!(
            r#"
            [mqtt]
            broker_host = "127.0.0.1"
            broker_port = 1884
            username = "agent"
            password = "secret"
            client_id = "hostwatch-test"
            [topics]
            {extra_topics}
            [device]
            id = "main_server"
            "#
        ))
        .unwrap()
    }

    #[test]
    fn test_mqtt_options() {
        let options = mqtt_options(&config(""));
        assert_eq!(options.client_id(), "hostwatch-test");
        assert_eq!(options.broker_address(), ("127.0.0.1".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert_eq!(options.credentials(), Some(("agent".to_string(), "secret".to_string())));
        assert!(options.last_will().is_none());
    }

    #[test]
    fn test_last_will_with_availability() {
        let options = mqtt_options(&config(r#"availability = "home/server/status""#));
        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "home/server/status");
        assert_eq!(&will.message[..], OFFLINE.as_bytes());
        assert!(will.retain);
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_disconnect() {
        // Nothing listens on port 1 locally: the first poll fails fast
        let mut cfg = config("");
        cfg.mqtt.broker_port = 1;
        let (_client, eventloop) = build_client(&cfg, 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_event_loop(eventloop, tx, Duration::from_millis(10));

        assert_eq!(rx.recv().await, Some(LinkEvent::Connecting));
        assert!(matches!(rx.recv().await, Some(LinkEvent::Disconnected { .. })));
        assert_eq!(rx.recv().await, Some(LinkEvent::Connecting));

        drop(rx);
        handle.abort();
    }

    #[tokio::test]
    async fn test_connack_drives_link_events() {
        // Minimal broker: accepts the first CONNECT, refuses the second
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            for code in [0x00u8, 0x05] {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut connect = [0u8; 256];
                let _ = socket.read(&mut connect).await.unwrap();
                socket.write_all(&[0x20, 0x02, 0x00, code]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        let mut cfg = config("");
        cfg.mqtt.broker_port = port;
        let (_client, eventloop) = build_client(&cfg, 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_event_loop(eventloop, tx, Duration::from_millis(10));

        let mut events = Vec::new();
        while events.len() < 6 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            events.push(event);
        }

        assert_eq!(events[0], LinkEvent::Connecting);
        assert_eq!(events[1], LinkEvent::Connected);
        assert!(matches!(events[2], LinkEvent::Disconnected { .. }));
        assert_eq!(events[3], LinkEvent::Connecting);
        // The refused attempt surfaces as a disconnect, never as Connected
        assert!(matches!(events[4], LinkEvent::Disconnected { .. }));
        assert_eq!(events[5], LinkEvent::Connecting);
        assert_eq!(events.iter().filter(|e| **e == LinkEvent::Connected).count(), 1);

        drop(rx);
        handle.abort();
        broker.abort();
    }
}
