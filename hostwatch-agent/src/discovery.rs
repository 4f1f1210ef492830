//! Home Assistant MQTT discovery
//!
//! Serializes every registry sensor into a retained config message on
//! `{prefix}/sensor/{device_id}/{object_id}/config`. Republishing is safe:
//! the broker keeps only the last retained payload per topic.

use crate::config::AgentConfig;
use crate::mqtt::Publisher;
use crate::registry::{DeviceGroup, SensorDescriptor, SensorRegistry, StateClass};
use rumqttc::QoS;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Discovery config payload
#[derive(Debug, Serialize)]
pub struct DiscoveryPayload<'a> {
    pub name: &'a str,
    pub state_topic: &'a str,
    pub value_template: &'a str,
    pub unique_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<StateClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_topic: Option<&'a str>,
    pub device: &'a DeviceGroup,
}

/// Outcome of one discovery batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub published: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct DiscoveryPublisher {
    prefix: String,
    device_id: String,
    state_topic: String,
    availability_topic: Option<String>,
}

impl DiscoveryPublisher {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            prefix: config.topics.discovery_prefix.clone(),
            device_id: config.device.id.clone(),
            state_topic: config.topics.state.clone(),
            availability_topic: config.topics.availability.clone(),
        }
    }

    pub fn config_topic(&self, sensor: &SensorDescriptor) -> String {
        format!("{}/sensor/{}/{}/config", self.prefix, self.device_id, sensor.object_id)
    }

    pub fn payload<'a>(
        &'a self,
        device: &'a DeviceGroup,
        sensor: &'a SensorDescriptor,
    ) -> DiscoveryPayload<'a> {
        DiscoveryPayload {
            name: &sensor.name,
            state_topic: &self.state_topic,
            value_template: &sensor.value_template,
            unique_id: &sensor.unique_id,
            icon: sensor.icon.as_deref(),
            unit_of_measurement: sensor.unit.as_deref(),
            state_class: sensor.state_class,
            availability_topic: self.availability_topic.as_deref(),
            device,
        }
    }

    /// Publish one retained config per sensor. A failed sensor is logged and
    /// skipped; the rest of the batch still goes out.
    pub async fn publish_all(
        &self,
        publisher: &dyn Publisher,
        registry: &SensorRegistry,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for sensor in registry.sensors() {
            let topic = self.config_topic(sensor);
            let payload = match serde_json::to_vec(&self.payload(registry.device(), sensor)) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to serialize discovery for {}: {}", sensor.unique_id, e);
                    report.failed += 1;
                    continue;
                }
            };

            match publisher.publish(&topic, QoS::AtMostOnce, true, payload).await {
                Ok(()) => {
                    debug!("Discovery published: {}", topic);
                    report.published += 1;
                }
                Err(e) => {
                    warn!("Failed to publish discovery {}: {}", topic, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Discovery batch done: {} published, {} failed",
            report.published, report.failed
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwatch_devkit::MockMqttClient;
    use serde_json::{json, Value};

    fn config(extra: &str) -> AgentConfig {
        AgentConfig::from_toml_str(&format!(
            r#"
            containers = ["plex", "paho_mqtt_broker"]
            [mqtt]
            broker_host = "localhost"
            username = "u"
            password = "p"
            [topics]
            {extra}
            [device]
            id = "main_server"
            manufacturer = "Farouk Server"
            "#
        ))
        .unwrap()
    }

    #[test]
    fn test_container_payload_shape() {
        let cfg = config("");
        let registry = SensorRegistry::build(&cfg, 1).unwrap();
        let discovery = DiscoveryPublisher::new(&cfg);
        let sensor = &registry.sensors()[1];

        assert_eq!(
            discovery.config_topic(sensor),
            "homeassistant/sensor/main_server/paho-mqtt-broker/config"
        );
        let payload = serde_json::to_value(discovery.payload(registry.device(), sensor)).unwrap();
        assert_eq!(
            payload,
            json!({
                "name": "paho_mqtt_broker Container",
                "state_topic": "home/server/stats",
                "value_template": "{{ 'running' if value_json.docker.get('paho_mqtt_broker', '') | regex_match('^Up') else 'stopped' }}",
                "unique_id": "main_server_paho-mqtt-broker_container",
                "icon": "mdi:docker",
                "device": {
                    "identifiers": ["main_server"],
                    "name": "Main Server",
                    "manufacturer": "Farouk Server",
                    "model": "Linux MQTT Monitor"
                }
            })
        );
    }

    #[test]
    fn test_measurement_payload_shape() {
        let cfg = config(r#"availability = "home/server/status""#);
        let registry = SensorRegistry::build(&cfg, 1).unwrap();
        let discovery = DiscoveryPublisher::new(&cfg);
        let temp = registry.sensors().iter().find(|s| s.object_id == "temp").unwrap();

        let payload = serde_json::to_value(discovery.payload(registry.device(), temp)).unwrap();
        assert_eq!(payload["unit_of_measurement"], "°C");
        assert_eq!(payload["state_class"], "measurement");
        assert_eq!(payload["availability_topic"], "home/server/status");
        assert!(payload.get("icon").is_none());

        let uptime = registry.sensors().iter().find(|s| s.object_id == "uptime").unwrap();
        let payload = serde_json::to_value(discovery.payload(registry.device(), uptime)).unwrap();
        assert!(payload.get("unit_of_measurement").is_none());
        assert!(payload.get("state_class").is_none());
    }

    #[tokio::test]
    async fn test_publish_all_retained() {
        let cfg = config("");
        let registry = SensorRegistry::build(&cfg, 2).unwrap();
        let client = MockMqttClient::new();

        let report = DiscoveryPublisher::new(&cfg).publish_all(&client, &registry).await;
        assert_eq!(report, DiscoveryReport { published: registry.sensor_count(), failed: 0 });

        let messages = client.find_messages_by_prefix("homeassistant/sensor/main_server/");
        assert_eq!(messages.len(), registry.sensor_count());
        assert!(messages.iter().all(|m| m.retain && m.topic.ends_with("/config")));
        for message in &messages {
            let payload: Value = serde_json::from_slice(&message.payload).unwrap();
            assert_eq!(payload["state_topic"], "home/server/stats");
        }
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_abort_batch() {
        let cfg = config("");
        let registry = SensorRegistry::build(&cfg, 2).unwrap();
        let client = MockMqttClient::new();
        client.fail_publishes_to("homeassistant/sensor/main_server/cpu_core_1/");

        let report = DiscoveryPublisher::new(&cfg).publish_all(&client, &registry).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.published, registry.sensor_count() - 1);
        assert_eq!(client.find_messages_by_topic("homeassistant/sensor/main_server/uptime/config").len(), 1);
    }

    #[tokio::test]
    async fn test_republish_is_idempotent() {
        let cfg = config("");
        let registry = SensorRegistry::build(&cfg, 2).unwrap();
        let client = MockMqttClient::new();
        let discovery = DiscoveryPublisher::new(&cfg);

        discovery.publish_all(&client, &registry).await;
        let first = client.retained();
        discovery.publish_all(&client, &registry).await;

        assert_eq!(client.retained(), first);
        assert_eq!(first.len(), registry.sensor_count());
    }
}
