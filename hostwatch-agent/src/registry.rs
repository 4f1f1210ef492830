//! Sensor registry
//!
//! Derives the full, deterministic list of sensors the front-end should know
//! about from static configuration and the logical core count. Nothing here
//! looks at runtime data: the same inputs always yield the same descriptors,
//! which is what keeps re-registration idempotent across restarts.

use crate::config::{AgentConfig, DeviceConfig};
use crate::error::RegistryError;
use serde::Serialize;
use std::collections::HashSet;

/// Icon shown for container sensors
const CONTAINER_ICON: &str = "mdi:docker";

/// Raw status prefix the runtime reports for a started container
const RUNNING_PREFIX: &str = "Up";

/// Home Assistant `state_class`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
}

/// One registrable sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDescriptor {
    pub object_id: String,
    pub unique_id: String,
    pub name: String,
    pub value_template: String,
    pub unit: Option<String>,
    pub state_class: Option<StateClass>,
    pub icon: Option<String>,
}

/// Device block shared by every sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceGroup {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceGroup {
    pub fn from_config(device: &DeviceConfig) -> Self {
        Self {
            identifiers: vec![device.id.clone()],
            name: device.name.clone(),
            manufacturer: device.manufacturer.clone(),
            model: device.model.clone(),
        }
    }
}

/// Generic scalar sensors: (object id, name, unit, payload path, measurement)
const GENERIC_SENSORS: &[(&str, &str, Option<&str>, &str, bool)] = &[
    ("cpu_total", "CPU Total", Some("%"), "cpu_percent", true),
    ("ram_usage", "RAM Usage", Some("%"), "ram_percent", true),
    ("temp", "CPU Temp", Some("°C"), "temp_c", true),
    ("load_1m", "Load 1m", None, "load_avg[0]", false),
    ("load_5m", "Load 5m", None, "load_avg[1]", false),
    ("load_15m", "Load 15m", None, "load_avg[2]", false),
    ("uptime", "System Uptime", None, "uptime", false),
];

/// The service sensor's payload key and object id are fixed; only its label varies
const SERVICE_OBJECT_ID: &str = "jellyfin";

/// Number of sensors that exist regardless of containers and cores
pub const GENERIC_SENSOR_COUNT: usize = GENERIC_SENSORS.len() + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRegistry {
    device: DeviceGroup,
    sensors: Vec<SensorDescriptor>,
}

impl SensorRegistry {
    /// Build the registry: containers first, then cores, then generic scalars
    pub fn build(config: &AgentConfig, core_count: usize) -> Result<Self, RegistryError> {
        let device_id = config.device.id.as_str();
        let mut sensors =
            Vec::with_capacity(config.containers.len() + core_count + GENERIC_SENSOR_COUNT);

        for container in &config.containers {
            sensors.push(container_sensor(device_id, container));
        }
        for index in 0..core_count {
            sensors.push(core_sensor(device_id, index));
        }
        for (object_id, name, unit, path, measurement) in GENERIC_SENSORS {
            sensors.push(scalar_sensor(device_id, object_id, name.to_string(), *unit, path, *measurement));
        }
        sensors.push(scalar_sensor(
            device_id,
            SERVICE_OBJECT_ID,
            format!("{} Status", config.service.label),
            None,
            SERVICE_OBJECT_ID,
            false,
        ));

        // Object ids address discovery topics, so they must be unique as well
        let mut object_ids = HashSet::new();
        let mut unique_ids = HashSet::new();
        for sensor in &sensors {
            if !object_ids.insert(sensor.object_id.as_str())
                || !unique_ids.insert(sensor.unique_id.as_str())
            {
                return Err(RegistryError::DuplicateObjectId {
                    object_id: sensor.object_id.clone(),
                });
            }
        }

        Ok(Self {
            device: DeviceGroup::from_config(&config.device),
            sensors,
        })
    }

    pub fn device(&self) -> &DeviceGroup {
        &self.device
    }

    pub fn sensors(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }
}

/// Object ids only keep ASCII alphanumerics and hyphens
pub fn sanitize_object_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

fn container_sensor(device_id: &str, container: &str) -> SensorDescriptor {
    let object_id = sanitize_object_id(container);
    // Looked up by the unsanitized name: that is the key the runtime reports
    let value_template = format!(
        "{{{{ 'running' if value_json.docker.get('{container}', '') | regex_match('^{RUNNING_PREFIX}') else 'stopped' }}}}"
    );

    SensorDescriptor {
        unique_id: format!("{device_id}_{object_id}_container"),
        name: format!("{container} Container"),
        value_template,
        unit: None,
        state_class: None,
        icon: Some(CONTAINER_ICON.to_string()),
        object_id,
    }
}

fn core_sensor(device_id: &str, index: usize) -> SensorDescriptor {
    let object_id = format!("cpu_core_{}", index + 1);

    SensorDescriptor {
        unique_id: format!("{device_id}_{object_id}"),
        name: format!("CPU Core {}", index + 1),
        value_template: format!("{{{{ value_json.cpu_per_core[{index}] }}}}"),
        unit: Some("%".to_string()),
        state_class: Some(StateClass::Measurement),
        icon: None,
        object_id,
    }
}

fn scalar_sensor(
    device_id: &str,
    object_id: &str,
    name: String,
    unit: Option<&str>,
    path: &str,
    measurement: bool,
) -> SensorDescriptor {
    SensorDescriptor {
        object_id: object_id.to_string(),
        unique_id: format!("{device_id}_{object_id}"),
        name,
        value_template: format!("{{{{ value_json.{path} }}}}"),
        unit: unit.map(str::to_string),
        state_class: measurement.then_some(StateClass::Measurement),
        icon: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwatch_devkit::frontend::evaluate;
    use serde_json::json;

    fn config(containers: &[&str]) -> AgentConfig {
        let list = containers
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        AgentConfig::from_toml_str(&format!(
            r#"
            containers = [{list}]
            [mqtt]
            broker_host = "localhost"
            username = "u"
            password = "p"
            [device]
            id = "main_server"
            "#
        ))
        .unwrap()
    }

    fn find<'a>(registry: &'a SensorRegistry, object_id: &str) -> &'a SensorDescriptor {
        registry
            .sensors()
            .iter()
            .find(|s| s.object_id == object_id)
            .unwrap()
    }

    #[test]
    fn test_sensor_count_and_uniqueness() {
        let containers = ["plex", "paho_mqtt_broker", "cloudflare-cloudflared-1"];
        let registry = SensorRegistry::build(&config(&containers), 4).unwrap();
        assert_eq!(registry.sensor_count(), containers.len() + 4 + GENERIC_SENSOR_COUNT);

        let unique: HashSet<_> = registry.sensors().iter().map(|s| &s.unique_id).collect();
        assert_eq!(unique.len(), registry.sensor_count());

        for container in containers {
            let count = registry
                .sensors()
                .iter()
                .filter(|s| s.name == format!("{container} Container"))
                .count();
            assert_eq!(count, 1, "{container}");
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let cfg = config(&["plex", "ntfy"]);
        assert_eq!(SensorRegistry::build(&cfg, 2).unwrap(), SensorRegistry::build(&cfg, 2).unwrap());
    }

    #[test]
    fn test_container_ids_are_sanitized_but_lookup_is_not() {
        let registry = SensorRegistry::build(&config(&["paho_mqtt_broker"]), 1).unwrap();
        let sensor = find(&registry, "paho-mqtt-broker");
        assert_eq!(sensor.unique_id, "main_server_paho-mqtt-broker_container");
        assert_eq!(sensor.name, "paho_mqtt_broker Container");
        assert_eq!(sensor.icon.as_deref(), Some("mdi:docker"));
        assert_eq!(
            sensor.value_template,
            "{{ 'running' if value_json.docker.get('paho_mqtt_broker', '') | regex_match('^Up') else 'stopped' }}"
        );
    }

    #[test]
    fn test_container_template_evaluation() {
        let registry = SensorRegistry::build(&config(&["plex"]), 1).unwrap();
        let template = &find(&registry, "plex").value_template;

        let up = json!({ "docker": { "plex": "Up 3 days" } });
        let exited = json!({ "docker": { "plex": "Exited (0) 2 hours ago" } });
        let absent = json!({ "docker": {} });
        let failed = json!({ "docker": { "error": "docker: command not found" } });

        assert_eq!(evaluate(template, &up), json!("running"));
        assert_eq!(evaluate(template, &exited), json!("stopped"));
        assert_eq!(evaluate(template, &absent), json!("stopped"));
        assert_eq!(evaluate(template, &failed), json!("stopped"));
    }

    #[test]
    fn test_core_sensors() {
        let registry = SensorRegistry::build(&config(&[]), 2).unwrap();
        let payload = json!({ "cpu_per_core": [12.0, 87.5] });

        let first = find(&registry, "cpu_core_1");
        assert_eq!(first.name, "CPU Core 1");
        assert_eq!(first.unit.as_deref(), Some("%"));
        assert_eq!(first.state_class, Some(StateClass::Measurement));
        assert_eq!(first.value_template, "{{ value_json.cpu_per_core[0] }}");
        assert_eq!(evaluate(&first.value_template, &payload), json!(12.0));

        let second = find(&registry, "cpu_core_2");
        assert_eq!(second.name, "CPU Core 2");
        assert_eq!(evaluate(&second.value_template, &payload), json!(87.5));
    }

    #[test]
    fn test_generic_sensor_classification() {
        let registry = SensorRegistry::build(&config(&[]), 1).unwrap();

        let temp = find(&registry, "temp");
        assert_eq!(temp.unit.as_deref(), Some("°C"));
        assert_eq!(temp.state_class, Some(StateClass::Measurement));
        assert_eq!(evaluate(&temp.value_template, &json!({ "temp_c": null })), json!(null));

        for object_id in ["load_1m", "load_5m", "load_15m", "uptime", "jellyfin"] {
            let sensor = find(&registry, object_id);
            assert!(sensor.unit.is_none(), "{object_id}");
            assert!(sensor.state_class.is_none(), "{object_id}");
        }
        assert_eq!(find(&registry, "load_15m").value_template, "{{ value_json.load_avg[2] }}");
        assert_eq!(find(&registry, "jellyfin").name, "Jellyfin Status");
        assert_eq!(find(&registry, "cpu_total").unique_id, "main_server_cpu_total");
    }

    #[test]
    fn test_colliding_container_ids_rejected() {
        let err = SensorRegistry::build(&config(&["media_box", "media-box"]), 1).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateObjectId { object_id: "media-box".to_string() });

        // A container shadowing a generic sensor's topic is a collision too
        assert!(SensorRegistry::build(&config(&["uptime"]), 1).is_err());
    }

    #[test]
    fn test_device_group() {
        let registry = SensorRegistry::build(&config(&[]), 1).unwrap();
        assert_eq!(registry.device().identifiers, vec!["main_server".to_string()]);
        assert_eq!(registry.device().name, "Main Server");
    }
}
