//! System metrics collection for the telemetry agent
//!
//! Produces one [`MetricSnapshot`] per poll tick:
//! - CPU usage (aggregate and per logical core) and load averages
//! - Memory usage
//! - First available CPU temperature
//! - Container run status from the container runtime
//! - Activity state of one named system service
//!
//! The serialized field names are an external contract: the front-end's
//! value templates index straight into them.

mod collectors;

pub use collectors::{format_uptime, ContainerStatuses, ServiceState};

use crate::error::SampleError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use sysinfo::{Components, System};
use tracing::debug;

/// State payload published on every tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub cpu_per_core: Vec<f64>,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub uptime: String,
    pub load_avg: [f64; 3], // [1min, 5min, 15min]
    pub temp_c: Option<f64>,
    pub docker: ContainerStatuses,
    pub jellyfin: ServiceState,
}

/// Source of snapshots consumed by the telemetry loop
#[async_trait]
pub trait Sampler: Send {
    /// Partial failures are folded into fallback values; an error here means
    /// the whole tick is unusable.
    async fn sample(&mut self) -> Result<MetricSnapshot, SampleError>;
}

/// Sampler backed by the local OS and the docker / systemctl CLIs
pub struct SystemSampler {
    sys: System,
    service_unit: String,
    command_timeout: Duration,
}

impl SystemSampler {
    pub fn new(service_unit: impl Into<String>, command_timeout: Duration) -> Self {
        let mut sys = System::new();
        // Prime the CPU counters so the first tick measures against boot-time totals
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        Self {
            sys,
            service_unit: service_unit.into(),
            command_timeout,
        }
    }

    /// Logical core count, never less than one
    pub fn core_count(&self) -> usize {
        self.sys.cpus().len().max(1)
    }

    fn first_cpu_temperature() -> Option<f64> {
        let components = Components::new_with_refreshed_list();
        for component in &components {
            let celsius = component.temperature();
            if celsius.is_finite() {
                return Some(round1(celsius as f64));
            }
        }
        None
    }

    fn memory_percent(&self) -> f64 {
        let total = self.sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        let used = total.saturating_sub(self.sys.available_memory());
        round1(used as f64 / total as f64 * 100.0)
    }
}

#[async_trait]
impl Sampler for SystemSampler {
    async fn sample(&mut self) -> Result<MetricSnapshot, SampleError> {
        debug!("Collecting system metrics...");

        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let cpu_per_core: Vec<f64> = self
            .sys
            .cpus()
            .iter()
            .map(|c| round1(c.cpu_usage() as f64))
            .collect();
        if cpu_per_core.is_empty() {
            return Err(SampleError::CountersUnavailable);
        }
        let cpu_percent = round1(self.sys.global_cpu_info().cpu_usage() as f64);

        let load = System::load_average();
        let (docker, jellyfin) = tokio::join!(
            collectors::container_statuses(self.command_timeout),
            collectors::service_state(&self.service_unit, self.command_timeout),
        );

        Ok(MetricSnapshot {
            cpu_per_core,
            cpu_percent,
            ram_percent: self.memory_percent(),
            uptime: format_uptime(System::uptime()),
            load_avg: [load.one, load.five, load.fifteen],
            temp_c: Self::first_cpu_temperature(),
            docker,
            jellyfin,
        })
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
