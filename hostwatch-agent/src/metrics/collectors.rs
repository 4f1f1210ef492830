//! Collectors backed by external CLIs
//!
//! Each collector folds its own failures into a fallback value so one
//! unavailable source never costs the whole snapshot.

use crate::execution::{run_checked, run_command};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Container name -> raw runtime status text, or the reason listing failed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContainerStatuses {
    Listed(BTreeMap<String, String>),
    Unavailable { error: String },
}

/// Service state enumeration (`systemctl is-active` vocabulary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Active,
    Inactive,
    Failed,
    Activating,
    Deactivating,
    Reloading,
    Unknown,
}

impl ServiceState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "active" => ServiceState::Active,
            "inactive" => ServiceState::Inactive,
            "failed" => ServiceState::Failed,
            "activating" => ServiceState::Activating,
            "deactivating" => ServiceState::Deactivating,
            "reloading" => ServiceState::Reloading,
            _ => ServiceState::Unknown,
        }
    }
}

/// `docker ps -a` for every container the runtime knows about
pub async fn container_statuses(timeout: Duration) -> ContainerStatuses {
    let args = ["ps", "-a", "--format", "{{.Names}}={{.Status}}"];
    match run_checked("docker", &args, timeout).await {
        Ok(stdout) => ContainerStatuses::Listed(parse_container_listing(&stdout)),
        Err(e) => {
            warn!("Container status unavailable: {}", e);
            ContainerStatuses::Unavailable { error: e.to_string() }
        }
    }
}

/// Parse `name=status` lines, splitting at the first `=`
pub fn parse_container_listing(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match line.split_once('=') {
            Some((name, status)) => Some((name.to_string(), status.to_string())),
            None => {
                debug!("Skipping malformed container line: {}", line);
                None
            }
        })
        .collect()
}

/// `systemctl is-active` exits non-zero for anything but active, so the
/// state is read from stdout regardless of the exit code.
pub async fn service_state(unit: &str, timeout: Duration) -> ServiceState {
    match run_command("systemctl", &["is-active", unit], timeout).await {
        Ok(output) => ServiceState::parse(&output.stdout),
        Err(e) => {
            debug!("Service state for {} unavailable: {}", unit, e);
            ServiceState::Unknown
        }
    }
}

/// Render uptime the way `uptime -p` does
pub fn format_uptime(uptime_secs: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;
    const WEEK: u64 = 7 * DAY;
    const YEAR: u64 = 365 * DAY;

    let mut rest = uptime_secs;
    let mut take = |unit: u64| {
        let n = rest / unit;
        rest %= unit;
        n
    };
    let years = take(YEAR);
    let weeks = take(WEEK);
    let days = take(DAY);
    let hours = take(HOUR);
    let minutes = take(MINUTE);

    let mut parts = Vec::new();
    for (n, label) in [(years, "year"), (weeks, "week"), (days, "day"), (hours, "hour")] {
        if n > 0 {
            parts.push(plural(n, label));
        }
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(plural(minutes, "minute"));
    }

    format!("up {}", parts.join(", "))
}

fn plural(n: u64, label: &str) -> String {
    if n == 1 {
        format!("{n} {label}")
    } else {
        format!("{n} {label}s")
    }
}
