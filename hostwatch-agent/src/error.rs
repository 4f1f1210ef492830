//! Error types shared across the agent modules

use std::path::PathBuf;
use thiserror::Error;

/// Startup configuration problems. All of them are fatal before the loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("could not determine the OS config directory")]
    NoConfigDir,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("keyring lookup failed: {0}")]
    Keyring(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("sensor object id `{object_id}` is produced by more than one sensor")]
    DuplicateObjectId { object_id: String },
}

/// A whole tick could not be sampled. Partial failures never surface here.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("no CPU counters available")]
    CountersUnavailable,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker rejected request: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[cfg(test)]
    #[error("publish failed: {0}")]
    Simulated(String),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("`{program}` exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
}
