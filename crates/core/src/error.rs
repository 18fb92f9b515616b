//! Domain error types shared across the core crate.

use std::time::Duration;

/// Failures raised while talking to a device or the device worker.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("I/O error talking to {ip}: {source}")]
    Io {
        ip: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Device {ip} did not answer within {timeout:?}")]
    Timeout { ip: String, timeout: Duration },
    #[error("Unexpected response from {ip}: {reason}")]
    Protocol { ip: String, reason: String },
    #[error("Device {ip} does not support {capability}")]
    Unsupported { ip: String, capability: &'static str },
    #[error("Device discovery failed: {0}")]
    Discovery(String),
    #[error("Device worker is unavailable")]
    WorkerUnavailable,
}

impl DeviceError {
    /// Whether the error means the execution context itself is unusable, as
    /// opposed to a single device misbehaving.
    pub fn is_context_failure(&self) -> bool {
        matches!(self, DeviceError::Discovery(_) | DeviceError::WorkerUnavailable)
    }
}

/// Errors raised by the command registry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A command named '{0}' is already registered")]
    Duplicate(String),
}

/// Errors raised while persisting a cache file.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to replace cache file: {0}")]
    Persist(#[from] tempfile::PersistError),
}
