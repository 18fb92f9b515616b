//! Device control: handles, discovery, name resolution and actions.

pub mod actuator;
pub mod codec;
pub mod controller;
pub mod directory;
pub mod kasa;

use crate::color::Hsv;
use crate::error::DeviceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Bulb,
    Other,
}

/// The persisted, reconnectable description of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub ip: String,
    pub alias: String,
    pub model: String,
    pub kind: DeviceKind,
}

/// What a device can do beyond switching on and off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub dimmable: bool,
    pub color: bool,
}

/// A fresh snapshot of a device, as reported by a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub alias: String,
    pub is_on: bool,
    pub capabilities: Capabilities,
    /// Current brightness in percent, when dimmable.
    pub brightness: Option<u8>,
    /// Current color, when color-capable.
    pub color: Option<Hsv>,
}

/// A live handle to a controllable device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Device: Send + Sync {
    /// The last known description of the device.
    fn record(&self) -> DeviceRecord;

    /// Fetches the current state from the device.
    async fn refresh(&self) -> Result<DeviceState, DeviceError>;

    async fn turn_on(&self) -> Result<(), DeviceError>;

    async fn turn_off(&self) -> Result<(), DeviceError>;

    async fn set_brightness(&self, level: u8) -> Result<(), DeviceError>;

    async fn set_hsv(&self, color: Hsv) -> Result<(), DeviceError>;
}

pub type DeviceHandle = Arc<dyn Device>;

/// Finds devices on the network and reopens cached ones.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Actively searches the network.
    async fn discover(&self) -> Result<Vec<DeviceHandle>, DeviceError>;

    /// Opens a handle from a cached descriptor and verifies it answers.
    async fn connect(&self, record: &DeviceRecord) -> Result<DeviceHandle, DeviceError>;
}
