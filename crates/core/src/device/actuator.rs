//! Applies a light action to a set of devices.

use super::{Device, DeviceHandle, DeviceState};
use crate::color::Hsv;
use crate::error::DeviceError;
use futures::{StreamExt, stream};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

pub const DEFAULT_FANOUT: usize = 4;

/// The action names a light request may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    On,
    Off,
    Toggle,
    Status,
    Color,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown light action '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for ActionKind {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "on" => Ok(ActionKind::On),
            "off" => Ok(ActionKind::Off),
            "toggle" => Ok(ActionKind::Toggle),
            "status" => Ok(ActionKind::Status),
            "color" | "colour" => Ok(ActionKind::Color),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// A fully resolved light action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightAction {
    On,
    Off,
    Toggle,
    Status,
    Color(Hsv),
}

impl LightAction {
    /// Builds the action for `kind`. A color request without a usable color
    /// becomes a plain power-on.
    pub fn from_kind(kind: ActionKind, color: Option<Hsv>) -> Self {
        match (kind, color) {
            (ActionKind::On, _) => LightAction::On,
            (ActionKind::Off, _) => LightAction::Off,
            (ActionKind::Toggle, _) => LightAction::Toggle,
            (ActionKind::Status, _) => LightAction::Status,
            (ActionKind::Color, Some(hsv)) => LightAction::Color(hsv),
            (ActionKind::Color, None) => LightAction::On,
        }
    }
}

/// What happened to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub ip: String,
    pub alias: String,
    pub result: Result<String, String>,
}

impl DeviceReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.alias.is_empty() {
            &self.ip
        } else {
            &self.alias
        };
        match &self.result {
            Ok(summary) => write!(f, "{}: {}", name, summary),
            Err(reason) => write!(f, "{}: failed ({})", name, reason),
        }
    }
}

/// Runs actions across devices with a bounded number in flight.
#[derive(Debug, Clone)]
pub struct DeviceActuator {
    fanout: usize,
}

impl Default for DeviceActuator {
    fn default() -> Self {
        Self::new(DEFAULT_FANOUT)
    }
}

impl DeviceActuator {
    pub fn new(fanout: usize) -> Self {
        Self {
            fanout: fanout.max(1),
        }
    }

    /// Most devices acted on at once.
    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Applies `action` to every device. Reports come back in device order;
    /// one device failing never stops the others.
    pub async fn execute(
        &self,
        action: LightAction,
        brightness: u8,
        devices: Vec<DeviceHandle>,
    ) -> Vec<DeviceReport> {
        stream::iter(devices)
            .map(|device| async move {
                let result = apply(device.as_ref(), action, brightness).await;
                let record = device.record();
                if let Err(e) = &result {
                    warn!(ip = %record.ip, action = ?action, error = %e, "Device action failed");
                }
                DeviceReport {
                    ip: record.ip,
                    alias: record.alias,
                    result: result.map_err(|e| e.to_string()),
                }
            })
            .buffered(self.fanout)
            .boxed()
            .collect()
            .await
    }
}

async fn power_on(
    device: &dyn Device,
    state: &DeviceState,
    brightness: u8,
) -> Result<String, DeviceError> {
    if state.capabilities.dimmable {
        device.set_brightness(brightness).await?;
        device.turn_on().await?;
        Ok(format!("on at {}%", brightness))
    } else {
        device.turn_on().await?;
        Ok("on".to_string())
    }
}

/// Power, then brightness when dimmable, then color only while lit.
fn describe(state: &DeviceState) -> String {
    let mut summary = if state.is_on { "on" } else { "off" }.to_string();
    if let Some(level) = state.brightness.filter(|_| state.capabilities.dimmable) {
        summary.push_str(&format!(", brightness {}%", level));
    }
    if let Some(color) = state
        .color
        .filter(|_| state.is_on && state.capabilities.color)
    {
        summary.push_str(&format!(", color {}", color));
    }
    summary
}

async fn apply(
    device: &dyn Device,
    action: LightAction,
    brightness: u8,
) -> Result<String, DeviceError> {
    let state = device.refresh().await?;
    debug!(alias = %state.alias, is_on = state.is_on, action = ?action, "Applying action");

    match action {
        LightAction::On => power_on(device, &state, brightness).await,
        LightAction::Off => {
            device.turn_off().await?;
            Ok("off".to_string())
        }
        LightAction::Toggle if state.is_on => {
            device.turn_off().await?;
            Ok("off".to_string())
        }
        LightAction::Toggle => power_on(device, &state, brightness).await,
        LightAction::Status => Ok(describe(&state)),
        LightAction::Color(color) => {
            if !state.capabilities.color {
                return Err(DeviceError::Unsupported {
                    ip: device.record().ip,
                    capability: "color",
                });
            }
            device.set_hsv(color).await?;
            if state.capabilities.dimmable {
                device.set_brightness(brightness).await?;
            }
            device.turn_on().await?;
            Ok(format!("{} at {}%", color, brightness))
        }
    }
}
