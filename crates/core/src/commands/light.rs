//! The `light` command: power, brightness and color for smart lights.

use crate::color::ColorResolver;
use crate::command::{Command, CommandOutcome, CommandSpec, Example, ParamSpec, Parameters};
use crate::device::actuator::{ActionKind, LightAction};
use crate::device::controller::LightController;
use crate::device::directory::ALL_DEVICES;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const LIGHT_COMMAND: &str = "light";

const DEFAULT_BRIGHTNESS: u8 = 100;

/// Reads a brightness percentage. Anything that is not an integer in 1-100
/// falls back to full brightness.
pub fn parse_brightness(raw: Option<&str>) -> u8 {
    raw.and_then(|s| s.trim().parse::<u8>().ok())
        .filter(|level| (1..=100).contains(level))
        .unwrap_or(DEFAULT_BRIGHTNESS)
}

/// Switches, dims and colors lights through the device worker.
pub struct LightCommand {
    spec: CommandSpec,
    colors: Arc<ColorResolver>,
    controller: Arc<LightController>,
}

impl LightCommand {
    /// Creates the `light` command.
    ///
    /// # Arguments
    ///
    /// * `colors` - Resolves the `color` parameter to an HSV value.
    /// * `controller` - Owns the device worker that performs the action.
    pub fn new(colors: Arc<ColorResolver>, controller: Arc<LightController>) -> Self {
        let spec = CommandSpec::new(LIGHT_COMMAND, "Control Kasa smart lights")
            .param(
                "action",
                ParamSpec::string("Action to perform (on, off, toggle, status, color)", "status"),
            )
            .param("device", ParamSpec::string("Device name or IP address", "all"))
            .param("brightness", ParamSpec::string("Brightness level (1-100)", "100"))
            .param(
                "color",
                ParamSpec::string(
                    "Color name or description (e.g., red, blue, warm white)",
                    "",
                ),
            );
        Self {
            spec,
            colors,
            controller,
        }
    }

    async fn resolve_color(&self, description: &str, outcome: &mut CommandOutcome) -> LightAction {
        let description = description.trim();
        if description.is_empty() {
            outcome.report.push("No color given; turning on instead".to_string());
            return LightAction::On;
        }
        match self.colors.resolve(description).await {
            Some(hsv) => {
                info!(color = %description, %hsv, "Using color");
                LightAction::Color(hsv)
            }
            None => {
                warn!(color = %description, "Could not interpret color");
                outcome.report.push(format!(
                    "Could not interpret color '{}'; turning on instead",
                    description
                ));
                LightAction::On
            }
        }
    }
}

#[async_trait]
impl Command for LightCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn examples(&self) -> Vec<Example> {
        vec![
            Example::new(LIGHT_COMMAND, "turn on the lights").with("action", "on"),
            Example::new(LIGHT_COMMAND, "turn off the living room light")
                .with("action", "off")
                .with("device", "living room"),
            Example::new(LIGHT_COMMAND, "set brightness to 50 percent")
                .with("action", "on")
                .with("brightness", "50"),
            Example::new(LIGHT_COMMAND, "toggle the bedroom light")
                .with("action", "toggle")
                .with("device", "bedroom"),
            Example::new(LIGHT_COMMAND, "are the lights on").with("action", "status"),
            Example::new(LIGHT_COMMAND, "change the lights to blue")
                .with("action", "color")
                .with("color", "blue"),
            Example::new(LIGHT_COMMAND, "set living room light to warm orange")
                .with("action", "color")
                .with("device", "living room")
                .with("color", "warm orange"),
        ]
    }

    fn acknowledgment(&self, parameters: &Parameters) -> Option<String> {
        let action = parameters.get("action")?;
        if !action.eq_ignore_ascii_case("color") {
            return None;
        }
        let color = parameters.get("color").map(String::as_str).unwrap_or_default();
        Some(format!("Sure thing! Turning the lights {} now.", color))
    }

    async fn execute(&self, parameters: &Parameters) -> Result<CommandOutcome> {
        let mut outcome = CommandOutcome::default();
        let param = |name: &str| parameters.get(name).map(String::as_str);

        let requested = param("action").unwrap_or("status");
        let kind = match requested.parse::<ActionKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(action = %requested, "Rejected light action");
                return Ok(outcome
                    .line(e.to_string())
                    .speak(format!("Sorry, I can't {} the lights.", e.0)));
            }
        };
        let device = param("device")
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(ALL_DEVICES);
        let brightness = parse_brightness(param("brightness"));

        let action = match kind {
            ActionKind::Color => {
                self.resolve_color(param("color").unwrap_or_default(), &mut outcome)
                    .await
            }
            other => LightAction::from_kind(other, None),
        };

        let reports = self.controller.run(device, action, brightness).await?;
        if reports.is_empty() {
            let line = if device.eq_ignore_ascii_case(ALL_DEVICES) {
                "No devices found".to_string()
            } else {
                format!("No device matches '{}'", device)
            };
            return Ok(outcome.speak(format!("{}.", line)).line(line));
        }

        let lines: Vec<String> = reports.iter().map(ToString::to_string).collect();
        if action == LightAction::Status {
            outcome.spoken = Some(format!("{}.", lines.join(". ")));
        }
        outcome.report.extend(lines);
        Ok(outcome)
    }
}
