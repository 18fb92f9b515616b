//! The `time` command.

use crate::command::{Command, CommandOutcome, CommandSpec, Example, ParamSpec, Parameters};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};

pub const TIME_COMMAND: &str = "time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    Local,
    Utc,
}

impl Zone {
    /// Returns `None` for zones other than local time and UTC.
    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "" | "local" | "local time" | "here" => Some(Zone::Local),
            "utc" | "gmt" | "zulu" => Some(Zone::Utc),
            _ => None,
        }
    }
}

fn format_time(now: DateTime<Utc>, zone: Zone) -> String {
    match zone {
        Zone::Local => format!(
            "The current time is {} local time",
            now.with_timezone(&Local).format("%I:%M %p")
        ),
        Zone::Utc => format!("The current time is {} UTC", now.format("%I:%M %p")),
    }
}

/// Speaks the current time, locally or in UTC.
pub struct TimeCommand {
    spec: CommandSpec,
}

impl Default for TimeCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeCommand {
    pub fn new() -> Self {
        Self {
            spec: CommandSpec::new(
                TIME_COMMAND,
                "Tell the current time, optionally for a specific timezone",
            )
            .param(
                "timezone",
                ParamSpec::string("The timezone to check the time for", "local"),
            ),
        }
    }
}

#[async_trait]
impl Command for TimeCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn examples(&self) -> Vec<Example> {
        vec![
            Example::new(TIME_COMMAND, "what time is it in UTC").with("timezone", "utc"),
            Example::new(TIME_COMMAND, "tell me the current time"),
            Example::new(TIME_COMMAND, "check time"),
        ]
    }

    async fn execute(&self, parameters: &Parameters) -> Result<CommandOutcome> {
        let requested = parameters.get("timezone").map(String::as_str).unwrap_or("local");
        let now = Utc::now();
        let outcome = CommandOutcome::default();
        let (outcome, zone) = match Zone::parse(requested) {
            Some(zone) => (outcome, zone),
            None => (
                outcome.line(format!(
                    "Timezone '{}' is not supported; using local time",
                    requested
                )),
                Zone::Local,
            ),
        };
        let text = format_time(now, zone);
        Ok(outcome.line(text.clone()).speak(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_zone_parsing() {
        assert_eq!(Zone::parse("Local"), Some(Zone::Local));
        assert_eq!(Zone::parse(" UTC "), Some(Zone::Utc));
        assert_eq!(Zone::parse("Tokyo"), None);
    }

    #[test]
    fn test_utc_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 15, 7, 0).unwrap();
        assert_eq!(format_time(now, Zone::Utc), "The current time is 03:07 PM UTC");
        assert!(format_time(now, Zone::Local).ends_with("local time"));
    }

    #[tokio::test]
    async fn test_execute_speaks_time() {
        let command = TimeCommand::new();
        let outcome = command.execute(&Parameters::new()).await.unwrap();
        let spoken = outcome.spoken.unwrap();
        assert!(spoken.starts_with("The current time is"));
        assert_eq!(outcome.report, vec![spoken]);
    }

    #[tokio::test]
    async fn test_unsupported_zone_falls_back() {
        let mut params = Parameters::new();
        params.insert("timezone".into(), "Tokyo".into());
        let outcome = TimeCommand::new().execute(&params).await.unwrap();
        assert_eq!(outcome.report.len(), 2);
        assert!(outcome.report[0].contains("Tokyo"));
    }
}
