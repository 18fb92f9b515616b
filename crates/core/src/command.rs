//! Command schemas, few-shot examples and the `Command` trait.

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the sentinel command produced when nothing matched.
pub const UNKNOWN_COMMAND: &str = "unknown";

/// Parameter values of a resolved command, always normalized to strings.
pub type Parameters = BTreeMap<String, String>;

/// Schema of a single command parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub default: String,
}

impl ParamSpec {
    pub fn string(description: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            kind: "string".to_string(),
            description: description.into(),
            default: default.into(),
        }
    }
}

/// The schema of a command as presented to the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    pub parameters: IndexMap<String, ParamSpec>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: IndexMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// Synthesizes examples for a command with no authored ones: the bare
    /// command name, then one example per parameter set to its default.
    pub fn default_examples(&self) -> Vec<Example> {
        let mut examples = vec![Example::new(&self.name, &self.name)];
        for (param, spec) in &self.parameters {
            examples.push(
                Example::new(
                    &self.name,
                    format!("{} with {} {}", self.name, param, spec.default),
                )
                .with(param, &spec.default),
            );
        }
        examples
    }
}

/// A few-shot demonstration: an utterance and the command it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub command: String,
    pub utterance: String,
    pub parameters: Parameters,
}

impl Example {
    pub fn new(command: impl Into<String>, utterance: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            utterance: utterance.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// The response this example demonstrates, as a resolved command.
    pub fn response(&self) -> ResolvedCommand {
        ResolvedCommand::new(&self.command, self.parameters.clone())
    }
}

/// The structured result of interpreting an utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCommand {
    pub command: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl ResolvedCommand {
    pub fn new(command: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            command: command.into(),
            parameters,
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_COMMAND, Parameters::new())
    }

    pub fn is_unknown(&self) -> bool {
        self.command == UNKNOWN_COMMAND
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// What a command reports back after running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Human-readable report lines, one per notable event.
    pub report: Vec<String>,
    /// Text to speak to the user, if any.
    pub spoken: Option<String>,
}

impl CommandOutcome {
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.report.push(line.into());
        self
    }

    pub fn speak(mut self, text: impl Into<String>) -> Self {
        self.spoken = Some(text.into());
        self
    }
}

/// An invocable command.
#[async_trait]
pub trait Command: Send + Sync {
    fn spec(&self) -> &CommandSpec;

    /// Few-shot examples for the prompt. Defaults to the synthesized set.
    fn examples(&self) -> Vec<Example> {
        self.spec().default_examples()
    }

    /// A short confirmation to speak once an utterance resolved to this
    /// command, before it runs.
    fn acknowledgment(&self, _parameters: &Parameters) -> Option<String> {
        None
    }

    async fn execute(&self, parameters: &Parameters) -> Result<CommandOutcome>;
}
