//! Command Registry
//!
//! The set of invocable commands, in registration order. The interpreter
//! builds its prompt from the registry's schemas and examples, and the
//! pipeline dispatches resolved commands through it.

use crate::command::{Command, CommandOutcome, CommandSpec, Example, ResolvedCommand};
use crate::error::RegistryError;
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of dispatching a resolved command.
#[derive(Debug)]
pub enum Dispatch {
    /// The command ran (successfully or not).
    Ran {
        command: String,
        result: anyhow::Result<CommandOutcome>,
    },
    /// No command with that name is registered.
    UnknownCommand(String),
}

/// Holds every registered command, keyed by name.
///
/// The registry is built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct CommandRegistry {
    commands: IndexMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command. Names are unique; registration order is kept and
    /// decides example priority.
    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<(), RegistryError> {
        let name = command.spec().name.clone();
        if self.commands.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.commands.insert(name, command);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.commands.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn commands(&self) -> impl Iterator<Item = &Arc<dyn Command>> {
        self.commands.values()
    }

    pub fn schemas(&self) -> Vec<&CommandSpec> {
        self.commands.values().map(|c| c.spec()).collect()
    }

    /// All examples of all commands, grouped by command in registration order.
    pub fn examples(&self) -> Vec<Example> {
        self.commands.values().flat_map(|c| c.examples()).collect()
    }

    /// A stable digest of every registered schema. Changes whenever a command
    /// is added, removed or has its parameters changed.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for spec in self.schemas() {
            match serde_json::to_vec(spec) {
                Ok(bytes) => hasher.update(&bytes),
                Err(_) => hasher.update(spec.name.as_bytes()),
            }
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Runs the named command with the resolved parameters.
    pub async fn dispatch(&self, resolved: &ResolvedCommand) -> Dispatch {
        let Some(command) = self.get(&resolved.command) else {
            warn!(command = %resolved.command, "Unknown command");
            return Dispatch::UnknownCommand(resolved.command.clone());
        };

        info!(
            command = %resolved.command,
            parameters = ?resolved.parameters,
            "Executing command"
        );
        let result = command.execute(&resolved.parameters).await;
        if let Err(e) = &result {
            warn!(command = %resolved.command, error = ?e, "Command failed");
        }
        Dispatch::Ran {
            command: resolved.command.clone(),
            result,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::command::{Parameters, ParamSpec};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// A command that records the parameters it was called with.
    pub struct RecordingCommand {
        spec: CommandSpec,
        examples: Option<Vec<Example>>,
        acknowledgment: Option<String>,
        pub calls: Mutex<Vec<Parameters>>,
    }

    impl RecordingCommand {
        pub fn new(spec: CommandSpec) -> Self {
            Self {
                spec,
                examples: None,
                acknowledgment: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_examples(mut self, examples: Vec<Example>) -> Self {
            self.examples = Some(examples);
            self
        }

        pub fn with_acknowledgment(mut self, text: &str) -> Self {
            self.acknowledgment = Some(text.to_string());
            self
        }

        pub fn simple(name: &str) -> Self {
            Self::new(
                CommandSpec::new(name, format!("The {} command", name))
                    .param("target", ParamSpec::string("What to act on", "all")),
            )
        }
    }

    #[async_trait]
    impl Command for RecordingCommand {
        fn spec(&self) -> &CommandSpec {
            &self.spec
        }

        fn examples(&self) -> Vec<Example> {
            self.examples
                .clone()
                .unwrap_or_else(|| self.spec.default_examples())
        }

        fn acknowledgment(&self, _parameters: &Parameters) -> Option<String> {
            self.acknowledgment.clone()
        }

        async fn execute(&self, parameters: &Parameters) -> anyhow::Result<CommandOutcome> {
            self.calls.lock().push(parameters.clone());
            Ok(CommandOutcome::default().line(format!("ran {}", self.spec.name)))
        }
    }
}
