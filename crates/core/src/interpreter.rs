//! Command Interpretation
//!
//! Turns a transcription into a structured command by asking the completion
//! service, with the registry's schemas and a balanced set of examples as
//! the system prompt. Successful resolutions are kept in a persistent cache
//! keyed by the exact utterance.

use crate::cache::{self, CacheStore};
use crate::command::{Parameters, ResolvedCommand};
use crate::example_bank::{ExampleBudget, balance};
use crate::llm_client::{CompletionClient, CompletionRequest};
use crate::prompts::command_system_prompt;
use crate::registry::CommandRegistry;
use crate::speech::Announcer;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NOT_UNDERSTOOD: &str = "Sorry, I didn't understand that command.";

#[derive(Deserialize)]
struct RawCommand {
    command: Option<String>,
    #[serde(default)]
    parameters: Option<Map<String, Value>>,
}

/// Converts a JSON parameter value to its string form. Nulls and nested
/// values are dropped.
fn stringify(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Maps utterances onto registered commands.
pub struct Interpreter {
    registry: Arc<CommandRegistry>,
    client: Arc<dyn CompletionClient>,
    cache: Mutex<CacheStore<ResolvedCommand>>,
    announcer: Announcer,
    system_prompt: String,
}

impl Interpreter {
    /// Creates an interpreter whose cache lives at `cache_path`. Entries
    /// written for a different set of command schemas are discarded.
    ///
    /// # Arguments
    ///
    /// * `registry` - The commands an utterance may resolve to.
    /// * `client` - The completion service asked on a cache miss.
    /// * `cache_path` - Where the transcription cache is persisted.
    /// * `announcer` - Speaks the acknowledgment for each resolved command.
    pub fn new(
        registry: Arc<CommandRegistry>,
        client: Arc<dyn CompletionClient>,
        cache_path: impl Into<PathBuf>,
        announcer: Announcer,
    ) -> Self {
        let cache = CacheStore::load(cache_path, registry.fingerprint());
        let system_prompt = Self::build_prompt(&registry, ExampleBudget::default());
        Self {
            registry,
            client,
            cache: Mutex::new(cache),
            announcer,
            system_prompt,
        }
    }

    pub fn with_budget(mut self, budget: ExampleBudget) -> Self {
        self.system_prompt = Self::build_prompt(&self.registry, budget);
        self
    }

    fn build_prompt(registry: &CommandRegistry, budget: ExampleBudget) -> String {
        let examples = balance(registry.examples(), budget);
        command_system_prompt(&registry.schemas(), &examples)
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Resolves an utterance. Never fails: anything that goes wrong yields
    /// the `unknown` command.
    pub async fn interpret(&self, utterance: &str) -> ResolvedCommand {
        let hit = self.cache.lock().get(utterance).cloned();
        if let Some(resolved) = hit {
            debug!(utterance = %utterance, command = %resolved.command, "Transcription cache hit");
            self.acknowledge(&resolved);
            return resolved;
        }

        let resolved = self.ask(utterance).await;
        if resolved.is_unknown() {
            info!(utterance = %utterance, "No command matched");
        } else {
            info!(
                utterance = %utterance,
                command = %resolved.command,
                parameters = ?resolved.parameters,
                "Interpreted command"
            );
            let stored =
                cache::write_through(|| self.cache.lock().insert(utterance, resolved.clone()));
            if let Err(e) = stored {
                warn!(error = %e, "Failed to persist transcription cache");
            }
        }
        self.acknowledge(&resolved);
        resolved
    }

    async fn ask(&self, utterance: &str) -> ResolvedCommand {
        let request = CompletionRequest::json(self.system_prompt.as_str(), utterance);
        match self.client.complete(request).await {
            Ok(text) => self.parse(&text),
            Err(e) => {
                warn!(utterance = %utterance, error = ?e, "Command interpretation failed");
                ResolvedCommand::unknown()
            }
        }
    }

    /// Validates a completion against the registry.
    fn parse(&self, text: &str) -> ResolvedCommand {
        let raw: RawCommand = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(response = %text, error = %e, "Malformed interpretation");
                return ResolvedCommand::unknown();
            }
        };
        let Some(name) = raw.command else {
            return ResolvedCommand::unknown();
        };
        let Some(command) = self.registry.get(&name) else {
            if name != crate::command::UNKNOWN_COMMAND {
                warn!(command = %name, "Interpreted an unregistered command");
            }
            return ResolvedCommand::unknown();
        };

        let declared = &command.spec().parameters;
        let parameters: Parameters = raw
            .parameters
            .unwrap_or_default()
            .into_iter()
            .filter(|(key, _)| declared.contains_key(key))
            .filter_map(|(key, value)| stringify(value).map(|v| (key, v)))
            .collect();
        ResolvedCommand::new(name, parameters)
    }

    fn acknowledge(&self, resolved: &ResolvedCommand) {
        let message = if resolved.is_unknown() {
            Some(NOT_UNDERSTOOD.to_string())
        } else {
            self.registry
                .get(&resolved.command)
                .and_then(|c| c.acknowledgment(&resolved.parameters))
        };
        if let Some(message) = message {
            self.announcer.speak(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandSpec, Example, ParamSpec};
    use crate::llm_client::{MockCompletionClient, OutputFormat};
    use crate::registry::testing::RecordingCommand;
    use crate::speech::testing::RecordingSpeaker;
    use anyhow::anyhow;
    use tempfile::tempdir;

    fn light_spec() -> CommandSpec {
        CommandSpec::new("light", "Control smart lights")
            .param("action", ParamSpec::string("Action", "status"))
            .param("device", ParamSpec::string("Device", "all"))
            .param("brightness", ParamSpec::string("Brightness", "100"))
            .param("color", ParamSpec::string("Color", ""))
    }

    fn registry() -> Arc<CommandRegistry> {
        let mut registry = CommandRegistry::new();
        registry
            .register(Arc::new(
                RecordingCommand::new(light_spec())
                    .with_examples(vec![
                        Example::new("light", "turn on the lights").with("action", "on"),
                    ])
                    .with_acknowledgment("On it."),
            ))
            .unwrap();
        registry
            .register(Arc::new(RecordingCommand::simple("time")))
            .unwrap();
        Arc::new(registry)
    }

    fn client_returning(times: usize, text: &'static str) -> MockCompletionClient {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .times(times)
            .returning(move |_| Ok(text.to_string()));
        client
    }

    fn interpreter(
        registry: Arc<CommandRegistry>,
        client: MockCompletionClient,
        path: &std::path::Path,
    ) -> (Interpreter, crate::speech::AnnouncerHandle, Arc<RecordingSpeaker>) {
        let speaker = Arc::new(RecordingSpeaker::default());
        let (announcer, handle) = Announcer::spawn(speaker.clone());
        let interpreter = Interpreter::new(registry, Arc::new(client), path, announcer);
        (interpreter, handle, speaker)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_same_utterance_resolves_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("transcription_cache.json");
        let client = client_returning(
            1,
            r#"{"command": "light", "parameters": {"action": "on", "device": "living room"}}"#,
        );
        let (interpreter, handle, speaker) = interpreter(registry(), client, &path);

        let first = interpreter.interpret("turn on the living room light").await;
        let second = interpreter.interpret("turn on the living room light").await;
        assert_eq!(first, second);
        assert_eq!(first.command, "light");
        assert_eq!(first.param("device"), Some("living room"));

        handle.shutdown().await;
        // Hits are acknowledged like fresh resolutions.
        assert_eq!(speaker.spoken.lock().as_slice(), &["On it.", "On it."]);
    }

    #[tokio::test]
    async fn test_cache_survives_restart_but_not_schema_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("transcription_cache.json");
        let response = r#"{"command": "time", "parameters": {}}"#;

        let (first, handle, _) = interpreter(registry(), client_returning(1, response), &path);
        first.interpret("what time is it").await;
        handle.shutdown().await;

        let (second, handle, _) = interpreter(registry(), client_returning(0, response), &path);
        assert_eq!(second.interpret("what time is it").await.command, "time");
        handle.shutdown().await;

        // Only `time` registered now: the fingerprint differs.
        let mut changed = CommandRegistry::new();
        changed
            .register(Arc::new(RecordingCommand::simple("time")))
            .unwrap();
        let (third, handle, _) =
            interpreter(Arc::new(changed), client_returning(1, response), &path);
        assert_eq!(third.interpret("what time is it").await.command, "time");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_shape() {
        let dir = tempdir().unwrap();
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .times(1)
            .withf(|req| {
                req.user_text == "check time"
                    && req.format == OutputFormat::JsonObject
                    && req.max_tokens == 150
                    && (req.temperature - 0.1).abs() < f32::EPSILON
                    && req.system_prompt.contains("\"name\": \"light\"")
                    && req.system_prompt.contains("User: \"turn on the lights\"")
            })
            .returning(|_| Ok(r#"{"command": "time"}"#.to_string()));
        let (interpreter, handle, _) =
            interpreter(registry(), client, &dir.path().join("cache.json"));

        let resolved = interpreter.interpret("check time").await;
        assert_eq!(resolved, ResolvedCommand::new("time", Parameters::new()));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_resolve_to_unknown_and_are_not_cached() {
        let dir = tempdir().unwrap();
        let mut client = MockCompletionClient::new();
        let mut calls = 0;
        client.expect_complete().times(5).returning(move |_| {
            calls += 1;
            match calls {
                1 => Err(anyhow!("timed out")),
                2 => Ok("I think you want the lights".to_string()),
                3 => Ok(r#"{"command": "unknown"}"#.to_string()),
                4 => Ok(
                    r#"{"command": "weather", "parameters": {"location": "Paris"}}"#.to_string(),
                ),
                _ => Ok(r#"{"parameters": {"action": "on"}}"#.to_string()),
            }
        });
        let path = dir.path().join("cache.json");
        let (interpreter, handle, speaker) = interpreter(registry(), client, &path);

        for _ in 0..5 {
            assert!(interpreter.interpret("make it nice").await.is_unknown());
        }
        handle.shutdown().await;

        assert_eq!(speaker.spoken.lock().len(), 5);
        assert!(speaker.spoken.lock().iter().all(|s| s == NOT_UNDERSTOOD));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_parameters_are_normalized() {
        let dir = tempdir().unwrap();
        let client = client_returning(
            1,
            r#"{"command": "light", "parameters": {
                "action": "on", "brightness": 50, "device": true,
                "color": null, "room": "kitchen", "extra": [1, 2]
            }}"#,
        );
        let (interpreter, handle, _) =
            interpreter(registry(), client, &dir.path().join("cache.json"));

        let resolved = interpreter.interpret("lights to half").await;
        let expected: Parameters = [("action", "on"), ("brightness", "50"), ("device", "true")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(resolved.parameters, expected);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_prompt_respects_budget() {
        let dir = tempdir().unwrap();
        let (interpreter, handle, _) = interpreter(
            registry(),
            MockCompletionClient::new(),
            &dir.path().join("cache.json"),
        );
        let interpreter = interpreter.with_budget(ExampleBudget::new(2, 2));

        let prompt = interpreter.system_prompt();
        assert_eq!(prompt.matches("User: ").count(), 2);
        assert!(prompt.contains("User: \"turn on the lights\""));
        assert!(prompt.contains("User: \"time\""));
        handle.shutdown().await;
    }
}
