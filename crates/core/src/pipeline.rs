//! One utterance end to end: transcribe, interpret, dispatch, speak.

use crate::command::CommandOutcome;
use crate::interpreter::Interpreter;
use crate::registry::{CommandRegistry, Dispatch};
use crate::speech::{Announcer, Transcriber};
use std::sync::Arc;
use tracing::{info, warn};

/// What became of one utterance.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Nothing intelligible was heard.
    Silence,
    /// The utterance did not resolve to a registered command.
    NotUnderstood,
    Executed {
        command: String,
        outcome: CommandOutcome,
    },
    Failed {
        command: String,
        error: String,
    },
}

/// Wires transcription, interpretation and dispatch together and speaks the
/// result.
pub struct Pipeline {
    transcriber: Arc<dyn Transcriber>,
    interpreter: Arc<Interpreter>,
    registry: Arc<CommandRegistry>,
    announcer: Announcer,
}

impl Pipeline {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        interpreter: Arc<Interpreter>,
        registry: Arc<CommandRegistry>,
        announcer: Announcer,
    ) -> Self {
        Self {
            transcriber,
            interpreter,
            registry,
            announcer,
        }
    }

    /// Transcribes a recording and handles the text. A failed or empty
    /// transcription is silence.
    pub async fn handle_audio(&self, audio: &[u8]) -> PipelineOutcome {
        match self.transcriber.transcribe(audio).await {
            Ok(Some(text)) => self.handle_transcript(&text).await,
            Ok(None) => PipelineOutcome::Silence,
            Err(e) => {
                warn!(error = ?e, "Transcription failed");
                PipelineOutcome::Silence
            }
        }
    }

    /// Interprets `text` and runs the command it names.
    ///
    /// # Returns
    ///
    /// What became of the utterance; failures are reported in the outcome,
    /// never as an error.
    pub async fn handle_transcript(&self, text: &str) -> PipelineOutcome {
        let text = text.trim();
        if text.is_empty() {
            return PipelineOutcome::Silence;
        }
        info!(utterance = %text, "Heard utterance");

        let resolved = self.interpreter.interpret(text).await;
        if resolved.is_unknown() {
            return PipelineOutcome::NotUnderstood;
        }

        match self.registry.dispatch(&resolved).await {
            Dispatch::Ran {
                command,
                result: Ok(outcome),
            } => {
                if let Some(spoken) = &outcome.spoken {
                    self.announcer.speak(spoken.clone());
                }
                PipelineOutcome::Executed { command, outcome }
            }
            Dispatch::Ran {
                command,
                result: Err(e),
            } => {
                self.announcer
                    .speak(format!("Sorry, the {} command failed.", command));
                PipelineOutcome::Failed {
                    command,
                    error: format!("{:#}", e),
                }
            }
            Dispatch::UnknownCommand(_) => PipelineOutcome::NotUnderstood,
        }
    }
}
