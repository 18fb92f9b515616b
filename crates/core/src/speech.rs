//! Speech collaborators: the transcriber that feeds the pipeline and the
//! announcer that speaks back to the user.
//!
//! The announcer is an explicitly owned background task. Components hold a
//! cheap `Announcer` handle and queue text without waiting; the owner of the
//! `AnnouncerHandle` shuts it down at exit, which drains anything still queued.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Turns recorded audio into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Returns `None` when nothing intelligible was heard.
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>>;
}

/// A transcriber for already-textual input, such as typed commands.
pub struct TextTranscriber;

#[async_trait]
impl Transcriber for TextTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>> {
        let text = std::str::from_utf8(audio).context("Input is not valid UTF-8")?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

/// The backend that actually voices a message.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn say(&self, text: &str) -> Result<()>;
}

/// Writes messages to the log instead of speaking them.
pub struct LogSpeaker;

#[async_trait]
impl Speaker for LogSpeaker {
    async fn say(&self, text: &str) -> Result<()> {
        info!(text = %text, "Speaking");
        Ok(())
    }
}

/// Speaks by running an external program with the text as its last argument
/// (e.g. `espeak` or `say`).
pub struct ProcessSpeaker {
    program: String,
    args: Vec<String>,
}

impl ProcessSpeaker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parses a whitespace-separated command line such as `"espeak -v en"`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl Speaker for ProcessSpeaker {
    async fn say(&self, text: &str) -> Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .status()
            .await
            .with_context(|| format!("Failed to run '{}'", self.program))?;
        if !status.success() {
            return Err(anyhow!("'{}' exited with {}", self.program, status));
        }
        Ok(())
    }
}

enum Notice {
    Speak(String),
    Shutdown,
}

/// Fire-and-forget handle for queueing spoken messages.
#[derive(Clone)]
pub struct Announcer {
    tx: mpsc::UnboundedSender<Notice>,
}

/// Owns the announcer task.
pub struct AnnouncerHandle {
    tx: mpsc::UnboundedSender<Notice>,
    task: JoinHandle<()>,
}

impl Announcer {
    /// Starts the announcer task. Messages are spoken one at a time, in the
    /// order they were queued.
    pub fn spawn(speaker: Arc<dyn Speaker>) -> (Announcer, AnnouncerHandle) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                match notice {
                    Notice::Speak(text) => {
                        if let Err(e) = speaker.say(&text).await {
                            warn!(error = ?e, "Failed to speak message");
                        }
                    }
                    Notice::Shutdown => break,
                }
            }
            debug!("Announcer stopped");
        });
        (Announcer { tx: tx.clone() }, AnnouncerHandle { tx, task })
    }

    /// Queues `text` to be spoken. Never waits.
    pub fn speak(&self, text: impl Into<String>) {
        if self.tx.send(Notice::Speak(text.into())).is_err() {
            warn!("Announcer is shut down; dropping message");
        }
    }
}

impl AnnouncerHandle {
    /// Speaks everything queued so far, then stops the task.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Notice::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = ?e, "Announcer task ended abnormally");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Collects everything it is asked to say.
    #[derive(Default)]
    pub struct RecordingSpeaker {
        pub spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Speaker for RecordingSpeaker {
        async fn say(&self, text: &str) -> Result<()> {
            self.spoken.lock().push(text.to_string());
            Ok(())
        }
    }
}
