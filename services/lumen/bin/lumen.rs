//! Main Entrypoint for the Lumen voice command service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Building the completion client, announcer, color resolver and device
//!    controller.
//! 3. Registering the built-in commands and constructing the pipeline.
//! 4. Running one utterance, or reading utterances from stdin until EOF or
//!    Ctrl+C, then draining the announcer.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use clap::Parser;
use lumen::{
    config::Config,
    console::{describe_commands, render},
};
use lumen_core::{
    Announcer, ColorResolver, CommandRegistry, Interpreter, Pipeline,
    commands::{LightCommand, TimeCommand},
    device::{
        actuator::DeviceActuator,
        controller::LightController,
        kasa::{KasaConnector, KasaSettings},
    },
    llm_client::{CompletionClient, OpenAICompatibleClient},
    speech::{LogSpeaker, ProcessSpeaker, Speaker, TextTranscriber},
};
use std::{path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Interprets spoken commands and controls smart lights")]
struct Cli {
    /// Interpret and run a single utterance, then exit.
    #[arg(long)]
    utterance: Option<String>,

    /// Print the available commands and exit.
    #[arg(long)]
    list_commands: bool,

    /// Directory for the cache files (overrides CACHE_DIR).
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

async fn handle(pipeline: &Pipeline, text: &str) {
    for line in render(&pipeline.handle_transcript(text).await) {
        println!("{}", line);
    }
}

/// Reads one utterance per line until EOF or Ctrl+C.
async fn run_stdin(pipeline: &Pipeline) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(text) => handle(pipeline, &text).await,
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Shutting down gracefully...");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(
        model = %config.chat_model,
        cache_dir = %config.cache_dir.display(),
        "Configuration loaded. Initializing services..."
    );

    // --- 3. Initialize Shared Services ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.openai_api_key)
        .with_api_base(&config.openai_api_base);
    let client: Arc<dyn CompletionClient> = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let speaker: Arc<dyn Speaker> = match config
        .tts_command
        .as_deref()
        .and_then(ProcessSpeaker::from_command_line)
    {
        Some(speaker) => Arc::new(speaker),
        None => Arc::new(LogSpeaker),
    };
    let (announcer, announcer_handle) = Announcer::spawn(speaker);

    let colors = Arc::new(ColorResolver::new(
        client.clone(),
        config.color_cache_path(),
    ));
    let connector = Arc::new(KasaConnector::new(KasaSettings {
        timeout: config.device_timeout,
        discovery_timeout: config.discovery_timeout,
        ..KasaSettings::default()
    }));
    let controller = Arc::new(LightController::new(
        connector,
        config.device_aliases.clone(),
        config.device_cache_path(),
        DeviceActuator::new(config.device_fanout),
    ));

    // --- 4. Register Commands ---
    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(LightCommand::new(colors, controller)))?;
    registry.register(Arc::new(TimeCommand::new()))?;
    let registry = Arc::new(registry);
    println!("{}", describe_commands(&registry));

    // --- 5. Run ---
    if !cli.list_commands {
        let interpreter = Arc::new(Interpreter::new(
            registry.clone(),
            client,
            config.transcription_cache_path(),
            announcer.clone(),
        ));
        let pipeline = Pipeline::new(
            Arc::new(TextTranscriber),
            interpreter,
            registry,
            announcer,
        );

        match cli.utterance {
            Some(text) => handle(&pipeline, &text).await,
            None => {
                info!("Reading utterances from stdin, one per line");
                run_stdin(&pipeline).await?;
            }
        }
    }

    announcer_handle.shutdown().await;
    info!("Lumen has shut down.");
    Ok(())
}
