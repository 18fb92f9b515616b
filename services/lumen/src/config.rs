use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

const DEFAULT_ALIASES: &str =
    "living room=192.168.1.100,bedroom=192.168.1.101,kitchen=192.168.1.102";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub chat_model: String,
    pub log_level: Level,
    /// Directory holding the transcription, color and device caches.
    pub cache_dir: PathBuf,
    /// Human label → device IP, labels lower-cased.
    pub device_aliases: Vec<(String, String)>,
    pub discovery_timeout: Duration,
    pub device_timeout: Duration,
    pub device_fanout: usize,
    /// External program used to speak, e.g. `espeak`.
    pub tts_command: Option<String>,
}

fn invalid(var: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue(var.to_string(), reason.into())
}

/// Parses `label=ip,label=ip`.
fn parse_aliases(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (label, ip) = entry
                .split_once('=')
                .ok_or_else(|| invalid("DEVICE_ALIASES", format!("'{}' is not label=ip", entry)))?;
            let label = label.trim().to_lowercase();
            let ip = ip.trim();
            if label.is_empty() {
                return Err(invalid("DEVICE_ALIASES", format!("'{}' has no label", entry)));
            }
            ip.parse::<IpAddr>()
                .map_err(|_| invalid("DEVICE_ALIASES", format!("'{}' is not an IP address", ip)))?;
            Ok((label, ip.to_string()))
        })
        .collect()
}

fn millis_var(var: &str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| invalid(var, format!("'{}' is not a number of milliseconds", raw))),
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            invalid("RUST_LOG", format!("'{}' is not a valid log level", log_level_str))
        })?;

        let cache_dir = std::env::var("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let aliases_str =
            std::env::var("DEVICE_ALIASES").unwrap_or_else(|_| DEFAULT_ALIASES.to_string());
        let device_aliases = parse_aliases(&aliases_str)?;

        let discovery_timeout = millis_var("DISCOVERY_TIMEOUT_MS", 3000)?;
        let device_timeout = millis_var("DEVICE_TIMEOUT_MS", 5000)?;

        let device_fanout = match std::env::var("DEVICE_FANOUT") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    invalid("DEVICE_FANOUT", format!("'{}' is not a positive number", raw))
                })?,
            Err(_) => 4,
        };

        let tts_command = std::env::var("TTS_COMMAND")
            .ok()
            .filter(|cmd| !cmd.trim().is_empty());

        Ok(Self {
            openai_api_key,
            openai_api_base,
            chat_model,
            log_level,
            cache_dir,
            device_aliases,
            discovery_timeout,
            device_timeout,
            device_fanout,
            tts_command,
        })
    }

    pub fn transcription_cache_path(&self) -> PathBuf {
        self.cache_dir.join("transcription_cache.json")
    }

    pub fn color_cache_path(&self) -> PathBuf {
        self.cache_dir.join("color_cache.json")
    }

    pub fn device_cache_path(&self) -> PathBuf {
        self.cache_dir.join("devices_cache.json")
    }
}
