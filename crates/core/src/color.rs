//! Free-text color descriptions → HSV values the bulbs understand.

use crate::cache::{self, CacheStore};
use crate::llm_client::{CompletionClient, CompletionRequest};
use crate::prompts::{COLOR_SYSTEM_PROMPT, color_user_prompt};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tag written into the color cache file. Bump when `Hsv` changes shape.
pub const COLOR_CACHE_FORMAT: &str = "hsv/1";

/// A bulb color: hue in degrees, saturation and value in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Hsv {
    /// Hue in degrees, 0-360.
    pub hue: u16,
    /// Saturation in percent, 0-100.
    pub saturation: u8,
    /// Value (brightness) in percent, 0-100.
    pub value: u8,
}

impl Hsv {
    pub const fn new(hue: u16, saturation: u8, value: u8) -> Self {
        Self {
            hue,
            saturation,
            value,
        }
    }

    /// Builds a color from possibly fractional components, rejecting anything
    /// outside the valid ranges.
    pub fn checked(hue: f64, saturation: f64, value: f64) -> Option<Self> {
        let in_range = |v: f64, max: f64| v.is_finite() && (0.0..=max).contains(&v);
        if !(in_range(hue, 360.0) && in_range(saturation, 100.0) && in_range(value, 100.0)) {
            return None;
        }
        Some(Self::new(
            hue.round() as u16,
            saturation.round() as u8,
            value.round() as u8,
        ))
    }
}

impl fmt::Display for Hsv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HSV({}, {}, {})", self.hue, self.saturation, self.value)
    }
}

const COMMON_COLORS: &[(&str, Hsv)] = &[
    ("red", Hsv::new(0, 100, 100)),
    ("green", Hsv::new(120, 100, 100)),
    ("blue", Hsv::new(240, 100, 100)),
    ("yellow", Hsv::new(60, 100, 100)),
    ("purple", Hsv::new(300, 100, 50)),
    ("orange", Hsv::new(38, 100, 100)),
    ("pink", Hsv::new(349, 24, 100)),
    ("white", Hsv::new(0, 0, 100)),
    ("warm white", Hsv::new(34, 10, 100)),
    ("cool white", Hsv::new(207, 16, 100)),
];

/// Looks up one of the built-in named colors. `name` must already be
/// normalized.
pub fn common_color(name: &str) -> Option<Hsv> {
    COMMON_COLORS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, hsv)| *hsv)
}

/// Lower-cases and trims a description so cache keys are stable.
pub fn normalize(description: &str) -> String {
    description.trim().to_lowercase()
}

#[derive(Deserialize)]
struct RawHsv {
    hue: Option<f64>,
    saturation: Option<f64>,
    value: Option<f64>,
}

/// Parses a completion response, requiring all three components in range.
fn parse_hsv(text: &str) -> Option<Hsv> {
    let raw: RawHsv = serde_json::from_str(text).ok()?;
    Hsv::checked(raw.hue?, raw.saturation?, raw.value?)
}

/// Resolves color descriptions through the static table, the color cache and
/// finally the completion service.
pub struct ColorResolver {
    client: Arc<dyn CompletionClient>,
    cache: Mutex<CacheStore<Hsv>>,
}

impl ColorResolver {
    /// Creates a resolver.
    ///
    /// # Arguments
    ///
    /// * `client` - Asked for descriptions the table and cache do not know.
    /// * `cache_path` - Where resolved colors are persisted.
    pub fn new(client: Arc<dyn CompletionClient>, cache_path: impl Into<PathBuf>) -> Self {
        Self::with_cache(client, CacheStore::load(cache_path, COLOR_CACHE_FORMAT))
    }

    pub fn with_cache(client: Arc<dyn CompletionClient>, cache: CacheStore<Hsv>) -> Self {
        Self {
            client,
            cache: Mutex::new(cache),
        }
    }

    /// Returns `None` when the description cannot be turned into a color.
    pub async fn resolve(&self, description: &str) -> Option<Hsv> {
        let key = normalize(description);
        if key.is_empty() {
            return None;
        }

        if let Some(hsv) = common_color(&key) {
            debug!(color = %key, %hsv, "Common color");
            return Some(hsv);
        }

        if let Some(hsv) = self.cache.lock().get(&key).copied() {
            debug!(color = %key, %hsv, "Color cache hit");
            return Some(hsv);
        }

        let hsv = self.ask(&key).await?;
        info!(color = %key, %hsv, "Resolved color");
        if let Err(e) = cache::write_through(|| self.cache.lock().insert(key.clone(), hsv)) {
            warn!(color = %key, error = %e, "Failed to persist color cache");
        }
        Some(hsv)
    }

    async fn ask(&self, key: &str) -> Option<Hsv> {
        let schema = match serde_json::to_value(schemars::schema_for!(Hsv)) {
            Ok(schema) => schema,
            Err(e) => {
                warn!(error = %e, "Failed to build color schema");
                return None;
            }
        };
        let request = CompletionRequest::json(COLOR_SYSTEM_PROMPT, color_user_prompt(key))
            .with_schema("hsv_color", schema)
            .with_max_tokens(100);

        match self.client.complete(request).await {
            Ok(text) => {
                let parsed = parse_hsv(&text);
                if parsed.is_none() {
                    warn!(color = %key, response = %text, "Could not parse color response");
                }
                parsed
            }
            Err(e) => {
                warn!(color = %key, error = ?e, "Color lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{MockCompletionClient, OutputFormat};
    use anyhow::anyhow;
    use tempfile::tempdir;

    fn resolver(client: MockCompletionClient, dir: &std::path::Path) -> ColorResolver {
        ColorResolver::new(Arc::new(client), dir.join("color_cache.json"))
    }

    #[tokio::test]
    async fn test_common_colors_skip_network() {
        let dir = tempdir().unwrap();
        let mut client = MockCompletionClient::new();
        client.expect_complete().never();
        let resolver = resolver(client, dir.path());

        let upper = resolver.resolve("Blue").await;
        let lower = resolver.resolve("blue").await;
        assert_eq!(upper, Some(Hsv::new(240, 100, 100)));
        assert_eq!(upper, lower);
        assert_eq!(
            resolver.resolve("  Warm White ").await,
            Some(Hsv::new(34, 10, 100))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_novel_color_is_fetched_once_and_cached() {
        let dir = tempdir().unwrap();
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .times(1)
            .withf(|req| {
                req.user_text.ends_with("deep purple")
                    && matches!(
                        &req.format,
                        OutputFormat::JsonSchema { name, .. } if name == "hsv_color"
                    )
            })
            .returning(|_| Ok(r#"{"hue": 275, "saturation": 90, "value": 55}"#.to_string()));
        let resolver = resolver(client, dir.path());

        let first = resolver.resolve("Deep Purple").await;
        let second = resolver.resolve("deep purple").await;
        assert_eq!(first, Some(Hsv::new(275, 90, 55)));
        assert_eq!(first, second);

        // Persisted for the next run.
        let reloaded: CacheStore<Hsv> =
            CacheStore::load(dir.path().join("color_cache.json"), COLOR_CACHE_FORMAT);
        assert_eq!(reloaded.get("deep purple"), Some(&Hsv::new(275, 90, 55)));
    }

    #[tokio::test]
    async fn test_cached_color_loaded_from_disk() {
        let dir = tempdir().unwrap();
        let mut cache = CacheStore::load(dir.path().join("color_cache.json"), COLOR_CACHE_FORMAT);
        cache.insert("sunset orange", Hsv::new(20, 85, 100)).unwrap();

        let mut client = MockCompletionClient::new();
        client.expect_complete().never();
        let resolver = resolver(client, dir.path());
        assert_eq!(
            resolver.resolve("Sunset Orange").await,
            Some(Hsv::new(20, 85, 100))
        );
    }

    #[tokio::test]
    async fn test_incomplete_response_is_none_and_not_cached() {
        let dir = tempdir().unwrap();
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .times(2)
            .returning(|_| Ok(r#"{"hue": 10, "saturation": 50}"#.to_string()));
        let resolver = resolver(client, dir.path());

        assert_eq!(resolver.resolve("mystery").await, None);
        assert_eq!(resolver.resolve("mystery").await, None);
    }

    #[tokio::test]
    async fn test_failures_yield_none() {
        let dir = tempdir().unwrap();
        let mut client = MockCompletionClient::new();
        let mut calls = 0;
        client.expect_complete().times(3).returning(move |_| {
            calls += 1;
            match calls {
                1 => Err(anyhow!("connection reset")),
                2 => Ok("not json".to_string()),
                _ => Ok(r#"{"hue": 400, "saturation": 50, "value": 50}"#.to_string()),
            }
        });
        let resolver = resolver(client, dir.path());

        assert_eq!(resolver.resolve("teal").await, None);
        assert_eq!(resolver.resolve("teal").await, None);
        assert_eq!(resolver.resolve("teal").await, None);
    }

    #[tokio::test]
    async fn test_empty_description() {
        let dir = tempdir().unwrap();
        let mut client = MockCompletionClient::new();
        client.expect_complete().never();
        assert_eq!(resolver(client, dir.path()).resolve("   ").await, None);
    }

    #[test]
    fn test_checked_rounds_fractions() {
        assert_eq!(Hsv::checked(199.6, 49.5, 80.2), Some(Hsv::new(200, 50, 80)));
        assert_eq!(Hsv::checked(-1.0, 0.0, 0.0), None);
        assert_eq!(Hsv::checked(f64::NAN, 0.0, 0.0), None);
    }
}
