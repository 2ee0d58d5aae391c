use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    /// File extensions treated as images (lowercase, no dot).
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_thumbnails_dir")]
    pub thumbnails_dir: PathBuf,
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            thumbnails_dir: default_thumbnails_dir(),
            thumbnail_size: default_thumbnail_size(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_thumbnails_dir() -> PathBuf {
    PathBuf::from("./data/thumbnails")
}

fn default_thumbnail_size() -> u32 {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            endpoint: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    12
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_delay_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Whether the background scheduler syncs at all.
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,
    /// Default per-directory sync interval, e.g. "30s", "5m", "2h".
    #[serde(default = "default_interval")]
    pub default_interval: String,
    /// Scheduler tick. Shorter than any directory interval.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: default_auto_sync(),
            default_interval: default_interval(),
            tick_secs: default_tick_secs(),
        }
    }
}

fn default_auto_sync() -> bool {
    true
}
fn default_interval() -> String {
    "5m".to_string()
}
fn default_tick_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SecurityConfig {
    /// When non-empty, tracked directories must fall under one of these prefixes.
    #[serde(default)]
    pub allowed_prefixes: Vec<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.scan.extensions.is_empty() {
        anyhow::bail!("scan.extensions must not be empty");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "http" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or http.",
            other
        ),
    }

    if config.sync.tick_secs == 0 {
        anyhow::bail!("sync.tick_secs must be > 0");
    }

    parse_duration(&config.sync.default_interval)
        .with_context(|| "sync.default_interval is not a valid duration")?;

    Ok(config)
}

/// Parse a duration string of the form "30s", "5m", "2h", or "1d".
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("empty duration");
    }

    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, "s"),
    };

    let n: u64 = value
        .parse()
        .with_context(|| format!("invalid duration: '{}'", s))?;

    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        other => anyhow::bail!("invalid duration unit '{}' in '{}'", other, s),
    };

    Ok(Duration::from_secs(secs))
}
