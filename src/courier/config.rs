// Courier configuration - defaults, optional TOML file, env overrides

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::errors::CourierError;
use super::hosts::{default_profiles, HostProfile};
use super::models::DeliveryTarget;

pub const CONFIG_ENV: &str = "MEDIA_COURIER_CONFIG";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Destination the delivery batcher posts into
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub channel_id: String,
    pub topic_id: Option<String>,
    /// Root directory of the outbox destination
    pub outbox_dir: PathBuf,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            channel_id: String::new(),
            topic_id: None,
            outbox_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("media-courier")
                .join("outbox"),
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// SOCKS5/HTTP proxy URL (e.g., "socks5h://127.0.0.1:1080")
    pub proxy: Option<String>,
    pub user_agent: String,
    /// Timeout for page and manifest fetches, in seconds
    pub page_timeout_secs: u64,
    /// Timeout for media downloads, in seconds
    pub media_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            page_timeout_secs: 15,
            media_timeout_secs: 120,
        }
    }
}

/// Bypass ladder tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    pub plain_timeout_secs: u64,
    pub site_timeout_secs: u64,
    pub browser_timeout_secs: u64,
    /// Random delay window before re-trying the same rung
    pub retry_jitter_min_ms: u64,
    pub retry_jitter_max_ms: u64,
    /// Attempts per rung for transport-level failures
    pub transport_attempts: u32,
    pub transport_backoff_ms: u64,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            plain_timeout_secs: 15,
            site_timeout_secs: 20,
            browser_timeout_secs: 45,
            retry_jitter_min_ms: 1000,
            retry_jitter_max_ms: 3000,
            transport_attempts: 3,
            transport_backoff_ms: 2000,
        }
    }
}

/// Acquisition executor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub image_concurrency: usize,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub min_image_bytes: u64,
    pub min_video_bytes: u64,
    pub max_file_mb: u64,
    /// Segment failures tolerated before an HLS artifact is failed
    pub max_failed_segments: usize,
    /// Optional cap on downloaded segments; None downloads the whole stream
    pub segment_limit: Option<usize>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            image_concurrency: 5,
            max_attempts: 3,
            base_backoff_ms: 2000,
            min_image_bytes: 1000,
            min_video_bytes: 100_000,
            max_file_mb: 2000,
            max_failed_segments: 5,
            segment_limit: None,
        }
    }
}

impl AcquisitionConfig {
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_mb * 1024 * 1024
    }
}

/// Delivery batcher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub batch_size: usize,
    pub pacing_ms: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            pacing_ms: 3000,
            max_attempts: 4,
            base_backoff_ms: 2000,
            max_backoff_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub timeout_secs: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

impl SelectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// External stream downloader (yt-dlp) and muxer (ffmpeg) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalToolConfig {
    /// Explicit yt-dlp path; auto-detected when None
    pub ytdlp_path: Option<String>,
    /// Explicit ffmpeg path; auto-detected when None
    pub ffmpeg_path: Option<String>,
    pub max_height: u32,
    pub retries: u32,
    pub fragment_retries: u32,
    pub concurrent_fragments: u32,
    pub socket_timeout_secs: u32,
    pub timeout_secs: u64,
    /// Remux downloaded streams with `-movflags +faststart`
    pub remux: bool,
}

impl Default for ExternalToolConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            ffmpeg_path: None,
            max_height: 1080,
            retries: 1,
            fragment_retries: 2,
            concurrent_fragments: 8,
            socket_timeout_secs: 10,
            timeout_secs: 300,
            remux: true,
        }
    }
}

/// Path substrings that mark non-content assets
pub fn default_denylist() -> Vec<String> {
    [
        "avatar",
        "icon",
        "logo",
        "thumb",
        "emoji",
        "emoticon",
        "banner",
        "/ads/",
        "/ad/",
        "doubleclick",
        "pixel.gif",
        "spacer.gif",
        "blank.gif",
        "1x1",
        "32x32",
        "64x64",
        "100x100",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Site-suffix patterns stripped from titles (case-insensitive)
pub fn default_title_patterns() -> Vec<String> {
    [
        r"\s*\|\s*.*$",
        r"\s*-\s*.*?(?:videos?|clips?|movies?|films?)\s*(?:hd|sd)?\s*$",
        r"\s*-\s*\w+(?:\.\w+)+\s*$",
        r"\s*\(\d+\)\s*$",
        r"\s*\[\d+\]\s*$",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub destination: DestinationConfig,
    pub network: NetworkConfig,
    pub ladder: LadderConfig,
    pub acquisition: AcquisitionConfig,
    pub delivery: DeliveryConfig,
    pub selection: SelectionConfig,
    pub external: ExternalToolConfig,
    pub denylist: Vec<String>,
    pub title_patterns: Vec<String>,
    pub hosts: Vec<HostProfile>,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            destination: DestinationConfig::default(),
            network: NetworkConfig::default(),
            ladder: LadderConfig::default(),
            acquisition: AcquisitionConfig::default(),
            delivery: DeliveryConfig::default(),
            selection: SelectionConfig::default(),
            external: ExternalToolConfig::default(),
            denylist: default_denylist(),
            title_patterns: default_title_patterns(),
            hosts: default_profiles(),
        }
    }
}

impl CourierConfig {
    /// Defaults, then the config file (if any), then environment overrides
    pub fn load() -> Result<Self, CourierError> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => {
                info!("[Config] Loading {}", path.display());
                Self::from_file(&path)?
            }
            _ => {
                debug!("[Config] No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CourierError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, CourierError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `COURIER_*` overrides from the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("COURIER_CHANNEL_ID") {
            self.destination.channel_id = v;
        }
        if let Some(v) = lookup("COURIER_TOPIC_ID") {
            self.destination.topic_id = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("COURIER_OUTBOX_DIR") {
            self.destination.outbox_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("COURIER_PROXY") {
            self.network.proxy = Some(v).filter(|s| !s.is_empty());
        }
    }

    /// Fatal checks; never retried
    pub fn validate(&self) -> Result<(), CourierError> {
        if self.destination.channel_id.trim().is_empty() {
            return Err(CourierError::ConfigurationMissing(
                "destination.channel_id (or COURIER_CHANNEL_ID)".to_string(),
            ));
        }
        if self.delivery.batch_size == 0 {
            return Err(CourierError::ConfigurationMissing(
                "delivery.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn target(&self) -> DeliveryTarget {
        DeliveryTarget {
            channel_id: self.destination.channel_id.clone(),
            topic_id: self.destination.topic_id.clone(),
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.network.proxy = proxy;
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>, topic_id: Option<String>) -> Self {
        self.destination.channel_id = channel_id.into();
        self.destination.topic_id = topic_id;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.delivery.batch_size = batch_size;
        self
    }

    pub fn with_selection_timeout(mut self, seconds: u64) -> Self {
        self.selection.timeout_secs = seconds;
        self
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("media-courier").join("config.toml"))
}
