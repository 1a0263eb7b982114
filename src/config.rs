//! Configuration types for media-courier

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Fetch behavior configuration (sources, concurrency, listing depth)
///
/// Groups settings related to how candidate posts are fetched from the feed
/// provider. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent source-fetch tasks (default: 5)
    #[serde(default = "default_fetch_concurrency")]
    pub max_concurrent_fetches: usize,

    /// Maximum posts requested per listing/search call (default: 100)
    #[serde(default = "default_listing_limit")]
    pub listing_limit: usize,

    /// Cap on the processed-URL dedup set before it is cleared wholesale
    /// (default: 10_000)
    ///
    /// Dedup is best-effort and in-memory. Clearing on overflow accepts that a
    /// stale item can be re-delivered right after a clear.
    #[serde(default = "default_processed_url_cap")]
    pub processed_url_cap: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_fetch_concurrency(),
            listing_limit: default_listing_limit(),
            processed_url_cap: default_processed_url_cap(),
        }
    }
}

/// Media handling configuration (size budgets, compression schedule)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Delivery-channel size budget in bytes (default: 50 MiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,

    /// Hard ceiling in bytes above which a file is rejected without attempting
    /// compression (default: 100 MiB)
    #[serde(default = "default_hard_size_ceiling")]
    pub hard_size_ceiling_bytes: u64,

    /// Maximum re-encode passes before rejecting an oversized file (default: 3)
    #[serde(default = "default_compression_attempts")]
    pub compression_attempts: u32,

    /// Wall-clock timeout for each transcode/compress subprocess (default: 300s)
    #[serde(default = "default_transcode_timeout", with = "duration_serde")]
    pub transcode_timeout: Duration,

    /// Overall timeout for a single asset download (default: 300s)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub download_timeout: Duration,

    /// Timeout for lightweight quality-tier existence probes (default: 10s)
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub probe_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            hard_size_ceiling_bytes: default_hard_size_ceiling(),
            compression_attempts: default_compression_attempts(),
            transcode_timeout: default_transcode_timeout(),
            download_timeout: default_download_timeout(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

/// Delivery channel configuration (upload retry, caption limits)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum upload attempts when the channel signals a timeout (default: 5)
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,

    /// Maximum caption length accepted by the channel (default: 1024)
    ///
    /// Longer captions are truncated with a trailing ellipsis.
    #[serde(default = "default_caption_limit")]
    pub caption_limit: usize,

    /// Per-request upload timeout (default: 120s)
    #[serde(default = "default_upload_timeout", with = "duration_serde")]
    pub upload_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            upload_attempts: default_upload_attempts(),
            caption_limit: default_caption_limit(),
            upload_timeout: default_upload_timeout(),
        }
    }
}

/// Retry configuration for the orchestrator's batch-level backoff loop
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of fetch attempts before giving up (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 1.5)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter (±50%) to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.5,
            jitter: true,
        }
    }
}

/// External tool paths (ffmpeg, yt-dlp)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to the generic downloader executable (auto-detected if None)
    #[serde(default)]
    pub downloader_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set
    /// (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Wall-clock timeout for generic-downloader invocations (default: 300s)
    #[serde(default = "default_downloader_timeout", with = "duration_serde")]
    pub downloader_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            downloader_path: None,
            search_path: true,
            downloader_timeout: default_downloader_timeout(),
        }
    }
}

/// Main configuration for the media pipeline
///
/// Fields are organized into logical sub-configs:
/// - [`fetch`](FetchConfig) - source fetching and dedup
/// - [`media`](MediaConfig) - size budgets and transcode timeouts
/// - [`delivery`](DeliveryConfig) - upload retry and captions
/// - [`retry`](RetryConfig) - orchestrator backoff loop
/// - [`tools`](ToolsConfig) - external binary discovery
///
/// All sub-config fields are flattened so the JSON/TOML format stays flat.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source fetching settings
    #[serde(flatten)]
    pub fetch: FetchConfig,

    /// Media size and transcode settings
    #[serde(flatten)]
    pub media: MediaConfig,

    /// Delivery channel settings
    #[serde(flatten)]
    pub delivery: DeliveryConfig,

    /// Batch retry/backoff settings
    #[serde(flatten)]
    pub retry: RetryConfig,

    /// External tool settings
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Path to the persisted dead-link list (None = not persisted)
    #[serde(default)]
    pub dead_link_path: Option<PathBuf>,
}

fn default_fetch_concurrency() -> usize {
    5
}

fn default_listing_limit() -> usize {
    100
}

fn default_processed_url_cap() -> usize {
    10_000
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_hard_size_ceiling() -> u64 {
    100 * 1024 * 1024
}

fn default_compression_attempts() -> u32 {
    3
}

fn default_transcode_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_upload_attempts() -> u32 {
    5
}

fn default_caption_limit() -> usize {
    1024
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_downloader_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper - Duration as seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sensible() {
        let config = Config::default();
        assert_eq!(config.fetch.max_concurrent_fetches, 5);
        assert_eq!(config.media.max_file_size_bytes, 50 * 1024 * 1024);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.retry.jitter);
        assert!(config.tools.search_path);
        assert!(config.dead_link_path.is_none());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.media.transcode_timeout,
            config.media.transcode_timeout
        );
        assert_eq!(back.delivery.caption_limit, config.delivery.caption_limit);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.fetch.processed_url_cap, 10_000);
        assert_eq!(config.media.compression_attempts, 3);
        assert_eq!(config.retry.backoff_multiplier, 1.5);
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let config = Config::default();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["download_timeout"], 300);
        assert_eq!(value["initial_delay"], 1);
    }
}
