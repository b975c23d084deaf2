//! Engine configuration
//!
//! Every component receives its own section of [`EngineConfig`] at
//! construction time. All fields have defaults, so a config file only needs
//! to name what it changes:
//!
//! ```json
//! {
//!   "catalog_path": "catalog.json",
//!   "layout": { "origin": "https://media.example.com/" },
//!   "cache": { "max_size_bytes": 268435456 },
//!   "hints": { "night-drive": { "skip_adaptive": true } }
//! }
//! ```

use crate::{
    hints::HintTable,
    layout::MediaLayout,
    platform::PlatformProfile,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration owned by the application root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// JSON catalog of playlist items
    pub catalog_path: Option<PathBuf>,
    /// Directory for persisted cache index, payloads and play order
    pub state_dir: Option<PathBuf>,
    pub playback: PlaybackConfig,
    pub cache: CacheConfig,
    pub quality: QualityConfig,
    pub layout: MediaLayout,
    pub platform: PlatformProfile,
    pub hints: HintTable,
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.playback.validate()?;
        self.cache.validate()?;
        self.quality.validate()?;
        self.layout.validate()?;
        Ok(())
    }
}

/// Playback controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Start playing as soon as a candidate can play
    pub autoplay: bool,
    /// Backoff before retrying a candidate after a network error
    pub network_retry_backoff_ms: u64,
    /// Delay between a track failure and the automatic advance
    pub advance_delay_ms: u64,
    /// A buffering gap longer than this fails the active candidate
    pub stall_timeout_ms: u64,
    /// Preload the next item's first candidate once the current one is ready
    pub preload_next: bool,
    /// Initial volume, 0.0-1.0
    pub initial_volume: f64,
    /// Initial mute state
    pub initial_muted: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            autoplay: true,
            network_retry_backoff_ms: 750,
            advance_delay_ms: 3_000,
            stall_timeout_ms: 15_000,
            preload_next: true,
            initial_volume: 1.0,
            initial_muted: false,
        }
    }
}

impl PlaybackConfig {
    pub fn network_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.network_retry_backoff_ms)
    }

    pub fn advance_delay(&self) -> Duration {
        Duration::from_millis(self.advance_delay_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(Error::InvalidConfig(
                "playback.initial_volume must be within 0.0-1.0".to_string(),
            ));
        }
        if self.stall_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "playback.stall_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Policy for choosing eviction victims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Remove entries that haven't been read recently
    #[default]
    LeastRecentlyUsed,
    /// Remove the oldest stored entries first
    FirstInFirstOut,
    /// Remove the largest entries first to free more space
    LargestFirst,
}

impl EvictionPolicy {
    /// Returns a human-readable description of the policy.
    pub fn description(&self) -> &'static str {
        match self {
            EvictionPolicy::LeastRecentlyUsed => "Remove entries that haven't been read recently",
            EvictionPolicy::FirstInFirstOut => "Remove the oldest stored entries first",
            EvictionPolicy::LargestFirst => "Remove the largest entries first",
        }
    }
}

/// Segment cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum total payload size in bytes (default: 512 MiB)
    pub max_size_bytes: u64,
    /// Maximum number of entries
    pub max_entries: usize,
    /// Entries larger than this fraction of `max_size_bytes` are never cached
    pub max_entry_fraction: f64,
    /// Lifetime of an entry when the response carries no max-age
    pub default_ttl_ms: u64,
    /// Interval of the periodic expiry sweep
    pub sweep_interval_ms: u64,
    /// Revalidate hits in the background
    pub stale_while_revalidate: bool,
    /// Eviction policy when limits are exceeded
    pub eviction_policy: EvictionPolicy,
    /// Key prefix for the persisted index
    pub namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 512 * 1024 * 1024,
            max_entries: 2_000,
            max_entry_fraction: 0.75,
            default_ttl_ms: 24 * 60 * 60 * 1000,
            sweep_interval_ms: 5 * 60 * 1000,
            stale_while_revalidate: true,
            eviction_policy: EvictionPolicy::LeastRecentlyUsed,
            namespace: "segment-cache".to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum cache size.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    /// Set maximum entry count.
    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    /// Set eviction policy.
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Set default entry lifetime.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Enable or disable background revalidation.
    pub fn with_revalidation(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    /// Largest payload that may be stored
    pub fn max_entry_bytes(&self) -> u64 {
        (self.max_size_bytes as f64 * self.max_entry_fraction) as u64
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(Error::InvalidConfig(
                "cache.max_size_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(Error::InvalidConfig(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }
        if !(self.max_entry_fraction > 0.0 && self.max_entry_fraction <= 1.0) {
            return Err(Error::InvalidConfig(
                "cache.max_entry_fraction must be within (0.0, 1.0]".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "cache.sweep_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(Error::InvalidConfig("cache.namespace cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Weights of the quality score penalties
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyWeights {
    /// Penalty at zero fps
    pub frame_rate: f64,
    /// Penalty at 100% dropped frames
    pub dropped_frames: f64,
    /// Penalty per second of buffering, capped at `buffering_cap`
    pub buffering_per_second: f64,
    pub buffering_cap: f64,
    /// Penalty when bandwidth is below `QualityConfig::min_bandwidth_bps`
    pub low_bandwidth: f64,
    /// Penalty at full memory pressure
    pub memory: f64,
    /// Penalty at full CPU pressure
    pub cpu: f64,
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            frame_rate: 30.0,
            dropped_frames: 100.0,
            buffering_per_second: 10.0,
            buffering_cap: 30.0,
            low_bandwidth: 15.0,
            memory: 10.0,
            cpu: 10.0,
        }
    }
}

/// Quality controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Sampling cadence
    pub sample_interval_ms: u64,
    /// Minimum time between two directives for one session
    pub cooldown_ms: u64,
    /// Scores below this recommend a lower rendition
    pub low_threshold: f64,
    /// Scores above this may recommend a higher rendition
    pub high_threshold: f64,
    /// Frame rate treated as no shortfall
    pub target_fps: f64,
    /// Required ratio of bandwidth to the next rendition's bitrate
    pub bandwidth_margin: f64,
    /// Bandwidth below which the low-bandwidth penalty applies
    pub min_bandwidth_bps: u64,
    pub weights: PenaltyWeights,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 500,
            cooldown_ms: 10_000,
            low_threshold: 45.0,
            high_threshold: 80.0,
            target_fps: 30.0,
            bandwidth_margin: 1.25,
            min_bandwidth_bps: 1_500_000,
            weights: PenaltyWeights::default(),
        }
    }
}

impl QualityConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "quality.sample_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.low_threshold >= self.high_threshold {
            return Err(Error::InvalidConfig(
                "quality.low_threshold must be below quality.high_threshold".to_string(),
            ));
        }
        if self.target_fps <= 0.0 {
            return Err(Error::InvalidConfig(
                "quality.target_fps must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.eviction_policy, EvictionPolicy::LeastRecentlyUsed);
        assert_eq!(config.playback.advance_delay(), Duration::from_secs(3));
        assert_eq!(config.quality.cooldown(), Duration::from_secs(10));
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_max_size(15 * 1024 * 1024)
            .with_max_entries(10)
            .with_eviction_policy(EvictionPolicy::LargestFirst)
            .with_revalidation(false);

        assert_eq!(config.max_size_bytes, 15 * 1024 * 1024);
        assert_eq!(config.max_entries, 10);
        assert_eq!(config.eviction_policy, EvictionPolicy::LargestFirst);
        assert!(!config.stale_while_revalidate);
        // 10 MiB fits under a 15 MiB quota with the default fraction
        assert!(config.max_entry_bytes() >= 10 * 1024 * 1024);
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::default().with_max_size(0).validate().is_err());
        assert!(CacheConfig::default().with_max_entries(0).validate().is_err());

        let quality = QualityConfig {
            low_threshold: 90.0,
            ..Default::default()
        };
        assert!(quality.validate().is_err());

        let playback = PlaybackConfig {
            initial_volume: 1.5,
            ..Default::default()
        };
        assert!(playback.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "cache": { "max_entries": 12 }, "playback": { "autoplay": false } }"#,
        )
        .unwrap();

        assert_eq!(config.cache.max_entries, 12);
        assert_eq!(config.cache.max_entry_fraction, 0.75);
        assert!(!config.playback.autoplay);
        assert_eq!(config.playback.stall_timeout_ms, 15_000);
    }

    #[test]
    fn test_eviction_policy_descriptions() {
        assert!(!EvictionPolicy::LeastRecentlyUsed.description().is_empty());
        assert!(!EvictionPolicy::FirstInFirstOut.description().is_empty());
        assert!(!EvictionPolicy::LargestFirst.description().is_empty());
    }
}
