// Orchestration settings consumed by the core
// Loaded by the daemon (config crate) and injected into services

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::application::constants::*;
use crate::domain::channel::BYTES_PER_GB;
use crate::domain::Channel;

/// Job supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub update_debounce_ms: u64,
    pub max_coalesced_updates: u32,
    pub status_check_timeout_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            update_debounce_ms: UPDATE_DEBOUNCE_MS,
            max_coalesced_updates: MAX_COALESCED_UPDATES,
            status_check_timeout_ms: STATUS_CHECK_TIMEOUT_MS,
        }
    }
}

impl JobConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.update_debounce_ms)
    }

    pub fn status_check_timeout(&self) -> Duration {
        Duration::from_millis(self.status_check_timeout_ms)
    }
}

/// Retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub storage_per_streamer_gb: u64,
    pub vods_to_keep: u32,
    pub delete_only_one: bool,
    pub keep_deleted_vods: bool,
    pub keep_favourite_vods: bool,
    pub keep_muted_vods: bool,
    pub keep_commented_vods: bool,
    pub cleanup_interval_hours: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            storage_per_streamer_gb: DEFAULT_STORAGE_PER_STREAMER_GB,
            vods_to_keep: DEFAULT_VODS_TO_KEEP,
            delete_only_one: false,
            keep_deleted_vods: false,
            keep_favourite_vods: false,
            keep_muted_vods: false,
            keep_commented_vods: false,
            cleanup_interval_hours: DEFAULT_CLEANUP_INTERVAL_HOURS,
        }
    }
}

/// Effective limits for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionLimits {
    pub max_bytes: u64,
    pub max_count: u32,
}

impl EvictionConfig {
    /// Channel overrides win when non-zero. A global value of 0 is honored.
    pub fn limits_for(&self, channel: &Channel) -> EvictionLimits {
        EvictionLimits {
            max_bytes: if channel.max_storage_bytes > 0 {
                channel.max_storage_bytes
            } else {
                self.storage_per_streamer_gb.saturating_mul(BYTES_PER_GB)
            },
            max_count: if channel.max_vods > 0 {
                channel.max_vods
            } else {
                self.vods_to_keep
            },
        }
    }
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinConfig {
    pub streamlink: String,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for BinConfig {
    fn default() -> Self {
        Self {
            streamlink: "streamlink".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// Fixed waits between pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineTimings {
    pub retry_backoff_secs: u64,
    pub capture_settle_secs: u64,
    pub convert_settle_secs: u64,
    pub finalize_settle_secs: u64,
    pub keepalive_interval_secs: u64,
}

impl Default for PipelineTimings {
    fn default() -> Self {
        Self {
            retry_backoff_secs: CAPTURE_RETRY_BACKOFF.as_secs(),
            capture_settle_secs: CAPTURE_SETTLE_DELAY.as_secs(),
            convert_settle_secs: CONVERT_SETTLE_DELAY.as_secs(),
            finalize_settle_secs: FINALIZE_SETTLE_DELAY.as_secs(),
            keepalive_interval_secs: KEEPALIVE_INTERVAL_SECS,
        }
    }
}

impl PipelineTimings {
    /// No waits at all (tests, manual reprocessing)
    pub fn immediate() -> Self {
        Self {
            retry_backoff_secs: 0,
            capture_settle_secs: 0,
            convert_settle_secs: 0,
            finalize_settle_secs: 0,
            keepalive_interval_secs: KEEPALIVE_INTERVAL_SECS,
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn capture_settle(&self) -> Duration {
        Duration::from_secs(self.capture_settle_secs)
    }

    pub fn convert_settle(&self) -> Duration {
        Duration::from_secs(self.convert_settle_secs)
    }

    pub fn finalize_settle(&self) -> Duration {
        Duration::from_secs(self.finalize_settle_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }
}

/// Capture pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Root folder; recordings go to `<storage_dir>/<login>[/<vod_folder>]`
    pub storage_dir: PathBuf,
    /// Raw capture location when `use_cache` is set
    pub cache_dir: PathBuf,
    pub use_cache: bool,

    /// Capture attempts after the first
    pub download_retries: u32,
    pub no_vod_convert: bool,
    pub create_video_chapters: bool,
    pub min_chapter_duration: u64,
    pub vod_container: String,
    pub fallback_capture: bool,

    pub filename_vod: String,
    /// Empty = no per-recording subfolder
    pub vod_folder: String,

    pub hls_timeout: u64,
    pub streamlink_loglevel: String,
    pub max_missing_chunks: u32,
    /// Extra `--twitch-api-header` value, if any
    pub twitch_api_header: Option<String>,

    pub bin: BinConfig,
    pub timings: PipelineTimings,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("storage/vods"),
            cache_dir: PathBuf::from("cache/capture"),
            use_cache: false,
            download_retries: DEFAULT_DOWNLOAD_RETRIES,
            no_vod_convert: false,
            create_video_chapters: true,
            min_chapter_duration: 0,
            vod_container: "mp4".to_string(),
            fallback_capture: false,
            filename_vod: "{login}_{date}_{id}".to_string(),
            vod_folder: String::new(),
            hls_timeout: DEFAULT_HLS_TIMEOUT_SECS,
            streamlink_loglevel: "info".to_string(),
            max_missing_chunks: MAX_MISSING_CHUNKS,
            twitch_api_header: None,
            bin: BinConfig::default(),
            timings: PipelineTimings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderKind;

    #[test]
    fn test_channel_overrides_win() {
        let config = EvictionConfig::default();
        let mut channel = Channel::new("foo", ProviderKind::Twitch);

        let limits = config.limits_for(&channel);
        assert_eq!(limits.max_bytes, 100 * BYTES_PER_GB);
        assert_eq!(limits.max_count, 5);

        channel.max_vods = 1;
        channel.max_storage_bytes = 40 * BYTES_PER_GB;
        let limits = config.limits_for(&channel);
        assert_eq!(limits.max_bytes, 40 * BYTES_PER_GB);
        assert_eq!(limits.max_count, 1);
    }

    #[test]
    fn test_global_zero_is_honored() {
        let config = EvictionConfig {
            storage_per_streamer_gb: 0,
            vods_to_keep: 0,
            ..Default::default()
        };
        let channel = Channel::new("foo", ProviderKind::Twitch);

        let limits = config.limits_for(&channel);
        assert_eq!(limits, EvictionLimits { max_bytes: 0, max_count: 0 });
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: CaptureConfig =
            serde_json::from_str(r#"{"download_retries": 2, "vod_container": "mkv"}"#).unwrap();

        assert_eq!(config.download_retries, 2);
        assert_eq!(config.vod_container, "mkv");
        assert_eq!(config.hls_timeout, 120);
        assert_eq!(config.timings.retry_backoff_secs, 15);
    }
}
