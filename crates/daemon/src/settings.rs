//! Daemon settings
//!
//! Layered: built-in defaults, then the TOML file (`STREAMVAULT_CONFIG` or
//! `<config_dir>/streamvault.toml`), then `STREAMVAULT__SECTION__KEY`
//! environment overrides.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use streamvault_api_rpc::RpcServerConfig;
use streamvault_core::application::{CaptureConfig, EvictionConfig, JobConfig};
use streamvault_core::domain::channel::BYTES_PER_GB;
use streamvault_core::domain::{Channel, ProviderKind};

const CONFIG_PATH_ENV: &str = "STREAMVAULT_CONFIG";
const CONFIG_FILE_NAME: &str = "streamvault.toml";
const ENV_PREFIX: &str = "STREAMVAULT";
const ENV_SEPARATOR: &str = "__";
const FALLBACK_DATA_DIR: &str = "~/.streamvault";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "streamvault", "streamvault")
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Daily-rolling log files go here when set
    pub directory: Option<PathBuf>,
}

/// One `[[channels]]` table
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSettings {
    pub login: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub provider: ProviderKind,
    #[serde(default)]
    pub quality: Vec<String>,
    #[serde(default, rename = "match")]
    pub keywords: Vec<String>,
    /// 0 = global default
    #[serde(default)]
    pub max_storage_gb: u64,
    #[serde(default)]
    pub max_vods: u32,
    #[serde(default)]
    pub no_cleanup: bool,
    #[serde(default)]
    pub no_capture: bool,
}

impl From<ChannelSettings> for Channel {
    fn from(settings: ChannelSettings) -> Self {
        let mut channel = Channel::new(settings.login, settings.provider);
        if let Some(display_name) = settings.display_name {
            channel.display_name = display_name;
        }
        channel.quality = settings.quality;
        channel.keywords = settings.keywords;
        channel.max_storage_bytes = settings.max_storage_gb.saturating_mul(BYTES_PER_GB);
        channel.max_vods = settings.max_vods;
        channel.no_cleanup = settings.no_cleanup;
        channel.no_capture = settings.no_capture;
        channel
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Job records, tool logs and channel state live here
    pub data_dir: PathBuf,
    /// Variables passed through to external tools
    pub env_allowlist: Vec<String>,
    pub logging: LoggingSettings,
    pub rpc: RpcServerConfig,
    pub jobs: JobConfig,
    pub capture: CaptureConfig,
    pub eviction: EvictionConfig,
    pub channels: Vec<ChannelSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: project_dirs()
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR)),
            env_allowlist: vec!["PATH".to_string(), "HOME".to_string(), "USER".to_string()],
            logging: LoggingSettings::default(),
            rpc: RpcServerConfig::default(),
            jobs: JobConfig::default(),
            capture: CaptureConfig::default(),
            eviction: EvictionConfig::default(),
            channels: Vec::new(),
        }
    }
}

impl Settings {
    /// Load from the default locations
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from(Some(Path::new(&path)), true),
            Err(_) => {
                let default_file = project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME));
                Self::load_from(default_file.as_deref(), false)
            }
        }
    }

    pub fn load_from(file: Option<&Path>, required: bool) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            let path = expand(path);
            builder = builder.add_source(
                File::new(&path.to_string_lossy(), FileFormat::Toml).required(required),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(settings.resolve_paths())
    }

    /// Expand `~`; relative storage paths are taken from the data dir
    fn resolve_paths(mut self) -> Self {
        self.data_dir = expand(&self.data_dir);
        let data_dir = self.data_dir.clone();
        let resolve = |path: &Path| {
            let path = expand(path);
            if path.is_relative() {
                data_dir.join(path)
            } else {
                path
            }
        };

        self.capture.storage_dir = resolve(&self.capture.storage_dir);
        self.capture.cache_dir = resolve(&self.capture.cache_dir);
        self.logging.directory = self.logging.directory.as_deref().map(resolve);
        self
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channels.iter().cloned().map(Channel::from).collect()
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.data_dir.join("pids")
    }

    pub fn software_logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs").join("software")
    }

    pub fn channel_state_file(&self) -> PathBuf {
        self.data_dir.join("state").join("channels.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
data_dir = "/srv/streamvault"

[rpc]
port = 9600

[capture]
storage_dir = "vods"
download_retries = 3
fallback_capture = true

[capture.bin]
streamlink = "/opt/streamlink/bin/streamlink"

[eviction]
vods_to_keep = 10

[[channels]]
login = "somestreamer"
provider = "twitch"
quality = ["1080p60", "best"]
match = ["marathon"]
max_storage_gb = 50

[[channels]]
login = "otherstreamer"
display_name = "Other Streamer"
provider = "kick"
no_capture = true
"#;

    #[test]
    fn test_load_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("streamvault.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let settings = Settings::load_from(Some(&path), true).unwrap();

        assert_eq!(settings.rpc.port, 9600);
        assert_eq!(settings.rpc.host, "127.0.0.1");
        assert_eq!(settings.capture.download_retries, 3);
        assert!(settings.capture.fallback_capture);
        assert_eq!(settings.capture.bin.streamlink, "/opt/streamlink/bin/streamlink");
        assert_eq!(settings.capture.bin.ffmpeg, "ffmpeg");
        assert_eq!(settings.capture.hls_timeout, 120);
        assert_eq!(settings.eviction.vods_to_keep, 10);
        assert_eq!(settings.jobs.update_debounce_ms, 2000);

        assert_eq!(settings.capture.storage_dir, PathBuf::from("/srv/streamvault/vods"));
        assert_eq!(settings.pids_dir(), PathBuf::from("/srv/streamvault/pids"));

        let channels = settings.channels();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].keywords, vec!["marathon".to_string()]);
        assert_eq!(channels[0].max_storage_bytes, 50 * BYTES_PER_GB);
        assert_eq!(channels[0].display_name, "somestreamer");
        assert_eq!(channels[1].provider, ProviderKind::Kick);
        assert_eq!(channels[1].display_name, "Other Streamer");
        assert!(channels[1].no_capture);
    }

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load_from(Some(&tmp.path().join("absent.toml")), false).unwrap();

        assert!(settings.channels.is_empty());
        assert_eq!(settings.capture.download_retries, 5);
        assert_eq!(settings.eviction.cleanup_interval_hours, 24);
        assert!(settings.capture.storage_dir.is_absolute());
    }

    #[test]
    fn test_missing_required_file_fails() {
        let tmp = TempDir::new().unwrap();
        tokio_test::assert_err!(Settings::load_from(Some(&tmp.path().join("absent.toml")), true));
    }
}
