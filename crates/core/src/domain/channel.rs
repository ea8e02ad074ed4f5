// Channel Domain Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bytes per gigabyte as used by storage limits
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Streaming platform a channel lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Twitch,
    Kick,
    Youtube,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Twitch => write!(f, "twitch"),
            ProviderKind::Kick => write!(f, "kick"),
            ProviderKind::Youtube => write!(f, "youtube"),
        }
    }
}

/// A watched channel and its retention limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Internal id (login name), unique across providers in one install
    pub login: String,
    #[serde(default)]
    pub display_name: String,
    pub provider: ProviderKind,

    /// Preferred stream qualities, best first
    #[serde(default)]
    pub quality: Vec<String>,

    /// Title keywords; empty means "capture everything"
    #[serde(default, rename = "match")]
    pub keywords: Vec<String>,

    /// 0 = use global default
    #[serde(default)]
    pub max_storage_bytes: u64,
    /// 0 = use global default
    #[serde(default)]
    pub max_vods: u32,
    #[serde(default)]
    pub no_cleanup: bool,
    #[serde(default)]
    pub no_capture: bool,

    #[serde(default)]
    pub last_offline_at: Option<DateTime<Utc>>,
}

impl Channel {
    pub fn new(login: impl Into<String>, provider: ProviderKind) -> Self {
        let login = login.into();
        Self {
            display_name: login.clone(),
            login,
            provider,
            quality: Vec::new(),
            keywords: Vec::new(),
            max_storage_bytes: 0,
            max_vods: 0,
            no_cleanup: false,
            no_capture: false,
            last_offline_at: None,
        }
    }

    /// True when the title passes the keyword filter
    pub fn title_matches(&self, title: &str) -> bool {
        self.keywords.is_empty() || self.keywords.iter().any(|k| title.contains(k.as_str()))
    }

    pub fn display(&self) -> &str {
        if self.display_name.is_empty() {
            &self.login
        } else {
            &self.display_name
        }
    }
}

/// Season/episode counters assigned to one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamNumbers {
    pub season: u32,
    pub absolute_season: u32,
    pub episode: u32,
    pub absolute_episode: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_filter() {
        let mut channel = Channel::new("somestreamer", ProviderKind::Twitch);
        assert!(channel.title_matches("anything"), "no keywords matches all");

        channel.keywords = vec!["speedrun".to_string(), "marathon".to_string()];
        assert!(channel.title_matches("Charity marathon day 2"));
        assert!(!channel.title_matches("Just chatting"));
    }
}
