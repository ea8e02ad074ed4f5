// Streaming provider capabilities
// One implementation per platform behind a common trait

use crate::application::config::CaptureConfig;
use crate::domain::{Channel, ProviderKind};

pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// URL handed to the capture tool
    fn stream_url(&self, channel: &Channel) -> String;

    /// Extra capture tool arguments for this platform
    fn capture_args(&self, config: &CaptureConfig) -> Vec<String>;

    /// Whether "channel updated" events carry chapter data
    fn has_chapter_events(&self) -> bool;
}

pub struct Twitch;

impl Provider for Twitch {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Twitch
    }

    fn stream_url(&self, channel: &Channel) -> String {
        format!("https://twitch.tv/{}", channel.login)
    }

    fn capture_args(&self, config: &CaptureConfig) -> Vec<String> {
        let mut args = vec![
            "--twitch-disable-hosting".to_string(),
            "--twitch-disable-reruns".to_string(),
        ];
        if let Some(header) = config.twitch_api_header.as_deref().filter(|h| !h.is_empty()) {
            args.push("--twitch-api-header".to_string());
            args.push(header.to_string());
        }
        args
    }

    fn has_chapter_events(&self) -> bool {
        true
    }
}

pub struct Kick;

impl Provider for Kick {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Kick
    }

    fn stream_url(&self, channel: &Channel) -> String {
        format!("https://kick.com/{}", channel.login)
    }

    fn capture_args(&self, _config: &CaptureConfig) -> Vec<String> {
        Vec::new()
    }

    fn has_chapter_events(&self) -> bool {
        true
    }
}

pub struct Youtube;

impl Provider for Youtube {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Youtube
    }

    fn stream_url(&self, channel: &Channel) -> String {
        format!("https://youtube.com/c/{}", channel.login)
    }

    fn capture_args(&self, _config: &CaptureConfig) -> Vec<String> {
        Vec::new()
    }

    fn has_chapter_events(&self) -> bool {
        false
    }
}

pub fn provider_for(kind: ProviderKind) -> &'static dyn Provider {
    match kind {
        ProviderKind::Twitch => &Twitch,
        ProviderKind::Kick => &Kick,
        ProviderKind::Youtube => &Youtube,
    }
}
