// Config-backed ChannelRegistry
// Channels come from configuration; per-channel counters and offline times
// are persisted to a single JSON state file.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use streamvault_core::domain::{Channel, StreamNumbers};
use streamvault_core::error::{AppError, Result};
use streamvault_core::port::ChannelRegistry;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ChannelState {
    #[serde(default)]
    numbers: StreamNumbers,
    #[serde(default)]
    last_offline_at: Option<DateTime<Utc>>,
}

pub struct ConfigChannelRegistry {
    channels: Vec<Channel>,
    state_file: PathBuf,
    state: Mutex<HashMap<String, ChannelState>>,
}

/// `YYYYMM` of the session start
fn season_of(at: DateTime<Utc>) -> u32 {
    at.year().max(0) as u32 * 100 + at.month()
}

impl ConfigChannelRegistry {
    /// Registry for `channels`, restoring counters from `state_file` if present.
    /// An unreadable state file is logged and replaced on the next write.
    pub async fn open(channels: Vec<Channel>, state_file: impl Into<PathBuf>) -> Result<Self> {
        let state_file = state_file.into();
        let state = match tokio::fs::read_to_string(&state_file).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %state_file.display(), error = %e, "Channel state is corrupt, starting fresh");
                HashMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(channels = channels.len(), path = %state_file.display(), "Channel registry loaded");
        Ok(Self {
            channels,
            state_file,
            state: Mutex::new(state),
        })
    }

    fn known(&self, login: &str) -> Result<()> {
        if self.channels.iter().any(|c| c.login == login) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("channel {}", login)))
        }
    }

    async fn persist(&self, state: &HashMap<String, ChannelState>) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelRegistry for ConfigChannelRegistry {
    async fn channel(&self, login: &str) -> Option<Channel> {
        let mut channel = self.channels.iter().find(|c| c.login == login).cloned()?;
        if let Some(state) = self.state.lock().await.get(login) {
            channel.last_offline_at = state.last_offline_at;
        }
        Some(channel)
    }

    async fn channels(&self) -> Vec<Channel> {
        let state = self.state.lock().await;
        self.channels
            .iter()
            .cloned()
            .map(|mut c| {
                if let Some(s) = state.get(&c.login) {
                    c.last_offline_at = s.last_offline_at;
                }
                c
            })
            .collect()
    }

    async fn next_stream_numbers(&self, login: &str, at: DateTime<Utc>) -> Result<StreamNumbers> {
        self.known(login)?;

        let mut state = self.state.lock().await;
        let entry = state.entry(login.to_string()).or_default();
        let numbers = &mut entry.numbers;

        let season = season_of(at);
        if numbers.season != season {
            numbers.season = season;
            numbers.absolute_season += 1;
            numbers.episode = 1;
        } else {
            numbers.episode += 1;
        }
        numbers.absolute_episode += 1;
        let assigned = *numbers;

        self.persist(&state).await?;
        debug!(channel = %login, season = assigned.season, episode = assigned.episode, "Stream numbers assigned");
        Ok(assigned)
    }

    async fn mark_offline(&self, login: &str, at: DateTime<Utc>) -> Result<()> {
        self.known(login)?;

        let mut state = self.state.lock().await;
        state.entry(login.to_string()).or_default().last_offline_at = Some(at);
        self.persist(&state).await
    }
}
