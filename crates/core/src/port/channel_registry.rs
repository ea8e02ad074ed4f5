// Channel Registry Port
// Known channels, their per-session counters and online state

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Channel, StreamNumbers};
use crate::error::Result;

#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    async fn channel(&self, login: &str) -> Option<Channel>;

    async fn channels(&self) -> Vec<Channel>;

    /// Advance and return the season/episode counters for a new session.
    /// A new season starts when the month changes.
    async fn next_stream_numbers(&self, login: &str, at: DateTime<Utc>) -> Result<StreamNumbers>;

    async fn mark_offline(&self, login: &str, at: DateTime<Utc>) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct InMemoryChannelRegistry {
        channels: Arc<Mutex<Vec<Channel>>>,
        counters: Arc<Mutex<HashMap<String, StreamNumbers>>>,
    }

    impl InMemoryChannelRegistry {
        pub fn new(channels: Vec<Channel>) -> Self {
            let registry = Self::default();
            *registry.channels.lock().unwrap() = channels;
            registry
        }
    }

    #[async_trait]
    impl ChannelRegistry for InMemoryChannelRegistry {
        async fn channel(&self, login: &str) -> Option<Channel> {
            self.channels
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.login == login)
                .cloned()
        }

        async fn channels(&self) -> Vec<Channel> {
            self.channels.lock().unwrap().clone()
        }

        async fn next_stream_numbers(&self, login: &str, _at: DateTime<Utc>) -> Result<StreamNumbers> {
            let mut counters = self.counters.lock().unwrap();
            let numbers = counters.entry(login.to_string()).or_insert(StreamNumbers {
                season: 1,
                absolute_season: 1,
                episode: 0,
                absolute_episode: 0,
            });
            numbers.episode += 1;
            numbers.absolute_episode += 1;
            Ok(*numbers)
        }

        async fn mark_offline(&self, login: &str, at: DateTime<Utc>) -> Result<()> {
            let mut channels = self.channels.lock().unwrap();
            let channel = channels
                .iter_mut()
                .find(|c| c.login == login)
                .ok_or_else(|| AppError::NotFound(format!("channel {}", login)))?;
            channel.last_offline_at = Some(at);
            Ok(())
        }
    }
}
