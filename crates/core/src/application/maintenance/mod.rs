// Cleanup Scheduler
// Periodic eviction sweep over every known channel

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

use crate::application::eviction::EvictionService;
use crate::application::shutdown::ShutdownToken;
use crate::port::ChannelRegistry;

/// Cleanup scheduler
///
/// Runs `cleanup(channel, None)` for all channels every `interval_hours`
pub struct CleanupScheduler {
    eviction: Arc<EvictionService>,
    channels: Arc<dyn ChannelRegistry>,
    period: Duration,
}

impl CleanupScheduler {
    pub fn new(
        eviction: Arc<EvictionService>,
        channels: Arc<dyn ChannelRegistry>,
        interval_hours: u64,
    ) -> Self {
        Self {
            eviction,
            channels,
            period: Duration::from_secs(interval_hours.max(1) * 3600),
        }
    }

    /// Run the sweep loop until shutdown. Should be spawned in tokio::spawn.
    /// The first sweep happens immediately.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(period_secs = self.period.as_secs(), "Cleanup scheduler started");

        let mut tick = interval(self.period);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_now().await;
                }
                _ = shutdown.wait() => {
                    info!("Cleanup scheduler stopped");
                    return;
                }
            }
        }
    }

    /// One sweep over all channels. Returns the number of deleted recordings.
    pub async fn run_now(&self) -> usize {
        info!("Running scheduled cleanup...");

        let mut deleted = 0;
        for channel in self.channels.channels().await {
            match self.eviction.cleanup(&channel.login, None).await {
                Ok(n) => deleted += n,
                Err(e) => {
                    error!(channel = %channel.login, error = %e, "Scheduled cleanup failed");
                }
            }
        }

        info!(deleted = deleted, "Scheduled cleanup completed");
        deleted
    }
}
