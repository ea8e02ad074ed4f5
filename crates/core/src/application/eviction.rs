// Eviction Policy
// Keeps each channel within its storage/count budget.
// Totals are recomputed from the recording list on every run.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::application::config::{EvictionConfig, EvictionLimits};
use crate::domain::Recording;
use crate::error::{AppError, Result};
use crate::port::{ChannelRegistry, RecordingStore};

/// Protections that depend on configuration toggles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionToggles {
    pub keep_deleted_upstream: bool,
    pub keep_favourite: bool,
    pub keep_muted: bool,
    pub keep_commented: bool,
}

impl From<&EvictionConfig> for RetentionToggles {
    fn from(config: &EvictionConfig) -> Self {
        Self {
            keep_deleted_upstream: config.keep_deleted_vods,
            keep_favourite: config.keep_favourite_vods,
            keep_muted: config.keep_muted_vods,
            keep_commented: config.keep_commented_vods,
        }
    }
}

impl RetentionToggles {
    fn protects(&self, recording: &Recording) -> bool {
        (self.keep_deleted_upstream && recording.deleted_upstream)
            || (self.keep_favourite && recording.is_favourite_game)
            || (self.keep_muted && recording.is_muted_upstream)
            || (self.keep_commented && recording.has_comment)
    }
}

/// Recordings to delete, in discovery order (newest first).
///
/// `recordings` is the channel's list in chronological order. Limits of 0
/// select every unprotected finalized recording.
pub fn candidates_for_deletion<'a>(
    recordings: &'a [Recording],
    limits: EvictionLimits,
    toggles: RetentionToggles,
    exclude: Option<&str>,
) -> Vec<&'a Recording> {
    let mut total_size: u64 = 0;
    let mut total_count: u32 = 0;
    let mut seen: HashSet<&str> = HashSet::new();
    let mut candidates = Vec::new();

    for recording in recordings.iter().rev() {
        if !recording.is_finalized() {
            continue;
        }
        if exclude == Some(recording.uuid.as_str()) {
            debug!(recording = %recording.uuid, "Excluded from eviction");
            continue;
        }
        if recording.prevent_deletion || toggles.protects(recording) {
            debug!(recording = %recording.uuid, "Recording is protected");
            continue;
        }

        total_size = total_size.saturating_add(recording.total_size());
        total_count += 1;

        if (total_size > limits.max_bytes || total_count > limits.max_count)
            && seen.insert(recording.uuid.as_str())
        {
            candidates.push(recording);
        }
    }

    candidates
}

/// Applies the policy to a channel and deletes what it selects
pub struct EvictionService {
    recordings: Arc<dyn RecordingStore>,
    channels: Arc<dyn ChannelRegistry>,
    config: EvictionConfig,
}

impl EvictionService {
    pub fn new(
        recordings: Arc<dyn RecordingStore>,
        channels: Arc<dyn ChannelRegistry>,
        config: EvictionConfig,
    ) -> Self {
        Self {
            recordings,
            channels,
            config,
        }
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    /// Delete recordings over the channel's budget. Returns how many were deleted.
    ///
    /// With `delete_only_one` only the oldest candidate goes. Individual
    /// delete failures are logged and skipped.
    ///
    /// # Errors
    /// - AppError::NotFound if the channel is unknown
    pub async fn cleanup(&self, channel_id: &str, exclude: Option<&str>) -> Result<usize> {
        let channel = self
            .channels
            .channel(channel_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("channel {}", channel_id)))?;

        if channel.no_cleanup {
            info!(channel = %channel_id, "Cleanup disabled for channel");
            return Ok(0);
        }

        let limits = self.config.limits_for(&channel);
        let recordings = self.recordings.list_channel(channel_id).await?;
        let candidates = candidates_for_deletion(
            &recordings,
            limits,
            RetentionToggles::from(&self.config),
            exclude,
        );

        info!(
            channel = %channel_id,
            recordings = recordings.len(),
            candidates = candidates.len(),
            max_bytes = limits.max_bytes,
            max_count = limits.max_count,
            "Running cleanup"
        );

        let selected: Vec<&Recording> = if self.config.delete_only_one {
            candidates.last().copied().into_iter().collect()
        } else {
            candidates
        };

        let mut deleted = 0;
        for recording in selected {
            recording.ensure_owned_by(channel_id)?;
            match self.recordings.delete(recording).await {
                Ok(()) => {
                    info!(
                        channel = %channel_id,
                        recording = %recording.uuid,
                        basename = %recording.basename,
                        size = recording.total_size(),
                        "Deleted recording"
                    );
                    deleted += 1;
                }
                Err(e) => {
                    error!(
                        channel = %channel_id,
                        recording = %recording.uuid,
                        error = %e,
                        "Failed to delete recording"
                    );
                }
            }
        }

        Ok(deleted)
    }
}
