//! RPC Method Handlers
//!
//! Trigger methods hand events to the capture pipeline; admin methods read and
//! act on the job registry and the eviction policy.

use crate::error::to_rpc_error;
use crate::types::{
    CleanupRequest, CleanupResponse, KillJobRequest, KillJobResponse, ListJobsResponse,
    LiveRequest, LiveResponse, OfflineRequest, OfflineResponse, UpdateRequest,
    UpdateResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use streamvault_core::application::{CapturePipeline, EvictionService, JobRegistry};
use streamvault_core::error::AppError;
use streamvault_core::port::ChannelRegistry;
use tracing::{error, info};

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    pipeline: CapturePipeline,
    jobs: Arc<JobRegistry>,
    channels: Arc<dyn ChannelRegistry>,
    eviction: Arc<EvictionService>,
}

impl RpcHandler {
    pub fn new(
        pipeline: CapturePipeline,
        jobs: Arc<JobRegistry>,
        channels: Arc<dyn ChannelRegistry>,
        eviction: Arc<EvictionService>,
    ) -> Self {
        Self {
            pipeline,
            jobs,
            channels,
            eviction,
        }
    }

    async fn require_channel(&self, login: &str) -> Result<(), ErrorObjectOwned> {
        match self.channels.channel(login).await {
            Some(_) => Ok(()),
            None => Err(to_rpc_error(AppError::NotFound(format!("channel {}", login)))),
        }
    }

    /// stream.live.v1
    ///
    /// The pipeline runs detached for the whole session; the call returns once
    /// the trigger is accepted.
    pub async fn live(&self, params: LiveRequest) -> Result<LiveResponse, ErrorObjectOwned> {
        let LiveRequest { login, event } = params;
        self.require_channel(&login).await?;

        if self.pipeline.has_session(&login, &event.capture_id) {
            return Err(to_rpc_error(AppError::Conflict(format!(
                "session {} of {} is already in progress",
                event.capture_id, login
            ))));
        }

        let capture_id = event.capture_id.clone();
        let pipeline = self.pipeline.clone();
        let channel = login.clone();
        tokio::spawn(async move {
            match pipeline.trigger(&channel, event).await {
                Ok(outcome) => info!(channel = %channel, outcome = ?outcome, "Capture pipeline ended"),
                Err(e) => error!(channel = %channel, error = %e, "Capture pipeline failed"),
            }
        });

        info!(channel = %login, capture_id = %capture_id, "Live trigger accepted");
        Ok(LiveResponse {
            login,
            capture_id,
            accepted: true,
        })
    }

    /// stream.update.v1
    pub async fn update(&self, params: UpdateRequest) -> Result<UpdateResponse, ErrorObjectOwned> {
        let chapter_added = self
            .pipeline
            .update(&params.login, &params.event)
            .await
            .map_err(to_rpc_error)?;

        Ok(UpdateResponse {
            login: params.login,
            chapter_added,
        })
    }

    /// stream.offline.v1
    pub async fn offline(&self, params: OfflineRequest) -> Result<OfflineResponse, ErrorObjectOwned> {
        let was_capturing = self.pipeline.is_capturing(&params.login);
        self.pipeline.end(&params.login).await.map_err(to_rpc_error)?;

        Ok(OfflineResponse {
            login: params.login,
            was_capturing,
        })
    }

    /// jobs.list.v1
    pub async fn list_jobs(&self) -> Result<ListJobsResponse, ErrorObjectOwned> {
        let mut jobs = self.jobs.snapshots();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ListJobsResponse { jobs })
    }

    /// jobs.kill.v1
    pub async fn kill_job(&self, params: KillJobRequest) -> Result<KillJobResponse, ErrorObjectOwned> {
        let job = self.jobs.get(&params.name).ok_or_else(|| {
            to_rpc_error(AppError::NotFound(format!("job {}", params.name)))
        })?;

        let stopped = job.kill(params.signal).await.map_err(to_rpc_error)?;
        info!(job = %params.name, signal = %params.signal, stopped = stopped, "Job killed over RPC");

        Ok(KillJobResponse {
            name: params.name,
            stopped,
        })
    }

    /// channel.cleanup.v1
    pub async fn cleanup(&self, params: CleanupRequest) -> Result<CleanupResponse, ErrorObjectOwned> {
        let deleted = self
            .eviction
            .cleanup(&params.login, None)
            .await
            .map_err(to_rpc_error)?;

        Ok(CleanupResponse {
            login: params.login,
            deleted,
        })
    }
}
