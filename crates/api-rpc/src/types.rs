//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results (ADR-020).

use serde::{Deserialize, Serialize};
use streamvault_core::domain::{JobSnapshot, LiveEvent};
use streamvault_core::port::Signal;

/// stream.live.v1 - Channel went live
#[derive(Debug, Deserialize)]
pub struct LiveRequest {
    pub login: String,
    #[serde(flatten)]
    pub event: LiveEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveResponse {
    pub login: String,
    pub capture_id: String,
    pub accepted: bool,
}

/// stream.update.v1 - Title/category changed
#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub login: String,
    #[serde(flatten)]
    pub event: LiveEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateResponse {
    pub login: String,
    /// False when no session was active to take the chapter
    pub chapter_added: bool,
}

/// stream.offline.v1 - Channel went offline
#[derive(Debug, Deserialize)]
pub struct OfflineRequest {
    pub login: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OfflineResponse {
    pub login: String,
    pub was_capturing: bool,
}

/// jobs.list.v1 - Registered jobs (no parameters)
#[derive(Debug, Clone, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobSnapshot>,
}

/// jobs.kill.v1 - Kill a job by name
#[derive(Debug, Deserialize)]
pub struct KillJobRequest {
    pub name: String,
    #[serde(default = "default_signal")]
    pub signal: Signal,
}

fn default_signal() -> Signal {
    Signal::Term
}

#[derive(Debug, Clone, Serialize)]
pub struct KillJobResponse {
    pub name: String,
    pub stopped: bool,
}

/// channel.cleanup.v1 - Run eviction for one channel
#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub login: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupResponse {
    pub login: String,
    pub deleted: usize,
}
