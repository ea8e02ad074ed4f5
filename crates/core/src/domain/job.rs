// Job Domain Model (supervised external process)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Arbitrary job context (channel login, output filename, ...)
pub type JobMetadata = BTreeMap<String, serde_json::Value>;

/// Job Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    None,
    Running,
    Stopped,
    Error,
}

impl JobStatus {
    /// Status after the process closed with `code`.
    /// Exit code 1 is the only code treated as a failure.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(1) => JobStatus::Error,
            _ => JobStatus::Stopped,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::None => write!(f, "NONE"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Stopped => write!(f, "STOPPED"),
            JobStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Persisted job record (one file per job, live process handle excluded)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub pid: Option<u32>,
    #[serde(default)]
    pub metadata: JobMetadata,
    pub dt_started_at: Option<DateTime<Utc>>,
    pub bin: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Externally visible job state, published to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    pub pid: Option<u32>,
    pub process_running: bool,
    pub status: JobStatus,
    pub progress: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub metadata: JobMetadata,
}

/// Failure to load a persisted job. Both variants mean "not running".
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobLoadError {
    #[error("no job record on disk")]
    NoFile,

    #[error("job record is empty or unreadable")]
    NoData,
}

impl JobLoadError {
    /// Stable numeric code
    pub fn code(&self) -> u8 {
        match self {
            JobLoadError::NoFile => 1,
            JobLoadError::NoData => 2,
        }
    }
}
