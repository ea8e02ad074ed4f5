// Recording Domain Model (one capture session)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::channel::StreamNumbers;
use crate::domain::chapter::Chapter;
use crate::domain::error::{DomainError, Result};

/// Recording lifecycle phase. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingPhase {
    NotStarted,
    Capturing,
    Converting,
    Finalized,
    Failed,
}

impl std::fmt::Display for RecordingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingPhase::NotStarted => write!(f, "NOT_STARTED"),
            RecordingPhase::Capturing => write!(f, "CAPTURING"),
            RecordingPhase::Converting => write!(f, "CONVERTING"),
            RecordingPhase::Finalized => write!(f, "FINALIZED"),
            RecordingPhase::Failed => write!(f, "FAILED"),
        }
    }
}

impl RecordingPhase {
    /// Capturing may go straight to Finalized when conversion is disabled
    fn can_transition_to(self, next: RecordingPhase) -> bool {
        use RecordingPhase::*;
        matches!(
            (self, next),
            (NotStarted, Capturing)
                | (NotStarted, Failed)
                | (Capturing, Converting)
                | (Capturing, Finalized)
                | (Capturing, Failed)
                | (Converting, Finalized)
                | (Converting, Failed)
        )
    }
}

/// A finalized file part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub filename: PathBuf,
    pub size: u64,
    #[serde(default)]
    pub deleted: bool,
}

/// Media probe summary stored after finalize
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub bitrate: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub uuid: String,
    pub channel_id: String,
    pub capture_id: String,
    pub basename: String,
    pub folder: PathBuf,

    pub capture_filename: Option<PathBuf>,
    pub converted_filename: Option<PathBuf>,
    #[serde(default)]
    pub segments: Vec<Segment>,

    phase: RecordingPhase,
    #[serde(default)]
    pub prevent_deletion: bool,
    #[serde(default)]
    pub has_comment: bool,
    #[serde(default)]
    pub is_favourite_game: bool,
    #[serde(default)]
    pub is_muted_upstream: bool,
    /// Upstream copy no longer exists
    #[serde(default)]
    pub deleted_upstream: bool,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub capture_started_at: Option<DateTime<Utc>>,
    /// First "writing output" line seen from the capture tool
    #[serde(default)]
    pub capture_output_started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub stream_resolution: Option<String>,
    #[serde(default)]
    pub stream_numbers: Option<StreamNumbers>,
    #[serde(default)]
    pub upstream_id: Option<String>,
    #[serde(default)]
    pub media_info: Option<MediaInfo>,
    /// Near-24h capture, upstream may have cut it
    #[serde(default)]
    pub long_stream: bool,
}

impl Recording {
    /// Create an empty recording owned by `channel_id`
    pub fn new(
        uuid: impl Into<String>,
        channel_id: impl Into<String>,
        capture_id: impl Into<String>,
        folder: impl Into<PathBuf>,
        basename: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let channel_id = channel_id.into();
        if channel_id.is_empty() {
            return Err(DomainError::ValidationError(
                "recording must belong to a channel".to_string(),
            ));
        }
        let basename = basename.into();
        if basename.is_empty() {
            return Err(DomainError::ValidationError(
                "recording basename is empty".to_string(),
            ));
        }

        Ok(Self::blank(
            uuid.into(),
            channel_id,
            capture_id.into(),
            folder.into(),
            basename,
            created_at,
        ))
    }

    fn blank(
        uuid: String,
        channel_id: String,
        capture_id: String,
        folder: PathBuf,
        basename: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid,
            channel_id,
            capture_id,
            basename,
            folder,
            capture_filename: None,
            converted_filename: None,
            segments: Vec::new(),
            phase: RecordingPhase::NotStarted,
            prevent_deletion: false,
            has_comment: false,
            is_favourite_game: false,
            is_muted_upstream: false,
            deleted_upstream: false,
            created_at,
            started_at: None,
            ended_at: None,
            capture_started_at: None,
            capture_output_started_at: None,
            chapters: Vec::new(),
            stream_resolution: None,
            stream_numbers: None,
            upstream_id: None,
            media_info: None,
            long_stream: false,
        }
    }

    pub fn phase(&self) -> RecordingPhase {
        self.phase
    }

    pub fn is_capturing(&self) -> bool {
        self.phase == RecordingPhase::Capturing
    }

    pub fn is_converting(&self) -> bool {
        self.phase == RecordingPhase::Converting
    }

    pub fn is_finalized(&self) -> bool {
        self.phase == RecordingPhase::Finalized
    }

    pub fn failed(&self) -> bool {
        self.phase == RecordingPhase::Failed
    }

    pub fn not_started(&self) -> bool {
        self.phase == RecordingPhase::NotStarted
    }

    fn transition(&mut self, next: RecordingPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.phase = next;
        Ok(())
    }

    pub fn begin_capture(&mut self) -> Result<()> {
        self.transition(RecordingPhase::Capturing)
    }

    pub fn begin_convert(&mut self) -> Result<()> {
        self.transition(RecordingPhase::Converting)
    }

    pub fn finalize(&mut self) -> Result<()> {
        self.transition(RecordingPhase::Finalized)
    }

    pub fn fail(&mut self) -> Result<()> {
        self.transition(RecordingPhase::Failed)
    }

    /// Reject access from any channel but the owner
    pub fn ensure_owned_by(&self, channel_id: &str) -> Result<()> {
        if self.channel_id != channel_id {
            return Err(DomainError::ChannelMismatch {
                recording: self.uuid.clone(),
                owner: self.channel_id.clone(),
                requested: channel_id.to_string(),
            });
        }
        Ok(())
    }

    /// Sum of live segment sizes; zero until segments exist
    pub fn total_size(&self) -> u64 {
        self.segments
            .iter()
            .filter(|s| !s.deleted)
            .map(|s| s.size)
            .sum()
    }

    pub fn add_segment(&mut self, filename: impl Into<PathBuf>, size: u64) {
        self.segments.push(Segment {
            filename: filename.into(),
            size,
            deleted: false,
        });
    }

    /// `<folder>/<basename>.json`
    pub fn metadata_path(&self) -> PathBuf {
        self.sidecar_path("json")
    }

    /// `<folder>/<basename>.<extension>`
    pub fn sidecar_path(&self, extension: &str) -> PathBuf {
        self.folder.join(format!("{}.{}", self.basename, extension))
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Seconds between start and end, when both are known
    pub fn duration_secs(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}
