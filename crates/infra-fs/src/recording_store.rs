// Filesystem RecordingStore Implementation
// Metadata lives beside the media: `<storage>/<login>/[...]/<basename>.json`

use async_trait::async_trait;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use streamvault_core::domain::Recording;
use streamvault_core::error::{AppError, Result};
use streamvault_core::port::RecordingStore;
use tracing::{debug, info, warn};

use crate::ignore_not_found;

/// Sidecar suffixes removed together with a recording
const SIDECAR_SUFFIXES: [&str; 5] = [".nfo", ".ffmetadata", ".chapters.vtt", "-llc-edl.csv", ".json"];

const BROKEN_SUFFIX: &str = ".broken";

pub struct FsRecordingStore {
    storage_dir: PathBuf,
}

impl FsRecordingStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    fn channel_dir(&self, channel_id: &str) -> PathBuf {
        self.storage_dir.join(channel_id)
    }

    /// Every `*.json` under `dir`, depth first
    async fn metadata_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    found.push(path);
                }
            }
        }
        Ok(found)
    }

    async fn read(path: &Path) -> Option<Recording> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read recording metadata");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(recording) => Some(recording),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping non-recording json");
                None
            }
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

#[async_trait]
impl RecordingStore for FsRecordingStore {
    async fn save(&self, recording: &Recording) -> Result<()> {
        tokio::fs::create_dir_all(recording.folder()).await?;

        let path = recording.metadata_path();
        let json = serde_json::to_string_pretty(recording)?;
        tokio::fs::write(&path, json).await?;

        debug!(recording = %recording.uuid, path = %path.display(), "Recording metadata saved");
        Ok(())
    }

    async fn list_channel(&self, channel_id: &str) -> Result<Vec<Recording>> {
        let mut recordings = Vec::new();
        for path in Self::metadata_files(&self.channel_dir(channel_id)).await? {
            if let Some(recording) = Self::read(&path).await {
                if recording.channel_id == channel_id {
                    recordings.push(recording);
                }
            }
        }
        recordings.sort_by_key(|r| r.started_at.unwrap_or(r.created_at));
        Ok(recordings)
    }

    async fn basename_exists(&self, channel_id: &str, basename: &str) -> Result<bool> {
        Ok(self
            .list_channel(channel_id)
            .await?
            .iter()
            .any(|r| r.basename == basename))
    }

    async fn find_by_capture_id(
        &self,
        channel_id: &str,
        capture_id: &str,
    ) -> Result<Option<Recording>> {
        Ok(self
            .list_channel(channel_id)
            .await?
            .into_iter()
            .find(|r| r.capture_id == capture_id))
    }

    async fn mark_broken(&self, recording: &Recording) -> Result<PathBuf> {
        let path = recording.metadata_path();
        let broken = with_suffix(&path, BROKEN_SUFFIX);

        match tokio::fs::rename(&path, &broken).await {
            Ok(()) => {
                warn!(recording = %recording.uuid, path = %broken.display(), "Recording metadata marked broken");
                Ok(broken)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound(format!(
                "recording metadata {}",
                path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, recording: &Recording) -> Result<()> {
        let mut paths: Vec<PathBuf> = recording
            .segments
            .iter()
            .filter(|s| !s.deleted)
            .map(|s| s.filename.clone())
            .collect();
        paths.extend(recording.capture_filename.clone());
        paths.extend(
            SIDECAR_SUFFIXES
                .iter()
                .map(|suffix| recording.folder().join(format!("{}{}", recording.basename, suffix))),
        );

        let mut removed = 0;
        for path in &paths {
            if ignore_not_found(tokio::fs::remove_file(path).await)? {
                removed += 1;
            }
        }

        info!(
            recording = %recording.uuid,
            channel = %recording.channel_id,
            files = removed,
            "Recording deleted"
        );
        Ok(())
    }
}
