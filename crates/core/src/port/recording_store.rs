// Recording Store Port
// Recording metadata persistence and deletion of recording files

use async_trait::async_trait;
use std::path::PathBuf;

use crate::domain::Recording;
use crate::error::Result;

#[async_trait]
pub trait RecordingStore: Send + Sync {
    /// Persist the recording metadata (`<folder>/<basename>.json`)
    async fn save(&self, recording: &Recording) -> Result<()>;

    /// All recordings of a channel, oldest first
    async fn list_channel(&self, channel_id: &str) -> Result<Vec<Recording>>;

    /// True if a recording with this basename already exists for the channel
    async fn basename_exists(&self, channel_id: &str, basename: &str) -> Result<bool>;

    async fn find_by_capture_id(
        &self,
        channel_id: &str,
        capture_id: &str,
    ) -> Result<Option<Recording>>;

    /// Rename the metadata file to a `.broken` sibling; returns the new path
    async fn mark_broken(&self, recording: &Recording) -> Result<PathBuf>;

    /// Remove the recording: segments, sidecars and metadata
    async fn delete(&self, recording: &Recording) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use chrono::{DateTime, Utc};
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// A finalized recording with one segment of `size` bytes
    pub fn finalized_recording(
        uuid: &str,
        channel_id: &str,
        started_at: DateTime<Utc>,
        size: u64,
    ) -> Recording {
        let mut recording =
            Recording::new(uuid, channel_id, uuid, "/tmp", uuid, started_at).unwrap();
        recording.begin_capture().unwrap();
        recording.begin_convert().unwrap();
        recording.finalize().unwrap();
        recording.started_at = Some(started_at);
        recording.add_segment(format!("/tmp/{}.mp4", uuid), size);
        recording
    }

    #[derive(Default)]
    pub struct InMemoryRecordingStore {
        recordings: Arc<Mutex<Vec<Recording>>>,
        broken: Arc<Mutex<Vec<String>>>,
        deleted: Arc<Mutex<Vec<String>>>,
        undeletable: Arc<Mutex<HashSet<String>>>,
    }

    impl InMemoryRecordingStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_recordings(recordings: Vec<Recording>) -> Self {
            let store = Self::default();
            *store.recordings.lock().unwrap() = recordings;
            store
        }

        /// Make `delete` fail for this uuid
        pub fn make_undeletable(&self, uuid: &str) {
            self.undeletable.lock().unwrap().insert(uuid.to_string());
        }

        pub fn get(&self, uuid: &str) -> Option<Recording> {
            self.recordings
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.uuid == uuid)
                .cloned()
        }

        pub fn all(&self) -> Vec<Recording> {
            self.recordings.lock().unwrap().clone()
        }

        /// Uuids passed to `mark_broken`
        pub fn broken(&self) -> Vec<String> {
            self.broken.lock().unwrap().clone()
        }

        /// Uuids passed to `delete`, in call order
        pub fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordingStore for InMemoryRecordingStore {
        async fn save(&self, recording: &Recording) -> Result<()> {
            let mut recordings = self.recordings.lock().unwrap();
            match recordings.iter_mut().find(|r| r.uuid == recording.uuid) {
                Some(existing) => *existing = recording.clone(),
                None => recordings.push(recording.clone()),
            }
            Ok(())
        }

        async fn list_channel(&self, channel_id: &str) -> Result<Vec<Recording>> {
            let mut list: Vec<Recording> = self
                .recordings
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.channel_id == channel_id)
                .cloned()
                .collect();
            list.sort_by_key(|r| r.started_at.unwrap_or(r.created_at));
            Ok(list)
        }

        async fn basename_exists(&self, channel_id: &str, basename: &str) -> Result<bool> {
            Ok(self
                .recordings
                .lock()
                .unwrap()
                .iter()
                .any(|r| r.channel_id == channel_id && r.basename == basename))
        }

        async fn find_by_capture_id(
            &self,
            channel_id: &str,
            capture_id: &str,
        ) -> Result<Option<Recording>> {
            Ok(self
                .recordings
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.channel_id == channel_id && r.capture_id == capture_id)
                .cloned())
        }

        async fn mark_broken(&self, recording: &Recording) -> Result<PathBuf> {
            self.broken.lock().unwrap().push(recording.uuid.clone());
            self.recordings
                .lock()
                .unwrap()
                .retain(|r| r.uuid != recording.uuid);
            let mut path = recording.metadata_path().into_os_string();
            path.push(".broken");
            Ok(PathBuf::from(path))
        }

        async fn delete(&self, recording: &Recording) -> Result<()> {
            if self.undeletable.lock().unwrap().contains(&recording.uuid) {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("cannot delete {}", recording.basename),
                )));
            }
            self.deleted.lock().unwrap().push(recording.uuid.clone());
            self.recordings
                .lock()
                .unwrap()
                .retain(|r| r.uuid != recording.uuid);
            Ok(())
        }
    }
}
