// Filesystem JobStore Implementation
// One JSON file per job: `<dir>/<name>.json`

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use streamvault_core::domain::{JobLoadError, JobRecord};
use streamvault_core::error::Result;
use streamvault_core::port::JobStore;
use tracing::{debug, warn};

use crate::ignore_not_found;

const RECORD_EXTENSION: &str = "json";

pub struct FsJobStore {
    dir: PathBuf,
}

impl FsJobStore {
    /// Store rooted at `dir` (usually `<cache>/pids`). Created on demand.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, RECORD_EXTENSION))
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn load(&self, name: &str) -> std::result::Result<JobRecord, JobLoadError> {
        let path = self.path_for(name);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(JobLoadError::NoFile),
            Err(e) => {
                warn!(job = %name, path = %path.display(), error = %e, "Failed to read job record");
                return Err(JobLoadError::NoData);
            }
        };

        if raw.trim().is_empty() {
            warn!(job = %name, path = %path.display(), "Job record is empty");
            return Err(JobLoadError::NoData);
        }

        serde_json::from_str(&raw).map_err(|e| {
            warn!(job = %name, path = %path.display(), error = %e, "Job record is corrupt");
            JobLoadError::NoData
        })
    }

    async fn save(&self, record: &JobRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&record.name);
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&path, json).await?;

        debug!(job = %record.name, path = %path.display(), "Job record written");
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let removed = ignore_not_found(tokio::fs::remove_file(self.path_for(name)).await)?;
        Ok(removed)
    }

    async fn exists(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.path_for(name))
            .await
            .unwrap_or(false)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamvault_core::domain::job::JobMetadata;
    use tempfile::TempDir;

    fn record(name: &str) -> JobRecord {
        let mut metadata = JobMetadata::new();
        metadata.insert("login".to_string(), serde_json::json!("somestreamer"));
        JobRecord {
            name: name.to_string(),
            pid: Some(4242),
            metadata,
            dt_started_at: None,
            bin: Some("streamlink".to_string()),
            args: vec!["--url".to_string(), "https://twitch.tv/somestreamer".to_string()],
        }
    }

    #[tokio::test]
    async fn test_save_load_remove() {
        let tmp = TempDir::new().unwrap();
        let store = FsJobStore::new(tmp.path().join("pids"));

        store.save(&record("capture_somestreamer_1")).await.unwrap();
        assert!(tmp.path().join("pids/capture_somestreamer_1.json").exists());
        assert!(store.exists("capture_somestreamer_1").await);

        let loaded = store.load("capture_somestreamer_1").await.unwrap();
        assert_eq!(loaded, record("capture_somestreamer_1"));

        assert!(store.remove("capture_somestreamer_1").await.unwrap());
        assert!(!store.remove("capture_somestreamer_1").await.unwrap(), "second remove is a no-op");
        assert_eq!(
            store.load("capture_somestreamer_1").await.unwrap_err(),
            JobLoadError::NoFile
        );
    }

    #[tokio::test]
    async fn test_empty_and_corrupt_records_are_no_data() {
        let tmp = TempDir::new().unwrap();
        let store = FsJobStore::new(tmp.path());
        std::fs::write(tmp.path().join("empty.json"), "  ").unwrap();
        std::fs::write(tmp.path().join("corrupt.json"), "{\"name\":").unwrap();

        assert_eq!(store.load("empty").await.unwrap_err(), JobLoadError::NoData);
        assert_eq!(store.load("corrupt").await.unwrap_err(), JobLoadError::NoData);
    }

    #[tokio::test]
    async fn test_list_only_records() {
        let tmp = TempDir::new().unwrap();
        let store = FsJobStore::new(tmp.path());
        assert!(store.list().await.unwrap().is_empty());

        store.save(&record("remux_b")).await.unwrap();
        store.save(&record("capture_a_1")).await.unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["capture_a_1", "remux_b"]);
    }

    #[tokio::test]
    async fn test_missing_dir_lists_nothing() {
        let store = FsJobStore::new("/nonexistent/streamvault/pids");
        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.exists("x").await);
    }
}
