// Media Files Port
// Local file access for capture output, converted files and sidecars

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

#[async_trait]
pub trait MediaFiles: Send + Sync {
    /// File size, `None` if the file does not exist
    async fn size(&self, path: &Path) -> Option<u64>;

    async fn exists(&self, path: &Path) -> bool {
        self.size(path).await.is_some()
    }

    async fn remove(&self, path: &Path) -> Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn write_text(&self, path: &Path, contents: &str) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct Entry {
        size: u64,
        text: Option<String>,
    }

    /// In-memory filesystem. Cheap to clone; clones share state.
    #[derive(Default, Clone)]
    pub struct InMemoryMediaFiles {
        files: Arc<Mutex<HashMap<PathBuf, Entry>>>,
        dirs: Arc<Mutex<HashSet<PathBuf>>>,
    }

    impl InMemoryMediaFiles {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, path: impl Into<PathBuf>, size: u64) {
            self.files
                .lock()
                .unwrap()
                .insert(path.into(), Entry { size, text: None });
        }

        pub fn text(&self, path: impl AsRef<Path>) -> Option<String> {
            self.files
                .lock()
                .unwrap()
                .get(path.as_ref())
                .and_then(|e| e.text.clone())
        }

        pub fn contains(&self, path: impl AsRef<Path>) -> bool {
            self.files.lock().unwrap().contains_key(path.as_ref())
        }

        pub fn has_dir(&self, path: impl AsRef<Path>) -> bool {
            self.dirs.lock().unwrap().contains(path.as_ref())
        }
    }

    #[async_trait]
    impl MediaFiles for InMemoryMediaFiles {
        async fn size(&self, path: &Path) -> Option<u64> {
            self.files.lock().unwrap().get(path).map(|e| e.size)
        }

        async fn remove(&self, path: &Path) -> Result<()> {
            self.files
                .lock()
                .unwrap()
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| AppError::NotFound(path.display().to_string()))
        }

        async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
            let mut files = self.files.lock().unwrap();
            let entry = files
                .remove(from)
                .ok_or_else(|| AppError::NotFound(from.display().to_string()))?;
            files.insert(to.to_path_buf(), entry);
            Ok(())
        }

        async fn create_dir_all(&self, path: &Path) -> Result<()> {
            self.dirs.lock().unwrap().insert(path.to_path_buf());
            Ok(())
        }

        async fn write_text(&self, path: &Path, contents: &str) -> Result<()> {
            self.files.lock().unwrap().insert(
                path.to_path_buf(),
                Entry {
                    size: contents.len() as u64,
                    text: Some(contents.to_string()),
                },
            );
            Ok(())
        }
    }
}
