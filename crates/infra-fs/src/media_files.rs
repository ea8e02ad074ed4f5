// Local MediaFiles Implementation

use async_trait::async_trait;
use std::path::Path;
use streamvault_core::error::Result;
use streamvault_core::port::MediaFiles;

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMediaFiles;

impl LocalMediaFiles {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaFiles for LocalMediaFiles {
    async fn size(&self, path: &Path) -> Option<u64> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            _ => None,
        }
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn write_text(&self, path: &Path, contents: &str) -> Result<()> {
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_size_and_rename() {
        let tmp = TempDir::new().unwrap();
        let files = LocalMediaFiles::new();
        let capture = tmp.path().join("a.ts");

        assert_eq!(files.size(&capture).await, None);
        files.write_text(&capture, "12345").await.unwrap();
        assert_eq!(files.size(&capture).await, Some(5));
        assert!(files.exists(&capture).await);

        let aside = tmp.path().join("old/a.ts.1.old");
        files.rename(&capture, &aside).await.unwrap();
        assert!(!files.exists(&capture).await);
        assert_eq!(files.size(&aside).await, Some(5));
    }

    #[tokio::test]
    async fn test_directory_has_no_size() {
        let tmp = TempDir::new().unwrap();
        let files = LocalMediaFiles::new();
        files.create_dir_all(&tmp.path().join("x/y")).await.unwrap();

        assert_eq!(files.size(&tmp.path().join("x/y")).await, None);
        tokio_test::assert_err!(files.remove(&tmp.path().join("missing.ts")).await);
    }
}
