// Filesystem JobLogSink Implementation
// `<dir>/<job>_stdout.log` and `<dir>/<job>_stderr.log`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use streamvault_core::error::Result;
use streamvault_core::port::{JobLogSink, OutputStream};
use tokio::io::AsyncWriteExt;

pub struct FsJobLogSink {
    dir: PathBuf,
}

impl FsJobLogSink {
    /// Sink writing into `dir` (usually `<logs>/software`)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, job: &str, stream: OutputStream) -> PathBuf {
        self.dir.join(format!("{}_{}.log", job, stream.as_str()))
    }
}

#[async_trait]
impl JobLogSink for FsJobLogSink {
    async fn start(&self, job: &str, header: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        for stream in [OutputStream::Stdout, OutputStream::Stderr] {
            tokio::fs::write(self.path_for(job, stream), format!("{}\n", header)).await?;
        }
        Ok(())
    }

    async fn append(&self, job: &str, stream: OutputStream, line: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(job, stream))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}
