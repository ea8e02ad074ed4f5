// Job Log Port
// Per-job stdout/stderr log files

use async_trait::async_trait;

use crate::error::Result;
use crate::port::OutputStream;

#[async_trait]
pub trait JobLogSink: Send + Sync {
    /// Start fresh logs for `job`, writing `header` (`$ bin args`) to each stream
    async fn start(&self, job: &str, header: &str) -> Result<()>;

    async fn append(&self, job: &str, stream: OutputStream, line: &str) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct MemoryJobLog {
        lines: Arc<Mutex<HashMap<String, Vec<String>>>>,
    }

    impl MemoryJobLog {
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything written for `job`, tagged with its stream
        pub fn lines(&self, job: &str) -> Vec<String> {
            self.lines
                .lock()
                .unwrap()
                .get(job)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl JobLogSink for MemoryJobLog {
        async fn start(&self, job: &str, header: &str) -> Result<()> {
            self.lines
                .lock()
                .unwrap()
                .insert(job.to_string(), vec![header.to_string()]);
            Ok(())
        }

        async fn append(&self, job: &str, stream: OutputStream, line: &str) -> Result<()> {
            self.lines
                .lock()
                .unwrap()
                .entry(job.to_string())
                .or_default()
                .push(format!("[{}] {}", stream.as_str(), line));
            Ok(())
        }
    }
}
