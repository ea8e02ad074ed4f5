// OS process table probe (ADR-002)
// Used for processes we hold no handle to (records restored after a restart)
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use streamvault_core::application::constants::STATUS_CHECK_TIMEOUT_MS;
use streamvault_core::port::{ExecutionError, ProcessListing, ProcessProbe, Signal};

use crate::signals;

#[derive(Debug, Clone, Copy)]
pub struct OsProcessProbe {
    timeout: Duration,
}

impl Default for OsProcessProbe {
    fn default() -> Self {
        Self::with_timeout(Duration::from_millis(STATUS_CHECK_TIMEOUT_MS))
    }
}

impl OsProcessProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listings slower than `timeout` fail with `ExecutionError::Timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn listing_command(pid: u32) -> Command {
        #[cfg(windows)]
        {
            let mut command = Command::new("tasklist");
            command.args(["/FI", &format!("PID eq {}", pid), "/NH"]);
            command
        }

        #[cfg(not(windows))]
        {
            let mut command = Command::new("ps");
            command.args(["-p", &pid.to_string()]);
            command
        }
    }
}

#[async_trait]
impl ProcessProbe for OsProcessProbe {
    async fn inspect(&self, pid: u32) -> Result<ProcessListing, ExecutionError> {
        let mut command = Self::listing_command(pid);
        command.kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                warn!(pid = pid, timeout_ms = self.timeout.as_millis() as u64, "Process listing timed out");
                ExecutionError::Timeout(self.timeout.as_millis() as i64)
            })?
            .map_err(|e| ExecutionError::Listing(e.to_string()))?;

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        // `ps -p` exits 1 when the pid is gone; tasklist prints an info line instead
        let running = output.status.success()
            && text
                .split_whitespace()
                .any(|token| token == pid.to_string());

        debug!(pid = pid, running = running, "Process listing checked");
        Ok(ProcessListing {
            running,
            output: text,
        })
    }

    async fn kill(&self, pid: u32, signal: Signal) -> Result<(), ExecutionError> {
        signals::kill_graceful(pid, signal, || signals::is_alive(pid)).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inspect_self_and_dead_pid() {
        let probe = OsProcessProbe::new();

        let me = probe.inspect(std::process::id()).await.unwrap();
        assert!(me.running);

        let dead = probe.inspect(999_999).await.unwrap();
        assert!(!dead.running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inspect_honours_configured_timeout() {
        let probe = OsProcessProbe::with_timeout(Duration::from_secs(30));

        let err = probe.inspect(std::process::id()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout(30_000)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_kill_by_pid() {
        let mut child = tokio::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();

        let probe = OsProcessProbe::new();
        let listing = probe.inspect(pid).await.unwrap();
        assert!(listing.output.contains("sleep"));

        let reaper = tokio::spawn(async move { child.wait().await });
        probe.kill(pid, Signal::Term).await.unwrap();

        let status = reaper.await.unwrap().unwrap();
        assert!(!status.success());
    }
}
