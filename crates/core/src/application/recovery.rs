// Crash recovery logic (ADR-002)
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::job::{JobRegistry, ReconcileReport};
use crate::domain::JobStatus;
use crate::error::Result;
use crate::port::Signal;

/// Job name prefixes of capture processes
const CAPTURE_JOB_PREFIXES: [&str; 2] = ["capture_", "fbcapture_"];

/// Crash recovery service
///
/// On daemon startup, rebuilds the job registry from the persisted records and
/// drops every job whose process did not survive the restart.
pub struct RecoveryService {
    registry: Arc<JobRegistry>,
}

impl RecoveryService {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Load all job records, then reconcile them against the OS process table
    ///
    /// # Returns
    /// How many jobs are still alive and how many were cleared
    pub async fn recover(&self) -> Result<ReconcileReport> {
        info!("Starting job recovery");

        let loaded = self.registry.load_all_from_disk().await?;
        let report = self.registry.reconcile_stale_jobs().await;

        if report.cleared > 0 {
            warn!(
                loaded = loaded,
                cleared = report.cleared,
                "Stale jobs found after restart"
            );
        }

        info!(
            loaded = loaded,
            alive = report.alive,
            cleared = report.cleared,
            "Job recovery complete"
        );
        Ok(report)
    }

    /// SIGTERM every running capture job. Returns how many were stopped.
    pub async fn shutdown_capture_jobs(&self) -> usize {
        let mut stopped = 0;

        for job in self.registry.jobs() {
            if !CAPTURE_JOB_PREFIXES.iter().any(|p| job.name().starts_with(p)) {
                continue;
            }
            if job.status() != JobStatus::Running {
                continue;
            }

            info!(job = %job.name(), pid = ?job.pid(), "Stopping capture job for shutdown");
            match job.kill(Signal::Term).await {
                Ok(true) => stopped += 1,
                Ok(false) => warn!(job = %job.name(), "Capture job did not confirm stop"),
                Err(e) => error!(job = %job.name(), error = %e, "Failed to stop capture job"),
            }
        }

        stopped
    }
}
