// Job Registry - process-wide table of live jobs
// Injected into services instead of a global; tests build their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::application::config::JobConfig;
use crate::application::events::EventBus;
use crate::application::job::job::{Job, JobDeps, JobTable};
use crate::domain::{JobLoadError, JobSnapshot, JobStatus};
use crate::error::Result;
use crate::port::{JobLogSink, JobStore, ProcessProbe, TimeProvider};

/// Outcome of startup reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub alive: usize,
    pub cleared: usize,
}

#[derive(Clone)]
pub struct JobRegistry {
    deps: Arc<JobDeps>,
    table: Arc<JobTable>,
}

impl JobRegistry {
    pub fn new(
        store: Arc<dyn JobStore>,
        probe: Arc<dyn ProcessProbe>,
        logs: Arc<dyn JobLogSink>,
        bus: EventBus,
        time: Arc<dyn TimeProvider>,
        config: JobConfig,
    ) -> Self {
        Self {
            deps: Arc::new(JobDeps {
                store,
                probe,
                logs,
                bus,
                time,
                config,
            }),
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.deps.bus
    }

    /// New, unspawned job. Warns when a record with that name exists;
    /// saving the new job overwrites it.
    pub async fn create(&self, name: &str) -> Arc<Job> {
        if self.has(name) || self.deps.store.exists(name).await {
            warn!(job = %name, "Creating job {} overwrites existing!", name);
        }
        Arc::new(Job::new(
            name.to_string(),
            false,
            self.deps.clone(),
            Arc::downgrade(&self.table),
        ))
    }

    /// Virtual job without a process, used for synthetic progress
    pub fn create_dummy(&self, name: &str) -> Arc<Job> {
        Arc::new(Job::new(
            name.to_string(),
            true,
            self.deps.clone(),
            Arc::downgrade(&self.table),
        ))
    }

    /// In-memory job if registered, otherwise the persisted record.
    ///
    /// # Errors
    /// - JobLoadError::NoFile / NoData: treat as "not running"
    pub async fn load(&self, name: &str) -> std::result::Result<Arc<Job>, JobLoadError> {
        if let Some(job) = self.get(name) {
            return Ok(job);
        }
        let record = self.deps.store.load(name).await?;
        Ok(Arc::new(Job::from_record(
            record,
            self.deps.clone(),
            Arc::downgrade(&self.table),
        )))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Job>> {
        self.lock().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Registered job that is currently running, checked live
    pub async fn find_running(&self, name: &str) -> Option<Arc<Job>> {
        let job = self.get(name)?;
        match job.get_status(false).await {
            Ok(JobStatus::Running) => Some(job),
            _ => None,
        }
    }

    /// All registered jobs, sorted by name
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = self.lock().values().cloned().collect();
        jobs.sort_by(|a, b| a.name().cmp(b.name()));
        jobs
    }

    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        self.jobs().iter().map(|j| j.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Job>>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register every persisted record. Unreadable records are skipped.
    pub async fn load_all_from_disk(&self) -> Result<usize> {
        let names = self.deps.store.list().await?;
        let mut loaded = 0;

        for name in names {
            match self.load(&name).await {
                Ok(job) => {
                    self.lock().insert(name, job);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(job = %name, code = e.code(), error = %e, "Skipping job record");
                }
            }
        }

        info!(loaded = loaded, "Loaded job records from disk");
        Ok(loaded)
    }

    /// Clear dummies and every job whose process cannot be confirmed alive
    pub async fn reconcile_stale_jobs(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for job in self.jobs() {
            if job.is_dummy() {
                job.clear().await;
                report.cleared += 1;
                continue;
            }

            match job.get_status(true).await {
                Ok(JobStatus::Running) => {
                    info!(job = %job.name(), pid = ?job.pid(), "Job still running after restart");
                    report.alive += 1;
                }
                Ok(status) => {
                    warn!(job = %job.name(), pid = ?job.pid(), status = %status, "Clearing stale job");
                    job.clear().await;
                    report.cleared += 1;
                }
                Err(e) => {
                    warn!(job = %job.name(), error = %e, "Clearing job that cannot be checked");
                    job.clear().await;
                    report.cleared += 1;
                }
            }
        }

        info!(alive = report.alive, cleared = report.cleared, "Job reconciliation complete");
        report
    }
}
