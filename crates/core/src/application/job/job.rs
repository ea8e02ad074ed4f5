// Job - supervised external process (ADR-002)
//
// Lifecycle: NONE -> RUNNING (spawn confirmed) -> STOPPED | ERROR (exit/close,
// exit code 1 => ERROR) -> removed (clear). A job without a handle can also go
// straight to STOPPED through an OS liveness check after a restart.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::application::config::JobConfig;
use crate::application::constants::{OUTPUT_BUFFER_LINES, PROGRESS_LOG_STEP};
use crate::application::events::{EventBus, Notification};
use crate::application::job::debounce::{Debouncer, Dispatch};
use crate::domain::job::JobMetadata;
use crate::domain::{JobRecord, JobSnapshot, JobStatus};
use crate::error::{AppError, Result};
use crate::port::{
    JobLogSink, JobStore, OutputLine, ProcessExit, ProcessHandle, ProcessLauncher, ProcessProbe,
    ProcessSpec, Signal, TimeProvider,
};

/// Registry table shared between the registry and its jobs
pub(crate) type JobTable = Mutex<HashMap<String, Arc<Job>>>;

/// Collaborators every job needs
pub(crate) struct JobDeps {
    pub store: Arc<dyn JobStore>,
    pub probe: Arc<dyn ProcessProbe>,
    pub logs: Arc<dyn JobLogSink>,
    pub bus: EventBus,
    pub time: Arc<dyn TimeProvider>,
    pub config: JobConfig,
}

struct JobState {
    pid: Option<u32>,
    bin: Option<String>,
    args: Vec<String>,
    status: JobStatus,
    exit_code: Option<i32>,
    progress: f64,
    last_logged_progress: f64,
    last_published_progress: f64,
    started_at: Option<DateTime<Utc>>,
    metadata: JobMetadata,
    handle: Option<Arc<dyn ProcessHandle>>,
    process_running: bool,
}

pub struct Job {
    name: String,
    dummy: bool,
    deps: Arc<JobDeps>,
    table: Weak<JobTable>,
    state: Mutex<JobState>,
    debounce: Mutex<Debouncer>,
    exit_tx: watch::Sender<Option<JobStatus>>,
}

impl Job {
    pub(crate) fn new(name: String, dummy: bool, deps: Arc<JobDeps>, table: Weak<JobTable>) -> Self {
        let debounce = Debouncer::new(deps.config.debounce(), deps.config.max_coalesced_updates);
        let (exit_tx, _) = watch::channel(None);
        Self {
            name,
            dummy,
            deps,
            table,
            state: Mutex::new(JobState {
                pid: None,
                bin: None,
                args: Vec::new(),
                status: JobStatus::None,
                exit_code: None,
                progress: 0.0,
                last_logged_progress: 0.0,
                last_published_progress: 0.0,
                started_at: None,
                metadata: JobMetadata::new(),
                handle: None,
                process_running: false,
            }),
            debounce: Mutex::new(debounce),
            exit_tx,
        }
    }

    pub(crate) fn from_record(record: JobRecord, deps: Arc<JobDeps>, table: Weak<JobTable>) -> Self {
        let job = Self::new(record.name, false, deps, table);
        {
            let mut state = job.state();
            state.pid = record.pid;
            state.bin = record.bin;
            state.args = record.args;
            state.started_at = record.dt_started_at;
            state.metadata = record.metadata;
        }
        job
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn debouncer(&self) -> MutexGuard<'_, Debouncer> {
        self.debounce.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dummy(&self) -> bool {
        self.dummy
    }

    pub fn pid(&self) -> Option<u32> {
        self.state().pid
    }

    /// Last known status (no liveness check)
    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    pub fn progress(&self) -> f64 {
        self.state().progress
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state().exit_code
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state().started_at
    }

    pub fn metadata(&self) -> JobMetadata {
        self.state().metadata.clone()
    }

    pub fn bin(&self) -> Option<String> {
        self.state().bin.clone()
    }

    pub fn args(&self) -> Vec<String> {
        self.state().args.clone()
    }

    pub fn set_pid(&self, pid: u32) {
        self.state().pid = Some(pid);
    }

    pub fn set_exec(&self, bin: impl Into<String>, args: Vec<String>) {
        let mut state = self.state();
        state.bin = Some(bin.into());
        state.args = args;
    }

    pub fn set_metadata(&self, metadata: JobMetadata) {
        self.state().metadata = metadata;
    }

    pub fn insert_metadata(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.state().metadata.insert(key.into(), value.into());
    }

    pub fn is_registered(&self) -> bool {
        self.table
            .upgrade()
            .map(|table| {
                table
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .contains_key(&self.name)
            })
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state();
        JobSnapshot {
            name: self.name.clone(),
            pid: state.pid,
            process_running: state.process_running,
            status: state.status,
            progress: state.progress,
            started_at: state.started_at,
            metadata: state.metadata.clone(),
        }
    }

    pub fn record(&self) -> JobRecord {
        let state = self.state();
        JobRecord {
            name: self.name.clone(),
            pid: state.pid,
            metadata: state.metadata.clone(),
            dt_started_at: state.started_at,
            bin: state.bin.clone(),
            args: state.args.clone(),
        }
    }

    /// Spawn `spec`, attach the process and persist the job.
    ///
    /// Output is written to the job logs and forwarded to the returned receiver.
    /// Dropping the receiver does not stop logging.
    pub async fn spawn(
        self: &Arc<Self>,
        launcher: &dyn ProcessLauncher,
        spec: &ProcessSpec,
    ) -> Result<mpsc::Receiver<OutputLine>> {
        let launched = launcher.spawn(spec).await?;

        self.set_exec(spec.bin.clone(), spec.args.clone());
        self.state().started_at = Some(self.deps.time.now());
        self.set_process(launched.handle, launched.exit);

        if let Err(e) = self.deps.logs.start(&self.name, &spec.command_line()).await {
            warn!(job = %self.name, error = %e, "Failed to start job log");
        }

        self.save().await?;

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER_LINES);
        let logs = self.deps.logs.clone();
        let name = self.name.clone();
        let mut output = launched.output;
        tokio::spawn(async move {
            while let Some(line) = output.recv().await {
                if let Err(e) = logs.append(&name, line.stream, &line.line).await {
                    debug!(job = %name, error = %e, "Failed to write job log line");
                }
                let _ = tx.send(line).await;
            }
        });

        Ok(rx)
    }

    /// Attach a process handle; `exit` resolves when the process closes
    pub fn set_process(self: &Arc<Self>, handle: Arc<dyn ProcessHandle>, exit: oneshot::Receiver<ProcessExit>) {
        {
            let mut state = self.state();
            if let Some(pid) = handle.pid() {
                state.pid = Some(pid);
            }
            state.handle = Some(handle);
            state.process_running = true;
            state.status = JobStatus::Running;
            state.exit_code = None;
        }
        self.exit_tx.send_replace(None);

        info!(job = %self.name, pid = ?self.pid(), "Job process attached");

        let job = self.clone();
        tokio::spawn(async move {
            let (code, status) = match exit.await {
                Ok(ProcessExit::Exited(code)) => (code, JobStatus::from_exit_code(code)),
                Ok(ProcessExit::Failed(reason)) => {
                    warn!(job = %job.name, reason = %reason, "Job process failed");
                    (None, JobStatus::Error)
                }
                Err(_) => {
                    warn!(job = %job.name, "Lost track of job process");
                    (None, JobStatus::Error)
                }
            };
            job.on_close(code, status);
        });
    }

    /// Shared close hook: record exit, wake waiters, broadcast
    fn on_close(self: &Arc<Self>, code: Option<i32>, status: JobStatus) {
        {
            let mut state = self.state();
            state.exit_code = code;
            state.status = status;
            state.process_running = false;
        }
        info!(job = %self.name, exit_code = ?code, status = %status, "Job process closed");
        self.exit_tx.send_replace(Some(status));
        self.broadcast_update(false);
    }

    /// Wait until the attached process closes
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.exit_tx.subscribe();
        loop {
            if let Some(status) = *rx.borrow_and_update() {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Re-check liveness without broadcasting. Returns (status, changed).
    async fn poll_status(&self, use_command: bool) -> Result<(JobStatus, bool)> {
        if self.dummy {
            return Ok((self.status(), false));
        }

        let (handle, pid, bin, previous) = {
            let state = self.state();
            (state.handle.clone(), state.pid, state.bin.clone(), state.status)
        };

        let status = match (handle, use_command) {
            (Some(handle), false) => {
                if handle.is_running() {
                    JobStatus::Running
                } else {
                    JobStatus::Stopped
                }
            }
            _ => {
                let pid = pid.ok_or_else(|| {
                    AppError::InvalidState(format!("job {} has no pid", self.name))
                })?;
                self.check_listing(pid, bin.as_deref()).await
            }
        };

        let changed = {
            let mut state = self.state();
            let changed = state.status != status;
            state.status = status;
            if status != JobStatus::Running {
                state.process_running = false;
            }
            changed
        };

        debug!(job = %self.name, previous = %previous, status = %status, "Job status checked");
        Ok((status, changed))
    }

    async fn check_listing(&self, pid: u32, bin: Option<&str>) -> JobStatus {
        let timeout = self.deps.config.status_check_timeout();
        match tokio::time::timeout(timeout, self.deps.probe.inspect(pid)).await {
            Ok(Ok(listing)) if listing.running => {
                if let Some(bin) = bin {
                    let expected = binary_name(bin);
                    if !listing.output.contains(expected) {
                        warn!(
                            job = %self.name,
                            pid = pid,
                            expected = %expected,
                            "PID is running but binary name does not match"
                        );
                    }
                }
                JobStatus::Running
            }
            Ok(Ok(_)) => JobStatus::Stopped,
            Ok(Err(e)) => {
                warn!(job = %self.name, pid = pid, error = %e, "Process listing failed");
                JobStatus::Stopped
            }
            Err(_) => {
                warn!(
                    job = %self.name,
                    pid = pid,
                    timeout_ms = timeout.as_millis() as u64,
                    "Process listing timed out"
                );
                JobStatus::Stopped
            }
        }
    }

    /// Current status; with `use_command` (or no handle) asks the OS.
    /// Broadcasts when the status changed.
    ///
    /// # Errors
    /// - AppError::InvalidState if there is neither a handle nor a pid
    pub async fn get_status(self: &Arc<Self>, use_command: bool) -> Result<JobStatus> {
        let (status, changed) = self.poll_status(use_command).await?;
        if changed {
            self.broadcast_update(false);
        }
        Ok(status)
    }

    /// Kill the process. Tries the attached handle first, then the OS.
    /// Returns whether the job is confirmed stopped.
    pub async fn kill(self: &Arc<Self>, signal: Signal) -> Result<bool> {
        let (handle, pid) = {
            let state = self.state();
            (state.handle.clone(), state.pid)
        };

        if let Some(handle) = handle {
            match handle.kill(signal).await {
                Ok(()) => {
                    info!(job = %self.name, signal = %signal, "Killed job through process handle");
                    self.state().status = JobStatus::Stopped;
                    self.broadcast_update(false);
                    return Ok(true);
                }
                Err(e) => {
                    warn!(job = %self.name, error = %e, "Handle kill failed, falling back to OS kill");
                }
            }
        }

        let Some(pid) = pid else {
            warn!(job = %self.name, "Kill requested for job without pid");
            self.clear().await;
            return Ok(false);
        };

        if let Err(e) = self.deps.probe.kill(pid, signal).await {
            warn!(job = %self.name, pid = pid, error = %e, "OS kill failed");
        }

        let (status, _) = self.poll_status(true).await?;
        self.clear().await;
        info!(job = %self.name, pid = pid, status = %status, "Kill finished");
        Ok(status == JobStatus::Stopped)
    }

    /// Monotonic progress update with a debounced broadcast
    pub fn set_progress(self: &Arc<Self>, progress: f64) {
        let progress = progress.clamp(0.0, 1.0);
        {
            let mut state = self.state();
            if progress <= state.progress {
                return;
            }
            state.progress = progress;

            if progress - state.last_logged_progress > PROGRESS_LOG_STEP {
                info!(
                    job = %self.name,
                    progress = format!("{:.1}%", progress * 100.0),
                    "Job progress"
                );
                state.last_logged_progress = progress;
            }
        }
        self.broadcast_update(false);
    }

    /// Publish the current state, now or through the debounce timer.
    /// The debounced path re-polls live status first.
    pub fn broadcast_update(self: &Arc<Self>, immediate: bool) {
        if immediate {
            self.debouncer().cancel();
            self.publish_update();
            return;
        }

        let weak = Arc::downgrade(self);
        let task = async move {
            let Some(job) = weak.upgrade() else {
                return;
            };
            let pollable = {
                let state = job.state();
                state.handle.is_some() || state.pid.is_some()
            };
            if pollable {
                if let Err(e) = job.poll_status(false).await {
                    debug!(job = %job.name, error = %e, "Status poll before broadcast failed");
                }
            }
            job.publish_update();
        };

        let dispatch = self.debouncer().schedule(task);
        if dispatch == Dispatch::Immediate {
            debug!(job = %self.name, "Coalesce limit reached, broadcasting immediately");
            self.publish_update();
        }
    }

    fn publish_update(&self) {
        let snapshot = self.snapshot();
        let progress_changed = {
            let mut state = self.state();
            let changed = state.progress > state.last_published_progress;
            state.last_published_progress = state.progress;
            changed
        };

        if progress_changed {
            self.deps.bus.publish(Notification::JobProgress {
                job: self.name.clone(),
                progress: snapshot.progress,
            });
        }

        if self.is_registered() {
            self.deps.bus.publish(Notification::JobUpdate(snapshot));
        } else {
            self.deps.bus.publish(Notification::JobClear(snapshot));
        }
    }

    /// Persist the job and add it to the registry. Dummy jobs are only
    /// announced and registered, never written.
    pub async fn save(self: &Arc<Self>) -> Result<bool> {
        self.deps.bus.publish(Notification::JobSave(self.snapshot()));

        if !self.dummy {
            self.deps.store.save(&self.record()).await?;
        }

        if let Some(table) = self.table.upgrade() {
            table
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(self.name.clone(), self.clone());
        }

        debug!(job = %self.name, dummy = self.dummy, "Job saved");
        Ok(true)
    }

    /// Remove the persisted record and the registry entry.
    /// Returns whether anything was removed; calling twice is harmless.
    pub async fn clear(&self) -> bool {
        self.debouncer().cancel();

        let mut removed = false;
        if !self.dummy && self.deps.store.exists(&self.name).await {
            match self.deps.store.remove(&self.name).await {
                Ok(existed) => removed |= existed,
                Err(e) => warn!(job = %self.name, error = %e, "Failed to remove job record"),
            }
        }

        if let Some(table) = self.table.upgrade() {
            let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
            let is_self = table
                .get(&self.name)
                .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), self));
            if is_self {
                table.remove(&self.name);
                removed = true;
            }
        }

        if removed {
            info!(job = %self.name, "Job cleared");
            self.deps.bus.publish(Notification::JobClear(self.snapshot()));
        }
        removed
    }
}

/// Last path component of a binary path, without extension
fn binary_name(bin: &str) -> &str {
    let base = bin.rsplit(['/', '\\']).next().unwrap_or(bin);
    base.strip_suffix(".exe").unwrap_or(base)
}
