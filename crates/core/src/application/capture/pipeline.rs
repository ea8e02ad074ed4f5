// Capture Pipeline
// pre-flight -> recording -> capture (retried) -> convert -> finalize -> cleanup
//
// One run per live session. Steps of a run are strictly sequential; runs for
// different channels are independent tasks.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::application::capture::naming::{self, TemplateVars};
use crate::application::capture::provider::provider_for;
use crate::application::capture::remux::{remux_args, RemuxProgress};
use crate::application::capture::sidecar;
use crate::application::capture::ticker::{CaptureSignal, CaptureTicker};
use crate::application::config::CaptureConfig;
use crate::application::constants::*;
use crate::application::events::{AlertLevel, EventBus, Notification};
use crate::application::eviction::EvictionService;
use crate::application::job::{Job, JobRegistry};
use crate::domain::chapter::{calculate_chapters, remove_short_chapters};
use crate::domain::{Channel, JobStatus, LiveEvent, Recording};
use crate::error::{AppError, Result};
use crate::port::{
    ChannelRegistry, IdProvider, MediaFiles, MediaProbe, MetadataClient, OutputLine,
    ProcessLauncher, ProcessSpec, RecordingStore, Signal, TimeProvider,
};

/// Collaborators of the pipeline
pub struct CaptureDeps {
    pub jobs: Arc<JobRegistry>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub recordings: Arc<dyn RecordingStore>,
    pub channels: Arc<dyn ChannelRegistry>,
    pub files: Arc<dyn MediaFiles>,
    pub probe: Arc<dyn MediaProbe>,
    pub metadata: Arc<dyn MetadataClient>,
    pub eviction: Arc<EvictionService>,
    pub time: Arc<dyn TimeProvider>,
    pub ids: Arc<dyn IdProvider>,
}

/// How a trigger ended when it did not raise
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Finalized { recording: String },
    ConvertFailed { recording: String },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CaptureDisabled,
    AlreadyRecorded,
    KeywordMismatch,
    FallbackDisabled,
    NotLive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureMode {
    Primary,
    Fallback,
}

impl CaptureMode {
    fn job_name(self, login: &str, capture_id: &str) -> String {
        match self {
            CaptureMode::Primary => format!("capture_{}_{}", login, capture_id),
            CaptureMode::Fallback => format!("fbcapture_{}_{}", login, capture_id),
        }
    }
}

/// A recording being worked on, shared with `update`
#[derive(Clone)]
struct ActiveSession {
    login: String,
    mode: CaptureMode,
    recording: Arc<Mutex<Recording>>,
}

impl ActiveSession {
    fn with<R>(&self, f: impl FnOnce(&mut Recording) -> R) -> R {
        let mut recording = self.recording.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut recording)
    }

    fn snapshot(&self) -> Recording {
        self.with(|r| r.clone())
    }
}

/// Capture job name -> session. `None` while the run is still in pre-flight.
type SessionTable = Mutex<HashMap<String, Option<ActiveSession>>>;

/// Reservation of a capture job name; released on drop
struct SessionClaim {
    name: String,
    sessions: Arc<SessionTable>,
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
    }
}

#[derive(Default)]
struct AttemptFlags {
    killed: bool,
    file_exists: bool,
    read_timeout: bool,
}

#[derive(Clone)]
pub struct CapturePipeline {
    deps: Arc<CaptureDeps>,
    config: Arc<CaptureConfig>,
    sessions: Arc<SessionTable>,
}

impl CapturePipeline {
    pub fn new(deps: CaptureDeps, config: CaptureConfig) -> Self {
        Self {
            deps: Arc::new(deps),
            config: Arc::new(config),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn bus(&self) -> &EventBus {
        self.deps.jobs.bus()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Option<ActiveSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_sessions(&self, login: &str) -> Vec<ActiveSession> {
        self.lock_sessions()
            .values()
            .flatten()
            .filter(|s| s.login == login)
            .cloned()
            .collect()
    }

    /// True while any session of the channel is in the capture phase
    pub fn is_capturing(&self, login: &str) -> bool {
        self.active_sessions(login)
            .iter()
            .any(|s| s.with(|r| r.is_capturing()))
    }

    /// Recordings currently owned by a pipeline run
    pub fn active_recordings(&self) -> Vec<Recording> {
        self.lock_sessions()
            .values()
            .flatten()
            .map(|s| s.snapshot())
            .collect()
    }

    /// True while a primary run for this upstream session is in progress
    pub fn has_session(&self, login: &str, capture_id: &str) -> bool {
        self.lock_sessions()
            .contains_key(&CaptureMode::Primary.job_name(login, capture_id))
    }

    /// "Channel went live". Runs the whole pipeline for the session.
    ///
    /// # Errors
    /// - AppError::NotFound for an unknown channel
    /// - AppError::Conflict if this session is already being captured
    /// - AppError::Capture once every capture attempt failed
    pub async fn trigger(&self, login: &str, event: LiveEvent) -> Result<TriggerOutcome> {
        let channel = self.channel(login).await?;
        self.run(channel, event, CaptureMode::Primary).await
    }

    /// Restart capture for a channel that is live without an active capture
    pub async fn fallback_capture(&self, login: &str) -> Result<TriggerOutcome> {
        if !self.config.fallback_capture {
            info!(channel = %login, "Fallback capture disabled");
            return Ok(TriggerOutcome::Skipped(SkipReason::FallbackDisabled));
        }
        self.run_fallback(login).await
    }

    async fn run_fallback(&self, login: &str) -> Result<TriggerOutcome> {
        let channel = self.channel(login).await?;

        let live = match self.deps.metadata.is_live(&channel).await {
            Ok(live) => live,
            Err(e) => {
                warn!(channel = %login, error = %e, "Live check failed");
                false
            }
        };
        if !live {
            info!(channel = %login, "Channel is not live, no fallback capture");
            return Ok(TriggerOutcome::Skipped(SkipReason::NotLive));
        }

        let now = self.deps.time.now();
        let event = LiveEvent {
            capture_id: now.timestamp().to_string(),
            started_at: now,
            title: String::new(),
            game_id: None,
            game_name: None,
            is_favourite_game: false,
        };
        warn!(channel = %login, capture_id = %event.capture_id, "Starting fallback capture");
        self.run(channel, event, CaptureMode::Fallback).await
    }

    /// Detached fallback run. A 24h stream falls back even when fallback
    /// capture is disabled.
    fn fallback_task(&self, login: String, long_stream: bool) -> BoxFuture<'static, ()> {
        let pipeline = self.clone();
        Box::pin(async move {
            let outcome = if long_stream {
                pipeline.run_fallback(&login).await
            } else {
                pipeline.fallback_capture(&login).await
            };
            match outcome {
                Ok(outcome) => info!(channel = %login, outcome = ?outcome, "Fallback capture ended"),
                Err(e) => error!(channel = %login, error = %e, "Fallback capture failed"),
            }
        })
    }

    /// "Channel updated": new chapter on every active session of the channel
    pub async fn update(&self, login: &str, event: &LiveEvent) -> Result<bool> {
        let channel = self.channel(login).await?;
        if !provider_for(channel.provider).has_chapter_events() {
            debug!(channel = %login, "Provider has no chapter events");
            return Ok(false);
        }

        let sessions = self.active_sessions(login);
        if sessions.is_empty() {
            debug!(channel = %login, "Channel update without an active session");
            return Ok(false);
        }

        let chapter = event.to_chapter(self.deps.time.now());
        for session in &sessions {
            session.with(|r| r.chapters.push(chapter.clone()));
            self.save(session).await?;
        }
        info!(channel = %login, title = %chapter.title, game = ?chapter.game_name, "Chapter added");
        Ok(true)
    }

    /// "Channel went offline"
    pub async fn end(&self, login: &str) -> Result<()> {
        let channel = self.channel(login).await?;
        info!(channel = %login, "Channel went offline");

        self.bus().publish(Notification::ChannelOffline {
            channel: login.to_string(),
        });
        self.bus().alert(
            AlertLevel::Info,
            "Channel offline",
            format!("{} has gone offline", channel.display()),
        );

        if !self.is_capturing(login) {
            warn!(channel = %login, "Channel went offline but was not capturing");
        }

        self.deps
            .channels
            .mark_offline(login, self.deps.time.now())
            .await
    }

    async fn channel(&self, login: &str) -> Result<Channel> {
        self.deps
            .channels
            .channel(login)
            .await
            .ok_or_else(|| AppError::NotFound(format!("channel {}", login)))
    }

    fn claim(&self, job_name: &str) -> Option<SessionClaim> {
        let mut sessions = self.lock_sessions();
        if sessions.contains_key(job_name) {
            return None;
        }
        sessions.insert(job_name.to_string(), None);
        Some(SessionClaim {
            name: job_name.to_string(),
            sessions: self.sessions.clone(),
        })
    }

    async fn run(&self, channel: Channel, event: LiveEvent, mode: CaptureMode) -> Result<TriggerOutcome> {
        let login = channel.login.clone();
        let job_name = mode.job_name(&login, &event.capture_id);

        if self.deps.jobs.find_running(&job_name).await.is_some() {
            error!(channel = %login, job = %job_name, "Capture job already running, trigger delivered twice?");
            if mode == CaptureMode::Primary {
                tokio::spawn(self.fallback_task(login.clone(), false));
            }
            return Err(AppError::Conflict(format!("capture job {} is already running", job_name)));
        }
        let Some(claim) = self.claim(&job_name) else {
            error!(channel = %login, job = %job_name, "Session already in progress");
            return Err(AppError::Conflict(format!("session {} is already in progress", job_name)));
        };

        if mode == CaptureMode::Primary {
            if channel.no_capture {
                info!(channel = %login, "Capture disabled for channel");
                return Ok(TriggerOutcome::Skipped(SkipReason::CaptureDisabled));
            }
            if !channel.title_matches(&event.title) {
                info!(channel = %login, title = %event.title, "Title does not match channel keywords");
                return Ok(TriggerOutcome::Skipped(SkipReason::KeywordMismatch));
            }
        }

        if self
            .deps
            .recordings
            .find_by_capture_id(&login, &event.capture_id)
            .await?
            .is_some()
        {
            info!(channel = %login, capture_id = %event.capture_id, "Session already recorded");
            return Ok(self.skip_recorded(&login, mode));
        }

        let Some(recording) = self.create_recording(&channel, &event, mode).await? else {
            return Ok(self.skip_recorded(&login, mode));
        };

        let session = ActiveSession {
            login: login.clone(),
            mode,
            recording: Arc::new(Mutex::new(recording)),
        };
        self.lock_sessions()
            .insert(claim.name.clone(), Some(session.clone()));

        self.bus().publish(Notification::StartDownload {
            channel: login,
            capture_id: event.capture_id.clone(),
        });

        self.process(&channel, &session, mode, &job_name).await
    }

    /// Primary runs hand the channel over to fallback capture
    fn skip_recorded(&self, login: &str, mode: CaptureMode) -> TriggerOutcome {
        if mode == CaptureMode::Primary {
            tokio::spawn(self.fallback_task(login.to_string(), false));
        }
        TriggerOutcome::Skipped(SkipReason::AlreadyRecorded)
    }

    async fn create_recording(
        &self,
        channel: &Channel,
        event: &LiveEvent,
        mode: CaptureMode,
    ) -> Result<Option<Recording>> {
        let login = &channel.login;
        let now = self.deps.time.now();

        let numbers = self
            .deps
            .channels
            .next_stream_numbers(login, event.started_at)
            .await?;
        let vars = TemplateVars::for_session(channel, event, Some(&numbers));

        let (folder, basename) = match mode {
            CaptureMode::Primary => (
                naming::folder(&self.config.storage_dir, login, &self.config.vod_folder, &vars),
                naming::basename(&self.config.filename_vod, &vars),
            ),
            CaptureMode::Fallback => (
                self.config.storage_dir.join(login).join(FALLBACK_FOLDER),
                format!(
                    "{}_{}",
                    event.capture_id,
                    event.started_at.format(FILE_TIMESTAMP_FORMAT)
                ),
            ),
        };

        if self.deps.recordings.basename_exists(login, &basename).await? {
            info!(channel = %login, basename = %basename, "Recording already exists");
            return Ok(None);
        }

        let mut recording = Recording::new(
            self.deps.ids.generate_id(),
            login.as_str(),
            event.capture_id.as_str(),
            folder.clone(),
            basename.as_str(),
            now,
        )?;
        recording.started_at = Some(event.started_at);
        recording.stream_numbers = Some(numbers);
        recording.is_favourite_game = event.is_favourite_game;
        if !event.title.is_empty() {
            recording.chapters.push(event.to_chapter(event.started_at));
        }
        recording.capture_filename = Some(self.capture_path(channel, event, &folder, &basename, now));
        recording.converted_filename = Some(recording.sidecar_path(self.container_for(channel)));
        recording.begin_capture()?;

        self.deps.files.create_dir_all(&folder).await?;
        if self.config.use_cache {
            self.deps.files.create_dir_all(&self.config.cache_dir).await?;
        }
        self.deps.recordings.save(&recording).await?;

        info!(
            channel = %login,
            recording = %recording.uuid,
            basename = %basename,
            folder = %folder.display(),
            "Recording created"
        );
        Ok(Some(recording))
    }

    fn capture_path(
        &self,
        channel: &Channel,
        event: &LiveEvent,
        folder: &Path,
        basename: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> PathBuf {
        if self.config.use_cache {
            self.config.cache_dir.join(format!(
                "{}_{}_{}.ts",
                channel.login,
                event.capture_id,
                now.format(FILE_TIMESTAMP_FORMAT)
            ))
        } else {
            folder.join(format!("{}.ts", basename))
        }
    }

    fn container_for(&self, channel: &Channel) -> &str {
        if channel.quality.first().is_some_and(|q| q == "audio_only") {
            AUDIO_ONLY_CONTAINER
        } else {
            &self.config.vod_container
        }
    }

    /// Capture tool arguments for one attempt
    fn capture_args(&self, channel: &Channel, capture_file: &Path) -> Vec<String> {
        let provider = provider_for(channel.provider);
        let hls_timeout = self.config.hls_timeout.to_string();

        let mut args = vec![
            "--hls-live-edge".to_string(),
            HLS_LIVE_EDGE.to_string(),
            "--hls-timeout".to_string(),
            hls_timeout.clone(),
            "--hls-segment-timeout".to_string(),
            hls_timeout,
            "--hls-segment-threads".to_string(),
            HLS_SEGMENT_THREADS.to_string(),
            "--ffmpeg-fout".to_string(),
            "mpegts".to_string(),
        ];
        args.extend(provider.capture_args(&self.config));
        args.extend([
            "--retry-streams".to_string(),
            CAPTURE_RETRY_STREAMS.to_string(),
            "--retry-max".to_string(),
            CAPTURE_RETRY_MAX.to_string(),
            "--loglevel".to_string(),
            self.config.streamlink_loglevel.clone(),
            "-o".to_string(),
            capture_file.display().to_string(),
            "--url".to_string(),
            provider.stream_url(channel),
            "--default-stream".to_string(),
            if channel.quality.is_empty() {
                "best".to_string()
            } else {
                channel.quality.join(",")
            },
        ]);
        args
    }

    async fn save(&self, session: &ActiveSession) -> Result<()> {
        let snapshot = session.snapshot();
        self.deps.recordings.save(&snapshot).await
    }

    async fn process(
        &self,
        channel: &Channel,
        session: &ActiveSession,
        mode: CaptureMode,
        job_name: &str,
    ) -> Result<TriggerOutcome> {
        let login = channel.login.as_str();
        let (uuid, basename, capture_file) =
            session.with(|r| (r.uuid.clone(), r.basename.clone(), r.capture_filename.clone()));
        let capture_file = capture_file
            .ok_or_else(|| AppError::InvalidState(format!("recording {} has no capture file", uuid)))?;

        let captured = match self
            .capture_with_retries(channel, session, job_name, &capture_file)
            .await
        {
            Ok(captured) => captured,
            Err(e) => {
                error!(channel = %login, recording = %uuid, error = %e, "Capture could not be started");
                if let Err(fail_err) = session.with(|r| r.fail()) {
                    warn!(recording = %uuid, error = %fail_err, "Could not mark recording failed");
                }
                if let Err(save_err) = self.save(session).await {
                    warn!(recording = %uuid, error = %save_err, "Could not save failed recording");
                }
                return Err(e);
            }
        };

        if !captured {
            match self.deps.recordings.mark_broken(&session.snapshot()).await {
                Ok(path) => error!(
                    channel = %login,
                    recording = %uuid,
                    metadata = %path.display(),
                    "Giving up on capture, metadata marked broken"
                ),
                Err(e) => error!(channel = %login, recording = %uuid, error = %e, "Failed to mark recording broken"),
            }
            self.bus().alert(
                AlertLevel::Error,
                "Capture failed",
                format!("{}: too many capture attempts for {}", channel.display(), basename),
            );
            return Err(AppError::Capture(format!("Too many tries for {}", basename)));
        }

        self.after_capture(channel, session, mode).await?;

        if self.config.no_vod_convert {
            let size = self.deps.files.size(&capture_file).await.unwrap_or(0);
            session.with(|r| r.add_segment(capture_file.clone(), size));
            info!(recording = %uuid, "Conversion disabled, keeping capture file");
        } else if !self.convert(channel, session, &capture_file).await? {
            session.with(|r| r.fail())?;
            self.save(session).await?;
            error!(channel = %login, recording = %uuid, "Conversion failed, recording marked failed");
            return Ok(TriggerOutcome::ConvertFailed { recording: uuid });
        }

        self.finalize(channel, session).await?;

        match self.deps.eviction.cleanup(login, Some(&uuid)).await {
            Ok(deleted) => debug!(channel = %login, deleted = deleted, "Post-capture cleanup done"),
            Err(e) => error!(channel = %login, error = %e, "Post-capture cleanup failed"),
        }

        self.bus().publish(Notification::EndDownload {
            channel: login.to_string(),
            recording: uuid.clone(),
        });
        self.save(session).await?;

        info!(channel = %login, recording = %uuid, basename = %basename, "Recording finished");
        Ok(TriggerOutcome::Finalized { recording: uuid })
    }

    /// Bounded capture loop: first attempt plus `download_retries`.
    /// Returns false when every attempt produced no usable file.
    async fn capture_with_retries(
        &self,
        channel: &Channel,
        session: &ActiveSession,
        job_name: &str,
        capture_file: &Path,
    ) -> Result<bool> {
        let retries = self.config.download_retries;
        let uuid = session.with(|r| r.uuid.clone());

        for attempt in 0..=retries {
            if attempt > 0 {
                warn!(
                    channel = %channel.login,
                    recording = %uuid,
                    attempt = attempt,
                    max = retries,
                    "Capture failed, retrying"
                );
                settle(self.config.timings.retry_backoff()).await;
            }

            self.bus().publish(Notification::StartCapture {
                channel: channel.login.clone(),
                recording: uuid.clone(),
                attempt,
            });

            let captured = self
                .capture_once(channel, session, job_name, capture_file)
                .await?;

            self.bus().publish(Notification::EndCapture {
                channel: channel.login.clone(),
                recording: uuid.clone(),
                success: captured,
            });

            if captured {
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn capture_once(
        &self,
        channel: &Channel,
        session: &ActiveSession,
        job_name: &str,
        capture_file: &Path,
    ) -> Result<bool> {
        let (basename, capture_id) = session.with(|r| (r.basename.clone(), r.capture_id.clone()));

        let job = self.deps.jobs.create(job_name).await;
        job.insert_metadata("login", channel.login.as_str());
        job.insert_metadata("basename", basename.as_str());
        job.insert_metadata("capture_filename", capture_file.display().to_string());
        job.insert_metadata("stream_id", capture_id.as_str());

        let spec = ProcessSpec::new(
            self.config.bin.streamlink.as_str(),
            self.capture_args(channel, capture_file),
        );
        info!(channel = %channel.login, job = %job_name, file = %capture_file.display(), "Starting capture");

        let output = job.spawn(self.deps.launcher.as_ref(), &spec).await?;

        let now = self.deps.time.now();
        session.with(|r| {
            if r.capture_started_at.is_none() {
                r.capture_started_at = Some(now);
            }
        });

        let mut ticker = CaptureTicker::new(
            basename.as_str(),
            channel.quality.clone(),
            self.config.max_missing_chunks,
        );
        let (status, flags) = self
            .supervise_capture(&job, output, session, &mut ticker, capture_file)
            .await;
        job.clear().await;

        info!(
            job = %job_name,
            status = %status,
            missing_chunks = ticker.missing_chunks(),
            "Capture process ended"
        );

        if flags.file_exists {
            self.move_aside(capture_file).await;
            return Ok(false);
        }

        match self.deps.files.size(capture_file).await {
            Some(size) if size > 0 => {
                info!(job = %job_name, size = size, "Capture file validated");
                Ok(true)
            }
            Some(_) => {
                error!(job = %job_name, file = %capture_file.display(), "Capture file is empty");
                Ok(false)
            }
            None => {
                error!(job = %job_name, file = %capture_file.display(), "Capture file missing");
                Ok(false)
            }
        }
    }

    /// Follow one capture process until it exits, reacting to its output
    /// and sampling the file size
    async fn supervise_capture(
        &self,
        job: &Arc<Job>,
        mut output: mpsc::Receiver<OutputLine>,
        session: &ActiveSession,
        ticker: &mut CaptureTicker,
        capture_file: &Path,
    ) -> (JobStatus, AttemptFlags) {
        let period = self.config.timings.keepalive_interval();
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        let mut last_size: u64 = 0;
        let mut flags = AttemptFlags::default();
        let mut output_open = true;

        let exit = job.wait();
        tokio::pin!(exit);

        let status = loop {
            tokio::select! {
                status = &mut exit => break status,
                line = output.recv(), if output_open => match line {
                    Some(line) => self.react(job, session, ticker, &line.line, &mut flags).await,
                    None => output_open = false,
                },
                _ = keepalive.tick() => {
                    last_size = self.keepalive(job, capture_file, last_size, period).await;
                }
            }
        };

        if output_open {
            for line in drain(&mut output).await {
                self.react(job, session, ticker, &line.line, &mut flags).await;
            }
        }

        (status, flags)
    }

    async fn react(
        &self,
        job: &Arc<Job>,
        session: &ActiveSession,
        ticker: &mut CaptureTicker,
        line: &str,
        flags: &mut AttemptFlags,
    ) {
        for signal in ticker.scan(line) {
            match signal {
                CaptureSignal::Resolution(resolution) => {
                    session.with(|r| r.stream_resolution = Some(resolution));
                }
                CaptureSignal::OutputStarted => {
                    let now = self.deps.time.now();
                    session.with(|r| {
                        if r.capture_output_started_at.is_none() {
                            r.capture_output_started_at = Some(now);
                        }
                    });
                }
                CaptureSignal::MissingChunk { give_up: true, .. } if !flags.killed => {
                    flags.killed = true;
                    match job.kill(Signal::Term).await {
                        Ok(stopped) => warn!(job = %job.name(), stopped = stopped, "Capture killed after missing chunks"),
                        Err(e) => error!(job = %job.name(), error = %e, "Failed to kill capture"),
                    }
                }
                CaptureSignal::FileExists => flags.file_exists = true,
                CaptureSignal::ReadTimeout if !flags.read_timeout => {
                    flags.read_timeout = true;
                    if session.mode == CaptureMode::Primary {
                        warn!(channel = %session.login, job = %job.name(), "Capture read timeout, trying fallback capture");
                        tokio::spawn(self.fallback_task(session.login.clone(), false));
                    }
                }
                _ => {}
            }
        }
    }

    /// Sample the capture file; returns the size to compare against next time
    async fn keepalive(&self, job: &Arc<Job>, capture_file: &Path, last_size: u64, period: Duration) -> u64 {
        match self.deps.files.size(capture_file).await {
            Some(size) => {
                let bitrate = size.saturating_sub(last_size) / period.as_secs().max(1);
                job.insert_metadata("capture_size", size);
                job.insert_metadata("bitrate", bitrate);
                job.broadcast_update(false);
                debug!(job = %job.name(), size = size, bitrate = bitrate, "Capture keepalive");
                size
            }
            None => {
                warn!(job = %job.name(), file = %capture_file.display(), "Capture file missing at keepalive");
                last_size
            }
        }
    }

    async fn move_aside(&self, capture_file: &Path) {
        let mut aside = capture_file.as_os_str().to_owned();
        aside.push(format!(".{}.old", self.deps.time.now().timestamp()));
        let aside = PathBuf::from(aside);

        match self.deps.files.rename(capture_file, &aside).await {
            Ok(()) => warn!(from = %capture_file.display(), to = %aside.display(), "Moved existing capture file aside"),
            Err(e) => error!(file = %capture_file.display(), error = %e, "Failed to move existing capture file"),
        }
    }

    async fn after_capture(&self, channel: &Channel, session: &ActiveSession, mode: CaptureMode) -> Result<()> {
        let now = self.deps.time.now();
        let min_chapter = self.config.min_chapter_duration;

        let (duration, long) = session.with(|r| {
            r.ended_at = Some(now);
            let duration = r.duration_secs();
            r.long_stream = duration.is_some_and(|d| d > LONG_STREAM_THRESHOLD_SECS);

            let (start, end) = (r.started_at, r.ended_at);
            calculate_chapters(&mut r.chapters, start, end);
            r.chapters = remove_short_chapters(std::mem::take(&mut r.chapters), min_chapter);
            (duration, r.long_stream)
        });
        self.save(session).await?;

        if long {
            warn!(
                channel = %channel.login,
                duration_secs = ?duration,
                "Capture is close to 24 hours, upstream may have cut the stream"
            );
            self.bus().alert(
                AlertLevel::Warning,
                "Long stream",
                format!("{} has been live for about 24 hours", channel.display()),
            );
            if mode == CaptureMode::Primary {
                tokio::spawn(self.fallback_task(channel.login.clone(), true));
            }
        }

        settle(self.config.timings.capture_settle()).await;
        Ok(())
    }

    /// Remux the capture into the final container. Returns false on failure.
    async fn convert(&self, channel: &Channel, session: &ActiveSession, capture_file: &Path) -> Result<bool> {
        session.with(|r| r.begin_convert())?;
        self.save(session).await?;

        let recording = session.snapshot();
        let converted = recording.converted_filename.clone().ok_or_else(|| {
            AppError::InvalidState(format!("recording {} has no output file", recording.uuid))
        })?;

        self.bus().publish(Notification::StartConvert {
            channel: channel.login.clone(),
            recording: recording.uuid.clone(),
        });

        let chapters_file = if self.config.create_video_chapters && !recording.chapters.is_empty() {
            let path = recording.sidecar_path("ffmetadata");
            let text = sidecar::ffmetadata(
                recording.chapters.first().map(|c| c.title.as_str()),
                Some(channel.display()),
                &recording.chapters,
            );
            match self.deps.files.write_text(&path, &text).await {
                Ok(()) => Some(path),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Could not write chapters, converting without them");
                    None
                }
            }
        } else {
            None
        };

        let job_name = format!("remux_{}", recording.basename);
        let job = self.deps.jobs.create(&job_name).await;
        job.insert_metadata("login", channel.login.as_str());
        job.insert_metadata("basename", recording.basename.as_str());
        job.insert_metadata("capture_filename", capture_file.display().to_string());
        job.insert_metadata("converted_filename", converted.display().to_string());

        let spec = ProcessSpec::new(
            self.config.bin.ffmpeg.as_str(),
            remux_args(capture_file, &converted, chapters_file.as_deref()),
        );
        info!(job = %job_name, file = %converted.display(), "Starting conversion");

        let status = match job.spawn(self.deps.launcher.as_ref(), &spec).await {
            Ok(output) => supervise_remux(&job, output).await,
            Err(e) => {
                error!(job = %job_name, error = %e, "Failed to start conversion");
                JobStatus::Error
            }
        };
        job.clear().await;

        settle(self.config.timings.convert_settle()).await;

        let capture_exists = self.deps.files.exists(capture_file).await;
        let converted_size = self.deps.files.size(&converted).await.unwrap_or(0);
        let success = capture_exists && converted_size > 0;

        self.bus().publish(Notification::EndConvert {
            channel: channel.login.clone(),
            recording: recording.uuid.clone(),
            success,
        });

        if !success {
            error!(
                job = %job_name,
                status = %status,
                capture_exists = capture_exists,
                converted_size = converted_size,
                "Conversion produced no usable file"
            );
            return Ok(false);
        }

        if let Err(e) = self.deps.files.remove(capture_file).await {
            warn!(file = %capture_file.display(), error = %e, "Failed to remove capture file");
        }

        let segments = session.with(|r| {
            r.add_segment(converted.clone(), converted_size);
            r.segments.len()
        });
        if segments > 1 {
            warn!(recording = %recording.uuid, segments = segments, "Recording has more than one segment");
            self.bus().alert(
                AlertLevel::Warning,
                "Segment error",
                format!("{} has {} segments", recording.basename, segments),
            );
        }

        info!(job = %job_name, size = converted_size, "Conversion finished");
        Ok(true)
    }

    /// Derived metadata. Every step is isolated; only the final save can fail.
    async fn finalize(&self, channel: &Channel, session: &ActiveSession) -> Result<()> {
        settle(self.config.timings.finalize_settle()).await;

        let media = session.with(|r| r.segments.first().map(|s| s.filename.clone()));
        if let Some(media) = media {
            match self.deps.probe.probe(&media).await {
                Ok(info) => session.with(|r| r.media_info = Some(info)),
                Err(e) => error!(file = %media.display(), error = %e, "Media probe failed"),
            }
        }

        let snapshot = session.snapshot();
        match self.deps.metadata.match_video(channel, &snapshot).await {
            Ok(Some(id)) => {
                info!(recording = %snapshot.uuid, upstream_id = %id, "Matched upstream video");
                session.with(|r| r.upstream_id = Some(id));
            }
            Ok(None) => debug!(recording = %snapshot.uuid, "No upstream video matched"),
            Err(e) => error!(recording = %snapshot.uuid, error = %e, "Upstream match failed"),
        }

        session.with(|r| {
            let (start, end) = (r.started_at, r.ended_at);
            calculate_chapters(&mut r.chapters, start, end);
        });

        let recording = session.snapshot();
        let folder = recording.folder().to_path_buf();

        self.write_sidecar(
            folder.join(format!("{}-llc-edl.csv", recording.basename)),
            sidecar::losslesscut_csv(&recording.chapters),
            "LosslessCut EDL",
        )
        .await;
        self.write_sidecar(
            recording.sidecar_path("ffmetadata"),
            sidecar::ffmetadata(
                recording.chapters.first().map(|c| c.title.as_str()),
                Some(channel.display()),
                &recording.chapters,
            ),
            "ffmpeg chapters",
        )
        .await;
        self.write_sidecar(
            recording.sidecar_path("chapters.vtt"),
            sidecar::vtt(&recording.chapters),
            "WebVTT chapters",
        )
        .await;
        self.write_sidecar(
            recording.sidecar_path("nfo"),
            sidecar::kodi_nfo(&recording, channel),
            "Kodi NFO",
        )
        .await;

        session.with(|r| r.finalize())?;
        self.save(session).await?;
        info!(recording = %recording.uuid, "Recording finalized");
        Ok(())
    }

    async fn write_sidecar(&self, path: PathBuf, contents: String, kind: &str) {
        match self.deps.files.write_text(&path, &contents).await {
            Ok(()) => debug!(file = %path.display(), "Wrote {}", kind),
            Err(e) => error!(file = %path.display(), error = %e, "Failed to write {}", kind),
        }
    }
}

async fn supervise_remux(job: &Arc<Job>, mut output: mpsc::Receiver<OutputLine>) -> JobStatus {
    let mut progress = RemuxProgress::new();
    let mut output_open = true;

    let exit = job.wait();
    tokio::pin!(exit);

    let status = loop {
        tokio::select! {
            status = &mut exit => break status,
            line = output.recv(), if output_open => match line {
                Some(line) => {
                    if let Some(p) = progress.scan(&line.line) {
                        job.set_progress(p);
                    }
                }
                None => output_open = false,
            },
        }
    };

    if output_open {
        for line in drain(&mut output).await {
            if let Some(p) = progress.scan(&line.line) {
                job.set_progress(p);
            }
        }
    }
    status
}

/// Lines still buffered after the process exited
async fn drain(output: &mut mpsc::Receiver<OutputLine>) -> Vec<OutputLine> {
    let mut lines = Vec::new();
    let collect = async {
        while let Some(line) = output.recv().await {
            lines.push(line);
        }
    };
    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, collect).await.is_err() {
        debug!("Process output still open after exit");
    }
    lines
}

async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::{EvictionConfig, JobConfig, PipelineTimings};
    use crate::domain::{MediaInfo, ProviderKind};
    use crate::port::channel_registry::mocks::InMemoryChannelRegistry;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_log::mocks::MemoryJobLog;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::media_files::mocks::InMemoryMediaFiles;
    use crate::port::media_probe::MockMediaProbe;
    use crate::port::metadata_client::MockMetadataClient;
    use crate::port::process::mocks::{FakeProcessProbe, Script, ScriptedLauncher};
    use crate::port::recording_store::mocks::{finalized_recording, InMemoryRecordingStore};
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use crate::port::ExecutionError;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::sync::broadcast;

    const LOGIN: &str = "somestreamer";
    const CAPTURE: &str = "/vods/somestreamer/somestreamer_2024-05-01T20_00_00Z_1001.ts";
    const CONVERTED: &str = "/vods/somestreamer/somestreamer_2024-05-01T20_00_00Z_1001.mp4";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap()
    }

    fn live(capture_id: &str, title: &str) -> LiveEvent {
        LiveEvent {
            capture_id: capture_id.to_string(),
            started_at: t0(),
            title: title.to_string(),
            game_id: None,
            game_name: Some("Just Chatting".to_string()),
            is_favourite_game: false,
        }
    }

    /// `-o <file>` for the capture tool, last argument for ffmpeg
    fn output_path(spec: &ProcessSpec) -> PathBuf {
        match spec.args.iter().position(|a| a == "-o") {
            Some(i) => PathBuf::from(&spec.args[i + 1]),
            None => PathBuf::from(spec.args.last().unwrap()),
        }
    }

    fn writes(files: &InMemoryMediaFiles, size: u64) -> impl Fn(&ProcessSpec) + Send + Sync + 'static {
        let files = files.clone();
        move |spec| files.put(output_path(spec), size)
    }

    fn capture_ok(files: &InMemoryMediaFiles) -> Script {
        Script::exits(
            0,
            vec![
                OutputLine::stderr("[cli][info] Opening stream: 1080p60 (hls)"),
                OutputLine::stderr("[cli][info] Writing output to /vods/x.ts"),
            ],
        )
        .with_effect(writes(files, 1_000))
    }

    fn remux_ok(files: &InMemoryMediaFiles) -> Script {
        Script::exits(
            0,
            vec![
                OutputLine::stderr("  Duration: 01:00:00.00, start: 1.4, bitrate: 6000 kb/s"),
                OutputLine::stderr("frame=1000 size=4096kB time=00:30:00.00"),
            ],
        )
        .with_effect(writes(files, 800))
    }

    fn offline_metadata() -> MockMetadataClient {
        let mut metadata = MockMetadataClient::new();
        metadata.expect_is_live().returning(|_| Ok(false));
        metadata.expect_match_video().returning(|_, _| Ok(None));
        metadata
    }

    fn live_metadata() -> MockMetadataClient {
        let mut metadata = MockMetadataClient::new();
        metadata.expect_is_live().returning(|_| Ok(true));
        metadata.expect_match_video().returning(|_, _| Ok(None));
        metadata
    }

    fn hour_long_probe() -> MockMediaProbe {
        let mut probe = MockMediaProbe::new();
        probe.expect_probe().returning(|_| {
            Ok(MediaInfo {
                duration_secs: 3600.0,
                ..Default::default()
            })
        });
        probe
    }

    struct Setup {
        scripts: Vec<Script>,
        files: InMemoryMediaFiles,
        time: Arc<ManualTimeProvider>,
        config: CaptureConfig,
        channel: Channel,
        existing: Vec<Recording>,
        metadata: MockMetadataClient,
        probe: MockMediaProbe,
        launcher: Option<ScriptedLauncher>,
    }

    struct Fixture {
        pipeline: CapturePipeline,
        jobs: Arc<JobRegistry>,
        launcher: Arc<ScriptedLauncher>,
        recordings: Arc<InMemoryRecordingStore>,
        channels: Arc<InMemoryChannelRegistry>,
        logs: Arc<MemoryJobLog>,
        files: InMemoryMediaFiles,
        time: Arc<ManualTimeProvider>,
        events: broadcast::Receiver<Notification>,
    }

    impl Setup {
        fn new(files: &InMemoryMediaFiles, scripts: Vec<Script>) -> Self {
            Self {
                scripts,
                files: files.clone(),
                time: Arc::new(ManualTimeProvider::new(t0())),
                config: CaptureConfig {
                    storage_dir: PathBuf::from("/vods"),
                    cache_dir: PathBuf::from("/cache"),
                    download_retries: 2,
                    timings: PipelineTimings::immediate(),
                    ..Default::default()
                },
                channel: Channel::new(LOGIN, ProviderKind::Twitch),
                existing: Vec::new(),
                metadata: offline_metadata(),
                probe: hour_long_probe(),
                launcher: None,
            }
        }

        fn build(self) -> Fixture {
            let bus = EventBus::new();
            let events = bus.subscribe();
            let logs = Arc::new(MemoryJobLog::new());
            let jobs = Arc::new(JobRegistry::new(
                Arc::new(InMemoryJobStore::new()),
                Arc::new(FakeProcessProbe::new()),
                logs.clone(),
                bus,
                self.time.clone(),
                JobConfig::default(),
            ));
            let launcher = Arc::new(
                self.launcher
                    .unwrap_or_else(|| ScriptedLauncher::new(self.scripts)),
            );
            let recordings = Arc::new(
                InMemoryRecordingStore::with_recordings(self.existing),
            );
            let channels = Arc::new(InMemoryChannelRegistry::new(vec![self.channel]));
            let eviction = Arc::new(EvictionService::new(
                recordings.clone(),
                channels.clone(),
                EvictionConfig::default(),
            ));

            let pipeline = CapturePipeline::new(
                CaptureDeps {
                    jobs: jobs.clone(),
                    launcher: launcher.clone(),
                    recordings: recordings.clone(),
                    channels: channels.clone(),
                    files: Arc::new(self.files.clone()),
                    probe: Arc::new(self.probe),
                    metadata: Arc::new(self.metadata),
                    eviction,
                    time: self.time.clone(),
                    ids: Arc::new(SequentialIdProvider::default()),
                },
                self.config,
            );

            Fixture {
                pipeline,
                jobs,
                launcher,
                recordings,
                channels,
                logs,
                files: self.files,
                time: self.time,
                events,
            }
        }
    }

    fn actions(rx: &mut broadcast::Receiver<Notification>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n.action());
        }
        out
    }

    /// Recording uuid of the next finished download
    async fn next_end_download(rx: &mut broadcast::Receiver<Notification>) -> String {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Ok(Notification::EndDownload { recording, .. }) => return recording,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("download finished")
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if condition() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_happy_path() {
        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(&files, vec![capture_ok(&files), remux_ok(&files)]);
        setup.channel.max_vods = 1;
        setup.existing = vec![
            finalized_recording("older", LOGIN, t0() - chrono::Duration::days(2), 10),
            finalized_recording("old", LOGIN, t0() - chrono::Duration::days(1), 10),
        ];
        let mut metadata = MockMetadataClient::new();
        metadata
            .expect_match_video()
            .times(1)
            .returning(|_, _| Ok(Some("v42".to_string())));
        setup.metadata = metadata;
        let mut f = setup.build();

        let outcome = f.pipeline.trigger(LOGIN, live("1001", "Speedrun")).await.unwrap();
        assert_eq!(
            outcome,
            TriggerOutcome::Finalized {
                recording: "rec-1".to_string()
            }
        );

        let rec = f.recordings.get("rec-1").unwrap();
        assert!(rec.is_finalized());
        assert_eq!(rec.segments.len(), 1);
        assert_eq!(rec.segments[0].filename, PathBuf::from(CONVERTED));
        assert_eq!(rec.segments[0].size, 800);
        assert_eq!(rec.stream_resolution.as_deref(), Some("1080p60"));
        assert_eq!(rec.upstream_id.as_deref(), Some("v42"));
        assert!(rec.capture_output_started_at.is_some());
        assert_eq!(rec.media_info.as_ref().map(|m| m.duration_secs), Some(3600.0));

        assert!(!f.files.contains(CAPTURE), "capture removed after convert");
        assert!(f.files.contains(CONVERTED));
        let nfo = f.files.text("/vods/somestreamer/somestreamer_2024-05-01T20_00_00Z_1001.nfo").unwrap();
        assert!(nfo.contains("<uniqueid type=\"twitch\">v42</uniqueid>"));
        assert!(f
            .files
            .text("/vods/somestreamer/somestreamer_2024-05-01T20_00_00Z_1001.chapters.vtt")
            .unwrap()
            .starts_with("WEBVTT"));
        assert!(f
            .files
            .contains("/vods/somestreamer/somestreamer_2024-05-01T20_00_00Z_1001-llc-edl.csv"));

        assert_eq!(
            f.recordings.deleted(),
            vec!["older".to_string()],
            "new recording excluded from the budget"
        );
        assert!(f.jobs.is_empty(), "capture and remux jobs cleared");

        let spawned = f.launcher.spawned();
        assert_eq!(spawned[0].bin, "streamlink");
        assert!(spawned[0].args.windows(2).any(|w| w == ["--url", "https://twitch.tv/somestreamer"]));
        assert!(spawned[0].args.windows(2).any(|w| w == ["--default-stream", "best"]));
        assert_eq!(spawned[1].bin, "ffmpeg");
        assert!(spawned[1].args.contains(&"-map_metadata".to_string()));

        let pipeline_events: Vec<&str> = actions(&mut f.events)
            .into_iter()
            .filter(|a| !a.starts_with("job_"))
            .collect();
        assert_eq!(
            pipeline_events,
            vec![
                "start_download",
                "start_capture",
                "end_capture",
                "start_convert",
                "end_convert",
                "end_download"
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_ceiling_marks_broken() {
        let files = InMemoryMediaFiles::new();
        let empty = Script::exits(0, Vec::new()).with_effect(writes(&files, 0));
        let mut f = Setup::new(&files, vec![empty]).build();

        let err = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap_err();

        assert!(matches!(err, AppError::Capture(_)));
        assert_eq!(f.launcher.spawn_count(), 3, "first attempt plus two retries");
        assert_eq!(f.recordings.broken(), vec!["rec-1".to_string()]);
        assert!(f.launcher.spawned().iter().all(|s| s.bin == "streamlink"));

        let attempts = actions(&mut f.events)
            .into_iter()
            .filter(|a| *a == "start_capture")
            .count();
        assert_eq!(attempts, 3);
        assert!(!f.pipeline.is_capturing(LOGIN), "session released");
    }

    #[tokio::test]
    async fn test_retry_ceiling_does_not_fall_back() {
        let files = InMemoryMediaFiles::new();
        let empty = Script::exits(0, Vec::new()).with_effect(writes(&files, 0));
        let mut setup = Setup::new(&files, vec![empty]);
        setup.config.fallback_capture = true;
        setup.metadata = live_metadata();
        let f = setup.build();

        let err = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap_err();
        assert!(matches!(err, AppError::Capture(_)));

        for _ in 0..200 {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.launcher.spawn_count(), 3, "no fallback capture after giving up");
        assert!(f.launcher.spawned().iter().all(|s| !s.args.iter().any(|a| a.contains("saved_vods"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_backoff() {
        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(
            &files,
            vec![Script::exits(0, Vec::new()), capture_ok(&files), remux_ok(&files)],
        );
        setup.config.timings = PipelineTimings::default();
        let f = setup.build();

        let started = Instant::now();
        let outcome = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();

        assert!(matches!(outcome, TriggerOutcome::Finalized { .. }));
        assert!(started.elapsed() >= CAPTURE_RETRY_BACKOFF + CAPTURE_SETTLE_DELAY);
        assert_eq!(f.launcher.spawn_count(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_trigger_is_rejected() {
        let files = InMemoryMediaFiles::new();
        let f = Setup::new(&files, vec![Script::until_killed(Vec::new())]).build();

        let job = f.jobs.create("capture_somestreamer_1001").await;
        job.spawn(&*f.launcher, &ProcessSpec::new("streamlink", Vec::new()))
            .await
            .unwrap();

        let err = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(f.launcher.spawn_count(), 1);

        job.kill(Signal::Term).await.unwrap();
    }

    #[tokio::test]
    async fn test_has_session_while_capturing() {
        let files = InMemoryMediaFiles::new();
        let f = Setup::new(
            &files,
            vec![Script::until_killed(Vec::new()), Script::exits(1, Vec::new())],
        )
        .build();

        let pipeline = f.pipeline.clone();
        let run = tokio::spawn(async move { pipeline.trigger(LOGIN, live("1001", "x")).await });
        while f.jobs.get("capture_somestreamer_1001").is_none() {
            tokio::task::yield_now().await;
        }

        assert!(f.pipeline.has_session(LOGIN, "1001"));
        assert!(!f.pipeline.has_session(LOGIN, "1002"));

        let job = f.jobs.get("capture_somestreamer_1001").unwrap();
        job.kill(Signal::Term).await.unwrap();
        let _ = run.await.unwrap();

        assert!(!f.pipeline.has_session(LOGIN, "1001"));
    }

    #[tokio::test]
    async fn test_already_recorded_session_is_skipped() {
        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(&files, vec![capture_ok(&files)]);
        setup.existing = vec![finalized_recording("1001", LOGIN, t0(), 10)];
        let f = setup.build();

        let outcome = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();

        assert_eq!(outcome, TriggerOutcome::Skipped(SkipReason::AlreadyRecorded));
        assert_eq!(f.launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_already_recorded_live_channel_falls_back() {
        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(&files, vec![capture_ok(&files), remux_ok(&files)]);
        setup.existing = vec![finalized_recording("1001", LOGIN, t0(), 10)];
        setup.config.fallback_capture = true;
        setup.metadata = live_metadata();
        let mut f = setup.build();

        let outcome = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::Skipped(SkipReason::AlreadyRecorded));

        let uuid = next_end_download(&mut f.events).await;
        let rec = f.recordings.get(&uuid).unwrap();
        assert!(rec.is_finalized());
        assert_eq!(rec.folder, PathBuf::from("/vods/somestreamer/saved_vods"));
        assert_eq!(f.launcher.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_running_job_falls_back() {
        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(
            &files,
            vec![Script::until_killed(Vec::new()), capture_ok(&files), remux_ok(&files)],
        );
        setup.config.fallback_capture = true;
        setup.metadata = live_metadata();
        let mut f = setup.build();

        let job = f.jobs.create("capture_somestreamer_1001").await;
        job.spawn(&*f.launcher, &ProcessSpec::new("streamlink", Vec::new()))
            .await
            .unwrap();

        let err = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let uuid = next_end_download(&mut f.events).await;
        let rec = f.recordings.get(&uuid).unwrap();
        assert_eq!(rec.folder, PathBuf::from("/vods/somestreamer/saved_vods"));
        let fallback_job = format!("fbcapture_somestreamer_{}", t0().timestamp());
        assert!(!f.logs.lines(&fallback_job).is_empty());
        assert_eq!(f.launcher.spawn_count(), 3);

        job.kill(Signal::Term).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_timeout_starts_fallback_capture() {
        let files = InMemoryMediaFiles::new();
        let timed_out = Script::exits(
            0,
            vec![
                OutputLine::stderr("[cli][info] Opening stream: 1080p60 (hls)"),
                OutputLine::stderr("[cli][info] Writing output to /vods/x.ts"),
                OutputLine::stderr("error: Read timeout, exiting"),
            ],
        )
        .with_effect(writes(&files, 1_000));
        // Primary and fallback runs interleave; every later spawn just writes its output
        let any_ok = Script::exits(0, Vec::new()).with_effect(writes(&files, 1_000));
        let mut setup = Setup::new(&files, vec![timed_out, any_ok]);
        setup.config.fallback_capture = true;
        setup.metadata = live_metadata();
        let mut f = setup.build();

        let outcome = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Finalized { .. }));

        let mut uuid = next_end_download(&mut f.events).await;
        if uuid == "rec-1" {
            uuid = next_end_download(&mut f.events).await;
        }
        let fallback = f.recordings.get(&uuid).unwrap();
        assert_eq!(fallback.folder, PathBuf::from("/vods/somestreamer/saved_vods"));
        assert!(fallback.is_finalized());
        assert_eq!(f.launcher.spawn_count(), 4, "capture and remux for both runs");
    }

    #[tokio::test]
    async fn test_keyword_mismatch_is_skipped() {
        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(&files, vec![capture_ok(&files)]);
        setup.channel.keywords = vec!["marathon".to_string()];
        let f = setup.build();

        let outcome = f.pipeline.trigger(LOGIN, live("1001", "Just chatting")).await.unwrap();

        assert_eq!(outcome, TriggerOutcome::Skipped(SkipReason::KeywordMismatch));
        assert!(f.recordings.all().is_empty());
        assert_eq!(f.launcher.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let files = InMemoryMediaFiles::new();
        let f = Setup::new(&files, Vec::new()).build();

        let err = f.pipeline.trigger("nobody", live("1", "x")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_convert_failure_marks_failed() {
        let files = InMemoryMediaFiles::new();
        let broken_remux = Script::exits(1, vec![OutputLine::stderr("Invalid data found")]);
        let f = Setup::new(&files, vec![capture_ok(&files), broken_remux]).build();

        let outcome = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();

        assert_eq!(
            outcome,
            TriggerOutcome::ConvertFailed {
                recording: "rec-1".to_string()
            }
        );
        let rec = f.recordings.get("rec-1").unwrap();
        assert!(rec.failed());
        assert!(rec.segments.is_empty());
        assert!(f.files.contains(CAPTURE), "capture kept when convert fails");
        assert!(f.recordings.deleted().is_empty(), "no cleanup after failure");
    }

    #[tokio::test]
    async fn test_no_convert_keeps_capture_as_segment() {
        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(&files, vec![capture_ok(&files)]);
        setup.config.no_vod_convert = true;
        let f = setup.build();

        f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();

        assert_eq!(f.launcher.spawn_count(), 1);
        let rec = f.recordings.get("rec-1").unwrap();
        assert!(rec.is_finalized());
        assert_eq!(rec.segments[0].filename, PathBuf::from(CAPTURE));
        assert_eq!(rec.total_size(), 1_000);
    }

    #[tokio::test]
    async fn test_missing_chunks_kill_capture() {
        let files = InMemoryMediaFiles::new();
        let chunk_404 = || OutputLine::stderr("[stream.hls][error] 404 Client Error: Not Found for url");
        let capture = Script::until_killed(vec![chunk_404(), chunk_404(), chunk_404()])
            .with_effect(writes(&files, 500));
        let mut setup = Setup::new(&files, vec![capture, remux_ok(&files)]);
        setup.config.max_missing_chunks = 2;
        let f = setup.build();

        let outcome = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();

        assert!(matches!(outcome, TriggerOutcome::Finalized { .. }));
        assert_eq!(f.launcher.kill_signals(), vec![Signal::Term], "killed exactly once");
    }

    #[tokio::test]
    async fn test_existing_capture_file_is_moved_aside() {
        let files = InMemoryMediaFiles::new();
        let refuses = Script::exits(
            1,
            vec![OutputLine::stderr("error: File /vods/x.ts already exists, use --force to overwrite it.")],
        )
        .with_effect(writes(&files, 300));
        let f = Setup::new(&files, vec![refuses, capture_ok(&files), remux_ok(&files)]).build();

        let outcome = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();

        assert!(matches!(outcome, TriggerOutcome::Finalized { .. }));
        assert_eq!(f.launcher.spawn_count(), 3);
        let aside = format!("{}.{}.old", CAPTURE, t0().timestamp());
        assert!(f.files.contains(&aside));
    }

    #[tokio::test]
    async fn test_cache_capture_path() {
        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(&files, vec![capture_ok(&files), remux_ok(&files)]);
        setup.config.use_cache = true;
        let f = setup.build();

        f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();

        let spec = &f.launcher.spawned()[0];
        assert_eq!(
            output_path(spec),
            PathBuf::from("/cache/somestreamer_1001_2024-05-01_20-00-00.ts")
        );
        assert!(f.files.has_dir("/cache"));
        assert!(f.files.contains(CONVERTED));
    }

    #[tokio::test]
    async fn test_update_appends_chapter_while_capturing() {
        let files = InMemoryMediaFiles::new();
        let capture = Script::until_killed(Vec::new()).with_effect(writes(&files, 1_000));
        let f = Setup::new(&files, vec![capture, remux_ok(&files)]).build();

        let pipeline = f.pipeline.clone();
        let run = tokio::spawn(async move { pipeline.trigger(LOGIN, live("1001", "Intro")).await });

        let job_name = "capture_somestreamer_1001";
        wait_until(|| f.jobs.has(job_name)).await;
        assert!(f.pipeline.is_capturing(LOGIN));

        f.time.advance_secs(600);
        let mut changed = live("1001", "Main event");
        changed.game_name = Some("Celeste".to_string());
        assert!(f.pipeline.update(LOGIN, &changed).await.unwrap());

        f.time.advance_secs(600);
        f.jobs.get(job_name).unwrap().kill(Signal::Term).await.unwrap();
        run.await.unwrap().unwrap();

        let rec = f.recordings.get("rec-1").unwrap();
        assert_eq!(rec.chapters.len(), 2);
        assert_eq!(rec.chapters[0].duration, Some(600.0));
        assert_eq!(rec.chapters[1].title, "Main event");
        assert_eq!(rec.chapters[1].offset, Some(600.0));
        assert_eq!(rec.chapters[1].duration, Some(600.0));
    }

    #[tokio::test]
    async fn test_update_without_session() {
        let files = InMemoryMediaFiles::new();
        let f = Setup::new(&files, Vec::new()).build();

        assert!(!f.pipeline.update(LOGIN, &live("1001", "x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_end_marks_channel_offline() {
        let files = InMemoryMediaFiles::new();
        let mut f = Setup::new(&files, Vec::new()).build();

        f.pipeline.end(LOGIN).await.unwrap();

        let channel = f.channels.channel(LOGIN).await.unwrap();
        assert_eq!(channel.last_offline_at, Some(t0()));
        assert_eq!(actions(&mut f.events), vec!["channel_offline", "alert"]);
        assert!(matches!(
            f.pipeline.end("nobody").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_long_stream_is_flagged() {
        let files = InMemoryMediaFiles::new();
        let time = Arc::new(ManualTimeProvider::new(t0()));
        let capture = {
            let files = files.clone();
            let time = time.clone();
            Script::exits(0, Vec::new()).with_effect(move |spec| {
                files.put(output_path(spec), 1_000);
                time.advance_secs(86_400);
            })
        };
        let mut setup = Setup::new(&files, vec![capture, remux_ok(&files)]);
        setup.time = time;
        let mut f = setup.build();

        f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();

        assert!(f.recordings.get("rec-1").unwrap().long_stream);
        assert!(actions(&mut f.events).contains(&"alert"));
    }

    #[tokio::test]
    async fn test_finalize_step_failures_are_isolated() {
        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(&files, vec![capture_ok(&files), remux_ok(&files)]);
        let mut probe = MockMediaProbe::new();
        probe
            .expect_probe()
            .returning(|_| Err(AppError::Execution(ExecutionError::SpawnFailed("ffprobe".to_string()))));
        setup.probe = probe;
        let f = setup.build();

        let outcome = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap();

        assert!(matches!(outcome, TriggerOutcome::Finalized { .. }));
        let rec = f.recordings.get("rec-1").unwrap();
        assert!(rec.media_info.is_none());
        assert!(f
            .files
            .contains("/vods/somestreamer/somestreamer_2024-05-01T20_00_00Z_1001.nfo"));
    }

    #[tokio::test]
    async fn test_fallback_capture() {
        let files = InMemoryMediaFiles::new();
        let disabled = Setup::new(&files, Vec::new()).build();
        assert_eq!(
            disabled.pipeline.fallback_capture(LOGIN).await.unwrap(),
            TriggerOutcome::Skipped(SkipReason::FallbackDisabled)
        );

        let mut offline = Setup::new(&files, Vec::new());
        offline.config.fallback_capture = true;
        let offline = offline.build();
        assert_eq!(
            offline.pipeline.fallback_capture(LOGIN).await.unwrap(),
            TriggerOutcome::Skipped(SkipReason::NotLive)
        );

        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(&files, vec![capture_ok(&files), remux_ok(&files)]);
        setup.config.fallback_capture = true;
        let mut metadata = MockMetadataClient::new();
        metadata.expect_is_live().times(1).returning(|_| Ok(true));
        metadata.expect_match_video().returning(|_, _| Ok(None));
        setup.metadata = metadata;
        let f = setup.build();

        let outcome = f.pipeline.fallback_capture(LOGIN).await.unwrap();

        assert!(matches!(outcome, TriggerOutcome::Finalized { .. }));
        let rec = f.recordings.get("rec-1").unwrap();
        assert_eq!(rec.folder, PathBuf::from("/vods/somestreamer/saved_vods"));
        assert_eq!(rec.basename, format!("{}_2024-05-01_20-00-00", t0().timestamp()));
        let job = format!("fbcapture_somestreamer_{}", t0().timestamp());
        assert!(!f.logs.lines(&job).is_empty(), "fallback job logged its command");
    }

    #[tokio::test]
    async fn test_spawn_failure_propagates() {
        let files = InMemoryMediaFiles::new();
        let mut setup = Setup::new(&files, Vec::new());
        setup.launcher = Some(ScriptedLauncher::failing());
        let f = setup.build();

        let err = f.pipeline.trigger(LOGIN, live("1001", "x")).await.unwrap_err();

        assert!(matches!(err, AppError::Execution(_)));
        assert!(f.recordings.get("rec-1").unwrap().failed());
        assert!(!f.pipeline.is_capturing(LOGIN));
    }
}
