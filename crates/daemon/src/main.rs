//! StreamVault - Main Entry Point
//! Composition root: settings, logging, DI wiring, recovery, RPC, cleanup loop

mod settings;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use streamvault_api_rpc::{RpcHandler, RpcServer};
use streamvault_core::application::{
    shutdown_channel, AlertLevel, CaptureDeps, CapturePipeline, CleanupScheduler, EventBus,
    EvictionService, JobRegistry, Notification, RecoveryService, ShutdownToken,
};
use streamvault_core::port::id_provider::UuidProvider;
use streamvault_core::port::metadata_client::OfflineMetadataClient;
use streamvault_core::port::time_provider::SystemTimeProvider;
use streamvault_core::port::ChannelRegistry;
use streamvault_infra_fs::{
    ConfigChannelRegistry, FsJobLogSink, FsJobStore, FsRecordingStore, LocalMediaFiles,
};
use streamvault_infra_system::{
    disk_usage, FfprobeMediaProbe, OsProcessProbe, SubprocessLauncher,
};

use crate::settings::Settings;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;

    // 2. Initialize logging
    let _telemetry = telemetry::init_tracing(settings.logging.directory.as_deref());

    info!("StreamVault v{} starting...", VERSION);
    info!(
        data_dir = %settings.data_dir.display(),
        storage_dir = %settings.capture.storage_dir.display(),
        channels = settings.channels.len(),
        "Configuration loaded"
    );

    match disk_usage(&settings.capture.storage_dir) {
        Some(usage) => info!(
            total_bytes = usage.total_bytes,
            available_bytes = usage.available_bytes,
            used_percent = usage.used_percent(),
            "Storage disk usage"
        ),
        None => warn!(path = %settings.capture.storage_dir.display(), "Storage disk not found"),
    }

    // 3. Setup dependencies (DI wiring)
    let time = Arc::new(SystemTimeProvider);
    let bus = EventBus::new();

    let jobs = Arc::new(JobRegistry::new(
        Arc::new(FsJobStore::new(settings.pids_dir())),
        Arc::new(OsProcessProbe::with_timeout(settings.jobs.status_check_timeout())),
        Arc::new(FsJobLogSink::new(settings.software_logs_dir())),
        bus.clone(),
        time.clone(),
        settings.jobs.clone(),
    ));

    let channels: Arc<dyn ChannelRegistry> = Arc::new(
        ConfigChannelRegistry::open(settings.channels(), settings.channel_state_file())
            .await
            .context("Failed to open channel registry")?,
    );
    let recordings = Arc::new(FsRecordingStore::new(&settings.capture.storage_dir));
    let eviction = Arc::new(EvictionService::new(
        recordings.clone(),
        channels.clone(),
        settings.eviction.clone(),
    ));

    // 4. Run crash recovery before accepting triggers
    info!("Running job recovery...");
    let recovery = RecoveryService::new(jobs.clone());
    if let Err(e) = recovery.recover().await {
        error!(error = %e, "Job recovery failed");
    }

    let pipeline = CapturePipeline::new(
        CaptureDeps {
            jobs: jobs.clone(),
            launcher: Arc::new(SubprocessLauncher::new(settings.env_allowlist.clone())),
            recordings,
            channels: channels.clone(),
            files: Arc::new(LocalMediaFiles::new()),
            probe: Arc::new(FfprobeMediaProbe::new(settings.capture.bin.ffprobe.clone())),
            metadata: Arc::new(OfflineMetadataClient),
            eviction: eviction.clone(),
            time,
            ids: Arc::new(UuidProvider),
        },
        settings.capture.clone(),
    );

    // 5. Background loops
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let alerts_handle = tokio::spawn(log_alerts(bus, shutdown_rx.clone()));

    info!("Starting cleanup scheduler...");
    let scheduler = CleanupScheduler::new(
        eviction.clone(),
        channels.clone(),
        settings.eviction.cleanup_interval_hours,
    );
    let cleanup_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // 6. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_server = RpcServer::new(
        settings.rpc.clone(),
        RpcHandler::new(pipeline, jobs.clone(), channels, eviction),
    );
    let (addr, rpc_handle) = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "System ready. Waiting for triggers...");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    shutdown_tx.shutdown();

    let stopped = recovery.shutdown_capture_jobs().await;
    info!(stopped = stopped, "Capture jobs stopped");

    let _ = tokio::time::timeout(SHUTDOWN_GRACE, cleanup_handle).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, alerts_handle).await;

    info!("Shutdown complete.");

    Ok(())
}

/// Alerts have no other sink yet; surface them in the log
async fn log_alerts(bus: EventBus, mut shutdown: ShutdownToken) {
    let mut rx = bus.subscribe();
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(Notification::Alert { level, title, message }) => match level {
                    AlertLevel::Info => info!(title = %title, "{}", message),
                    AlertLevel::Warning => warn!(title = %title, "{}", message),
                    AlertLevel::Error => error!(title = %title, "{}", message),
                },
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped = skipped, "Alert log lagging"),
                Err(RecvError::Closed) => return,
            },
            _ = shutdown.wait() => return,
        }
    }
}
