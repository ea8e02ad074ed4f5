//! Capture pipeline end to end on the real adapters
//!
//! Small shell scripts stand in for streamlink, ffmpeg and ffprobe so the
//! whole run (spawn, supervise, convert, probe, sidecars, metadata) touches
//! the real filesystem and process table.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use streamvault_core::application::{
    CaptureConfig, CaptureDeps, CapturePipeline, EventBus, EvictionConfig, EvictionService,
    JobConfig, JobRegistry, PipelineTimings, TriggerOutcome,
};
use streamvault_core::domain::{Channel, LiveEvent, ProviderKind, Recording};
use streamvault_core::error::AppError;
use streamvault_core::port::id_provider::UuidProvider;
use streamvault_core::port::metadata_client::OfflineMetadataClient;
use streamvault_core::port::time_provider::SystemTimeProvider;
use streamvault_core::port::{ChannelRegistry, RecordingStore};
use streamvault_infra_fs::{
    ConfigChannelRegistry, FsJobLogSink, FsJobStore, FsRecordingStore, LocalMediaFiles,
};
use streamvault_infra_system::{FfprobeMediaProbe, OsProcessProbe, SubprocessLauncher};
use tempfile::TempDir;

const LOGIN: &str = "somestreamer";

/// Writes its `-o` target and logs like streamlink does
const STREAMLINK_OK: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
echo "attempt" >> "$(dirname "$out")/attempts"
echo "[cli][info] Available streams: 720p, 1080p60 (best)"
echo "[cli][info] Opening stream: 1080p60 (hls)"
echo "[cli][info] Writing output to"
printf 'mpegts-payload' > "$out"
echo "[cli][info] Stream ended"
"#;

/// Exits without producing anything
const STREAMLINK_FAIL: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
echo "attempt" >> "$(dirname "$out")/attempts"
echo "error: No playable streams found on this URL" 1>&2
exit 1
"#;

/// Copies the first input to the last argument
const FFMPEG: &str = r#"#!/bin/sh
in=""
last=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-i" ] && [ -z "$in" ]; then in="$2"; fi
  last="$1"
  shift
done
echo "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s" 1>&2
echo "frame=  250 fps=0.0 q=-1.0 size=      10kB time=00:00:10.00 bitrate=   8.2kbits/s" 1>&2
cp "$in" "$last"
"#;

const FFPROBE: &str = r#"#!/bin/sh
cat <<'JSON'
{
  "streams": [
    {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080},
    {"codec_type": "audio", "codec_name": "aac"}
  ],
  "format": {"duration": "10.000000", "bit_rate": "8200"}
}
JSON
"#;

fn live(capture_id: &str, title: &str) -> LiveEvent {
    LiveEvent {
        capture_id: capture_id.to_string(),
        started_at: Utc::now(),
        title: title.to_string(),
        game_id: None,
        game_name: Some("Speedrunning".to_string()),
        is_favourite_game: false,
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

struct Harness {
    _tmp: TempDir,
    storage: PathBuf,
    data: PathBuf,
    pipeline: CapturePipeline,
    jobs: Arc<JobRegistry>,
    recordings: Arc<FsRecordingStore>,
}

async fn harness(streamlink: &str, download_retries: u32) -> Harness {
    let tmp = TempDir::new().unwrap();
    let bin_dir = tmp.path().join("bin");
    let storage = tmp.path().join("vods");
    let data = tmp.path().join("data");
    std::fs::create_dir_all(&bin_dir).unwrap();

    let mut config = CaptureConfig {
        storage_dir: storage.clone(),
        cache_dir: tmp.path().join("cache"),
        download_retries,
        timings: PipelineTimings::immediate(),
        ..CaptureConfig::default()
    };
    config.bin.streamlink = write_script(&bin_dir, "streamlink", streamlink);
    config.bin.ffmpeg = write_script(&bin_dir, "ffmpeg", FFMPEG);
    config.bin.ffprobe = write_script(&bin_dir, "ffprobe", FFPROBE);

    let job_config = JobConfig::default();
    let jobs = Arc::new(JobRegistry::new(
        Arc::new(FsJobStore::new(data.join("pids"))),
        Arc::new(OsProcessProbe::with_timeout(job_config.status_check_timeout())),
        Arc::new(FsJobLogSink::new(data.join("logs"))),
        EventBus::new(),
        Arc::new(SystemTimeProvider),
        job_config,
    ));
    let channels: Arc<dyn ChannelRegistry> = Arc::new(
        ConfigChannelRegistry::open(
            vec![Channel::new(LOGIN, ProviderKind::Twitch)],
            data.join("state/channels.json"),
        )
        .await
        .unwrap(),
    );
    let recordings = Arc::new(FsRecordingStore::new(&storage));
    let eviction = Arc::new(EvictionService::new(
        recordings.clone(),
        channels.clone(),
        EvictionConfig::default(),
    ));

    let pipeline = CapturePipeline::new(
        CaptureDeps {
            jobs: jobs.clone(),
            launcher: Arc::new(SubprocessLauncher::default()),
            recordings: recordings.clone(),
            channels,
            files: Arc::new(LocalMediaFiles::new()),
            probe: Arc::new(FfprobeMediaProbe::new(config.bin.ffprobe.clone())),
            metadata: Arc::new(OfflineMetadataClient),
            eviction,
            time: Arc::new(SystemTimeProvider),
            ids: Arc::new(UuidProvider),
        },
        config,
    );

    Harness {
        _tmp: tmp,
        storage,
        data,
        pipeline,
        jobs,
        recordings,
    }
}

fn attempts(channel_dir: &Path) -> usize {
    std::fs::read_to_string(channel_dir.join("attempts"))
        .map(|raw| raw.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_live_trigger_produces_finalized_recording() {
    let h = harness(STREAMLINK_OK, 2).await;
    let channel_dir = h.storage.join(LOGIN);

    let outcome = h.pipeline.trigger(LOGIN, live("1001", "Any% marathon")).await.unwrap();
    let TriggerOutcome::Finalized { recording } = outcome else {
        panic!("expected a finalized recording, got {:?}", outcome);
    };

    // Metadata round trip through the store
    let stored: Vec<Recording> = h.recordings.list_channel(LOGIN).await.unwrap();
    assert_eq!(stored.len(), 1);
    let rec = &stored[0];
    assert_eq!(rec.uuid, recording);
    assert!(rec.basename.starts_with("somestreamer_"));
    assert!(rec.basename.ends_with("_1001"));
    assert!(!rec.long_stream);

    // Media: converted file replaces the raw capture
    let converted = channel_dir.join(format!("{}.mp4", rec.basename));
    assert_eq!(std::fs::read_to_string(&converted).unwrap(), "mpegts-payload");
    assert!(!channel_dir.join(format!("{}.ts", rec.basename)).exists());
    assert_eq!(attempts(&channel_dir), 1);

    // Sidecars
    for suffix in [".nfo", ".ffmetadata", ".chapters.vtt", "-llc-edl.csv"] {
        let path = channel_dir.join(format!("{}{}", rec.basename, suffix));
        assert!(path.exists(), "missing {}", path.display());
    }
    let vtt = std::fs::read_to_string(rec.sidecar_path("chapters.vtt")).unwrap();
    assert!(vtt.starts_with("WEBVTT"));
    assert!(vtt.contains("Any% marathon (Speedrunning)"));

    assert!(rec.is_finalized());
    assert_eq!(rec.capture_id, "1001");
    assert_eq!(rec.segments.len(), 1);
    assert_eq!(rec.segments[0].filename, converted);
    assert_eq!(rec.segments[0].size, "mpegts-payload".len() as u64);
    assert_eq!(rec.stream_resolution.as_deref(), Some("1080p60"));
    assert!(rec.capture_output_started_at.is_some());

    let media = rec.media_info.as_ref().expect("probed");
    assert_eq!(media.duration_secs, 10.0);
    assert_eq!(media.width, Some(1920));
    assert_eq!(media.video_codec.as_deref(), Some("h264"));

    // Jobs are gone and their records removed; tool logs stay
    assert!(h.jobs.is_empty());
    let pids: Vec<_> = std::fs::read_dir(h.data.join("pids")).unwrap().collect();
    assert!(pids.is_empty());
    let capture_log =
        std::fs::read_to_string(h.data.join("logs/capture_somestreamer_1001_stdout.log")).unwrap();
    assert!(capture_log.starts_with("$ "));
    assert!(capture_log.contains("--hls-live-edge"));

    // Same session again is a duplicate
    let again = h.pipeline.trigger(LOGIN, live("1001", "Any% marathon")).await.unwrap();
    assert!(matches!(again, TriggerOutcome::Skipped(_)));
    assert_eq!(attempts(&channel_dir), 1);
}

#[tokio::test]
async fn test_failed_capture_is_retried_then_marked_broken() {
    let h = harness(STREAMLINK_FAIL, 1).await;
    let channel_dir = h.storage.join(LOGIN);

    let err = h.pipeline.trigger(LOGIN, live("2002", "")).await.unwrap_err();
    assert!(matches!(err, AppError::Capture(_)), "got {:?}", err);

    assert_eq!(attempts(&channel_dir), 2, "first attempt plus one retry");

    let names: Vec<String> = std::fs::read_dir(&channel_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(
        names.iter().any(|n| n.ends_with("_2002.json.broken")),
        "metadata not marked broken: {:?}",
        names
    );
    assert!(!names.iter().any(|n| n.ends_with(".json")));
    assert!(h.recordings.list_channel(LOGIN).await.unwrap().is_empty());
    assert!(h.jobs.is_empty());
}
