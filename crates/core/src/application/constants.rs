// Orchestration constants (ADR: No magic values)
use std::time::Duration;

/// Debounce window for job update broadcasts (2s)
pub const UPDATE_DEBOUNCE_MS: u64 = 2000;

/// Coalesced (cancelled) broadcasts before the next one fires immediately
pub const MAX_COALESCED_UPDATES: u32 = 5;

/// Progress delta between coarse progress log lines
pub const PROGRESS_LOG_STEP: f64 = 0.1;

/// Upper bound for one OS process-listing call (10s)
pub const STATUS_CHECK_TIMEOUT_MS: u64 = 10_000;

/// Graceful process shutdown timeout before SIGKILL (5 seconds)
pub const GRACEFUL_SHUTDOWN_TIMEOUT_MS: i64 = 5000;

/// Poll interval while waiting for a SIGTERM'd process to exit
pub const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Backoff between capture attempts (15s)
pub const CAPTURE_RETRY_BACKOFF: Duration = Duration::from_secs(15);

/// Settle delay after capture before chapters/convert (30s)
pub const CAPTURE_SETTLE_DELAY: Duration = Duration::from_secs(30);

/// Settle delay after remux before validation (10s)
pub const CONVERT_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Settle delay before finalize (30s)
pub const FINALIZE_SETTLE_DELAY: Duration = Duration::from_secs(30);

/// Capture file size sampling interval (120s)
pub const KEEPALIVE_INTERVAL_SECS: u64 = 120;

/// Missing-chunk (HTTP 404) count that aborts a capture
pub const MAX_MISSING_CHUNKS: u32 = 100;

/// Default capture attempts after the first one
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 5;

/// Default per-channel storage budget (GB)
pub const DEFAULT_STORAGE_PER_STREAMER_GB: u64 = 100;

/// Default recordings kept per channel
pub const DEFAULT_VODS_TO_KEEP: u32 = 5;

/// Streams longer than this are flagged as possibly cut at 24h (seconds)
pub const LONG_STREAM_THRESHOLD_SECS: i64 = 86_400 - 1_200;

/// Default upstream HLS timeouts handed to the capture tool (seconds)
pub const DEFAULT_HLS_TIMEOUT_SECS: u64 = 120;

/// Broadcast channel capacity for notifications
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Output lines buffered between a process and its readers
pub const OUTPUT_BUFFER_LINES: usize = 256;

/// Default periodic cleanup sweep interval (hours)
pub const DEFAULT_CLEANUP_INTERVAL_HOURS: u64 = 24;

/// `--hls-live-edge` handed to the capture tool
pub const HLS_LIVE_EDGE: u32 = 99_999;

/// `--hls-segment-threads` handed to the capture tool
pub const HLS_SEGMENT_THREADS: u32 = 5;

/// `--retry-streams` / `--retry-max` handed to the capture tool
pub const CAPTURE_RETRY_STREAMS: u32 = 10;
pub const CAPTURE_RETRY_MAX: u32 = 5;

/// Upper bound for reading output left in the pipe after a process exits
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timestamp used in capture and fallback file names
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Per-channel subfolder for fallback captures
pub const FALLBACK_FOLDER: &str = "saved_vods";

/// Container used when the channel records audio only
pub const AUDIO_ONLY_CONTAINER: &str = "m4a";
