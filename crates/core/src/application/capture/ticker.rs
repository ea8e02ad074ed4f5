// Capture output scanner
// Turns capture tool output lines into signals the pipeline reacts to

use regex::Regex;
use std::sync::OnceLock;
use tracing::{error, info, warn};

fn resolution_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"stream:\s([0-9_a-z]+)\s").expect("Invalid resolution regex"))
}

/// Something worth reacting to in the capture output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSignal {
    Resolution(String),
    /// HTTP 404 on a segment; `give_up` once the threshold is reached
    MissingChunk { count: u32, give_up: bool },
    Forbidden,
    PlaylistReloadFailed,
    SegmentFetchFailed,
    WaitingForStreams,
    SkippingAds,
    OutputStarted,
    Paused,
    Resumed,
    ReadTimeout,
    StreamEnded,
    NoPlayableStreams,
    QualityUnavailable,
    Discontinuity,
    BadInterpreter,
    /// Output file exists and the tool refuses to overwrite it
    FileExists,
}

impl CaptureSignal {
    /// The tool exits on its own after these
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureSignal::NoPlayableStreams
                | CaptureSignal::QualityUnavailable
                | CaptureSignal::BadInterpreter
        )
    }
}

/// Line scanner for one capture attempt
pub struct CaptureTicker {
    basename: String,
    quality: Vec<String>,
    max_missing_chunks: u32,
    missing_chunks: u32,
}

impl CaptureTicker {
    pub fn new(basename: impl Into<String>, quality: Vec<String>, max_missing_chunks: u32) -> Self {
        Self {
            basename: basename.into(),
            quality,
            max_missing_chunks,
            missing_chunks: 0,
        }
    }

    pub fn missing_chunks(&self) -> u32 {
        self.missing_chunks
    }

    /// Scan one line. A line may carry several signals.
    pub fn scan(&mut self, line: &str) -> Vec<CaptureSignal> {
        let mut signals = Vec::new();
        let basename = self.basename.as_str();

        if line.contains("bad interpreter") {
            error!(recording = %basename, "Fatal error with capture tool, check its logs");
            signals.push(CaptureSignal::BadInterpreter);
        }

        if line.contains("already exists, use --force") {
            error!(recording = %basename, "Capture file already exists");
            signals.push(CaptureSignal::FileExists);
        }

        if let Some(caps) = resolution_regex().captures(line) {
            let resolution = caps[1].to_string();
            info!(recording = %basename, resolution = %resolution, "Stream resolution detected");
            self.check_quality(&resolution);
            signals.push(CaptureSignal::Resolution(resolution));
        }

        if line.contains("404 Client Error") {
            self.missing_chunks += 1;
            let give_up = self.max_missing_chunks > 0 && self.missing_chunks >= self.max_missing_chunks;
            warn!(
                recording = %basename,
                missing = self.missing_chunks,
                max = self.max_missing_chunks,
                "Chunk 404'd"
            );
            if give_up {
                warn!(recording = %basename, "Too many missing chunks, stopping capture");
            }
            signals.push(CaptureSignal::MissingChunk {
                count: self.missing_chunks,
                give_up,
            });
        }

        if line.contains("403 Client Error") {
            error!(recording = %basename, "Chunk 403'd, private stream?");
            signals.push(CaptureSignal::Forbidden);
        }

        if line.contains("Failed to reload playlist") {
            error!(recording = %basename, "Failed to reload playlist");
            signals.push(CaptureSignal::PlaylistReloadFailed);
        }

        if line.contains("Failed to fetch segment") {
            error!(recording = %basename, "Failed to fetch segment");
            signals.push(CaptureSignal::SegmentFetchFailed);
        }

        if line.contains("Waiting for streams") {
            warn!(recording = %basename, "No streams found yet, retrying");
            signals.push(CaptureSignal::WaitingForStreams);
        }

        if line.contains("Will skip ad segments") {
            info!(recording = %basename, "Capture will try to remove ads");
            signals.push(CaptureSignal::SkippingAds);
        }

        if line.contains("Writing output to") {
            info!(recording = %basename, "Capture tool now writing output");
            signals.push(CaptureSignal::OutputStarted);
        }

        if line.contains("Filtering out segments and pausing stream output") {
            info!(recording = %basename, "Stream output paused");
            signals.push(CaptureSignal::Paused);
        }

        if line.contains("Resuming stream output") {
            info!(recording = %basename, "Stream output resumed");
            signals.push(CaptureSignal::Resumed);
        }

        if line.contains("Read timeout, exiting") {
            error!(recording = %basename, "Read timeout, capture tool exiting");
            signals.push(CaptureSignal::ReadTimeout);
        }

        if line.contains("Stream ended") {
            info!(recording = %basename, "Stream ended");
            signals.push(CaptureSignal::StreamEnded);
        }

        if line.contains("No playable streams found") {
            error!(recording = %basename, "Capture failed, no streams available");
            signals.push(CaptureSignal::NoPlayableStreams);
        }

        if line.contains("The specified stream(s)") {
            error!(recording = %basename, "Capture failed, selected quality not available");
            signals.push(CaptureSignal::QualityUnavailable);
        }

        if line.contains("Encountered a stream discontinuity") {
            warn!(recording = %basename, "Stream discontinuity");
            signals.push(CaptureSignal::Discontinuity);
        }

        signals
    }

    fn check_quality(&self, resolution: &str) {
        if self.quality.is_empty() {
            return;
        }
        let expected = if self.quality.iter().any(|q| q == "best") {
            resolution == "1080p60"
        } else if self.quality.iter().any(|q| q == "worst") {
            resolution == "160p"
        } else {
            self.quality.iter().any(|q| q == resolution)
        };
        if !expected {
            warn!(
                recording = %self.basename,
                resolution = %resolution,
                quality = ?self.quality,
                "Stream resolution not in channel quality list"
            );
        }
    }
}
