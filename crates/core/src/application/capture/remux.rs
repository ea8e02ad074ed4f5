// Remux command line and progress parsing

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Duration: (\d+):(\d+):(\d+)").expect("Invalid duration regex"))
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=(\d+):(\d+):(\d+)").expect("Invalid time regex"))
}

/// Containers that hold audio only and must not get the AAC bitstream filter
const AUDIO_CONTAINERS: [&str; 3] = ["m4a", "aac", "mp3"];

/// ffmpeg arguments that copy `capture` into `converted`, optionally
/// embedding chapters from an ffmetadata file
pub fn remux_args(capture: &Path, converted: &Path, chapters: Option<&Path>) -> Vec<String> {
    let mut args = vec!["-i".to_string(), capture.display().to_string()];

    if let Some(meta) = chapters {
        args.push("-i".to_string());
        args.push(meta.display().to_string());
        args.push("-map_metadata".to_string());
        args.push("1".to_string());
    }

    args.push("-c".to_string());
    args.push("copy".to_string());

    let extension = converted
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if !AUDIO_CONTAINERS.contains(&extension.as_str()) {
        args.push("-bsf:a".to_string());
        args.push("aac_adtstoasc".to_string());
    }

    if extension == "mp4" {
        args.push("-movflags".to_string());
        args.push("faststart".to_string());
    }

    args.push("-y".to_string());
    args.push(converted.display().to_string());
    args
}

/// Tracks ffmpeg's `Duration:` header and `time=` ticks
#[derive(Debug, Default)]
pub struct RemuxProgress {
    total_secs: Option<u64>,
}

impl RemuxProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_secs(&self) -> Option<u64> {
        self.total_secs
    }

    /// Feed one output line; returns progress in [0, 1] when the line carries a tick
    pub fn scan(&mut self, line: &str) -> Option<f64> {
        if self.total_secs.is_none() {
            if let Some(secs) = hms_secs(duration_regex(), line) {
                self.total_secs = Some(secs);
            }
        }

        let current = hms_secs(time_regex(), line)?;
        let total = self.total_secs.filter(|t| *t > 0)?;
        Some((current as f64 / total as f64).min(1.0))
    }
}

fn hms_secs(re: &Regex, line: &str) -> Option<u64> {
    let caps = re.captures(line)?;
    let h: u64 = caps[1].parse().ok()?;
    let m: u64 = caps[2].parse().ok()?;
    let s: u64 = caps[3].parse().ok()?;
    Some(h * 3600 + m * 60 + s)
}
