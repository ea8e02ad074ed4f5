// ffprobe MediaProbe
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use streamvault_core::domain::MediaInfo;
use streamvault_core::error::{AppError, Result};
use streamvault_core::port::{ExecutionError, MediaProbe};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

// ffprobe prints numbers as strings in the format section
#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

fn parse_probe_output(raw: &str) -> Result<MediaInfo> {
    let output: ProbeOutput = serde_json::from_str(raw)?;
    let format = output
        .format
        .ok_or_else(|| AppError::Validation("ffprobe output has no format section".to_string()))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(MediaInfo {
        duration_secs: format
            .duration
            .and_then(|d| d.parse().ok())
            .unwrap_or_default(),
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        video_codec: video.and_then(|v| v.codec_name.clone()),
        audio_codec: audio.and_then(|a| a.codec_name.clone()),
        bitrate: format.bit_rate.and_then(|b| b.parse().ok()),
    })
}

pub struct FfprobeMediaProbe {
    bin: String,
}

impl FfprobeMediaProbe {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl MediaProbe for FfprobeMediaProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let output = Command::new(&self.bin)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", self.bin, e)))?;

        if !output.status.success() {
            return Err(AppError::Validation(format!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let info = parse_probe_output(&String::from_utf8_lossy(&output.stdout))?;
        debug!(
            path = %path.display(),
            duration_secs = info.duration_secs,
            width = ?info.width,
            height = ?info.height,
            "Media probed"
        );
        Ok(info)
    }
}
