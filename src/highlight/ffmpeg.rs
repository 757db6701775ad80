//! Child-process helpers for the transcoder tools
//!
//! Stderr is consumed line by line as the process runs; buffering a long
//! video's filter output whole would stall the event loop and bloat RSS.

use crate::error::{PipelineError, PlatformError};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Run a command, streaming stderr into a line vector.
///
/// Returns `(success, stderr_lines)`.
pub async fn run_streaming_stderr(mut cmd: Command) -> crate::Result<(bool, Vec<String>)> {
    cmd.stdout(Stdio::null()).stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| PlatformError::Pipeline(PipelineError::Probe("no stderr pipe".into())))?;

    let mut lines = Vec::new();
    let mut reader = BufReader::new(stderr).lines();
    while let Some(line) = reader.next_line().await? {
        lines.push(line);
    }

    let status = child.wait().await?;
    Ok((status.success(), lines))
}

/// Run a command, discarding output, returning success.
pub async fn run_quiet(mut cmd: Command) -> crate::Result<bool> {
    cmd.stdout(Stdio::null()).stderr(Stdio::null());
    let status = cmd.spawn()?.wait().await?;
    Ok(status.success())
}

/// Video duration in seconds via the container probe.
pub async fn probe_duration(video_path: &str) -> crate::Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            video_path,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await?;

    let raw = String::from_utf8_lossy(&output.stdout);
    let duration: f64 = raw.trim().parse().map_err(|_| {
        PlatformError::Pipeline(PipelineError::Probe(format!(
            "unparseable duration '{}' for {}",
            raw.trim(),
            video_path
        )))
    })?;

    debug!("probed duration {:.1}s for {}", duration, video_path);
    if duration <= 0.0 {
        return Err(PlatformError::Pipeline(PipelineError::Probe(format!(
            "invalid duration {} for {}",
            duration, video_path
        ))));
    }
    Ok(duration)
}
