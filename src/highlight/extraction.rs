//! Clip and thumbnail extraction via the transcoder
//!
//! Stream copy by default: seek-before-input plus `-c copy` keeps
//! extraction I/O-bound. The software re-encode path only exists for
//! sources whose keyframe spacing makes copied cuts unusable, and is
//! deliberately tuned for speed over quality.

use super::config::ExtractionConfig;
use super::ClipWindow;
use std::path::Path;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Extract one clip. Returns false on transcoder failure.
pub async fn extract_clip(
    source_path: &str,
    start: i64,
    end: i64,
    output_path: &Path,
    stream_copy: bool,
) -> crate::Result<bool> {
    let duration = end - start;
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let codec_args: &[&str] = if stream_copy {
        &["-c", "copy"]
    } else {
        &[
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-profile:v",
            "baseline",
            "-tune",
            "zerolatency",
            "-threads",
            "1",
        ]
    };

    let output = Command::new("ffmpeg")
        .args(["-y", "-ss", &start.to_string(), "-i", source_path])
        .args(["-t", &duration.to_string()])
        .args(codec_args)
        .args(["-avoid_negative_ts", "make_zero"])
        .arg(output_path)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.chars().rev().take(500).collect::<String>().chars().rev().collect();
        error!("clip extraction failed: {}", tail);
        return Ok(false);
    }

    info!(
        "extracted clip {}s-{}s -> {}",
        start,
        end,
        output_path.display()
    );
    Ok(true)
}

/// Extract one thumbnail frame at `timestamp`, scaled to half the
/// configured size preserving aspect.
pub async fn extract_thumbnail(
    source_path: &str,
    timestamp: f64,
    output_path: &Path,
    width: u32,
    height: u32,
) -> crate::Result<bool> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let scale = format!(
        "scale={}:{}:force_original_aspect_ratio=decrease",
        width / 2,
        height / 2
    );
    let output = Command::new("ffmpeg")
        .args([
            "-y",
            "-ss",
            &format!("{:.3}", timestamp),
            "-i",
            source_path,
            "-vframes",
            "1",
            "-vf",
            &scale,
        ])
        .arg(output_path)
        .output()
        .await?;

    if !output.status.success() {
        warn!("thumbnail extraction failed at {:.1}s", timestamp);
        return Ok(false);
    }

    info!(
        "extracted thumbnail at {:.1}s -> {}",
        timestamp,
        output_path.display()
    );
    Ok(true)
}

/// Extract all clips plus their thumbnails into `output_dir`.
///
/// A clip whose extraction fails is skipped; the rest continue. Returns
/// the successfully extracted clips with paths and indices filled in.
pub async fn extract_all_clips(
    source_path: &str,
    clips: Vec<ClipWindow>,
    output_dir: &Path,
    config: &ExtractionConfig,
) -> crate::Result<Vec<ClipWindow>> {
    let total = clips.len();
    let mut extracted = Vec::with_capacity(total);

    for (i, mut clip) in clips.into_iter().enumerate() {
        let clip_path = output_dir.join(format!("clip_{:03}.mp4", i));
        let thumb_path = output_dir.join(format!("thumb_{:03}.jpg", i));

        let clip_ok = extract_clip(
            source_path,
            clip.start,
            clip.end,
            &clip_path,
            config.stream_copy,
        )
        .await?;
        if !clip_ok {
            warn!("skipping clip {} - extraction failed", i);
            continue;
        }

        let midpoint = (clip.start + clip.end) as f64 / 2.0;
        extract_thumbnail(
            source_path,
            midpoint,
            &thumb_path,
            config.thumbnail_width,
            config.thumbnail_height,
        )
        .await?;

        clip.index = i;
        clip.clip_path = Some(clip_path);
        clip.thumbnail_path = Some(thumb_path);
        extracted.push(clip);
    }

    info!("extracted {}/{} clips successfully", extracted.len(), total);
    Ok(extracted)
}
