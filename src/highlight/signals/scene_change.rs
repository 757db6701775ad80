//! Scene change detection via transcoder scene-cut scores
//!
//! The scene detector runs at a very low collection threshold so scores are
//! reported for near-all frames, then a z-score over the whole collection
//! makes the actual trigger adaptive. A brightness-mean reporter rides
//! along for the luminance boost (flashbangs, explosions).
//!
//! The select/scdet filter MUST precede the frame reporter for scene scores
//! to be populated at all.

use super::{zscore, SignalContext, SignalDetector, SignalKind, SignalScores};
use crate::highlight::config::SignalsConfig;
use crate::highlight::ffmpeg::run_streaming_stderr;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

static SCDET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"lavfi\.scd\.score:\s*(\d+\.?\d*).*?lavfi\.scd\.time:\s*(\d+\.?\d*)").unwrap()
});
static MEAN_Y_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"mean:\[(\d+)\s").unwrap());

/// `(pts_time, scene_score, mean_luma)` triples parsed from filter output
pub(crate) fn parse_frames(lines: &[String]) -> Vec<(f64, f64, f64)> {
    let mut frames = Vec::new();
    let mut current_time = 0.0;
    let mut current_score = 0.0;

    for line in lines {
        if let Some(caps) = SCDET_RE.captures(line) {
            current_score = caps[1].parse().unwrap_or(0.0);
            current_time = caps[2].parse().unwrap_or(0.0);
            continue;
        }
        if let Some(caps) = MEAN_Y_RE.captures(line) {
            let mean_y: f64 = caps[1].parse().unwrap_or(0.0);
            if current_time > 0.0 {
                frames.push((current_time, current_score, mean_y));
                current_time = -1.0;
            }
        }
    }
    frames
}

pub struct SceneChangeSignal;

#[async_trait]
impl SignalDetector for SceneChangeSignal {
    fn kind(&self) -> SignalKind {
        SignalKind::SceneChange
    }

    async fn detect(
        &self,
        config: &SignalsConfig,
        ctx: &SignalContext,
    ) -> crate::Result<SignalScores> {
        let cfg = &config.scene_change;

        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-i",
            &ctx.proxy_path,
            "-vf",
            "scale=160:-2,scdet=t=0.01,showinfo",
            "-f",
            "null",
            "-",
        ]);
        let (_, lines) = run_streaming_stderr(cmd).await?;

        let frames = parse_frames(&lines);
        if frames.is_empty() {
            info!("scene: no frames with scene scores detected");
            return Ok(SignalScores::new());
        }

        let scene_values: Vec<f64> = frames.iter().map(|f| f.1).collect();
        let max_scene = scene_values.iter().copied().fold(0.0_f64, f64::max);
        info!(
            "scene: {} candidate frames, scene range [0, {:.3}]",
            frames.len(),
            max_scene
        );

        let zscores = zscore(&scene_values);
        tokio::task::yield_now().await;

        let mut scores = SignalScores::new();
        let mut last_time = -999.0_f64;
        let mut prev_mean_y: Option<f64> = None;

        for (i, (pts_time, scene_val, mean_y)) in frames.iter().enumerate() {
            let z = zscores[i];
            let graded = (scene_val / 0.6).min(1.0);

            let min_interval = if cfg.dynamic_interval {
                (2.0 - graded).max(1.0)
            } else {
                2.0
            };

            if pts_time - last_time < min_interval {
                prev_mean_y = Some(*mean_y);
                continue;
            }

            // Trigger on a z-score spike OR a clearly high raw score
            if z <= cfg.zscore_threshold && graded < 0.6 {
                prev_mean_y = Some(*mean_y);
                continue;
            }

            let mut event_score = if z > cfg.zscore_threshold {
                0.6
            } else {
                graded * 0.4
            };

            // Sudden brightness shift rides on top
            if cfg.luminance_boost {
                if let Some(prev) = prev_mean_y {
                    let delta = (mean_y - prev).abs();
                    if delta > cfg.luminance_delta_threshold {
                        event_score = (event_score + 0.3).min(1.0);
                        debug!("scene: luminance boost t={:.1}s dY={:.1}", pts_time, delta);
                    }
                }
            }

            if event_score > 0.0 {
                let second = *pts_time as i64;
                let entry = scores.entry(second).or_insert(0.0);
                *entry = entry.max(event_score.min(1.0));
                last_time = *pts_time;
            }

            prev_mean_y = Some(*mean_y);

            if i % 4096 == 0 {
                tokio::task::yield_now().await;
            }
        }

        info!(
            "scene: {} events (z>{}, max_raw_scene={:.3})",
            scores.len(),
            cfg.zscore_threshold,
            max_scene
        );
        Ok(scores)
    }
}
