//! Audio spike detection via transcoder RMS/peak statistics
//!
//! A continuous astats/ametadata filter streams per-hop RMS and peak levels
//! on stderr. Scoring is adaptive: a rolling z-score over a 30-second
//! window (silence-floor samples excluded) catches relative loudness
//! spikes, a peak-vs-RMS delta catches transients, and an optional
//! high-passed second pass confirms high-frequency events. Confirmed
//! seconds are density-limited per rolling minute.

use super::{rolling_zscore, SignalContext, SignalDetector, SignalKind, SignalScores};
use crate::highlight::config::{AudioSpikeConfig, SignalsConfig};
use crate::highlight::ffmpeg::run_streaming_stderr;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Any dB value below this is treated as silence and clamped.
const SILENCE_FLOOR_DB: f64 = -90.0;

/// Samples below this level are excluded from rolling baselines.
const ACTIVE_THRESHOLD_DB: f64 = -50.0;

/// Rolling baseline window, in seconds.
const BASELINE_WINDOW_SECS: f64 = 30.0;

/// At most this many confirmed spike seconds per rolling minute.
const MAX_SPIKES_PER_MINUTE: usize = 45;

static RMS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"lavfi\.astats\.Overall\.RMS_level=(\S+)").unwrap());
static PEAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"lavfi\.astats\.Overall\.Peak_level=(\S+)").unwrap());

fn to_db(raw: &str) -> f64 {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => v.max(SILENCE_FLOOR_DB),
        _ => SILENCE_FLOOR_DB,
    }
}

/// One parsed astats block: `(timestamp, rms_db, peak_db)`
type RmsSample = (f64, f64, f64);

async fn collect_rms_samples(
    proxy_path: &str,
    hop: f64,
    extra_af: Option<&str>,
) -> crate::Result<Vec<RmsSample>> {
    let reset = ((1.0 / hop).round() as i64).max(1);

    // Chaining ametadata=print forces continuous stat output instead of a
    // single summary at EOF.
    let mut af = format!(
        "astats=metadata=1:reset={},ametadata=print:key=lavfi.astats.Overall.RMS_level,ametadata=print:key=lavfi.astats.Overall.Peak_level",
        reset
    );
    if let Some(extra) = extra_af {
        af = format!("{},{}", extra, af);
    }

    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-i", proxy_path, "-af", &af, "-f", "null", "-"]);
    let (_, lines) = run_streaming_stderr(cmd).await?;

    let mut samples = Vec::new();
    let mut current_time = 0.0;
    let mut current_rms: Option<f64> = None;
    let mut current_peak: Option<f64> = None;

    for line in &lines {
        if let Some(caps) = RMS_RE.captures(line) {
            current_rms = Some(to_db(&caps[1]));
        }
        if let Some(caps) = PEAK_RE.captures(line) {
            current_peak = Some(to_db(&caps[1]));
        }
        if let (Some(rms), Some(peak)) = (current_rms, current_peak) {
            samples.push((current_time, rms, peak));
            current_time += hop;
            current_rms = None;
            current_peak = None;
        }
    }

    info!(
        "audio: parsed {} continuous ametadata blocks (hop={}s, reset={})",
        samples.len(),
        hop,
        reset
    );
    Ok(samples)
}

pub struct AudioSpikeSignal;

#[async_trait]
impl SignalDetector for AudioSpikeSignal {
    fn kind(&self) -> SignalKind {
        SignalKind::AudioSpike
    }

    async fn detect(
        &self,
        config: &SignalsConfig,
        ctx: &SignalContext,
    ) -> crate::Result<SignalScores> {
        let cfg = &config.audio_spike;
        info!(
            "audio: hop={} z>{} transient>{}dB hf={} window={}s min_spikes={}",
            cfg.hop_size,
            cfg.zscore_threshold,
            cfg.transient_delta_db,
            cfg.highfreq_boost,
            cfg.window_seconds,
            cfg.min_spike_count
        );

        // Primary full-spectrum pass
        let samples = collect_rms_samples(&ctx.proxy_path, cfg.hop_size, None).await?;
        if samples.is_empty() {
            warn!("audio: no astats samples parsed - skipping");
            return Ok(SignalScores::new());
        }

        let rms: Vec<f64> = samples.iter().map(|s| s.1).collect();
        let window = if cfg.hop_size > 0.0 {
            (BASELINE_WINDOW_SECS / cfg.hop_size) as usize
        } else {
            60
        };
        let rms_z = rolling_zscore(&rms, window, ACTIVE_THRESHOLD_DB);
        tokio::task::yield_now().await;

        let min_rms = rms.iter().copied().fold(f64::INFINITY, f64::min);
        let max_rms = rms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        debug!("audio: rms range [{:.1}, {:.1}] dB", min_rms, max_rms);

        // Optional high-frequency pass; a failure here is non-fatal.
        let hf_spike_seconds = if cfg.highfreq_boost {
            self.highfreq_pass(ctx, cfg, window).await
        } else {
            BTreeSet::new()
        };

        // Per-hop scoring
        let mut hop_scores: Vec<(f64, f64)> = Vec::new();
        for (i, (ts, rms_db, peak_db)) in samples.iter().enumerate() {
            let mut score: f64 = 0.0;

            if rms_z[i] > cfg.zscore_threshold {
                score += 0.6;
            }
            // Transient: peak much louder than sustained RMS
            if (peak_db - rms_db).abs() > cfg.transient_delta_db {
                score += 0.3;
            }
            if hf_spike_seconds.contains(&(*ts as i64)) {
                score += 0.3;
            }

            if score > 0.0 {
                hop_scores.push((*ts, score.min(1.0)));
            }
            if i % 4096 == 0 {
                tokio::task::yield_now().await;
            }
        }

        // Window aggregation: a second is confirmed only when enough spiky
        // hops land inside `window_seconds` of each other.
        let mut confirmed = SignalScores::new();
        for (i, (ts, _)) in hop_scores.iter().enumerate() {
            let window_end = ts + cfg.window_seconds;
            let mut in_window = 0usize;
            let mut best: f64 = 0.0;
            for (other_ts, other_score) in hop_scores[i..].iter() {
                if *other_ts > window_end {
                    break;
                }
                in_window += 1;
                best = best.max(*other_score);
            }
            if in_window >= cfg.min_spike_count {
                let sec = *ts as i64;
                let entry = confirmed.entry(sec).or_insert(0.0);
                *entry = entry.max(best);
            }
        }

        // Density control: scale down runs that confirm too many seconds
        // inside a rolling minute.
        let mut final_confirmed = SignalScores::new();
        for (sec, score) in &confirmed {
            let recent = final_confirmed
                .range((sec - 60 + 1)..=*sec)
                .filter(|(_, v)| **v > 0.1)
                .count();
            let scale = if recent > MAX_SPIKES_PER_MINUTE {
                (MAX_SPIKES_PER_MINUTE as f64 / recent as f64).max(0.1)
            } else {
                1.0
            };
            final_confirmed.insert(*sec, score * scale);
        }

        info!(
            "audio: {} high-value confirmed spike seconds",
            final_confirmed.values().filter(|v| **v > 0.1).count()
        );
        Ok(final_confirmed)
    }
}

impl AudioSpikeSignal {
    /// High-passed pass at 2 kHz with a slightly lower threshold; returns
    /// the seconds whose high-frequency energy spikes.
    async fn highfreq_pass(
        &self,
        ctx: &SignalContext,
        cfg: &AudioSpikeConfig,
        window: usize,
    ) -> BTreeSet<i64> {
        let hf_threshold = cfg.zscore_threshold * 0.75;
        match collect_rms_samples(&ctx.proxy_path, cfg.hop_size, Some("highpass=f=2000")).await {
            Ok(samples) if !samples.is_empty() => {
                let hf_rms: Vec<f64> = samples.iter().map(|s| s.1).collect();
                let hf_z = rolling_zscore(&hf_rms, window, ACTIVE_THRESHOLD_DB);
                let seconds: BTreeSet<i64> = samples
                    .iter()
                    .zip(hf_z.iter())
                    .filter(|(_, z)| **z > hf_threshold)
                    .map(|((ts, _, _), _)| *ts as i64)
                    .collect();
                info!("audio: high-freq pass -> {} spike seconds", seconds.len());
                seconds
            }
            Ok(_) => BTreeSet::new(),
            Err(e) => {
                debug!("audio: high-freq pass failed (non-fatal): {}", e);
                BTreeSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_parsing_clamps_to_silence_floor() {
        assert_eq!(to_db("-34.2"), -34.2);
        assert_eq!(to_db("-120.0"), SILENCE_FLOOR_DB);
        assert_eq!(to_db("-inf"), SILENCE_FLOOR_DB);
        assert_eq!(to_db("garbage"), SILENCE_FLOOR_DB);
    }

    #[test]
    fn test_stat_line_regexes() {
        let line = "[Parsed_ametadata_1 @ 0x55] lavfi.astats.Overall.RMS_level=-34.200000";
        let caps = RMS_RE.captures(line).unwrap();
        assert_eq!(to_db(&caps[1]), -34.2);

        let line = "[Parsed_ametadata_2 @ 0x55] lavfi.astats.Overall.Peak_level=-12.5";
        let caps = PEAK_RE.captures(line).unwrap();
        assert_eq!(to_db(&caps[1]), -12.5);
    }

    #[test]
    fn test_block_pairing_from_lines() {
        // Pairing logic mirrored inline: an RMS line followed by a peak
        // line forms one sample and advances time by the hop.
        let lines = [
            "lavfi.astats.Overall.RMS_level=-40.0",
            "lavfi.astats.Overall.Peak_level=-20.0",
            "lavfi.astats.Overall.RMS_level=-35.0",
            "lavfi.astats.Overall.Peak_level=-15.0",
        ];
        let hop = 0.5;
        let mut samples = Vec::new();
        let mut t = 0.0;
        let mut rms = None;
        let mut peak = None;
        for line in lines {
            if let Some(c) = RMS_RE.captures(line) {
                rms = Some(to_db(&c[1]));
            }
            if let Some(c) = PEAK_RE.captures(line) {
                peak = Some(to_db(&c[1]));
            }
            if let (Some(r), Some(p)) = (rms, peak) {
                samples.push((t, r, p));
                t += hop;
                rms = None;
                peak = None;
            }
        }
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], (0.0, -40.0, -20.0));
        assert_eq!(samples[1], (0.5, -35.0, -15.0));
    }
}
