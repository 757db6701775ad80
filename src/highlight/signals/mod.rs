//! Per-second highlight signal detectors
//!
//! Each detector analyzes one observable (audio, scene cuts, chat volume,
//! captions, on-screen text) and produces a sparse map of
//! `second -> score in [0, 1]`. Detectors cooperate with the event loop:
//! child-process output is streamed, and CPU-heavy scans yield or run on
//! the blocking pool.

pub mod audio_spike;
pub mod chat_spike;
pub mod ocr_keyword;
pub mod scene_change;
pub mod vtt_semantic;

use super::config::SignalsConfig;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

/// Ordered sparse mapping `second -> score`
pub type SignalScores = BTreeMap<i64, f64>;

/// Closed set of signal kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalKind {
    AudioSpike,
    SceneChange,
    ChatSpike,
    VttSemantic,
    OcrKeyword,
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::AudioSpike => "audio_spike",
            SignalKind::SceneChange => "scene_change",
            SignalKind::ChatSpike => "chat_spike",
            SignalKind::VttSemantic => "vtt_semantic",
            SignalKind::OcrKeyword => "ocr_keyword",
        }
    }

    /// Cheap detectors run in the first signal pass; OCR only runs on the
    /// candidate regions the cheap signals flag.
    pub fn first_pass() -> &'static [SignalKind] {
        &[
            SignalKind::AudioSpike,
            SignalKind::SceneChange,
            SignalKind::ChatSpike,
            SignalKind::VttSemantic,
        ]
    }

    pub fn enabled(&self, config: &SignalsConfig) -> bool {
        match self {
            SignalKind::AudioSpike => config.audio_spike.enabled,
            SignalKind::SceneChange => config.scene_change.enabled,
            SignalKind::ChatSpike => config.chat_spike.enabled,
            SignalKind::VttSemantic => config.vtt_semantic.enabled,
            SignalKind::OcrKeyword => config.ocr_keyword.enabled,
        }
    }

    pub fn weight(&self, config: &SignalsConfig) -> f64 {
        match self {
            SignalKind::AudioSpike => config.audio_spike.weight,
            SignalKind::SceneChange => config.scene_change.weight,
            SignalKind::ChatSpike => config.chat_spike.weight,
            SignalKind::VttSemantic => config.vtt_semantic.weight,
            SignalKind::OcrKeyword => config.ocr_keyword.weight,
        }
    }
}

/// Per-job inputs shared by all detectors
#[derive(Debug, Clone, Default)]
pub struct SignalContext {
    pub proxy_path: String,
    pub chat_path: Option<String>,
    pub vtt_path: Option<String>,
    pub duration_seconds: f64,
    /// Second-pass restriction: only these seconds are scanned (OCR)
    pub target_seconds: Option<BTreeSet<i64>>,
}

/// The single capability every detector implements
#[async_trait]
pub trait SignalDetector: Send + Sync {
    fn kind(&self) -> SignalKind;

    async fn detect(
        &self,
        config: &SignalsConfig,
        ctx: &SignalContext,
    ) -> crate::Result<SignalScores>;
}

/// All detectors, in first-pass order with OCR last.
pub fn registry() -> Vec<Box<dyn SignalDetector>> {
    vec![
        Box::new(audio_spike::AudioSpikeSignal),
        Box::new(scene_change::SceneChangeSignal),
        Box::new(chat_spike::ChatSpikeSignal),
        Box::new(vtt_semantic::VttSemanticSignal),
        Box::new(ocr_keyword::OcrKeywordSignal),
    ]
}

/// Population z-scores of a sample; all zeros when the sample is too small
/// or has no spread.
pub fn zscore(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 4 {
        return vec![0.0; n];
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
    if std < 1e-9 {
        return vec![0.0; n];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

/// Rolling z-score over a centered window, ignoring samples below the
/// silence threshold so steady background noise cannot skew baselines.
/// Windows with fewer than 4 active samples, or spread under 0.5, yield 0.
pub fn rolling_zscore(values: &[f64], window_size: usize, silence_thresh: f64) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![0.0; n];

    for i in 0..n {
        let start = i.saturating_sub(window_size / 2);
        let end = (i + window_size / 2 + 1).min(n);

        let active: Vec<f64> = values[start..end]
            .iter()
            .copied()
            .filter(|v| *v >= silence_thresh)
            .collect();
        if active.len() < 4 {
            continue;
        }

        let mean = active.iter().sum::<f64>() / active.len() as f64;
        let std =
            (active.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / active.len() as f64).sqrt();
        if std < 0.5 {
            continue;
        }
        out[i] = (values[i] - mean) / std;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zscore_flags_outlier() {
        let values = vec![1.0, 1.0, 1.0, 1.0, 1.0, 10.0];
        let z = zscore(&values);
        assert!(z[5] > 2.0);
        assert!(z[0] < 0.0);
    }

    #[test]
    fn test_zscore_degenerate_cases() {
        assert_eq!(zscore(&[1.0, 2.0, 3.0]), vec![0.0; 3]);
        assert_eq!(zscore(&[5.0; 10]), vec![0.0; 10]);
    }

    #[test]
    fn test_rolling_zscore_ignores_silence() {
        // Mostly silence with a loud burst: silence samples must not drag
        // the window mean down.
        let mut values = vec![-90.0; 64];
        for v in values.iter_mut().skip(20).take(8) {
            *v = -30.0;
        }
        values[24] = -5.0;
        let z = rolling_zscore(&values, 60, -50.0);
        assert!(z[24] > 1.0, "burst not detected: {}", z[24]);
        // Pure-silence regions have fewer than 4 active samples
        assert_eq!(z[0], 0.0);
    }

    #[test]
    fn test_rolling_zscore_low_spread_suppressed() {
        let values = vec![-30.0; 100];
        let z = rolling_zscore(&values, 60, -50.0);
        assert!(z.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_first_pass_excludes_ocr() {
        assert!(!SignalKind::first_pass().contains(&SignalKind::OcrKeyword));
        assert_eq!(SignalKind::first_pass().len(), 4);
    }

    #[test]
    fn test_registry_covers_all_kinds() {
        let kinds: Vec<SignalKind> = registry().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds.len(), 5);
        assert!(kinds.contains(&SignalKind::OcrKeyword));
    }
}
