//! Highlight worker tuning, loaded from YAML with built-in defaults
//!
//! The file is structured as `{scoring, signals, governance, extraction}`.
//! A missing or unreadable file falls back to the defaults below; partial
//! files fill the gaps per field.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HighlightConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_qualification_threshold")]
    pub qualification_threshold: f64,
    #[serde(default = "default_max_clips")]
    pub max_clips: usize,
    #[serde(default = "default_min_clip_duration")]
    pub min_clip_duration: i64,
    #[serde(default = "default_max_clip_duration")]
    pub max_clip_duration: i64,
    #[serde(default = "default_context_buffer")]
    pub context_buffer: i64,
    #[serde(default = "default_min_gap")]
    pub min_gap: i64,
}

fn default_qualification_threshold() -> f64 {
    0.35
}
fn default_max_clips() -> usize {
    5
}
fn default_min_clip_duration() -> i64 {
    8
}
fn default_max_clip_duration() -> i64 {
    60
}
fn default_context_buffer() -> i64 {
    3
}
fn default_min_gap() -> i64 {
    5
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            qualification_threshold: default_qualification_threshold(),
            max_clips: default_max_clips(),
            min_clip_duration: default_min_clip_duration(),
            max_clip_duration: default_max_clip_duration(),
            context_buffer: default_context_buffer(),
            min_gap: default_min_gap(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalsConfig {
    #[serde(default)]
    pub audio_spike: AudioSpikeConfig,
    #[serde(default)]
    pub scene_change: SceneChangeConfig,
    #[serde(default)]
    pub chat_spike: ChatSpikeConfig,
    #[serde(default)]
    pub vtt_semantic: VttSemanticConfig,
    #[serde(default)]
    pub ocr_keyword: OcrKeywordConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSpikeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_audio_weight")]
    pub weight: f64,
    #[serde(default = "default_hop_size")]
    pub hop_size: f64,
    #[serde(default = "default_zscore_threshold")]
    pub zscore_threshold: f64,
    #[serde(default = "default_transient_delta_db")]
    pub transient_delta_db: f64,
    #[serde(default)]
    pub highfreq_boost: bool,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,
    #[serde(default = "default_min_spike_count")]
    pub min_spike_count: usize,
}

fn default_audio_weight() -> f64 {
    0.30
}
fn default_hop_size() -> f64 {
    0.5
}
fn default_zscore_threshold() -> f64 {
    2.0
}
fn default_transient_delta_db() -> f64 {
    6.0
}
fn default_window_seconds() -> f64 {
    2.0
}
fn default_min_spike_count() -> usize {
    2
}

impl Default for AudioSpikeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: default_audio_weight(),
            hop_size: default_hop_size(),
            zscore_threshold: default_zscore_threshold(),
            transient_delta_db: default_transient_delta_db(),
            highfreq_boost: false,
            window_seconds: default_window_seconds(),
            min_spike_count: default_min_spike_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneChangeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scene_weight")]
    pub weight: f64,
    #[serde(default = "default_zscore_threshold")]
    pub zscore_threshold: f64,
    #[serde(default = "default_true")]
    pub dynamic_interval: bool,
    #[serde(default = "default_true")]
    pub luminance_boost: bool,
    #[serde(default = "default_luminance_delta")]
    pub luminance_delta_threshold: f64,
}

fn default_scene_weight() -> f64 {
    0.25
}
fn default_luminance_delta() -> f64 {
    20.0
}

impl Default for SceneChangeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: default_scene_weight(),
            zscore_threshold: default_zscore_threshold(),
            dynamic_interval: true,
            luminance_boost: true,
            luminance_delta_threshold: default_luminance_delta(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSpikeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_chat_weight")]
    pub weight: f64,
    #[serde(default = "default_bucket_size")]
    pub bucket_size: i64,
    #[serde(default = "default_spike_multiplier")]
    pub spike_multiplier: f64,
}

fn default_chat_weight() -> f64 {
    0.20
}
fn default_bucket_size() -> i64 {
    10
}
fn default_spike_multiplier() -> f64 {
    2.5
}

impl Default for ChatSpikeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: default_chat_weight(),
            bucket_size: default_bucket_size(),
            spike_multiplier: default_spike_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VttSemanticConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_vtt_weight")]
    pub weight: f64,
    #[serde(default = "default_vtt_window")]
    pub window_seconds: f64,
    #[serde(default = "default_true")]
    pub repetition_boost: bool,
    #[serde(default = "default_true")]
    pub escalation_boost: bool,
    #[serde(default = "default_true")]
    pub negation_filter: bool,
}

fn default_vtt_weight() -> f64 {
    0.10
}
fn default_vtt_window() -> f64 {
    3.0
}

impl Default for VttSemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: default_vtt_weight(),
            window_seconds: default_vtt_window(),
            repetition_boost: true,
            escalation_boost: true,
            negation_filter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrKeywordConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ocr_weight")]
    pub weight: f64,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_sample_interval")]
    pub sample_interval: f64,
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
}

fn default_ocr_weight() -> f64 {
    0.15
}
fn default_confidence_threshold() -> f64 {
    60.0
}
fn default_sample_interval() -> f64 {
    1.0
}
fn default_max_frames() -> usize {
    450
}

impl Default for OcrKeywordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            weight: default_ocr_weight(),
            confidence_threshold: default_confidence_threshold(),
            sample_interval: default_sample_interval(),
            max_frames: default_max_frames(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default = "default_max_cpu")]
    pub max_cpu_percent: f32,
    #[serde(default = "default_max_memory")]
    pub max_memory_mb: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_job_timeout")]
    pub job_timeout: u64,
    #[serde(default = "default_nice_priority")]
    pub nice_priority: i32,
}

fn default_max_cpu() -> f32 {
    60.0
}
fn default_max_memory() -> u64 {
    900
}
fn default_poll_interval() -> u64 {
    10
}
fn default_job_timeout() -> u64 {
    1800
}
fn default_nice_priority() -> i32 {
    15
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            max_cpu_percent: default_max_cpu(),
            max_memory_mb: default_max_memory(),
            poll_interval: default_poll_interval(),
            job_timeout: default_job_timeout(),
            nice_priority: default_nice_priority(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_true")]
    pub stream_copy: bool,
    #[serde(default = "default_thumb_width")]
    pub thumbnail_width: u32,
    #[serde(default = "default_thumb_height")]
    pub thumbnail_height: u32,
}

fn default_thumb_width() -> u32 {
    640
}
fn default_thumb_height() -> u32 {
    360
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            stream_copy: true,
            thumbnail_width: default_thumb_width(),
            thumbnail_height: default_thumb_height(),
        }
    }
}

impl HighlightConfig {
    /// Load from `path`, falling back to built-in defaults when the file is
    /// missing or malformed.
    pub fn load(path: Option<&str>) -> Self {
        let Some(path) = path else {
            info!("no highlight config path set, using built-in defaults");
            return Self::default();
        };

        match std::fs::read_to_string(Path::new(path)) {
            Ok(raw) => match serde_yml::from_str(&raw) {
                Ok(config) => {
                    info!("loaded highlight config from {}", path);
                    config
                }
                Err(e) => {
                    warn!("highlight config {} is malformed ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("highlight config not found at {}, using built-in defaults", path);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_defaults() {
        let config = HighlightConfig::default();
        assert_eq!(config.scoring.qualification_threshold, 0.35);
        assert_eq!(config.scoring.max_clips, 5);
        assert_eq!(config.scoring.min_clip_duration, 8);
        assert_eq!(config.signals.audio_spike.weight, 0.30);
        assert!(!config.signals.ocr_keyword.enabled);
        assert!(config.extraction.stream_copy);
        assert_eq!(config.governance.nice_priority, 15);
    }

    #[test]
    fn test_partial_yaml_fills_gaps() {
        let yaml = r#"
scoring:
  max_clips: 3
signals:
  audio_spike:
    weight: 0.5
"#;
        let config: HighlightConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.scoring.max_clips, 3);
        // Unspecified fields keep their defaults
        assert_eq!(config.scoring.min_gap, 5);
        assert_eq!(config.signals.audio_spike.weight, 0.5);
        assert_eq!(config.signals.audio_spike.hop_size, 0.5);
        assert!(config.signals.chat_spike.enabled);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = HighlightConfig::load(Some("/nonexistent/highlight.yaml"));
        assert_eq!(config.scoring.max_clips, 5);
    }
}
