//! Video highlight generation
//!
//! A resource-governed, single-tenant-per-video pipeline: independent
//! per-second signal detectors over a 480p proxy, temporal score fusion and
//! cross-signal qualification, consolidation into non-overlapping clips,
//! stream-copy extraction, batched title enrichment, artifact upload, and a
//! completion/degraded/failure event.

pub mod config;
pub mod consolidation;
pub mod consumer;
pub mod enrichment;
pub mod extraction;
pub mod ffmpeg;
pub mod governance;
pub mod job;
pub mod scoring;
pub mod signals;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Bus payload requesting highlights for one video
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightJobPayload {
    pub video_id: String,
    #[serde(rename = "proxy480pPath", default)]
    pub proxy_480p_path: Option<String>,
    #[serde(default)]
    pub source_video_path: Option<String>,
    #[serde(default)]
    pub chat_path: Option<String>,
    #[serde(default)]
    pub config_path: Option<String>,
    #[serde(default)]
    pub video_title: Option<String>,
    #[serde(default)]
    pub video_description: Option<String>,
    #[serde(default)]
    pub video_category: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// A contiguous highlight window as it moves through the pipeline
#[derive(Debug, Clone)]
pub struct ClipWindow {
    pub index: usize,
    pub start: i64,
    pub end: i64,
    pub score: f64,
    pub peak_second: i64,
    pub title: Option<String>,
    pub clip_path: Option<PathBuf>,
    pub thumbnail_path: Option<PathBuf>,
    pub clip_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Per-signal score at the peak second
    pub signals: BTreeMap<String, f64>,
}

impl ClipWindow {
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// One entry of `highlights.json`
#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub start: i64,
    pub end: i64,
    pub score: f64,
    pub title: String,
    pub signals: BTreeMap<String, f64>,
    #[serde(rename = "clipUrl")]
    pub clip_url: String,
    #[serde(rename = "thumbnailUrl")]
    pub thumbnail_url: String,
}

/// Outcome event published on the complete/degraded topics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(rename = "clipCount")]
    pub clip_count: usize,
    #[serde(rename = "highlightsJsonPath")]
    pub highlights_json_path: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    #[serde(rename = "vttUsed")]
    pub vtt_used: bool,
    pub warnings: Vec<String>,
}

/// Failure event published on the failed topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    #[serde(rename = "videoId")]
    pub video_id: String,
    pub error: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}
