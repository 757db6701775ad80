//! Highlight job orchestration
//!
//! A linear state machine: RECEIVED -> LOCKED -> PROBING -> SIGNAL_PASS_1
//! -> SIGNAL_PASS_2 (OCR over flagged regions) -> SCORING -> CONSOLIDATED
//! -> (EMPTY | EXTRACTING -> ENRICHING -> UPLOADING -> COMPLETE/DEGRADED).
//! The governance barrier sits between transitions; every terminal path
//! cleans up its temp directories, and the caller releases the lock.

use super::config::HighlightConfig;
use super::consolidation::consolidate_clips;
use super::enrichment;
use super::extraction::extract_all_clips;
use super::ffmpeg::probe_duration;
use super::governance::GovernanceMonitor;
use super::scoring::{compute_scores, qualify_seconds};
use super::signals::{registry, SignalContext, SignalDetector, SignalKind, SignalScores};
use super::{HighlightJobPayload, JobOutcome, ManifestEntry};
use crate::error::{PipelineError, PlatformError};
use crate::intelligence::AiGateway;
use crate::metrics::Metrics;
use crate::storage::{self, BlobStore};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// OCR candidates are taken this many seconds around every flagged second.
const OCR_CANDIDATE_BUFFER: i64 = 5;

/// Initial fused totals at or above this flag a region for the OCR pass.
const OCR_CANDIDATE_FLOOR: f64 = 0.1;

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Locked,
    Probing,
    SignalPass1,
    SignalPass2,
    Scoring,
    Consolidated,
    Empty,
    Extracting,
    Enriching,
    Uploading,
    Complete,
    Degraded,
    Failed,
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Received => "received",
            JobState::Locked => "locked",
            JobState::Probing => "probing",
            JobState::SignalPass1 => "signal_pass_1",
            JobState::SignalPass2 => "signal_pass_2",
            JobState::Scoring => "scoring",
            JobState::Consolidated => "consolidated",
            JobState::Empty => "empty",
            JobState::Extracting => "extracting",
            JobState::Enriching => "enriching",
            JobState::Uploading => "uploading",
            JobState::Complete => "complete",
            JobState::Degraded => "degraded",
            JobState::Failed => "failed",
        }
    }
}

pub struct JobRunner {
    storage: Arc<BlobStore>,
    gateway: Arc<dyn AiGateway>,
    metrics: Arc<Metrics>,
    volume_path: String,
    bucket: String,
}

struct JobScratch {
    state: JobState,
    warnings: Vec<String>,
    download_dir: PathBuf,
    clip_dir: PathBuf,
}

impl JobRunner {
    pub fn new(
        storage: Arc<BlobStore>,
        gateway: Arc<dyn AiGateway>,
        metrics: Arc<Metrics>,
        volume_path: String,
        bucket: String,
    ) -> Self {
        Self {
            storage,
            gateway,
            metrics,
            volume_path: volume_path.trim_end_matches('/').to_string(),
            bucket,
        }
    }

    /// Execute a full highlight job. The distributed lock is already held
    /// by the caller.
    pub async fn run(&self, payload: &HighlightJobPayload) -> crate::Result<JobOutcome> {
        let started = Instant::now();
        let base = std::env::temp_dir();
        let mut scratch = JobScratch {
            state: JobState::Locked,
            warnings: Vec::new(),
            download_dir: base.join(format!("highlight_{}_dl_{}", payload.video_id, uuid::Uuid::new_v4())),
            clip_dir: base.join(format!("highlight_{}_{}", payload.video_id, uuid::Uuid::new_v4())),
        };
        tokio::fs::create_dir_all(&scratch.download_dir).await?;
        tokio::fs::create_dir_all(&scratch.clip_dir).await?;

        let result = self.execute(payload, &mut scratch, started).await;

        for dir in [&scratch.download_dir, &scratch.clip_dir] {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                if dir.exists() {
                    warn!("temp dir cleanup failed for {}: {}", dir.display(), e);
                }
            }
        }

        if result.is_err() {
            self.transition(&mut scratch, JobState::Failed, &payload.video_id);
        }
        result
    }

    fn transition(&self, scratch: &mut JobScratch, next: JobState, video_id: &str) {
        info!(
            "job {}: {} -> {}",
            video_id,
            scratch.state.name(),
            next.name()
        );
        scratch.state = next;
    }

    async fn execute(
        &self,
        payload: &HighlightJobPayload,
        scratch: &mut JobScratch,
        started: Instant,
    ) -> crate::Result<JobOutcome> {
        let video_id = payload.video_id.clone();
        info!("starting highlight job for video {}", video_id);

        // Configuration: per-job file wins, then the worker-wide path.
        let env_path = std::env::var("HIGHLIGHT_CONFIG_PATH").ok();
        let config_path = payload.config_path.as_deref().or(env_path.as_deref());
        let config = HighlightConfig::load(config_path);

        let governor = GovernanceMonitor::new(&config.governance, self.metrics.clone());
        governor.apply_nice().await;

        // Resolve media paths
        governor.wait_until_safe().await;
        let proxy_path = self
            .resolve_media(
                payload.proxy_480p_path.as_deref(),
                &scratch.download_dir.join("proxy.mp4"),
            )
            .await?
            .ok_or_else(|| {
                PlatformError::Pipeline(PipelineError::Probe(
                    "no proxy video provided in payload".to_string(),
                ))
            })?;

        let source_path = match self
            .resolve_media(
                payload.source_video_path.as_deref(),
                &scratch.download_dir.join("source.mp4"),
            )
            .await
        {
            Ok(Some(path)) => path,
            Ok(None) => proxy_path.clone(),
            Err(e) => {
                warn!("source video unavailable ({}), analyzing proxy instead", e);
                proxy_path.clone()
            }
        };

        // Probe
        self.transition(scratch, JobState::Probing, &video_id);
        let duration = probe_duration(&proxy_path).await?;
        let duration_secs = duration as i64;

        // Captions are opportunistic
        let vtt_path = self.find_vtt(&video_id, &scratch.download_dir).await;
        self.metrics
            .vtt_used
            .with_label_values(&[if vtt_path.is_some() { "true" } else { "false" }])
            .inc();

        let signal_timeout = Duration::from_secs(config.governance.job_timeout);
        let ctx = SignalContext {
            proxy_path: proxy_path.clone(),
            chat_path: payload.chat_path.clone(),
            vtt_path: vtt_path.clone(),
            duration_seconds: duration,
            target_seconds: None,
        };

        // Pass 1: cheap signals
        self.transition(scratch, JobState::SignalPass1, &video_id);
        let mut signal_outputs: HashMap<SignalKind, SignalScores> = HashMap::new();
        let mut signal_weights: HashMap<SignalKind, f64> = HashMap::new();

        for detector in registry() {
            let kind = detector.kind();
            if !SignalKind::first_pass().contains(&kind) || !kind.enabled(&config.signals) {
                continue;
            }
            signal_weights.insert(kind, kind.weight(&config.signals));

            governor.wait_until_safe().await;
            let timer = Instant::now();
            match tokio::time::timeout(signal_timeout, detector.detect(&config.signals, &ctx)).await
            {
                Ok(Ok(scores)) => {
                    self.metrics
                        .signal_seconds
                        .with_label_values(&[kind.name()])
                        .observe(timer.elapsed().as_secs_f64());
                    info!(
                        "pass 1: signal '{}' complete ({:.1}s)",
                        kind.name(),
                        timer.elapsed().as_secs_f64()
                    );
                    signal_outputs.insert(kind, scores);
                }
                Ok(Err(e)) => {
                    error!("pass 1: signal '{}' failed: {}", kind.name(), e);
                    self.metrics
                        .signal_failures
                        .with_label_values(&[kind.name()])
                        .inc();
                }
                Err(_) => {
                    error!("pass 1: signal '{}' timed out", kind.name());
                    self.metrics
                        .signal_failures
                        .with_label_values(&[kind.name()])
                        .inc();
                }
            }
        }

        // Candidate regions for the expensive second pass
        let initial = compute_scores(&signal_outputs, &signal_weights, duration_secs).await;
        let mut candidates: BTreeSet<i64> = BTreeSet::new();
        for (sec, score) in &initial {
            if score.total >= OCR_CANDIDATE_FLOOR {
                let lo = (sec - OCR_CANDIDATE_BUFFER).max(0);
                let hi = (sec + OCR_CANDIDATE_BUFFER).min(duration_secs - 1);
                candidates.extend(lo..=hi);
            }
        }

        // Pass 2: OCR on candidates only
        if config.signals.ocr_keyword.enabled {
            self.transition(scratch, JobState::SignalPass2, &video_id);
            let kind = SignalKind::OcrKeyword;
            signal_weights.insert(kind, kind.weight(&config.signals));

            let ocr_ctx = SignalContext {
                target_seconds: Some(candidates.clone()),
                ..ctx.clone()
            };

            governor.wait_until_safe().await;
            let timer = Instant::now();
            let detector = super::signals::ocr_keyword::OcrKeywordSignal;
            match tokio::time::timeout(signal_timeout, detector.detect(&config.signals, &ocr_ctx))
                .await
            {
                Ok(Ok(scores)) => {
                    self.metrics
                        .signal_seconds
                        .with_label_values(&[kind.name()])
                        .observe(timer.elapsed().as_secs_f64());
                    info!(
                        "pass 2: OCR complete on {} candidate seconds ({:.1}s)",
                        candidates.len(),
                        timer.elapsed().as_secs_f64()
                    );
                    signal_outputs.insert(kind, scores);
                }
                Ok(Err(e)) => {
                    error!("pass 2: OCR failed: {}", e);
                    self.metrics
                        .signal_failures
                        .with_label_values(&[kind.name()])
                        .inc();
                }
                Err(_) => {
                    error!("pass 2: OCR timed out");
                    self.metrics
                        .signal_failures
                        .with_label_values(&[kind.name()])
                        .inc();
                }
            }
        }

        // Score and qualify
        self.transition(scratch, JobState::Scoring, &video_id);
        let aggregate = compute_scores(&signal_outputs, &signal_weights, duration_secs).await;
        let qualified =
            qualify_seconds(&aggregate, config.scoring.qualification_threshold).await;

        if qualified.is_empty() {
            info!("no qualifying seconds for {} - 0 clips", video_id);
            self.transition(scratch, JobState::Empty, &video_id);
            self.metrics.highlight_jobs.with_label_values(&["empty"]).inc();
            return Ok(self.empty_outcome(payload, started, vtt_path.is_some(), scratch));
        }

        // Consolidate
        let mut clips = consolidate_clips(
            &qualified,
            config.scoring.min_clip_duration,
            config.scoring.max_clip_duration,
            config.scoring.context_buffer,
            config.scoring.min_gap,
            config.scoring.max_clips,
        );
        self.transition(scratch, JobState::Consolidated, &video_id);

        if clips.is_empty() {
            info!("no clips after consolidation for {}", video_id);
            self.transition(scratch, JobState::Empty, &video_id);
            self.metrics.highlight_jobs.with_label_values(&["empty"]).inc();
            return Ok(self.empty_outcome(payload, started, vtt_path.is_some(), scratch));
        }

        // Snapshot per-signal contribution at each clip's peak
        for clip in &mut clips {
            for (kind, scores) in &signal_outputs {
                clip.signals.insert(
                    kind.name().to_string(),
                    scores.get(&clip.peak_second).copied().unwrap_or(0.0),
                );
            }
        }

        // Extract
        self.transition(scratch, JobState::Extracting, &video_id);
        governor.wait_until_safe().await;
        let requested = clips.len();
        let mut extracted =
            extract_all_clips(&source_path, clips, &scratch.clip_dir, &config.extraction).await?;
        if extracted.is_empty() {
            return Err(PlatformError::Pipeline(PipelineError::NothingExtracted));
        }
        if extracted.len() < requested {
            scratch.warnings.push(format!(
                "{} of {} clips failed extraction",
                requested - extracted.len(),
                requested
            ));
        }

        // Titles
        self.transition(scratch, JobState::Enriching, &video_id);
        let vtt_content = match &vtt_path {
            Some(path) => tokio::fs::read_to_string(path).await.ok(),
            None => None,
        };
        self.metrics
            .intelligence_calls
            .with_label_values(&["title_gen"])
            .inc_by(extracted.len() as u64);
        if let Some(warning) = enrichment::enrich_clips(
            &mut extracted,
            self.gateway.as_ref(),
            payload.video_title.as_deref().unwrap_or("Untitled Video"),
            payload.video_description.as_deref().unwrap_or(""),
            payload.video_category.as_deref().unwrap_or("Unknown"),
            vtt_content.as_deref(),
        )
        .await
        {
            scratch.warnings.push(warning);
        }

        // Upload artifacts + manifest
        self.transition(scratch, JobState::Uploading, &video_id);
        let mut manifest = Vec::with_capacity(extracted.len());
        for clip in &mut extracted {
            if let Some(path) = clip.clip_path.clone() {
                let key = storage::clip_key(&video_id, clip.index);
                clip.clip_url = Some(self.storage.upload_file(&key, &path, "video/mp4").await?);
            }
            if let Some(path) = clip.thumbnail_path.clone() {
                let key = storage::thumb_key(&video_id, clip.index);
                clip.thumbnail_url =
                    Some(self.storage.upload_file(&key, &path, "image/jpeg").await?);
            }

            manifest.push(ManifestEntry {
                index: clip.index,
                start: clip.start,
                end: clip.end,
                score: clip.score,
                title: clip
                    .title
                    .clone()
                    .unwrap_or_else(|| enrichment::default_title(clip.index)),
                signals: clip.signals.clone(),
                clip_url: clip.clip_url.clone().unwrap_or_default(),
                thumbnail_url: clip.thumbnail_url.clone().unwrap_or_default(),
            });
        }

        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        let manifest_path = self
            .storage
            .upload_bytes(
                &storage::manifest_key(&video_id),
                manifest_bytes,
                "application/json",
            )
            .await?;

        let terminal = if scratch.warnings.is_empty() {
            JobState::Complete
        } else {
            JobState::Degraded
        };
        self.transition(scratch, terminal, &video_id);

        self.metrics
            .highlight_clips
            .inc_by(extracted.len() as u64);
        self.metrics
            .highlight_jobs
            .with_label_values(&["success"])
            .inc();
        self.metrics
            .highlight_job_seconds
            .observe(started.elapsed().as_secs_f64());

        info!(
            "highlight job {} for {}: {} clips in {:.1}s",
            terminal.name(),
            video_id,
            extracted.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(JobOutcome {
            video_id,
            clip_count: extracted.len(),
            highlights_json_path: manifest_path,
            duration_ms: started.elapsed().as_millis() as u64,
            vtt_used: vtt_path.is_some(),
            warnings: scratch.warnings.clone(),
        })
    }

    fn empty_outcome(
        &self,
        payload: &HighlightJobPayload,
        started: Instant,
        vtt_used: bool,
        scratch: &JobScratch,
    ) -> JobOutcome {
        JobOutcome {
            video_id: payload.video_id.clone(),
            clip_count: 0,
            highlights_json_path: String::new(),
            duration_ms: started.elapsed().as_millis() as u64,
            vtt_used,
            warnings: scratch.warnings.clone(),
        }
    }

    /// Resolve a storage reference to something the transcoder can open:
    /// URLs and absolute paths pass through, bucket-relative paths try the
    /// mounted volume and then a blob download.
    async fn resolve_media(
        &self,
        reference: Option<&str>,
        download_target: &Path,
    ) -> crate::Result<Option<String>> {
        let Some(reference) = reference.filter(|r| !r.is_empty()) else {
            return Ok(None);
        };

        if reference.starts_with("http://") || reference.starts_with("https://") {
            return Ok(Some(reference.to_string()));
        }
        if reference.starts_with('/') && tokio::fs::metadata(reference).await.is_ok() {
            return Ok(Some(reference.to_string()));
        }

        // Strip a leading "{bucket}/" so keys work against the volume
        let key = reference
            .strip_prefix(&format!("{}/", self.bucket))
            .unwrap_or(reference);

        let mounted = format!("{}/{}/{}", self.volume_path, self.bucket, key);
        if tokio::fs::metadata(&mounted).await.is_ok() {
            return Ok(Some(mounted));
        }

        self.storage
            .download_to(&self.bucket, key, download_target)
            .await?;
        Ok(Some(download_target.to_string_lossy().to_string()))
    }

    /// Opportunistic caption discovery: mounted volume first, then the
    /// blob API into the job's download dir.
    async fn find_vtt(&self, video_id: &str, download_dir: &Path) -> Option<String> {
        let key = storage::subtitle_key(video_id);

        let mounted = format!("{}/{}/{}", self.volume_path, self.bucket, key);
        if tokio::fs::metadata(&mounted).await.is_ok() {
            info!("found captions on volume: {}", mounted);
            return Some(mounted);
        }

        let local = download_dir.join("en.vtt");
        match self.storage.download_to(&self.bucket, &key, &local).await {
            Ok(()) => {
                info!("downloaded captions via blob API for {}", video_id);
                Some(local.to_string_lossy().to_string())
            }
            Err(e) => {
                info!("no captions for {} ({})", video_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(JobState::SignalPass1.name(), "signal_pass_1");
        assert_eq!(JobState::Complete.name(), "complete");
        assert_eq!(JobState::Failed.name(), "failed");
    }

    #[test]
    fn test_ocr_candidate_expansion() {
        // Mirror of the candidate loop: a flagged second pulls in ±5s,
        // clamped to the video bounds.
        let duration = 20i64;
        let flagged = [2i64, 18];
        let mut candidates = BTreeSet::new();
        for sec in flagged {
            let lo = (sec - OCR_CANDIDATE_BUFFER).max(0);
            let hi = (sec + OCR_CANDIDATE_BUFFER).min(duration - 1);
            candidates.extend(lo..=hi);
        }
        assert!(candidates.contains(&0));
        assert!(candidates.contains(&7));
        assert!(!candidates.contains(&8));
        assert!(candidates.contains(&13));
        assert!(candidates.contains(&19));
        assert!(!candidates.contains(&20));
    }
}
