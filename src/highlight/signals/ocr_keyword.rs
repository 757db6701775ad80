//! On-screen-text keyword detection (second pass)
//!
//! Runs only on candidate seconds the cheaper signals flagged. Frames are
//! extracted downscaled/grayscale/contrast-boosted, text-like rectangles
//! are located with a Sobel + morphological-close scan, and OCR runs on the
//! crops (full-frame fallback when nothing is found). Recognized text is
//! normalized for common OCR confusions before pattern matching.

use super::{SignalContext, SignalDetector, SignalKind, SignalScores};
use crate::highlight::config::{OcrKeywordConfig, SignalsConfig};
use crate::highlight::ffmpeg::run_streaming_stderr;
use async_trait::async_trait;
use image::GrayImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

static COMBAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(kill(ed|ing)?|eliminat(ed|ion|e)?|slain|defeat(ed)?|down(ed)?|knock(ed)?|finish(ed)?|head\s?shot|ace|clutch)\b",
    )
    .unwrap()
});

static VICTORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(victor(y|ious)?|win(s|ner|ning)?|defeat(ed)?|champion|game\s+over|round\s+win|mvp|flawless|match\s+complete)\b",
    )
    .unwrap()
});

static INTENSITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(1v[1-5]|last\s+player|overtime|sudden\s+death|match\s+point|ultimate|critical|first\s+blood|penta|multi\s?kill)\b",
    )
    .unwrap()
});

static SPORTS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(goal|scor(ed|ing)?|touchdown|home\s+run|hat\s+trick|strike)\b").unwrap()
});

/// Killfeed lines run against the RAW text: `Name <symbol> Name`.
static KILLFEED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\b[A-Z][a-zA-Z0-9_]{2,15}\b\s*[^a-zA-Z0-9\s]{1,4}\s*\b[A-Z][a-zA-Z0-9_]{2,15}\b|\[[a-zA-Z0-9_]+\]\s*[^a-zA-Z0-9\s]{1,4}\s*\[[a-zA-Z0-9_]+\])",
    )
    .unwrap()
});

static PVP_KILL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][a-zA-Z0-9]{2,12})\b\s*([^a-zA-Z0-9\s]{1,3})\s*\b([A-Z][a-zA-Z0-9]{2,12})\b")
        .unwrap()
});

/// Seconds within which a repeated pattern family earns the temporal boost.
const TEMPORAL_BOOST_WINDOW: f64 = 3.0;

/// OCR confusion normalization before pattern matching.
pub(crate) fn normalize_ocr_text(text: &str) -> String {
    text.to_lowercase()
        .replace('0', "o")
        .replace('1', "l")
        .replace('5', "s")
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect()
}

/// Score one OCR result against all pattern families.
/// Returns the capped score and the names of the families that fired.
pub(crate) fn score_text(raw: &str, normalized: &str) -> (f64, Vec<&'static str>) {
    let mut score: f64 = 0.0;
    let mut matched = Vec::new();

    for (name, pattern, weight, against_raw) in [
        ("combat", &*COMBAT_RE, 0.6, false),
        ("victory", &*VICTORY_RE, 0.8, false),
        ("intensity", &*INTENSITY_RE, 0.5, false),
        ("sports", &*SPORTS_RE, 0.5, false),
        ("killfeed", &*KILLFEED_RE, 0.6, true),
    ] {
        let haystack = if against_raw { raw } else { normalized };
        if pattern.is_match(haystack) {
            score += weight;
            matched.push(name);
        }
    }

    if PVP_KILL_RE.is_match(raw) {
        score += 0.5;
        matched.push("pvp_kill");
    }

    (score.min(1.0), matched)
}

/// Parse tesseract TSV output, keeping words at or above the confidence
/// threshold.
pub(crate) fn parse_tsv_confident(tsv: &str, conf_threshold: f64) -> String {
    let mut words = Vec::new();
    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let conf: f64 = cols[10].parse().unwrap_or(-1.0);
        let word = cols[11].trim();
        if !word.is_empty() && conf >= conf_threshold {
            words.push(word.to_string());
        }
    }
    words.join(" ")
}

/// Text-like rectangle detection: Sobel magnitude, binary threshold,
/// separable morphological close with a wide flat kernel (joining glyphs
/// into lines), then connected components filtered by shape.
pub(crate) fn detect_text_regions(gray: &GrayImage) -> Vec<(u32, u32, u32, u32)> {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return Vec::new();
    }
    let (w_us, h_us) = (w as usize, h as usize);

    // Sobel gradient magnitude, thresholded
    let mut binary = vec![false; w_us * h_us];
    for y in 1..h_us - 1 {
        for x in 1..w_us - 1 {
            let p = |dx: i32, dy: i32| -> i32 {
                let px = (x as i32 + dx) as u32;
                let py = (y as i32 + dy) as u32;
                gray.get_pixel(px, py).0[0] as i32
            };
            let gx = -p(-1, -1) - 2 * p(-1, 0) - p(-1, 1) + p(1, -1) + 2 * p(1, 0) + p(1, 1);
            let gy = -p(-1, -1) - 2 * p(0, -1) - p(1, -1) + p(-1, 1) + 2 * p(0, 1) + p(1, 1);
            if (gx.abs().min(255) + gy.abs().min(255)).min(255) >= 50 {
                binary[y * w_us + x] = true;
            }
        }
    }

    // Morphological close (dilate then erode) with a 20x5 rectangle,
    // applied separably.
    let closed = erode(&dilate(&binary, w_us, h_us, 20, 5), w_us, h_us, 20, 5);

    // Connected components with bounding boxes
    let mut visited = vec![false; w_us * h_us];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for start in 0..w_us * h_us {
        if !closed[start] || visited[start] {
            continue;
        }
        let (mut min_x, mut max_x) = (w_us, 0usize);
        let (mut min_y, mut max_y) = (h_us, 0usize);
        visited[start] = true;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w_us, idx / w_us);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            let neighbors = [
                (x > 0).then(|| idx - 1),
                (x + 1 < w_us).then(|| idx + 1),
                (y > 0).then(|| idx - w_us),
                (y + 1 < h_us).then(|| idx + w_us),
            ];
            for neighbor in neighbors.into_iter().flatten() {
                if closed[neighbor] && !visited[neighbor] {
                    visited[neighbor] = true;
                    stack.push(neighbor);
                }
            }
        }

        let (rw, rh) = (max_x - min_x + 1, max_y - min_y + 1);
        if rw < 15 || rh > 200 {
            continue;
        }
        let aspect = rw as f64 / rh.max(1) as f64;
        if !(0.5..=30.0).contains(&aspect) {
            continue;
        }
        if rw * rh < 100 {
            continue;
        }
        regions.push((min_x as u32, min_y as u32, rw as u32, rh as u32));
    }

    regions
}

fn dilate(src: &[bool], w: usize, h: usize, kw: usize, kh: usize) -> Vec<bool> {
    morph(src, w, h, kw, kh, true)
}

fn erode(src: &[bool], w: usize, h: usize, kw: usize, kh: usize) -> Vec<bool> {
    morph(src, w, h, kw, kh, false)
}

fn morph(src: &[bool], w: usize, h: usize, kw: usize, kh: usize, max_op: bool) -> Vec<bool> {
    // Horizontal pass
    let mut mid = vec![!max_op; src.len()];
    let half_w = kw / 2;
    for y in 0..h {
        for x in 0..w {
            let lo = x.saturating_sub(half_w);
            let hi = (x + half_w).min(w - 1);
            let row = &src[y * w + lo..=y * w + hi];
            mid[y * w + x] = if max_op {
                row.iter().any(|v| *v)
            } else {
                row.iter().all(|v| *v)
            };
        }
    }
    // Vertical pass
    let mut out = vec![!max_op; src.len()];
    let half_h = kh / 2;
    for y in 0..h {
        let lo = y.saturating_sub(half_h);
        let hi = (y + half_h).min(h - 1);
        for x in 0..w {
            let mut acc = !max_op;
            for yy in lo..=hi {
                let v = mid[yy * w + x];
                acc = if max_op { acc || v } else { acc && v };
            }
            out[y * w + x] = acc;
        }
    }
    out
}

async fn run_tesseract(image_path: &Path, psm: &str, conf_threshold: f64) -> String {
    let output = Command::new("tesseract")
        .arg(image_path)
        .args([
            "stdout",
            "--oem",
            "1",
            "--psm",
            psm,
            "-c",
            "load_system_dawg=0",
            "-c",
            "load_freq_dawg=0",
            "tsv",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            parse_tsv_confident(&String::from_utf8_lossy(&output.stdout), conf_threshold)
        }
        Ok(_) => String::new(),
        Err(e) => {
            debug!("tesseract invocation failed: {}", e);
            String::new()
        }
    }
}

pub struct OcrKeywordSignal;

#[async_trait]
impl SignalDetector for OcrKeywordSignal {
    fn kind(&self) -> SignalKind {
        SignalKind::OcrKeyword
    }

    async fn detect(
        &self,
        config: &SignalsConfig,
        ctx: &SignalContext,
    ) -> crate::Result<SignalScores> {
        let cfg = &config.ocr_keyword;
        if !cfg.enabled {
            info!("ocr: signal disabled");
            return Ok(SignalScores::new());
        }

        // Second pass with an empty candidate set means nothing to do.
        if matches!(&ctx.target_seconds, Some(targets) if targets.is_empty()) {
            return Ok(SignalScores::new());
        }

        // Tesseract availability probe
        let probe = Command::new("tesseract")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if !matches!(probe, Ok(status) if status.success()) {
            warn!("ocr: tesseract not available - skipping");
            return Ok(SignalScores::new());
        }

        let frame_dir =
            std::env::temp_dir().join(format!("ocr_frames_{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&frame_dir).await?;

        let result = self.scan_frames(cfg, ctx, &frame_dir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&frame_dir).await {
            debug!("ocr: frame dir cleanup failed: {}", e);
        }
        result
    }
}

impl OcrKeywordSignal {
    async fn scan_frames(
        &self,
        cfg: &OcrKeywordConfig,
        ctx: &SignalContext,
        frame_dir: &Path,
    ) -> crate::Result<SignalScores> {
        let sorted_targets: Vec<i64> = ctx
            .target_seconds
            .as_ref()
            .map(|t| t.iter().copied().collect())
            .unwrap_or_default();

        // Frame selection: exact candidate seconds in the second pass, an
        // adaptive 1-in-N sampling otherwise.
        let mut sample_interval = cfg.sample_interval.max(0.01);
        let fps_filter = if !sorted_targets.is_empty() {
            let select_expr: Vec<String> =
                sorted_targets.iter().map(|s| format!("eq(n,{})", s)).collect();
            info!(
                "ocr: target pass - scanning {} candidate seconds",
                sorted_targets.len()
            );
            format!("fps=1,select='{}'", select_expr.join("+"))
        } else {
            if ctx.duration_seconds > cfg.max_frames as f64 {
                sample_interval =
                    sample_interval.max(ctx.duration_seconds / cfg.max_frames as f64);
                info!(
                    "ocr: long video, adaptive sample_interval={:.2}s",
                    sample_interval
                );
            }
            format!("fps=1/{}", sample_interval)
        };

        let vf = format!(
            "{},scale=426:240,format=gray,eq=contrast=1.4:brightness=0.05",
            fps_filter
        );
        let pattern = frame_dir.join("frame_%06d.jpg");

        // The extraction runs under a raised niceness; OCR frames are the
        // least urgent work on the box.
        let mut cmd = Command::new("nice");
        cmd.args(["-n", "15", "ffmpeg", "-y", "-i", &ctx.proxy_path, "-vf", &vf, "-q:v", "3"])
            .arg(&pattern);
        let (ok, lines) = run_streaming_stderr(cmd).await?;
        if !ok {
            let tail: String = lines
                .iter()
                .rev()
                .take(4)
                .rev()
                .cloned()
                .collect::<Vec<_>>()
                .join(" | ");
            warn!("ocr: frame extraction failed: {}", tail);
            return Ok(SignalScores::new());
        }

        let mut frame_files: Vec<PathBuf> = std::fs::read_dir(frame_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "jpg").unwrap_or(false))
            .collect();
        frame_files.sort();
        info!("ocr: processing {} frames", frame_files.len());

        let mut scores = SignalScores::new();
        let mut recent_patterns: HashMap<&'static str, Vec<f64>> = HashMap::new();

        for (i, frame_path) in frame_files.iter().enumerate() {
            let second = if !sorted_targets.is_empty() {
                match sorted_targets.get(i) {
                    Some(sec) => *sec,
                    None => continue,
                }
            } else {
                (i as f64 * sample_interval) as i64
            };

            let texts = match self.ocr_frame(cfg, frame_path, frame_dir, i).await {
                Ok(texts) => texts,
                Err(e) => {
                    debug!("ocr: frame {} failed: {}", i, e);
                    continue;
                }
            };

            let mut frame_score: f64 = 0.0;
            let mut frame_patterns: Vec<&'static str> = Vec::new();
            for raw in &texts {
                let normalized = normalize_ocr_text(raw);
                let (score, matched) = score_text(raw, &normalized);
                if score > 0.0 {
                    frame_score = frame_score.max(score);
                    frame_patterns.extend(matched);
                    debug!("ocr: t={}s matched {:?} (score={:.2})", second, frame_patterns, score);
                }
            }

            // Temporal boost: the same family firing twice within the
            // window is a strong hint of a real on-screen event.
            for name in frame_patterns {
                let hits = recent_patterns.entry(name).or_default();
                hits.push(second as f64);
                hits.retain(|t| second as f64 - t <= TEMPORAL_BOOST_WINDOW);
                if hits.len() >= 2 {
                    frame_score = (frame_score + 0.2).min(1.0);
                }
            }

            if frame_score > 0.0 {
                let entry = scores.entry(second).or_insert(0.0);
                *entry = entry.max(frame_score);
            }

            tokio::task::yield_now().await;
        }

        info!(
            "ocr: complete - {} keyword matches in {} frames",
            scores.len(),
            frame_files.len()
        );
        Ok(scores)
    }

    /// OCR one frame: region crops with the primary segmentation mode,
    /// full-frame sparse mode as the fallback.
    async fn ocr_frame(
        &self,
        cfg: &OcrKeywordConfig,
        frame_path: &Path,
        frame_dir: &Path,
        index: usize,
    ) -> crate::Result<Vec<String>> {
        let path = frame_path.to_path_buf();
        let (dynamic, regions) = tokio::task::spawn_blocking(move || {
            let dynamic = image::open(&path)?;
            let regions = detect_text_regions(&dynamic.to_luma8());
            Ok::<_, image::ImageError>((dynamic, regions))
        })
        .await
        .map_err(|e| crate::error::PlatformError::Generic(e.into()))?
        .map_err(|e| crate::error::PlatformError::Generic(e.into()))?;

        let mut texts = Vec::new();

        if !regions.is_empty() {
            // Largest rectangles first, capped at 5
            let mut regions = regions;
            regions.sort_by_key(|(_, _, w, h)| std::cmp::Reverse(w * h));
            regions.truncate(5);

            for (r, (x, y, w, h)) in regions.into_iter().enumerate() {
                let pad = 4u32;
                let x1 = x.saturating_sub(pad);
                let y1 = y.saturating_sub(pad);
                let x2 = (x + w + pad).min(dynamic.width());
                let y2 = (y + h + pad).min(dynamic.height());

                let crop_path = frame_dir.join(format!("crop_{:06}_{}.jpg", index, r));
                let crop = dynamic.crop_imm(x1, y1, x2 - x1, y2 - y1);
                if crop.save(&crop_path).is_err() {
                    continue;
                }

                let text = run_tesseract(&crop_path, "6", cfg.confidence_threshold).await;
                if !text.is_empty() {
                    texts.push(text);
                }
            }

            if texts.is_empty() {
                let text = run_tesseract(frame_path, "11", cfg.confidence_threshold).await;
                if !text.is_empty() {
                    texts.push(text);
                }
            }
        } else {
            let text = run_tesseract(frame_path, "11", cfg.confidence_threshold).await;
            if !text.is_empty() {
                texts.push(text);
            }
        }

        Ok(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ocr_confusions() {
        assert_eq!(normalize_ocr_text("V1CT0RY"), "vlctory");
        assert_eq!(normalize_ocr_text("DOUBLE K1LL!"), "double klll ");
        assert_eq!(normalize_ocr_text("5LAIN"), "slain");
    }

    #[test]
    fn test_pattern_scoring() {
        let (score, matched) = score_text("VICTORY", &normalize_ocr_text("VICTORY"));
        assert_eq!(score, 0.8);
        assert_eq!(matched, vec!["victory"]);

        let (score, matched) = score_text("headshot", "headshot");
        assert_eq!(score, 0.6);
        assert_eq!(matched, vec!["combat"]);

        let (score, _) = score_text("nothing here", "nothing here");
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_killfeed_matches_raw_only() {
        let raw = "PlayerOne >> PlayerTwo";
        let (score, matched) = score_text(raw, &normalize_ocr_text(raw));
        assert!(matched.contains(&"killfeed"));
        assert!(matched.contains(&"pvp_kill"));
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_score_caps_at_one() {
        let raw = "VICTORY Headshot GOAL overtime";
        let norm = normalize_ocr_text(raw);
        let (score, matched) = score_text(raw, &norm);
        assert_eq!(score, 1.0);
        assert!(matched.len() >= 3);
    }

    #[test]
    fn test_tsv_confidence_filter() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t91.5\tVICTORY\n\
                   5\t1\t1\t1\t1\t2\t70\t10\t50\t20\t31.0\tgarbled\n\
                   5\t1\t1\t1\t1\t3\t130\t10\t50\t20\t88.0\tROYALE\n";
        assert_eq!(parse_tsv_confident(tsv, 60.0), "VICTORY ROYALE");
        assert_eq!(parse_tsv_confident(tsv, 95.0), "");
    }

    #[test]
    fn test_region_detection_finds_text_band() {
        // Synthetic frame: flat background with one high-contrast wide
        // striped band that reads like a text line.
        let mut img = GrayImage::from_pixel(200, 100, image::Luma([10u8]));
        for x in 40..160 {
            for y in 45..55 {
                // Vertical stripes create strong horizontal gradients
                if (x / 3) % 2 == 0 {
                    img.put_pixel(x, y, image::Luma([250u8]));
                }
            }
        }
        let regions = detect_text_regions(&img);
        assert!(!regions.is_empty(), "expected at least one region");
        let (x, y, w, h) = regions[0];
        assert!(w >= 15);
        assert!(x <= 45 && x + w >= 155, "band not covered: {:?}", (x, y, w, h));
    }

    #[test]
    fn test_region_detection_flat_image_empty() {
        let img = GrayImage::from_pixel(200, 100, image::Luma([128u8]));
        assert!(detect_text_regions(&img).is_empty());
    }
}
