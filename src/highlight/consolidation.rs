//! Consolidation of qualified seconds into non-overlapping clip windows

use super::ClipWindow;
use std::collections::BTreeMap;
use tracing::info;

/// Merge adjacent qualified seconds into clip windows.
///
/// Steps: cluster seconds within `min_gap`, expand with the context buffer,
/// merge windows whose gap is within `min_gap`, clamp durations, rank by
/// score and cap at `max_clips`, then re-sort by start.
pub fn consolidate_clips(
    qualified: &BTreeMap<i64, f64>,
    min_duration: i64,
    max_duration: i64,
    context_buffer: i64,
    min_gap: i64,
    max_clips: usize,
) -> Vec<ClipWindow> {
    if qualified.is_empty() {
        return Vec::new();
    }

    // 1. Cluster consecutive seconds (BTreeMap iteration is sorted)
    let seconds: Vec<i64> = qualified.keys().copied().collect();
    let mut clusters: Vec<Vec<i64>> = Vec::new();
    let mut current = vec![seconds[0]];
    for window in seconds.windows(2) {
        if window[1] - window[0] <= min_gap {
            current.push(window[1]);
        } else {
            clusters.push(std::mem::take(&mut current));
            current.push(window[1]);
        }
    }
    clusters.push(current);
    let cluster_count = clusters.len();

    // 2. Clusters to windows with the context buffer
    let mut raw: Vec<ClipWindow> = clusters
        .into_iter()
        .map(|cluster| {
            let first = cluster[0];
            let last = cluster[cluster.len() - 1];
            let (peak_second, peak_score) = cluster
                .iter()
                .map(|s| (*s, qualified.get(s).copied().unwrap_or(0.0)))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .unwrap_or((first, 0.0));

            ClipWindow {
                index: 0,
                start: (first - context_buffer).max(0),
                end: last + context_buffer,
                score: (peak_score * 10_000.0).round() / 10_000.0,
                peak_second,
                title: None,
                clip_path: None,
                thumbnail_path: None,
                clip_url: None,
                thumbnail_url: None,
                signals: Default::default(),
            }
        })
        .collect();

    // 3. Merge windows that overlap modulo min_gap
    raw.sort_by_key(|c| c.start);
    let mut merged: Vec<ClipWindow> = Vec::new();
    for clip in raw {
        match merged.last_mut() {
            Some(last) if clip.start <= last.end + min_gap => {
                last.end = last.end.max(clip.end);
                if clip.score > last.score {
                    last.score = clip.score;
                    last.peak_second = clip.peak_second;
                }
            }
            _ => merged.push(clip),
        }
    }
    let merged_count = merged.len();

    // 4. Duration constraints
    for clip in &mut merged {
        let duration = clip.end - clip.start;
        if duration < min_duration {
            // Expand symmetrically, never below zero
            let expand = (min_duration - duration) / 2;
            clip.start = (clip.start - expand).max(0);
            clip.end = clip.start + min_duration;
        } else if duration > max_duration {
            // Trim from the end
            clip.end = clip.start + max_duration;
        }
    }

    // 5. Rank by score, cap, re-sort by start
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(max_clips);
    merged.sort_by_key(|c| c.start);

    info!(
        "consolidation: {} clusters -> {} merged -> {} final clips (max={})",
        cluster_count,
        merged_count,
        merged.len(),
        max_clips
    );
    merged
}
