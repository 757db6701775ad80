//! Clip title enrichment
//!
//! One batched chat call names every clip at once: per-clip context (a
//! caption slice, detected on-screen terms, the active signal names) plus
//! the video's own title/description/category. The response is a strict
//! JSON object mapping clip index to title; anything unparseable falls
//! back to numbered defaults.

use super::ClipWindow;
use crate::intelligence::AiGateway;
use crate::prompts;
use std::collections::HashMap;
use tracing::{error, info};

/// Maximum characters of caption content included in the batch prompt.
const VTT_CONTEXT_CAP: usize = 2000;

/// Titles longer than this are cut.
const TITLE_MAX_CHARS: usize = 60;

pub fn default_title(index: usize) -> String {
    format!("Highlight #{}", index + 1)
}

/// Build the per-clip context strings handed to the title model.
pub(crate) fn build_contexts(clips: &[ClipWindow], vtt_content: Option<&str>) -> Vec<(usize, String)> {
    clips
        .iter()
        .map(|clip| {
            let mut parts = Vec::new();

            if let Some(vtt) = vtt_content {
                let slice: String = vtt.chars().take(VTT_CONTEXT_CAP).collect();
                parts.push(format!("TRANSCRIPT SNIPPET: {}", slice));
            }

            let active: Vec<&str> = clip
                .signals
                .iter()
                .filter(|(_, score)| **score > 0.0)
                .map(|(name, _)| name.as_str())
                .collect();
            if !active.is_empty() {
                parts.push(format!("SYSTEM SIGNALS: {}", active.join(", ")));
            }

            parts.push(format!(
                "WINDOW: {}s to {}s, peak at {}s",
                clip.start, clip.end, clip.peak_second
            ));

            (clip.index, parts.join("\n"))
        })
        .collect()
}

/// Parse the `{index: title}` response, clamping lengths and filling
/// missing indices with defaults.
pub(crate) fn parse_titles(raw: &str, clips: &[ClipWindow]) -> HashMap<usize, String> {
    let mut titles: HashMap<usize, String> = HashMap::new();

    if let Ok(value) = prompts::parse_json_response(raw) {
        if let Some(object) = value.as_object() {
            for (key, title) in object {
                if let (Ok(index), Some(title)) = (key.parse::<usize>(), title.as_str()) {
                    let clamped: String = title.trim().chars().take(TITLE_MAX_CHARS).collect();
                    if !clamped.is_empty() {
                        titles.insert(index, clamped);
                    }
                }
            }
        }
    }

    for clip in clips {
        titles
            .entry(clip.index)
            .or_insert_with(|| default_title(clip.index));
    }
    titles
}

/// Generate titles for all clips in one gateway call, mutating the clips
/// in place. Failure falls back to defaults and reports a warning string.
pub async fn enrich_clips(
    clips: &mut [ClipWindow],
    gateway: &dyn AiGateway,
    video_title: &str,
    video_description: &str,
    video_category: &str,
    vtt_content: Option<&str>,
) -> Option<String> {
    if clips.is_empty() {
        return None;
    }

    let contexts = build_contexts(clips, vtt_content);
    let prompt = prompts::highlight_batch_prompt(
        video_title,
        video_description,
        video_category,
        &contexts,
    );

    let outcome = gateway
        .chat(
            Some(prompts::HIGHLIGHT_TITLE_SYSTEM_PROMPT),
            &prompt,
            Some("fast"),
        )
        .await;

    match outcome {
        Ok(raw) => {
            let titles = parse_titles(&raw, clips);
            for clip in clips.iter_mut() {
                clip.title = titles.get(&clip.index).cloned();
            }
            info!("titled {} clips via batch call", clips.len());
            None
        }
        Err(e) => {
            error!("title enrichment failed, using defaults: {}", e);
            for clip in clips.iter_mut() {
                clip.title = Some(default_title(clip.index));
            }
            Some(format!("title enrichment failed: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn clip(index: usize) -> ClipWindow {
        let mut signals = BTreeMap::new();
        signals.insert("audio_spike".to_string(), 0.9);
        signals.insert("chat_spike".to_string(), 0.0);
        ClipWindow {
            index,
            start: 57,
            end: 65,
            score: 0.8,
            peak_second: 60,
            title: None,
            clip_path: None,
            thumbnail_path: None,
            clip_url: None,
            thumbnail_url: None,
            signals,
        }
    }

    #[test]
    fn test_contexts_include_signals_not_zero_scored() {
        let clips = vec![clip(0)];
        let contexts = build_contexts(&clips, Some("WEBVTT caption text"));
        assert_eq!(contexts.len(), 1);
        let (index, ctx) = &contexts[0];
        assert_eq!(*index, 0);
        assert!(ctx.contains("TRANSCRIPT SNIPPET"));
        assert!(ctx.contains("audio_spike"));
        assert!(!ctx.contains("chat_spike"));
    }

    #[test]
    fn test_parse_titles_happy_path() {
        let clips = vec![clip(0), clip(1)];
        let raw = r#"```json
{"0": "Clutch 1v3 on A-Site", "1": "The mic was muted all along"}
```"#;
        let titles = parse_titles(raw, &clips);
        assert_eq!(titles.get(&0).unwrap(), "Clutch 1v3 on A-Site");
        assert_eq!(titles.get(&1).unwrap(), "The mic was muted all along");
    }

    #[test]
    fn test_parse_titles_fills_missing_with_defaults() {
        let clips = vec![clip(0), clip(1), clip(2)];
        let raw = r#"{"1": "Only this one"}"#;
        let titles = parse_titles(raw, &clips);
        assert_eq!(titles.get(&0).unwrap(), "Highlight #1");
        assert_eq!(titles.get(&1).unwrap(), "Only this one");
        assert_eq!(titles.get(&2).unwrap(), "Highlight #3");
    }

    #[test]
    fn test_parse_titles_garbage_gives_all_defaults() {
        let clips = vec![clip(0)];
        let titles = parse_titles("not json at all", &clips);
        assert_eq!(titles.get(&0).unwrap(), "Highlight #1");
    }

    #[test]
    fn test_titles_clamped_to_sixty_chars() {
        let clips = vec![clip(0)];
        let long = format!(r#"{{"0": "{}"}}"#, "x".repeat(200));
        let titles = parse_titles(&long, &clips);
        assert_eq!(titles.get(&0).unwrap().chars().count(), 60);
    }
}
