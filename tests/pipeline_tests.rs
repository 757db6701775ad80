//! Cross-module pipeline scenarios: submission shapes, scoring through
//! consolidation, and event wire formats.

use mediaforge::highlight::consolidation::consolidate_clips;
use mediaforge::highlight::scoring::{compute_scores, qualify_seconds};
use mediaforge::highlight::signals::{SignalKind, SignalScores};
use mediaforge::highlight::{HighlightJobPayload, JobOutcome};
use mediaforge::ingest::sanitizer;
use mediaforge::{ChunkingStrategy, Submission};
use serde_json::json;
use std::collections::HashMap;

#[test]
fn test_submission_scenario_shape() {
    // Literal pass-1 submission: HTML title is preserved, content is
    // sanitized downstream, no enrichments means an embed task.
    let submission: Submission = serde_json::from_value(json!({
        "trace_id": "t1",
        "source_app": "blog",
        "entity_id": "p1",
        "entity_type": "blog_post",
        "operation": "index",
        "timestamp": "2025-01-01T00:00:00Z",
        "payload": {
            "title": "Hello <b>World</b>",
            "content": "<p>Hi there.</p>"
        },
        "enrichments": []
    }))
    .unwrap();

    assert!(submission.validate().is_ok());
    assert_eq!(submission.title(), "Hello <b>World</b>");
    assert_eq!(
        sanitizer::clean_html(submission.body_text().unwrap()),
        "Hi there."
    );
    assert_eq!(submission.chunking_strategy, ChunkingStrategy::Recursive);
    assert!(submission.enrichments.is_empty());
}

#[test]
fn test_submission_without_body_fails_validation() {
    let submission: Submission = serde_json::from_value(json!({
        "trace_id": "t2",
        "source_app": "blog",
        "entity_id": "p2",
        "operation": "index",
        "timestamp": "2025-01-01T00:00:00Z",
        "payload": { "title": "no body" }
    }))
    .unwrap();
    assert!(submission.validate().is_err());
}

fn sparse(pairs: &[(i64, f64)]) -> SignalScores {
    pairs.iter().copied().collect()
}

/// The end-to-end happy-path scenario: audio spikes at 60/61, a scene cut
/// at 60, a chat bucket spike over 58..=68 and caption excitement at 61
/// must converge on one clip peaking at second 60.
#[tokio::test]
async fn test_happy_path_scoring_to_single_clip() {
    let mut outputs = HashMap::new();
    outputs.insert(SignalKind::AudioSpike, sparse(&[(60, 0.9), (61, 0.9)]));
    outputs.insert(SignalKind::SceneChange, sparse(&[(60, 0.6)]));
    outputs.insert(
        SignalKind::ChatSpike,
        sparse(&(58..=68).map(|s| (s, 0.8)).collect::<Vec<_>>()),
    );
    outputs.insert(SignalKind::VttSemantic, sparse(&[(61, 0.4)]));

    let mut weights = HashMap::new();
    weights.insert(SignalKind::AudioSpike, 0.30);
    weights.insert(SignalKind::SceneChange, 0.25);
    weights.insert(SignalKind::ChatSpike, 0.20);
    weights.insert(SignalKind::VttSemantic, 0.10);

    let aggregate = compute_scores(&outputs, &weights, 300).await;
    assert_eq!(aggregate.get(&60).unwrap().sig_count, 4);

    let qualified = qualify_seconds(&aggregate, 0.35).await;
    assert!(qualified.contains_key(&60));

    let clips = consolidate_clips(&qualified, 8, 60, 3, 5, 5);
    assert_eq!(clips.len(), 1);
    let clip = &clips[0];
    assert_eq!(clip.peak_second, 60);
    assert!(clip.duration() >= 8 && clip.duration() <= 60);
    assert!(clip.start <= 57);
    assert!(clip.end >= 63);
}

#[tokio::test]
async fn test_no_signals_no_clips() {
    let outputs: HashMap<SignalKind, SignalScores> = HashMap::new();
    let weights = HashMap::new();

    let aggregate = compute_scores(&outputs, &weights, 600).await;
    let qualified = qualify_seconds(&aggregate, 0.35).await;
    let clips = consolidate_clips(&qualified, 8, 60, 3, 5, 5);

    assert!(qualified.is_empty());
    assert!(clips.is_empty());
}

#[test]
fn test_highlight_payload_wire_format() {
    let payload: HighlightJobPayload = serde_json::from_value(json!({
        "videoId": "v1",
        "proxy480pPath": "media-uploads/proxies/v1/480p.mp4",
        "sourceVideoPath": "media-uploads/sources/v1.mp4",
        "chatPath": "/data/chat/v1.json",
        "videoTitle": "Finals run",
        "ownerId": "u9"
    }))
    .unwrap();

    assert_eq!(payload.video_id, "v1");
    assert_eq!(
        payload.proxy_480p_path.as_deref(),
        Some("media-uploads/proxies/v1/480p.mp4")
    );
    assert_eq!(payload.video_title.as_deref(), Some("Finals run"));
    assert!(payload.config_path.is_none());
}

#[test]
fn test_outcome_event_wire_format() {
    let outcome = JobOutcome {
        video_id: "v1".to_string(),
        clip_count: 2,
        highlights_json_path: "highlights/v1/highlights.json".to_string(),
        duration_ms: 4250,
        vtt_used: true,
        warnings: vec!["title enrichment failed: timeout".to_string()],
    };

    let value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(value["videoId"], "v1");
    assert_eq!(value["clipCount"], 2);
    assert_eq!(value["highlightsJsonPath"], "highlights/v1/highlights.json");
    assert_eq!(value["durationMs"], 4250);
    assert_eq!(value["vttUsed"], true);
    assert_eq!(value["warnings"].as_array().unwrap().len(), 1);
}
