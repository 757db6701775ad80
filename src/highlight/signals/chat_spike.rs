//! Chat activity spikes from the recorded chat log
//!
//! Messages are bucketed by time offset; buckets beyond
//! `spike_multiplier * median` score proportionally to the busiest bucket,
//! spread across every second they cover.

use super::{SignalContext, SignalDetector, SignalKind, SignalScores};
use crate::highlight::config::SignalsConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    offset_seconds: Option<f64>,
    #[serde(default)]
    timestamp_offset: Option<f64>,
}

impl ChatMessage {
    fn offset(&self) -> f64 {
        self.offset_seconds
            .or(self.timestamp_offset)
            .unwrap_or(0.0)
    }
}

fn median(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    }
}

pub(crate) fn score_buckets(
    buckets: &BTreeMap<i64, i64>,
    bucket_size: i64,
    spike_multiplier: f64,
) -> SignalScores {
    if buckets.is_empty() {
        return SignalScores::new();
    }

    let counts: Vec<i64> = buckets.values().copied().collect();
    let median_count = median(&counts);
    let threshold = median_count * spike_multiplier;
    let max_count = counts.iter().copied().max().unwrap_or(1).max(1);

    let mut scores = SignalScores::new();
    for (bucket_start, count) in buckets {
        if *count as f64 > threshold {
            let score = (*count as f64 / max_count as f64).min(1.0);
            for sec in *bucket_start..bucket_start + bucket_size {
                scores.insert(sec, score);
            }
        }
    }
    scores
}

pub struct ChatSpikeSignal;

#[async_trait]
impl SignalDetector for ChatSpikeSignal {
    fn kind(&self) -> SignalKind {
        SignalKind::ChatSpike
    }

    async fn detect(
        &self,
        config: &SignalsConfig,
        ctx: &SignalContext,
    ) -> crate::Result<SignalScores> {
        let cfg = &config.chat_spike;

        let Some(chat_path) = ctx.chat_path.as_deref() else {
            info!("chat: no chat log provided - skipping");
            return Ok(SignalScores::new());
        };

        let raw = match tokio::fs::read_to_string(chat_path).await {
            Ok(raw) => raw,
            Err(e) => {
                info!("chat: log unreadable at {} ({}) - skipping", chat_path, e);
                return Ok(SignalScores::new());
            }
        };

        let messages: Vec<ChatMessage> = match serde_json::from_str(&raw) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("chat: failed to parse chat log: {}", e);
                return Ok(SignalScores::new());
            }
        };

        if messages.is_empty() {
            info!("chat: empty chat log - skipping");
            return Ok(SignalScores::new());
        }

        let mut buckets: BTreeMap<i64, i64> = BTreeMap::new();
        for message in &messages {
            let bucket = (message.offset() as i64) / cfg.bucket_size * cfg.bucket_size;
            *buckets.entry(bucket).or_insert(0) += 1;
        }

        let scores = score_buckets(&buckets, cfg.bucket_size, cfg.spike_multiplier);
        info!(
            "chat: {} seconds above threshold from {} messages in {} buckets",
            scores.len(),
            messages.len(),
            buckets.len()
        );
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&[1, 2, 3]), 2.0);
        assert_eq!(median(&[1, 2, 3, 4]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_spike_bucket_scores_all_its_seconds() {
        let mut buckets = BTreeMap::new();
        buckets.insert(0, 2);
        buckets.insert(10, 2);
        buckets.insert(20, 2);
        buckets.insert(50, 20); // spike: 20 > 2.5 * median(2)
        let scores = score_buckets(&buckets, 10, 2.5);

        for sec in 50..60 {
            assert_eq!(scores.get(&sec).copied(), Some(1.0));
        }
        assert!(!scores.contains_key(&0));
        assert!(!scores.contains_key(&49));
        assert!(!scores.contains_key(&60));
    }

    #[test]
    fn test_uniform_activity_no_spikes() {
        let mut buckets = BTreeMap::new();
        for i in 0..10 {
            buckets.insert(i * 10, 5);
        }
        let scores = score_buckets(&buckets, 10, 2.5);
        assert!(scores.is_empty());
    }

    #[test]
    fn test_score_proportional_to_busiest_bucket() {
        let mut buckets = BTreeMap::new();
        buckets.insert(0, 1);
        buckets.insert(10, 1);
        buckets.insert(20, 1);
        buckets.insert(30, 10);
        buckets.insert(40, 20);
        let scores = score_buckets(&buckets, 10, 2.5);
        assert_eq!(scores.get(&30).copied(), Some(0.5));
        assert_eq!(scores.get(&40).copied(), Some(1.0));
    }

    #[test]
    fn test_message_offset_field_aliases() {
        let a: ChatMessage = serde_json::from_str(r#"{"offset_seconds": 12.5}"#).unwrap();
        assert_eq!(a.offset(), 12.5);
        let b: ChatMessage = serde_json::from_str(r#"{"timestamp_offset": 3.0}"#).unwrap();
        assert_eq!(b.offset(), 3.0);
        let c: ChatMessage = serde_json::from_str(r#"{"user": "x"}"#).unwrap();
        assert_eq!(c.offset(), 0.0);
    }
}
