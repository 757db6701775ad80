//! Per-second weighted scoring and qualification
//!
//! Temporal fusion takes each signal's max over a ±1s window before
//! weighting, so signals that fire one second apart still reinforce each
//! other. Qualification requires the weighted total to clear the threshold
//! AND either cross-signal agreement or a decisively high total.

use super::signals::{SignalKind, SignalScores};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Per-second fused score with the number of contributing signals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateScore {
    pub total: f64,
    pub sig_count: u32,
}

/// A signal contributes to the agreement count above this fused score.
const SIGNAL_PRESENCE_FLOOR: f64 = 0.1;

/// A single decisive signal can qualify a second above this total.
const SINGLE_SIGNAL_OVERRIDE: f64 = 0.3;

/// Fuse per-signal score maps into per-second aggregates.
pub async fn compute_scores(
    signal_outputs: &HashMap<SignalKind, SignalScores>,
    signal_weights: &HashMap<SignalKind, f64>,
    duration_seconds: i64,
) -> BTreeMap<i64, AggregateScore> {
    let mut aggregate = BTreeMap::new();

    for sec in 0..duration_seconds {
        let mut total = 0.0;
        let mut sig_count = 0u32;

        for (kind, scores) in signal_outputs {
            let weight = signal_weights.get(kind).copied().unwrap_or(0.0);

            let window_max = [sec - 1, sec, sec + 1]
                .iter()
                .filter_map(|s| scores.get(s))
                .copied()
                .fold(0.0_f64, f64::max);

            total += window_max * weight;
            if window_max > SIGNAL_PRESENCE_FLOOR {
                sig_count += 1;
            }
        }

        if total > 0.01 {
            aggregate.insert(
                sec,
                AggregateScore {
                    total: (total * 10_000.0).round() / 10_000.0,
                    sig_count,
                },
            );
        }

        if sec % 10_000 == 0 {
            tokio::task::yield_now().await;
        }
    }

    info!("scoring: {} seconds scored with temporal fusion", aggregate.len());
    aggregate
}

/// Filter to seconds meeting threshold and cross-signal qualification.
pub async fn qualify_seconds(
    aggregate: &BTreeMap<i64, AggregateScore>,
    threshold: f64,
) -> BTreeMap<i64, f64> {
    let mut qualified = BTreeMap::new();

    for (i, (sec, score)) in aggregate.iter().enumerate() {
        if score.total >= threshold
            && (score.sig_count >= 2 || score.total >= SINGLE_SIGNAL_OVERRIDE)
        {
            qualified.insert(*sec, score.total);
        }
        if i % 10_000 == 0 {
            tokio::task::yield_now().await;
        }
    }

    info!(
        "qualification: {}/{} seconds above threshold {} with agreement check",
        qualified.len(),
        aggregate.len(),
        threshold
    );
    qualified
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(i64, f64)]) -> SignalScores {
        pairs.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_temporal_fusion_takes_window_max() {
        let mut outputs = HashMap::new();
        outputs.insert(SignalKind::AudioSpike, scores(&[(60, 1.0)]));
        let mut weights = HashMap::new();
        weights.insert(SignalKind::AudioSpike, 0.5);

        let aggregate = compute_scores(&outputs, &weights, 120).await;
        // Seconds 59, 60 and 61 all see the spike through the ±1s window
        assert_eq!(aggregate.get(&59).unwrap().total, 0.5);
        assert_eq!(aggregate.get(&60).unwrap().total, 0.5);
        assert_eq!(aggregate.get(&61).unwrap().total, 0.5);
        assert!(!aggregate.contains_key(&62));
    }

    #[tokio::test]
    async fn test_sig_count_requires_presence_floor() {
        let mut outputs = HashMap::new();
        outputs.insert(SignalKind::AudioSpike, scores(&[(10, 0.05)]));
        outputs.insert(SignalKind::SceneChange, scores(&[(10, 0.9)]));
        let mut weights = HashMap::new();
        weights.insert(SignalKind::AudioSpike, 0.3);
        weights.insert(SignalKind::SceneChange, 0.25);

        let aggregate = compute_scores(&outputs, &weights, 20).await;
        // 0.05 is below the presence floor: only one signal counts
        assert_eq!(aggregate.get(&10).unwrap().sig_count, 1);
    }

    #[tokio::test]
    async fn test_qualification_agreement_rules() {
        let mut aggregate = BTreeMap::new();
        // Meets threshold with two signals agreeing
        aggregate.insert(
            10,
            AggregateScore {
                total: 0.36,
                sig_count: 2,
            },
        );
        // Meets threshold but single weak signal
        aggregate.insert(
            20,
            AggregateScore {
                total: 0.36,
                sig_count: 1,
            },
        );
        // Single signal, decisively high total
        aggregate.insert(
            30,
            AggregateScore {
                total: 0.5,
                sig_count: 1,
            },
        );
        // Below threshold
        aggregate.insert(
            40,
            AggregateScore {
                total: 0.2,
                sig_count: 3,
            },
        );

        let qualified = qualify_seconds(&aggregate, 0.35).await;
        assert!(qualified.contains_key(&10));
        assert!(qualified.contains_key(&20)); // 0.36 >= 0.3 override
        assert!(qualified.contains_key(&30));
        assert!(!qualified.contains_key(&40));
    }

    #[tokio::test]
    async fn test_happy_path_second_60_qualifies() {
        // Audio spikes at 60 and 61, scene change at 60, chat spike across
        // 58..=68, captions excitement at 61: four signals agree on 60.
        let mut outputs = HashMap::new();
        outputs.insert(SignalKind::AudioSpike, scores(&[(60, 0.9), (61, 0.9)]));
        outputs.insert(SignalKind::SceneChange, scores(&[(60, 0.6)]));
        outputs.insert(
            SignalKind::ChatSpike,
            scores(&(58..=68).map(|s| (s, 0.8)).collect::<Vec<_>>()),
        );
        outputs.insert(SignalKind::VttSemantic, scores(&[(61, 0.4)]));

        let mut weights = HashMap::new();
        weights.insert(SignalKind::AudioSpike, 0.30);
        weights.insert(SignalKind::SceneChange, 0.25);
        weights.insert(SignalKind::ChatSpike, 0.20);
        weights.insert(SignalKind::VttSemantic, 0.10);

        let aggregate = compute_scores(&outputs, &weights, 120).await;
        let at_60 = aggregate.get(&60).unwrap();
        assert_eq!(at_60.sig_count, 4);

        let qualified = qualify_seconds(&aggregate, 0.35).await;
        assert!(qualified.contains_key(&60));
    }
}
