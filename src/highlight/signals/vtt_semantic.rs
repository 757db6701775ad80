//! Caption-semantic signal over WebVTT cues
//!
//! Compiled pattern families (excitement, clutch, shock, victory) grade
//! each normalized cue, with a repetition boost for `!!`, a negation
//! penalty, and an escalation boost when a build-up phrase lands in the
//! prior two seconds. Scored cues aggregate over a short window before
//! being painted across their seconds.

use super::{SignalContext, SignalDetector, SignalKind, SignalScores};
use crate::highlight::config::{SignalsConfig, VttSemanticConfig};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

static VTT_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}):(\d{2}):(\d{2})\.(\d{3})\s*-->\s*(\d{2}):(\d{2}):(\d{2})\.(\d{3})")
        .unwrap()
});

static EXCITEMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(amazing|incredible|unbelievable|insane|crazy|no\s+way|let'?s?\s+go|wow+|oh+\s+my+\s+god+|lets\s+go|omg)\b",
    )
    .unwrap()
});

static CLUTCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(clutch|last\s+(man|player|one)|1v[1-5]|match\s+point|overtime|this\s+is\s+it|sudden\s+death)\b",
    )
    .unwrap()
});

static SHOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(what[!?]+|how[!?]+|are\s+you\s+serious|no\s+shot|that'?s\s+wild|ohhh+|no+\s+way)\b",
    )
    .unwrap()
});

static VICTORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(win(s|ning|ner)?|victor(y|ious)|champion|we\s+got\s+it|that'?s\s+game|game\s+over|gg)\b",
    )
    .unwrap()
});

static NEGATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(not\s+amazing|not\s+good|no\s+hype|wasn'?t|not\s+even|boring)\b").unwrap()
});

static ESCALATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(wait\s+wait|watch\s+this|look\s+at\s+this|right\s+now|here\s+we\s+go|oh\s+no)\b",
    )
    .unwrap()
});

fn vtt_time(h: &str, m: &str, s: &str, ms: &str) -> f64 {
    let h: f64 = h.parse().unwrap_or(0.0);
    let m: f64 = m.parse().unwrap_or(0.0);
    let s: f64 = s.parse().unwrap_or(0.0);
    let ms: f64 = ms.parse().unwrap_or(0.0);
    h * 3600.0 + m * 60.0 + s + ms / 1000.0
}

/// Collapse runs of three or more identical characters to two
/// ("soooo" -> "soo").
fn collapse_repeats(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    let mut run = 0usize;
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run <= 2 {
            out.push(c);
        }
    }
    out
}

/// Lowercase, strip punctuation except `!` and `?`, collapse repeats.
pub(crate) fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '!' || c == '?' || c == '\''
                || c.is_whitespace()
            {
                c
            } else {
                ' '
            }
        })
        .collect();
    collapse_repeats(&stripped)
}

/// Score one normalized cue text against the pattern families.
pub(crate) fn score_text(text: &str, cfg: &VttSemanticConfig) -> f64 {
    let mut score = 0.0;

    if EXCITEMENT_RE.is_match(text) {
        score += 0.4;
    }
    if CLUTCH_RE.is_match(text) {
        score += 0.5;
    }
    if SHOCK_RE.is_match(text) {
        score += 0.4;
    }
    if VICTORY_RE.is_match(text) {
        score += 0.6;
    }

    if score == 0.0 {
        return 0.0;
    }

    if cfg.repetition_boost && text.matches('!').count() >= 2 {
        score += 0.2;
    }
    if cfg.negation_filter && NEGATION_RE.is_match(text) {
        score = (score - 0.3_f64).max(0.0);
    }

    score.min(1.0)
}

/// `(start, end, normalized_text)` cues
pub(crate) fn parse_cues(content: &str) -> Vec<(f64, f64, String)> {
    let mut cues = Vec::new();
    let mut current_start = 0.0;
    let mut current_end = 0.0;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(caps) = VTT_TIME_RE.captures(trimmed) {
            current_start = vtt_time(&caps[1], &caps[2], &caps[3], &caps[4]);
            current_end = vtt_time(&caps[5], &caps[6], &caps[7], &caps[8]);
        } else if !trimmed.is_empty()
            && !trimmed.starts_with("WEBVTT")
            && !trimmed.chars().all(|c| c.is_ascii_digit())
        {
            cues.push((current_start, current_end, normalize(trimmed)));
        }
    }
    cues
}

pub struct VttSemanticSignal;

#[async_trait]
impl SignalDetector for VttSemanticSignal {
    fn kind(&self) -> SignalKind {
        SignalKind::VttSemantic
    }

    async fn detect(
        &self,
        config: &SignalsConfig,
        ctx: &SignalContext,
    ) -> crate::Result<SignalScores> {
        let cfg = &config.vtt_semantic;

        let Some(vtt_path) = ctx.vtt_path.as_deref() else {
            info!("vtt: no captions found - skipping");
            return Ok(SignalScores::new());
        };

        let content = match tokio::fs::read_to_string(vtt_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("vtt: failed to read captions: {}", e);
                return Ok(SignalScores::new());
            }
        };

        let cues = parse_cues(&content);
        info!("vtt: parsed {} cues", cues.len());

        // Score each cue, with the escalation boost looking back 2s
        let mut cue_scores: Vec<(f64, f64, f64)> = Vec::new();
        for (i, (start, end, text)) in cues.iter().enumerate() {
            let mut score = score_text(text, cfg);

            if cfg.escalation_boost && score > 0.0 {
                let window_start = start - 2.0;
                let escalated = cues
                    .iter()
                    .any(|(ps, _, pt)| *ps >= window_start && *ps <= *start && ESCALATION_RE.is_match(pt));
                if escalated {
                    score = (score + 0.2_f64).min(1.0);
                }
            }

            if score > 0.0 {
                cue_scores.push((*start, *end, score));
            }
            if i % 1024 == 0 {
                tokio::task::yield_now().await;
            }
        }

        // Window aggregation: a scored cue absorbs the scores of every cue
        // starting within `window_seconds` after it.
        let mut scores = SignalScores::new();
        for (i, (start, end, score)) in cue_scores.iter().enumerate() {
            let window_end = start + cfg.window_seconds;
            let mut cumulative = *score;
            for (j, (other_start, _, other_score)) in cue_scores.iter().enumerate() {
                if i != j && *other_start >= *start && *other_start <= window_end {
                    cumulative += other_score;
                }
            }
            let cumulative = cumulative.min(1.0);

            for sec in (*start as i64)..=(*end as i64) {
                let entry = scores.entry(sec).or_insert(0.0);
                *entry = entry.max(cumulative);
            }
            if i % 1024 == 0 {
                tokio::task::yield_now().await;
            }
        }

        info!(
            "vtt: {} scored seconds from {} matching cues",
            scores.len(),
            cue_scores.len()
        );
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> VttSemanticConfig {
        VttSemanticConfig::default()
    }

    #[test]
    fn test_parse_cues() {
        let vtt = "WEBVTT\n\n1\n00:00:58.000 --> 00:01:02.500\nThat was amazing!\n\n2\n00:01:10.000 --> 00:01:12.000\nplain words\n";
        let cues = parse_cues(vtt);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].0, 58.0);
        assert_eq!(cues[0].1, 62.5);
        assert!(cues[0].2.contains("amazing"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("LET'S GOOOO!!!"), "let's goo!!");
        assert_eq!(normalize("what?! #hype"), "what?!  hype");
    }

    #[test]
    fn test_pattern_family_weights() {
        assert_eq!(score_text("that was amazing", &cfg()), 0.4);
        assert_eq!(score_text("clutch play", &cfg()), 0.5);
        assert_eq!(score_text("no shot", &cfg()), 0.4);
        assert_eq!(score_text("gg that's game", &cfg()), 0.6);
        assert_eq!(score_text("nothing interesting", &cfg()), 0.0);
    }

    #[test]
    fn test_repetition_boost_and_negation() {
        let score = score_text("amazing!! amazing", &cfg());
        assert!((score - 0.6).abs() < 1e-9);

        let negated = score_text("not amazing at all", &cfg());
        assert!((negated - 0.1).abs() < 1e-9);

        let mut no_filters = cfg();
        no_filters.repetition_boost = false;
        no_filters.negation_filter = false;
        assert_eq!(score_text("amazing!! not even", &no_filters), 0.4);
    }

    #[test]
    fn test_score_caps_at_one() {
        // Excitement + clutch + shock + victory stack past 1.0
        let loaded = "amazing clutch no shot gg";
        assert_eq!(score_text(loaded, &cfg()), 1.0);
    }

    #[tokio::test]
    async fn test_detect_scores_cue_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let vtt_path = dir.path().join("en.vtt");
        std::fs::write(
            &vtt_path,
            "WEBVTT\n\n00:01:01.000 --> 00:01:03.000\nthat was amazing\n",
        )
        .unwrap();

        let ctx = SignalContext {
            vtt_path: Some(vtt_path.to_string_lossy().to_string()),
            ..Default::default()
        };
        let scores = VttSemanticSignal
            .detect(&SignalsConfig::default(), &ctx)
            .await
            .unwrap();

        assert!(scores.get(&61).copied().unwrap_or(0.0) > 0.3);
        assert!(scores.get(&62).copied().unwrap_or(0.0) > 0.3);
        assert!(scores.get(&63).copied().unwrap_or(0.0) > 0.3);
        assert!(!scores.contains_key(&60));
    }

    #[tokio::test]
    async fn test_detect_without_captions_is_empty() {
        let ctx = SignalContext::default();
        let scores = VttSemanticSignal
            .detect(&SignalsConfig::default(), &ctx)
            .await
            .unwrap();
        assert!(scores.is_empty());
    }
}
