//! Centralized prompt definitions and strict-JSON response handling

use once_cell::sync::Lazy;
use regex::Regex;

/// System prompt for structured summaries, selected by content type.
pub fn summary_system_prompt(entity_type: &str) -> &'static str {
    match entity_type {
        "video_transcript" | "video" => {
            r#"You are an expert video content analyzer. Analyze the video transcript and return a structured JSON object.

OUTPUT FORMAT (Return ONLY valid JSON, no markdown formatting):
{
  "topic": "Primary subject of the video",
  "summary": "Narrative summary of the discussion or presentation",
  "key_moments": ["Key topic 1", "Key topic 2", "Key topic 3", "Key topic 4", "Key topic 5"]
}

RULES:
- Ignore filler words and focus on substantive content
- Preserve specific terminology and entity names exactly
- Ensure key_moments contains exactly 5 distinct topics
- Return ONLY the JSON object (no markdown code blocks, no additional text)"#
        }
        "blog_post" | "article" => {
            r#"You are an expert content analyzer. Analyze the article and return a structured JSON object optimized for search.

OUTPUT FORMAT (Return ONLY valid JSON, no markdown formatting):
{
  "title": "Representative title for the article",
  "overview": "Concise paragraph summarizing the main thesis",
  "key_concepts": ["Concept 1", "Concept 2", "Concept 3", "Concept 4", "Concept 5"],
  "entities": ["Entity 1", "Entity 2", "Entity 3"],
  "language": "en"
}

RULES:
- Preserve specific terminology and key entities exactly as written
- key_concepts must contain exactly 5 important concepts or arguments
- entities should include people, places, organizations, or important proper nouns (max 10)
- language should be ISO 639-1 code (en, es, fr, de, etc.)
- Return ONLY the JSON object (no markdown code blocks, no additional text)"#
        }
        _ => {
            r#"You are a content summarization expert. Analyze the text and return a structured JSON object.

OUTPUT FORMAT (Return ONLY valid JSON, no markdown formatting):
{
  "summary": "5 concise sentences expressing the key ideas",
  "main_topics": ["Topic 1", "Topic 2", "Topic 3"]
}

RULES:
- Each sentence in summary must express a distinct key idea
- Avoid repetition, speculation, or adding information not in the text
- main_topics should contain 3-5 primary subjects discussed
- Return ONLY the JSON object (no markdown code blocks, no additional text)"#
        }
    }
}

/// Maximum characters of content forwarded to the summarizer.
const SUMMARY_CONTENT_CAP: usize = 12_000;

/// User prompt carrying the content to analyze, truncated to token limits.
pub fn summary_user_prompt(text: &str, entity_type: &str) -> String {
    if text.len() > SUMMARY_CONTENT_CAP {
        // Cut on a char boundary at or below the cap
        let mut cut = SUMMARY_CONTENT_CAP;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let truncated = &text[..cut];
        format!(
            "Analyze the following {} (truncated to {} characters):\n\n{}\n\n[Content truncated for token limits]",
            entity_type,
            truncated.len(),
            truncated
        )
    } else {
        format!("Analyze the following {}:\n\n{}", entity_type, text)
    }
}

/// System prompt for batched highlight clip titles.
pub const HIGHLIGHT_TITLE_SYSTEM_PROMPT: &str = r#"You are a world-class content curator and video editor.
Your task is to generate short, attention-grabbing titles (max 60 chars) for a series of highlight clips.

### ADAPTATION RULES:
1. TONE: Identify the content type from the Video Title/Description/Category (e.g., Gaming, Vlog, Tutorial, Music, Podcast).
2. STYLE:
   - For GAMING: Action-oriented, hype-focused (but no generic "Epic"/"Insane"). Use specific game terminology.
   - For EDUCATIONAL/TUTORIAL: Informative, highlighting the specific concept, tool, or "lightbulb" moment.
   - For VLOGS/TALK/PODCASTS: Use quotes, emotional anchors, or the main topic discussed.
3. SPECIFICITY: Always prioritize specific details (names, tools, locations, or key phrases) over generic summaries.

### CONSTRAINTS:
- DO NOT use generic buzzwords: 'Epic Showdown', 'Intense Moment', 'Boldest Move', 'Game Changer', 'Momentous Comeback', 'Action-packed'.
- Ensure every title is unique from the others in the batch.
- If the context contains spoken words, use them as inspiration.
- Do not use quotes in your titles.
- Respond ONLY with a valid JSON object.

Example Output:
{
  "0": "Clutch 1v3 with Vandal on A-Site",
  "1": "How to center a div with TailWind",
  "2": "The moment he realized his mic was muted"
}"#;

/// Prompt body for a batch of clips awaiting titles.
pub fn highlight_batch_prompt(
    video_title: &str,
    video_description: &str,
    video_category: &str,
    clips_context: &[(usize, String)],
) -> String {
    let mut prompt = format!(
        "Video Title: {}\nVideo Category: {}\nVideo Description: {}\n\nHere are the clips you need to name. Use the context and detected events to give each a unique, actionable title:\n\n",
        video_title, video_category, video_description
    );

    for (idx, ctx) in clips_context {
        let capped: String = ctx.chars().take(1000).collect();
        prompt.push_str(&format!("--- Clip Index: {} ---\n{}\n\n", idx, capped));
    }

    prompt
}

static FENCE_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```(?:json)?\s*").unwrap());
static FENCE_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```\s*$").unwrap());

/// Strip markdown code fences that models wrap around JSON despite
/// instructions not to.
pub fn strip_markdown_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let opened = FENCE_OPEN_RE.replace(trimmed, "");
    FENCE_CLOSE_RE.replace(&opened, "").trim().to_string()
}

/// Two-step strict-JSON parse: strip fences, then decode. Callers decide
/// how to degrade when `Err` comes back.
pub fn parse_json_response(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_str(&strip_markdown_fences(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_selection_by_entity_type() {
        assert!(summary_system_prompt("video_transcript").contains("key_moments"));
        assert!(summary_system_prompt("blog_post").contains("key_concepts"));
        assert!(summary_system_prompt("unknown").contains("main_topics"));
    }

    #[test]
    fn test_user_prompt_truncation() {
        let long = "x".repeat(20_000);
        let prompt = summary_user_prompt(&long, "article");
        assert!(prompt.contains("[Content truncated for token limits]"));
        assert!(prompt.len() < 13_000);

        let short = summary_user_prompt("short text", "article");
        assert!(!short.contains("truncated"));
    }

    #[test]
    fn test_fence_stripping() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(fenced), "{\"a\": 1}");

        let bare = "{\"a\": 1}";
        assert_eq!(strip_markdown_fences(bare), "{\"a\": 1}");

        let plain_fence = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(plain_fence), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_json_response_fallback_path() {
        assert!(parse_json_response("```json\n{\"k\": \"v\"}\n```").is_ok());
        assert!(parse_json_response("this is not json").is_err());
    }

    #[test]
    fn test_batch_prompt_caps_context() {
        let clips = vec![(0, "c".repeat(5000)), (1, "short".to_string())];
        let prompt = highlight_batch_prompt("Title", "Desc", "Gaming", &clips);
        assert!(prompt.contains("--- Clip Index: 0 ---"));
        assert!(prompt.contains("--- Clip Index: 1 ---"));
        // 5000-char context is capped to 1000
        assert!(prompt.len() < 2500);
    }
}
