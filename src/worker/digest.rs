use super::{Stage, StageExecutor};
use crate::config::{LlmConfig, LlmProvider};
use crate::database::{Artifact, Database, Episode, SummaryContent};
use crate::llm::{extract_json_from_response, LlmClient};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

const SUMMARY_SYSTEM: &str =
    "You are an expert at analyzing podcast content. Return valid JSON only.";

const SUMMARY_PROMPT: &str = r#"Analyze this podcast transcript and extract structured information in JSON format:

{
  "key_topics": ["topic1", "topic2"],
  "themes": ["theme1", "theme2"],
  "quotes": ["notable quote 1", "notable quote 2"],
  "startups": ["company1", "company2"],
  "summary": "Brief 2-3 sentence summary"
}

Guidelines:
- key_topics: Main subjects discussed (3-5 topics)
- themes: Broader themes or patterns (2-4 themes)
- quotes: Memorable, insightful quotes (2-3 max)
- startups: Any companies, startups, or brands mentioned
- summary: Concise overview of the episode

Transcript:
"#;

/// Longest transcript excerpt sent to a model, in characters.
const MAX_PROMPT_CHARS: usize = 48_000;

fn filler_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)\b(um|uh|ah|er|hmm|like|you know|sort of|kind of)\b")
                .expect("valid filler regex"),
            Regex::new(r"(?i)\b(actually|basically|literally|obviously|definitely)\s+")
                .expect("valid adverb regex"),
            Regex::new(r"\s+").expect("valid whitespace regex"),
        ]
    })
}

/// Strip filler words and collapse whitespace.
pub fn clean_transcript(raw: &str) -> String {
    let [fillers, adverbs, whitespace] = filler_patterns();
    let text = fillers.replace_all(raw, "");
    let text = adverbs.replace_all(&text, "");
    whitespace.replace_all(&text, " ").trim().to_string()
}

/// Keyword-frequency summary used when no model is configured.
pub fn basic_extraction(text: &str) -> SummaryContent {
    let mut freq: HashMap<String, usize> = HashMap::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    for (idx, word) in text.to_lowercase().split_whitespace().enumerate() {
        if word.chars().count() > 4 && word.chars().all(char::is_alphabetic) {
            *freq.entry(word.to_string()).or_insert(0) += 1;
            first_seen.entry(word.to_string()).or_insert(idx);
        }
    }

    let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
    // Ties broken by first appearance so output is stable
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| first_seen[&a.0].cmp(&first_seen[&b.0]))
    });
    let key_topics = ranked.into_iter().take(5).map(|(w, _)| w).collect();

    let mut seen = HashSet::new();
    let startups = text
        .split_whitespace()
        .filter(|w| {
            let lower = w.to_lowercase();
            ["inc", "corp", "llc", "labs"]
                .iter()
                .any(|suffix| lower.ends_with(suffix))
        })
        .filter(|w| seen.insert(w.to_string()))
        .map(|w| w.to_string())
        .collect();

    SummaryContent {
        key_topics,
        themes: vec!["general discussion".to_string()],
        quotes: Vec::new(),
        startups,
        summary: "Podcast episode discussion covering various topics.".to_string(),
    }
}

fn string_list(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Pull a structured summary out of a model response.
pub fn parse_summary_response(response: &str) -> Result<SummaryContent, String> {
    let json = extract_json_from_response(response)
        .ok_or_else(|| "LLM response did not contain JSON".to_string())?;

    let content = SummaryContent {
        key_topics: string_list(&json, "key_topics"),
        themes: string_list(&json, "themes"),
        quotes: string_list(&json, "quotes"),
        startups: string_list(&json, "startups"),
        summary: json
            .get("summary")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .trim()
            .to_string(),
    };

    if content.summary.is_empty() && content.key_topics.is_empty() {
        return Err("LLM summary JSON had neither summary nor key_topics".to_string());
    }
    Ok(content)
}

/// Digest stage: turns a stored transcript into a structured summary.
pub struct DigestSummarizer {
    db: Arc<Database>,
    llm: Option<LlmClient>,
}

impl DigestSummarizer {
    pub fn new(db: Arc<Database>, config: &LlmConfig) -> Result<Self, String> {
        let llm = match config.provider {
            LlmProvider::Basic => None,
            _ => Some(LlmClient::new(config)?),
        };
        Ok(Self { db, llm })
    }

    async fn summarize(&self, text: &str) -> Result<SummaryContent, String> {
        let Some(llm) = &self.llm else {
            return Ok(basic_extraction(text));
        };

        let excerpt: String = text.chars().take(MAX_PROMPT_CHARS).collect();
        let prompt = format!("{}{}", SUMMARY_PROMPT, excerpt);
        let response = llm.generate(&prompt, Some(SUMMARY_SYSTEM)).await?;
        parse_summary_response(&response)
    }
}

#[async_trait]
impl StageExecutor for DigestSummarizer {
    fn stage(&self) -> Stage {
        Stage::Digest
    }

    async fn attempt(&self, episode: &Episode) -> Result<Artifact, String> {
        let transcript = self
            .db
            .get_transcript(episode.id)
            .map_err(|e| format!("Failed to load transcript: {}", e))?
            .ok_or_else(|| "No transcript stored for episode".to_string())?;

        let cleaned = clean_transcript(&transcript.full_text());
        if cleaned.is_empty() {
            return Err("Transcript is empty".to_string());
        }

        let summary = self.summarize(&cleaned).await?;
        Ok(Artifact::Summary(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_transcript_removes_fillers() {
        let cleaned = clean_transcript("Um, so   we basically  built it, you know,\n uh, fast.");
        assert_eq!(cleaned, ", so we built it, , , fast.");
    }

    #[test]
    fn test_basic_extraction() {
        let text = "Rust rust rust tokio tokio async Acme Labs raised money from Widget Corp. \
                    Acme Labs again. short words only";
        let summary = basic_extraction(text);
        assert_eq!(summary.key_topics[0], "tokio");
        assert!(summary.key_topics.contains(&"raised".to_string()));
        assert!(!summary.key_topics.contains(&"rust".to_string()));
        assert_eq!(summary.startups, vec!["Labs".to_string()]);
        assert_eq!(summary.themes, vec!["general discussion".to_string()]);
    }

    #[test]
    fn test_parse_summary_response() {
        let response = r#"Sure! ```json
{"key_topics": ["AI", " "], "themes": ["growth"], "quotes": [], "startups": ["Acme"], "summary": "A talk."}
```"#;
        let content = parse_summary_response(response).unwrap();
        assert_eq!(content.key_topics, vec!["AI".to_string()]);
        assert_eq!(content.startups, vec!["Acme".to_string()]);
        assert_eq!(content.summary, "A talk.");
    }

    #[test]
    fn test_parse_summary_response_failures() {
        assert!(parse_summary_response("I cannot help with that").is_err());
        assert!(parse_summary_response(r#"{"themes": ["x"]}"#).is_err());
    }
}
