// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;

use super::{Summarizer, Transcript};

/// Summary returned for an empty transcript
pub const NO_TRANSCRIPT: &str = "No transcript available for summarization.";

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("sentence pattern"));

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("word pattern"));

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "should", "may", "might", "must", "this", "that", "these", "those", "i",
    "you", "he", "she", "it", "we", "they", "what", "which", "who", "when", "where", "why", "how",
    "all", "each", "every", "some", "any", "no",
];

/// Picks the highest-scoring sentences of the transcript
///
/// Sentences are scored by the mean corpus frequency of their words (stop
/// words and words of three letters or fewer ignored) and returned in their
/// original order.
#[derive(Debug, Clone, Copy)]
pub struct ExtractiveSummarizer {
    max_sentences: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self { max_sentences: 15 }
    }
}

impl ExtractiveSummarizer {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }

    pub fn summarize_text(&self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return NO_TRANSCRIPT.to_string();
        }

        let sentences: Vec<&str> = SENTENCE_END
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if sentences.len() <= self.max_sentences {
            return text.to_string();
        }

        let stop_words: HashSet<&str> = STOP_WORDS.iter().copied().collect();
        let lowered = text.to_lowercase();
        let mut frequency: HashMap<&str, usize> = HashMap::new();
        for word in WORD.find_iter(&lowered).map(|m| m.as_str()) {
            if word.chars().count() > 3 && !stop_words.contains(word) {
                *frequency.entry(word).or_default() += 1;
            }
        }

        let scores: Vec<f64> = sentences
            .iter()
            .map(|sentence| {
                let lowered = sentence.to_lowercase();
                let words: Vec<&str> = WORD.find_iter(&lowered).map(|m| m.as_str()).collect();
                if words.is_empty() {
                    return 0.0;
                }
                let total: usize = words
                    .iter()
                    .map(|w| frequency.get(w).copied().unwrap_or(0))
                    .sum();
                total as f64 / words.len() as f64
            })
            .collect();

        let mut ranked: Vec<usize> = (0..sentences.len()).collect();
        // Stable sort: equal scores keep document order
        ranked.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));
        let mut top: Vec<usize> = ranked.into_iter().take(self.max_sentences).collect();
        top.sort_unstable();

        let mut summary = top
            .into_iter()
            .map(|i| sentences[i])
            .collect::<Vec<_>>()
            .join(". ");
        if !summary.ends_with(['.', '!', '?']) {
            summary.push('.');
        }
        summary
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, transcript: &Transcript) -> Result<String, EngineError> {
        Ok(self.summarize_text(&transcript.full_text()))
    }
}

const SYSTEM_PROMPT: &str = "You are an expert podcast analyst. Summarize the episode from its \
full transcript in markdown with these sections: Overview (2-3 sentences), Key Topics (3-5 \
bullets), Main Points, Notable Quotes, Takeaways (3-5 bullets). Stay true to what was said and \
do not add information that is not in the transcript.";

/// Transcripts longer than this are cut down to their head and tail
const MAX_PROMPT_CHARS: usize = 100_000;
const KEPT_CHARS: usize = 50_000;

/// Ollama connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaOptions {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    #[serde(with = "crate::config::secs")]
    pub request_timeout: Duration,
}

impl Default for OllamaOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            max_tokens: 2000,
            request_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// LLM summaries from a local Ollama server
///
/// Any failure falls back to the extractive summary, so this never returns
/// an error for a non-empty transcript.
pub struct OllamaSummarizer {
    client: reqwest::Client,
    options: OllamaOptions,
    fallback: ExtractiveSummarizer,
}

impl OllamaSummarizer {
    pub fn new(options: OllamaOptions) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| EngineError::SummarizationFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            options,
            fallback: ExtractiveSummarizer::default(),
        })
    }

    async fn generate(&self, text: &str) -> Result<String, EngineError> {
        let url = format!("{}/api/generate", self.options.base_url.trim_end_matches('/'));
        let request = GenerateRequest {
            model: &self.options.model,
            prompt: format!(
                "Please create a comprehensive summary of the following podcast transcript:\n\n{}",
                truncate_middle(text)
            ),
            system: SYSTEM_PROMPT,
            stream: false,
            options: GenerateOptions {
                temperature: 0.7,
                num_predict: self.options.max_tokens,
                top_p: 0.9,
                top_k: 40,
            },
        };

        info!(model = %self.options.model, prompt_len = request.prompt.len(), "Requesting summary from Ollama");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::SummarizationFailed(format!("failed to call Ollama: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::SummarizationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let result: GenerateResponse = response.json().await.map_err(|e| {
            EngineError::SummarizationFailed(format!("failed to parse Ollama response: {e}"))
        })?;

        let summary = result.response.trim();
        if summary.is_empty() {
            return Err(EngineError::SummarizationFailed(
                "empty response from Ollama".to_string(),
            ));
        }
        Ok(summary.to_string())
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, transcript: &Transcript) -> Result<String, EngineError> {
        let text = transcript.full_text();
        if text.is_empty() {
            return Ok(NO_TRANSCRIPT.to_string());
        }

        match self.generate(&text).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                warn!(error = %e, "LLM summarization failed, falling back to extractive summary");
                Ok(self.fallback.summarize_text(&text))
            }
        }
    }
}

/// Keep the first and last [`KEPT_CHARS`] characters of an overly long text
fn truncate_middle(text: &str) -> String {
    let count = text.chars().count();
    if count <= MAX_PROMPT_CHARS {
        return text.to_string();
    }

    let head: String = text.chars().take(KEPT_CHARS).collect();
    let tail: String = text.chars().skip(count - KEPT_CHARS).collect();
    format!("{head}\n\n[... middle content truncated ...]\n\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transcript(text: &str) -> Transcript {
        Transcript {
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_transcript_has_placeholder_summary() {
        assert_eq!(ExtractiveSummarizer::default().summarize_text("  "), NO_TRANSCRIPT);
    }

    #[test]
    fn short_transcript_is_returned_verbatim() {
        let text = "One sentence here. Another one there.";
        assert_eq!(ExtractiveSummarizer::new(5).summarize_text(text), text);
    }

    #[test]
    fn picks_frequent_sentences_in_document_order() {
        let text = "Rust ownership makes memory safety practical. \
                    The weather was nice yesterday. \
                    Ownership rules let Rust avoid garbage collection. \
                    We had lunch at noon. \
                    Borrowing extends ownership with references in Rust.";

        let summary = ExtractiveSummarizer::new(2).summarize_text(text);

        assert_eq!(
            summary,
            "Rust ownership makes memory safety practical. \
             Ownership rules let Rust avoid garbage collection."
        );
    }

    #[test]
    fn truncate_keeps_head_and_tail() {
        let text = format!("{}{}{}", "a".repeat(60_000), "b".repeat(10_000), "c".repeat(60_000));
        let truncated = truncate_middle(&text);

        assert!(truncated.starts_with(&"a".repeat(50_000)));
        assert!(truncated.ends_with(&"c".repeat(50_000)));
        assert!(!truncated.contains('b'));
        assert_eq!(truncate_middle("short"), "short");
    }

    #[tokio::test]
    async fn ollama_summary_is_used_when_available() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({ "model": "llama3.2", "stream": false })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "response": " ## Overview\nShort. " })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let summarizer = OllamaSummarizer::new(OllamaOptions {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();

        let summary = summarizer.summarize(&transcript("Some words.")).await.unwrap();
        assert_eq!(summary, "## Overview\nShort.");
    }

    #[tokio::test]
    async fn ollama_failure_falls_back_to_extractive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let summarizer = OllamaSummarizer::new(OllamaOptions {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap();

        let summary = summarizer.summarize(&transcript("Just this.")).await.unwrap();
        assert_eq!(summary, "Just this.");
    }
}
