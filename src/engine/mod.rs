// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collaborators the pipeline drives but does not implement itself:
//! episode metadata, speech-to-text, and summarization.

mod cache;
mod metadata;
mod summary;
mod whisper_cli;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::progress::FractionReporter;

pub use cache::EngineCache;
pub use metadata::StaticMetadataProvider;
pub use summary::{ExtractiveSummarizer, NO_TRANSCRIPT, OllamaOptions, OllamaSummarizer};
pub use whisper_cli::{WhisperCliEngine, WhisperCliLoader, parse_progress};

/// Best-effort description of an episode from its platform page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub cover_image_url: Option<String>,
    pub release_date: Option<String>,
    /// Raw platform metadata, searched for show identifiers
    #[serde(default, skip_serializing)]
    pub raw: Option<Value>,
}

/// Looks up metadata for an episode URL
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn resolve(&self, episode_url: &str) -> Result<EpisodeInfo, EngineError>;
}

/// Word-level timing, when the engine provides it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub start: f64,
    pub end: f64,
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Seconds from the start of the audio
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Word>>,
}

/// Output of a transcription engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: Option<String>,
    /// Audio duration in seconds
    pub duration: f64,
}

impl Transcript {
    /// The transcript text, rebuilt from segments if the text is empty
    pub fn full_text(&self) -> String {
        let text = self.text.trim();
        if !text.is_empty() {
            return text.to_string();
        }
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What to transcribe with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub engine: String,
    pub model_size: String,
    pub device: String,
    pub precision: String,
    /// Language code; `None` lets the engine detect it
    pub language: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            engine: "whisper-cli".to_string(),
            model_size: "base".to_string(),
            device: "auto".to_string(),
            precision: "int8_float32".to_string(),
            language: None,
        }
    }
}

impl TranscriptionConfig {
    pub fn key(&self) -> EngineKey {
        EngineKey {
            engine: self.engine.clone(),
            model_size: self.model_size.clone(),
            device: self.device.clone(),
            precision: self.precision.clone(),
        }
    }
}

/// Identity of a loaded engine instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineKey {
    pub engine: String,
    pub model_size: String,
    pub device: String,
    pub precision: String,
}

/// Speech-to-text
///
/// Implementations report progress as a non-decreasing fraction ending at
/// 1.0 and stop any subordinate work promptly once `cancel` fires.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(
        &self,
        audio: &Path,
        config: &TranscriptionConfig,
        progress: &dyn FractionReporter,
        cancel: &CancellationToken,
    ) -> Result<Transcript, EngineError>;
}

/// Creates engine instances; called at most once per key by [`EngineCache`]
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, key: &EngineKey) -> Result<Arc<dyn TranscriptionEngine>, EngineError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &Transcript) -> Result<String, EngineError>;
}
