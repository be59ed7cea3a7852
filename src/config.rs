// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Every tunable of a run in one serde-loadable structure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{ExtractiveSummarizer, OllamaOptions, OllamaSummarizer, Summarizer, TranscriptionConfig};
use crate::episode::DownloadOptions;
use crate::error::{ConfigError, EngineError};
use crate::progress::{PipelineStage, StageWeights};
use crate::resolve::ResolverOptions;

/// (De)serialize a [`Duration`] as fractional seconds
pub mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}

/// (De)serialize an optional [`Duration`] as fractional seconds or `null`
pub mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(de::Error::custom))
            .transpose()
    }
}

/// Upper bound on each stage's wall-clock time; `None` means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    #[serde(with = "opt_secs")]
    pub metadata: Option<Duration>,
    /// The feed locator bounds its own requests, so nothing by default
    #[serde(with = "opt_secs")]
    pub audio_resolution: Option<Duration>,
    #[serde(with = "opt_secs")]
    pub download: Option<Duration>,
    #[serde(with = "opt_secs")]
    pub transcription: Option<Duration>,
    #[serde(with = "opt_secs")]
    pub summarization: Option<Duration>,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            metadata: Some(Duration::from_secs(60)),
            audio_resolution: None,
            download: Some(Duration::from_secs(300)),
            transcription: Some(Duration::from_secs(1800)),
            summarization: Some(Duration::from_secs(300)),
        }
    }
}

impl StageTimeouts {
    pub fn get(&self, stage: PipelineStage) -> Option<Duration> {
        match stage {
            PipelineStage::Metadata => self.metadata,
            PipelineStage::AudioResolution => self.audio_resolution,
            PipelineStage::Download => self.download,
            PipelineStage::Transcription => self.transcription,
            PipelineStage::Summarization => self.summarization,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerKind {
    #[default]
    Extractive,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerOptions {
    pub kind: SummarizerKind,
    /// Sentences kept by the extractive summarizer
    pub max_sentences: usize,
    pub ollama: OllamaOptions,
}

impl Default for SummarizerOptions {
    fn default() -> Self {
        Self {
            kind: SummarizerKind::Extractive,
            max_sentences: 15,
            ollama: OllamaOptions::default(),
        }
    }
}

impl SummarizerOptions {
    pub fn build(&self) -> Result<Arc<dyn Summarizer>, EngineError> {
        Ok(match self.kind {
            SummarizerKind::Extractive => Arc::new(ExtractiveSummarizer::new(self.max_sentences)),
            SummarizerKind::Ollama => Arc::new(OllamaSummarizer::new(self.ollama.clone())?),
        })
    }
}

/// Options for a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub resolver: ResolverOptions,
    pub download: DownloadOptions,
    pub timeouts: StageTimeouts,
    pub weights: StageWeights,
    pub transcription: TranscriptionConfig,
    pub summarizer: SummarizerOptions,
    /// Parent directory for per-run temporary storage; the system temp dir
    /// when unset
    pub temp_root: Option<PathBuf>,
}

impl PipelineOptions {
    /// Load options from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_gives_defaults() {
        let options: PipelineOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, PipelineOptions::default());
    }

    #[test]
    fn partial_document_overrides_only_named_fields() {
        let options: PipelineOptions = serde_json::from_str(
            r#"{
                "resolver": { "search_limit": 3, "primary_timeouts": { "connect": 2.5, "read": 7 } },
                "timeouts": { "transcription": null, "download": 120 },
                "summarizer": { "kind": "ollama" }
            }"#,
        )
        .unwrap();

        assert_eq!(options.resolver.search_limit, 3);
        assert_eq!(options.resolver.primary_timeouts.connect, Duration::from_millis(2500));
        assert_eq!(options.resolver.matcher.min_title_score, 0.3);
        assert_eq!(options.timeouts.transcription, None);
        assert_eq!(options.timeouts.download, Some(Duration::from_secs(120)));
        assert_eq!(options.timeouts.metadata, Some(Duration::from_secs(60)));
        assert_eq!(options.summarizer.kind, SummarizerKind::Ollama);
    }

    #[test]
    fn negative_durations_are_rejected() {
        let result: Result<StageTimeouts, _> = serde_json::from_str(r#"{ "download": -1 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn options_round_trip_through_json() {
        let options = PipelineOptions::default();
        let json = serde_json::to_string(&options).unwrap();
        let back: PipelineOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn load_reports_the_failing_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("podscribe.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = PipelineOptions::load(&path).unwrap_err();
        assert!(err.to_string().contains("podscribe.json"));

        let missing = PipelineOptions::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::ReadFailed { .. }));
    }

    #[test]
    fn stage_timeout_lookup() {
        let timeouts = StageTimeouts::default();
        assert_eq!(timeouts.get(PipelineStage::AudioResolution), None);
        assert_eq!(
            timeouts.get(PipelineStage::Transcription),
            Some(Duration::from_secs(1800))
        );
    }

    #[test]
    fn summarizer_builds_for_every_kind() {
        let mut options = SummarizerOptions::default();
        assert!(options.build().is_ok());

        options.kind = SummarizerKind::Ollama;
        assert!(options.build().is_ok());
    }
}
