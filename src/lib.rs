// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod config;
pub mod engine;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod pipeline;
pub mod progress;
pub mod resolve;
pub mod retry;

// Re-export main types for convenience
pub use config::{PipelineOptions, StageTimeouts, SummarizerKind, SummarizerOptions};
pub use engine::{
    EngineCache, EngineLoader, EpisodeInfo, MetadataProvider, StaticMetadataProvider, Summarizer,
    Transcript, TranscriptionConfig, TranscriptionEngine, WhisperCliLoader,
};
pub use error::{ConfigError, DownloadError, EngineError, FeedError, PipelineError, ResolveError};
pub use http::{HttpClient, ReqwestClient, Timeouts};
pub use pipeline::{Pipeline, PipelineInput, PipelineRun, RunState, TranscriptionOutput};
pub use progress::{PipelineEvent, PipelineStage, StageWeights};
pub use resolve::{EpisodeReference, ResolvedAudio, ResolverOptions, resolve_audio};
