// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::progress::PipelineStage;

/// Errors that can occur when fetching or parsing RSS/Atom feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for feed {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to parse feed from {url}: {reason}")]
    ParseFailed { url: String, reason: String },

    #[error("Feed at {url} has no entries")]
    Empty { url: String },

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FeedError {
    /// Whether the server answered that the feed does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, FeedError::HttpStatus { status: 404 | 410, .. })
    }
}

/// Which feed lookup path(s) were attempted before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPath {
    /// Only the templated primary address was tried
    Primary,
    /// Only the search-index fallback was tried (no show id known)
    Fallback,
    /// The primary address failed and the fallback failed too
    PrimaryThenFallback,
}

impl fmt::Display for FeedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedPath::Primary => "primary feed address",
            FeedPath::Fallback => "search-index fallback",
            FeedPath::PrimaryThenFallback => "primary feed address and search-index fallback",
        })
    }
}

/// Errors from mapping an episode link to a playable audio URL
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Unable to determine the episode id from {url}")]
    EpisodeIdUnknown { url: String },

    #[error("Show lookup failed: no show id or show name could be found for {url}")]
    ShowNotFound { url: String },

    #[error("Feed fetch failed via {path}: {reason}")]
    FeedUnreachable { path: FeedPath, reason: String },

    #[error(
        "Episode not found in the show's feed (id={episode_id}, title={}); feed has {entries} entries",
        title.as_deref().unwrap_or("<none>")
    )]
    EpisodeNotInFeed {
        episode_id: String,
        title: Option<String>,
        entries: usize,
    },

    #[error("Feed entry '{title}' has no audio enclosure")]
    MissingEnclosure { title: String },
}

/// Coarse classification of download failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadErrorKind {
    Timeout,
    Transport,
    EmptyFile,
    Cancelled,
}

/// Errors that can occur during audio downloads
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Download timed out after {after:?} waiting for data from {url}")]
    Timeout { url: String, after: Duration },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Downloaded file {path} is empty or missing")]
    EmptyFile { path: PathBuf },

    #[error("Download of {url} was cancelled")]
    Cancelled { url: String },
}

impl DownloadError {
    pub fn kind(&self) -> DownloadErrorKind {
        match self {
            DownloadError::Timeout { .. } => DownloadErrorKind::Timeout,
            DownloadError::HttpFailed { source, .. } | DownloadError::StreamFailed { source, .. }
                if source.is_timeout() =>
            {
                DownloadErrorKind::Timeout
            }
            DownloadError::EmptyFile { .. } => DownloadErrorKind::EmptyFile,
            DownloadError::Cancelled { .. } => DownloadErrorKind::Cancelled,
            _ => DownloadErrorKind::Transport,
        }
    }
}

/// Errors reported by the metadata, transcription and summarization
/// collaborators
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Metadata unavailable: {0}")]
    MetadataFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Summarization failed: {0}")]
    SummarizationFailed(String),

    #[error("Transcription engine unavailable: {0}")]
    EngineUnavailable(String),
}

/// Errors loading an options file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that terminate a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Metadata lookup failed: {0}")]
    Metadata(String),

    #[error("Audio resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{stage} stage timed out after {after:?}")]
    Timeout {
        stage: PipelineStage,
        after: Duration,
    },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Local audio file not found: {0}")]
    LocalFileMissing(PathBuf),

    #[error("Failed to prepare temporary storage: {0}")]
    Workspace(#[source] std::io::Error),
}
