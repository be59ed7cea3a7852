// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runs metadata lookup, audio resolution, download, transcription and
//! summarization as one cancellable operation with a single event stream.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineOptions;
use crate::engine::{
    EngineCache, EngineLoader, EpisodeInfo, MetadataProvider, Segment, Summarizer,
};
use crate::episode::download_audio;
use crate::error::PipelineError;
use crate::http::HttpClient;
use crate::progress::{
    FractionReporter, PipelineEvent, PipelineStage, ProgressTracker,
};
use crate::resolve::{EpisodeReference, ResolvedAudio, resolve_audio};

/// What a run starts from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineInput {
    /// A platform episode link; everything is fetched
    Episode { url: String },
    /// Audio the caller already has; it is read but never deleted
    LocalFile { path: PathBuf },
}

impl PipelineInput {
    fn skips_fetch(&self) -> bool {
        matches!(self, PipelineInput::LocalFile { .. })
    }
}

/// Payload of the final `Result` event
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionOutput {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: Option<String>,
    pub duration: f64,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<EpisodeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<ResolvedAudio>,
}

/// Where a run is; transitions only ever move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Idle,
    Metadata,
    AudioResolution,
    Download,
    Transcription,
    Summarization,
    Done,
    Error,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Error | RunState::Cancelled)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(self, next: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            RunState::Error | RunState::Cancelled => true,
            _ => next > self,
        }
    }
}

impl From<PipelineStage> for RunState {
    fn from(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::Metadata => RunState::Metadata,
            PipelineStage::AudioResolution => RunState::AudioResolution,
            PipelineStage::Download => RunState::Download,
            PipelineStage::Transcription => RunState::Transcription,
            PipelineStage::Summarization => RunState::Summarization,
        }
    }
}

/// A started run: its events, its cancel switch, and its outcome
pub struct PipelineRun {
    /// Dropping this receiver cancels the run
    pub events: UnboundedReceiver<PipelineEvent>,
    pub handle: JoinHandle<RunState>,
    cancel: CancellationToken,
}

impl PipelineRun {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain every event and wait for the run to finish
    pub async fn collect(mut self) -> (Vec<PipelineEvent>, RunState) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let state = self.handle.await.unwrap_or(RunState::Error);
        (events, state)
    }
}

/// Drives runs against a fixed set of collaborators
///
/// Cloning is cheap; clones share the engine cache.
#[derive(Clone)]
pub struct Pipeline {
    http: Arc<dyn HttpClient>,
    metadata: Arc<dyn MetadataProvider>,
    loader: Arc<dyn EngineLoader>,
    summarizer: Arc<dyn Summarizer>,
    engines: Arc<EngineCache>,
    options: Arc<PipelineOptions>,
}

impl Pipeline {
    pub fn new(
        http: Arc<dyn HttpClient>,
        metadata: Arc<dyn MetadataProvider>,
        loader: Arc<dyn EngineLoader>,
        summarizer: Arc<dyn Summarizer>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            http,
            metadata,
            loader,
            summarizer,
            engines: Arc::new(EngineCache::new()),
            options: Arc::new(options),
        }
    }

    /// Share an engine cache with other pipelines
    pub fn with_engine_cache(mut self, engines: Arc<EngineCache>) -> Self {
        self.engines = engines;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Start a run on the current tokio runtime
    pub fn run(&self, input: PipelineInput) -> PipelineRun {
        let (tx, events) = unbounded_channel();
        let cancel = CancellationToken::new();
        let windows = self.options.weights.windows(input.skips_fetch());

        let run = Run {
            pipeline: self.clone(),
            sink: EventSink {
                tx,
                tracker: Mutex::new(ProgressTracker::new(windows)),
            },
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(run.execute(input));

        PipelineRun {
            events,
            handle,
            cancel,
        }
    }
}

/// Sends events and keeps the global percentage monotonic
struct EventSink {
    tx: UnboundedSender<PipelineEvent>,
    tracker: Mutex<ProgressTracker>,
}

impl EventSink {
    fn send(&self, event: PipelineEvent) {
        // A closed channel is noticed by the stage guard
        let _ = self.tx.send(event);
    }

    fn progress(&self, message: &str, percent: f64) {
        self.send(PipelineEvent::Progress {
            message: message.to_string(),
            percent,
        });
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, ProgressTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, stage: PipelineStage) {
        let percent = self.tracker().enter(stage);
        self.progress(stage.activity(), percent);
    }

    fn advance(&self, stage: PipelineStage, fraction: f64) {
        let advanced = self.tracker().advance(stage, fraction);
        if let Some(percent) = advanced {
            self.progress(stage.activity(), percent);
        }
    }

    fn finish(&self, output: TranscriptionOutput) {
        let percent = self.tracker().finish();
        self.progress("Complete!", percent);
        self.send(PipelineEvent::Result {
            payload: Box::new(output),
        });
    }
}

/// Forwards one stage's fractional progress into the run's event stream
struct StageReporter<'a> {
    sink: &'a EventSink,
    stage: PipelineStage,
}

impl FractionReporter for StageReporter<'_> {
    fn report(&self, fraction: f64) {
        self.sink.advance(self.stage, fraction);
    }
}

/// Temporary storage owned by one run
struct Workspace {
    root: Option<PathBuf>,
    dir: Option<TempDir>,
}

impl Workspace {
    fn new(root: Option<PathBuf>) -> Self {
        Self { root, dir: None }
    }

    /// The run's temp directory, created on first use
    fn dir(&mut self) -> Result<&Path, PipelineError> {
        if self.dir.is_none() {
            let mut builder = tempfile::Builder::new();
            builder.prefix("podscribe-");
            let dir = match &self.root {
                Some(root) => builder.tempdir_in(root),
                None => builder.tempdir(),
            }
            .map_err(PipelineError::Workspace)?;
            debug!(path = %dir.path().display(), "Created run workspace");
            self.dir = Some(dir);
        }

        match &self.dir {
            Some(dir) => Ok(dir.path()),
            None => Err(PipelineError::Workspace(std::io::Error::other(
                "workspace unavailable",
            ))),
        }
    }

    /// Remove everything the run created; safe to call repeatedly
    async fn cleanup(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        match tokio::fs::remove_dir_all(dir.path()).await {
            Ok(()) => debug!(path = %dir.path().display(), "Removed run workspace"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %dir.path().display(), error = %e, "Failed to remove run workspace"),
        }
    }
}

struct Run {
    pipeline: Pipeline,
    sink: EventSink,
    cancel: CancellationToken,
}

impl Run {
    async fn execute(self, input: PipelineInput) -> RunState {
        let mut state = RunState::Idle;
        let mut workspace = Workspace::new(self.pipeline.options.temp_root.clone());

        info!(?input, "Pipeline run started");
        let outcome = self.stages(&mut state, &mut workspace, input).await;

        let outcome = match outcome {
            Err(_) if self.cancel.is_cancelled() => Err(PipelineError::Cancelled),
            other => other,
        };

        let final_state = match outcome {
            Ok(output) => {
                self.sink.finish(output);
                RunState::Done
            }
            Err(PipelineError::Cancelled) => {
                info!(stage = ?state, "Pipeline run cancelled");
                RunState::Cancelled
            }
            Err(e) => {
                warn!(stage = ?state, error = %e, "Pipeline run failed");
                self.sink.send(PipelineEvent::Error {
                    message: e.to_string(),
                });
                RunState::Error
            }
        };

        workspace.cleanup().await;
        transition(&mut state, final_state);
        state
    }

    async fn stages(
        &self,
        state: &mut RunState,
        workspace: &mut Workspace,
        input: PipelineInput,
    ) -> Result<TranscriptionOutput, PipelineError> {
        let options = &self.pipeline.options;
        let http = self.pipeline.http.as_ref();

        let (audio_path, episode, audio) = match input {
            PipelineInput::Episode { url } => {
                let info = self
                    .stage(state, PipelineStage::Metadata, async {
                        self.pipeline
                            .metadata
                            .resolve(&url)
                            .await
                            .map_err(|e| PipelineError::Metadata(e.to_string()))
                    })
                    .await?;

                let resolved = self
                    .stage(state, PipelineStage::AudioResolution, async {
                        let blob = info.raw.as_ref();
                        let reference =
                            EpisodeReference::from_url(&url, blob, info.title.as_deref())?;
                        Ok::<_, PipelineError>(
                            resolve_audio(http, &reference, blob, &options.resolver).await?,
                        )
                    })
                    .await?;

                let path = self
                    .stage(state, PipelineStage::Download, async {
                        let dest = workspace.dir()?.join(format!(
                            "{}.{}",
                            resolved.suggested_filename, resolved.extension
                        ));
                        let reporter = StageReporter {
                            sink: &self.sink,
                            stage: PipelineStage::Download,
                        };
                        download_audio(
                            http,
                            resolved.audio_url.as_str(),
                            &dest,
                            &options.download,
                            &reporter,
                            &self.cancel,
                        )
                        .await?;
                        Ok::<_, PipelineError>(dest)
                    })
                    .await?;

                (path, Some(info), Some(resolved))
            }
            PipelineInput::LocalFile { path } => {
                let is_file = tokio::fs::metadata(&path)
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false);
                if !is_file {
                    return Err(PipelineError::LocalFileMissing(path));
                }
                (path, None, None)
            }
        };

        let transcript = self
            .stage(state, PipelineStage::Transcription, async {
                let config = &options.transcription;
                let engine = self
                    .pipeline
                    .engines
                    .get_or_load(&config.key(), self.pipeline.loader.as_ref())
                    .await?;
                let reporter = StageReporter {
                    sink: &self.sink,
                    stage: PipelineStage::Transcription,
                };
                Ok::<_, PipelineError>(
                    engine
                        .transcribe(&audio_path, config, &reporter, &self.cancel)
                        .await?,
                )
            })
            .await?;

        let summary = self
            .stage(state, PipelineStage::Summarization, async {
                Ok::<_, PipelineError>(self.pipeline.summarizer.summarize(&transcript).await?)
            })
            .await?;

        Ok(TranscriptionOutput {
            text: transcript.text,
            segments: transcript.segments,
            language: transcript.language,
            duration: transcript.duration,
            summary,
            episode,
            audio,
        })
    }

    /// Run one stage under its timeout, racing cancellation and disconnect
    async fn stage<T>(
        &self,
        state: &mut RunState,
        stage: PipelineStage,
        work: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        transition(state, stage.into());
        self.sink.enter(stage);
        info!(%stage, percent = self.sink.tracker().last(), "Stage started");

        let limit = self.pipeline.options.timeouts.get(stage);
        let bounded = async move {
            match limit {
                Some(after) => match tokio::time::timeout(after, work).await {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::Timeout { stage, after }),
                },
                None => work.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            _ = self.sink.tx.closed() => {
                info!(%stage, "Event receiver dropped, cancelling run");
                self.cancel.cancel();
                Err(PipelineError::Cancelled)
            }
            result = bounded => result,
        }
    }
}

fn transition(state: &mut RunState, next: RunState) {
    if state.can_advance_to(next) {
        debug!(from = ?*state, to = ?next, "Run state transition");
        *state = next;
    } else {
        warn!(from = ?*state, to = ?next, "Ignoring backwards run state transition");
    }
}
