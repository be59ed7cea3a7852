// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use podscribe::{
    Pipeline, PipelineEvent, PipelineInput, PipelineOptions, ReqwestClient, RunState,
    StaticMetadataProvider, SummarizerKind, TranscriptionOutput, WhisperCliLoader,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "[-] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SummarizerArg {
    Extractive,
    Ollama,
}

/// Transcribe and summarize podcast episodes
#[derive(Parser, Debug)]
#[command(name = "podscribe")]
#[command(about = "Resolve a podcast episode link to its audio, then transcribe and summarize it")]
#[command(version)]
struct Args {
    /// Episode page URL
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    url: Option<String>,

    /// Transcribe a local audio file instead of fetching an episode
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Episode title, used to match the episode in its show's feed
    #[arg(long)]
    title: Option<String>,

    /// JSON file with the platform's episode metadata
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// JSON options file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// whisper.cpp command line binary
    #[arg(long, default_value = "whisper-cli")]
    whisper_cli: PathBuf,

    /// Directory holding ggml-<model>.bin files
    #[arg(long, default_value = "models")]
    models_dir: PathBuf,

    /// Model size, e.g. base or small
    #[arg(short, long)]
    model: Option<String>,

    /// Spoken language; detected when omitted
    #[arg(short, long)]
    language: Option<String>,

    /// Threads handed to whisper.cpp
    #[arg(short, long)]
    threads: Option<usize>,

    /// Summarizer to use
    #[arg(short, long, value_enum)]
    summarizer: Option<SummarizerArg>,

    /// Write the result JSON here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn options(&self) -> Result<PipelineOptions> {
        let mut options = match &self.config {
            Some(path) => PipelineOptions::load(path)?,
            None => PipelineOptions::default(),
        };

        if let Some(model) = &self.model {
            options.transcription.model_size = model.clone();
        }
        if self.language.is_some() {
            options.transcription.language = self.language.clone();
        }
        if let Some(summarizer) = self.summarizer {
            options.summarizer.kind = match summarizer {
                SummarizerArg::Extractive => SummarizerKind::Extractive,
                SummarizerArg::Ollama => SummarizerKind::Ollama,
            };
        }
        Ok(options)
    }

    fn input(&self) -> PipelineInput {
        match (&self.file, &self.url) {
            (Some(path), _) => PipelineInput::LocalFile { path: path.clone() },
            (None, Some(url)) => PipelineInput::Episode { url: url.clone() },
            (None, None) => unreachable!("clap requires a URL or --file"),
        }
    }
}

/// Renders run events as a single progress bar
struct EventRenderer {
    bar: Option<ProgressBar>,
}

impl EventRenderer {
    fn new(quiet: bool) -> Self {
        if quiet {
            return Self { bar: None };
        }

        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos:>3}% {wide_msg}")
            .unwrap()
            .progress_chars("█▓░");

        let bar = ProgressBar::new(100);
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { bar: Some(bar) }
    }

    fn render(&self, event: &PipelineEvent) {
        let Some(bar) = &self.bar else {
            return;
        };

        match event {
            PipelineEvent::Progress { message, percent } => {
                bar.set_position(percent.round() as u64);
                bar.set_message(message.clone());
            }
            PipelineEvent::Error { message } => {
                bar.abandon_with_message(format!("{FAILURE}{}", message.red()));
            }
            PipelineEvent::Result { payload } => {
                bar.finish_and_clear();
                eprintln!(
                    "{SUCCESS}{} {} segments, {}s of audio",
                    "Done:".bold().green(),
                    payload.segments.len().to_string().cyan(),
                    format!("{:.0}", payload.duration).cyan()
                );
            }
        }
    }

    fn cancelled(&self) {
        if let Some(bar) = &self.bar {
            bar.abandon_with_message(format!("{STOP}{}", "Cancelled".yellow()));
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PODSCRIBE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn write_output(output: &TranscriptionOutput, path: Option<&PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(output).context("Failed to serialize result")?;
    match path {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("{FOLDER}Output: {}", path.display().to_string().cyan());
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    if !args.quiet {
        eprintln!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podscribe".bold().magenta(),
            "- Podcast Transcriber".dimmed()
        );
    }

    let options = args.options().context("Failed to load options")?;

    let mut metadata = match &args.metadata {
        Some(path) => StaticMetadataProvider::from_json_file(path)?,
        None => StaticMetadataProvider::default(),
    };
    metadata = metadata.with_title(args.title.clone());

    let loader = WhisperCliLoader::new(args.whisper_cli.clone(), args.models_dir.clone())
        .with_threads(args.threads);
    let summarizer = options
        .summarizer
        .build()
        .context("Failed to set up summarizer")?;

    let pipeline = Pipeline::new(
        Arc::new(ReqwestClient::new()),
        Arc::new(metadata),
        Arc::new(loader),
        summarizer,
        options,
    );

    let mut run = pipeline.run(args.input());
    let cancel = run.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let renderer = EventRenderer::new(args.quiet);
    let mut output = None;
    let mut failure = None;
    while let Some(event) = run.events.recv().await {
        renderer.render(&event);
        match event {
            PipelineEvent::Result { payload } => output = Some(payload),
            PipelineEvent::Error { message } => failure = Some(message),
            PipelineEvent::Progress { .. } => {}
        }
    }

    let state = run.handle.await.context("Pipeline task failed")?;
    match state {
        RunState::Done => {
            if let Some(output) = output {
                write_output(&output, args.output.as_ref())?;
            }
            Ok(())
        }
        RunState::Cancelled => {
            renderer.cancelled();
            std::process::exit(130);
        }
        _ => {
            if args.quiet
                && let Some(message) = failure
            {
                eprintln!("{FAILURE}{}", message.red());
            }
            std::process::exit(1);
        }
    }
}
