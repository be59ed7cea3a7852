// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transcription through the whisper.cpp command line tool.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::progress::FractionReporter;

use super::{EngineKey, EngineLoader, Segment, Transcript, TranscriptionConfig, TranscriptionEngine};

static PROGRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"progress\s*=\s*(\d{1,3})%").expect("progress pattern"));

/// Lines of stderr kept for error messages
const STDERR_TAIL: usize = 20;

/// Parse a `progress = NN%` line printed by whisper-cli with `-pp`
pub fn parse_progress(line: &str) -> Option<u8> {
    PROGRESS
        .captures(line)
        .and_then(|caps| caps[1].parse::<u8>().ok())
        .filter(|p| *p <= 100)
}

/// Runs one whisper-cli process per transcription
#[derive(Debug, Clone)]
pub struct WhisperCliEngine {
    binary: PathBuf,
    model: PathBuf,
    threads: Option<usize>,
}

impl WhisperCliEngine {
    pub fn new(binary: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            threads: None,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    fn command(&self, audio: &Path, output_base: &Path, config: &TranscriptionConfig) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-m")
            .arg(&self.model)
            .arg("-f")
            .arg(audio)
            .arg("-oj")
            .arg("-of")
            .arg(output_base)
            .arg("-pp")
            .arg("-l")
            .arg(config.language.as_deref().unwrap_or("auto"));

        if let Some(threads) = self.threads {
            command.arg("-t").arg(threads.to_string());
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl TranscriptionEngine for WhisperCliEngine {
    async fn transcribe(
        &self,
        audio: &Path,
        config: &TranscriptionConfig,
        progress: &dyn FractionReporter,
        cancel: &CancellationToken,
    ) -> Result<Transcript, EngineError> {
        if !audio.exists() {
            return Err(EngineError::TranscriptionFailed(format!(
                "audio file not found: {}",
                audio.display()
            )));
        }

        // Removed on drop, on every path out of this function
        let workdir = tempfile::Builder::new()
            .prefix("podscribe-whisper-")
            .tempdir()
            .map_err(|e| EngineError::TranscriptionFailed(format!("temp dir: {e}")))?;
        let output_base = workdir.path().join("transcript");

        info!(binary = %self.binary.display(), audio = %audio.display(), "Running whisper-cli");

        let mut child = self
            .command(audio, &output_base, config)
            .spawn()
            .map_err(|e| {
                EngineError::EngineUnavailable(format!(
                    "failed to spawn {}: {e}",
                    self.binary.display()
                ))
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::TranscriptionFailed("stderr not captured".to_string()))?;
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = VecDeque::with_capacity(STDERR_TAIL);
        let mut last = 0.0_f64;
        progress.report(0.0);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Killing whisper-cli");
                    let _ = child.kill().await;
                    return Err(EngineError::TranscriptionFailed("cancelled".to_string()));
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(percent) = parse_progress(&line) {
                            let fraction = (f64::from(percent) / 100.0).max(last);
                            if fraction > last {
                                last = fraction;
                                progress.report(fraction);
                            }
                        } else if !line.trim().is_empty() {
                            if tail.len() == STDERR_TAIL {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to read whisper-cli output");
                        break;
                    }
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(EngineError::TranscriptionFailed("cancelled".to_string()));
            }
            status = child.wait() => status.map_err(|e| {
                EngineError::TranscriptionFailed(format!("failed to wait for whisper-cli: {e}"))
            })?,
        };

        if !status.success() {
            let detail = tail.into_iter().collect::<Vec<_>>().join("\n");
            return Err(EngineError::TranscriptionFailed(format!(
                "whisper-cli exited with {status}: {detail}"
            )));
        }

        let json_path = output_base.with_extension("json");
        let bytes = tokio::fs::read(&json_path).await.map_err(|e| {
            EngineError::TranscriptionFailed(format!("missing output {}: {e}", json_path.display()))
        })?;
        let transcript = parse_output(&bytes, config)?;

        progress.report(1.0);
        debug!(
            segments = transcript.segments.len(),
            duration = transcript.duration,
            "whisper-cli finished"
        );
        Ok(transcript)
    }
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    result: Option<WhisperResult>,
    #[serde(default)]
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperResult {
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    offsets: Offsets,
    text: String,
}

/// Milliseconds
#[derive(Debug, Deserialize)]
struct Offsets {
    from: u64,
    to: u64,
}

fn parse_output(bytes: &[u8], config: &TranscriptionConfig) -> Result<Transcript, EngineError> {
    let output: WhisperOutput = serde_json::from_slice(bytes)
        .map_err(|e| EngineError::TranscriptionFailed(format!("unreadable whisper-cli output: {e}")))?;

    let segments: Vec<Segment> = output
        .transcription
        .into_iter()
        .map(|s| Segment {
            start: s.offsets.from as f64 / 1000.0,
            end: s.offsets.to as f64 / 1000.0,
            text: s.text.trim().to_string(),
            words: None,
        })
        .collect();

    let text = segments
        .iter()
        .map(|s| s.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let duration = segments.last().map(|s| s.end).unwrap_or_default();
    let language = output
        .result
        .and_then(|r| r.language)
        .or_else(|| config.language.clone());

    Ok(Transcript {
        text,
        segments,
        language,
        duration,
    })
}

/// Loads whisper-cli engines with models from a `ggml-<size>.bin` directory
#[derive(Debug, Clone)]
pub struct WhisperCliLoader {
    binary: PathBuf,
    models_dir: PathBuf,
    threads: Option<usize>,
}

impl WhisperCliLoader {
    pub fn new(binary: impl Into<PathBuf>, models_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            models_dir: models_dir.into(),
            threads: None,
        }
    }

    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    pub fn model_path(&self, model_size: &str) -> PathBuf {
        self.models_dir.join(format!("ggml-{model_size}.bin"))
    }
}

#[async_trait]
impl EngineLoader for WhisperCliLoader {
    async fn load(&self, key: &EngineKey) -> Result<Arc<dyn TranscriptionEngine>, EngineError> {
        if key.engine != "whisper-cli" {
            return Err(EngineError::EngineUnavailable(format!(
                "unsupported engine '{}'",
                key.engine
            )));
        }

        let model = self.model_path(&key.model_size);
        if !tokio::fs::try_exists(&model).await.unwrap_or(false) {
            return Err(EngineError::EngineUnavailable(format!(
                "model not found: {}",
                model.display()
            )));
        }

        let mut engine = WhisperCliEngine::new(&self.binary, model);
        if let Some(threads) = self.threads {
            engine = engine.with_threads(threads);
        }
        Ok(Arc::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NoopReporter, RecordingReporter};
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[test]
    fn parses_progress_lines() {
        assert_eq!(
            parse_progress("whisper_print_progress_callback: progress =  45%"),
            Some(45)
        );
        assert_eq!(parse_progress("progress = 100%"), Some(100));
        assert_eq!(parse_progress("whisper_init_from_file: loading model"), None);
        assert_eq!(parse_progress("progress = 250%"), None);
    }

    #[test]
    fn parses_whisper_json() {
        let json = br#"{
            "result": { "language": "de" },
            "transcription": [
                { "timestamps": { "from": "00:00:00,000", "to": "00:00:02,500" },
                  "offsets": { "from": 0, "to": 2500 }, "text": " Hallo." },
                { "offsets": { "from": 2500, "to": 4000 }, "text": " Welt." }
            ]
        }"#;

        let transcript = parse_output(json, &TranscriptionConfig::default()).unwrap();
        assert_eq!(transcript.text, "Hallo. Welt.");
        assert_eq!(transcript.language.as_deref(), Some("de"));
        assert_eq!(transcript.duration, 4.0);
        assert_eq!(transcript.segments[0].end, 2.5);
    }

    #[test]
    fn unreadable_output_is_a_transcription_error() {
        let err = parse_output(b"not json", &TranscriptionConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::TranscriptionFailed(_)));
    }

    #[tokio::test]
    async fn loader_rejects_missing_model() {
        let dir = tempdir().unwrap();
        let loader = WhisperCliLoader::new("whisper-cli", dir.path());

        let err = loader
            .load(&TranscriptionConfig::default().key())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::EngineUnavailable(_)));
    }

    #[cfg(unix)]
    fn fake_cli(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-whisper");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_cli_and_reports_progress() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("audio.mp3");
        std::fs::write(&audio, b"audio").unwrap();
        let script = r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-of" ]; then out="$2"; fi
  shift
done
echo "progress = 30%" >&2
echo "progress = 80%" >&2
printf '%s' '{"result":{"language":"en"},"transcription":[{"offsets":{"from":0,"to":1500},"text":" Hello there."}]}' > "$out.json"
"#;
        let engine = WhisperCliEngine::new(fake_cli(dir.path(), script), dir.path().join("model.bin"));
        let reporter = RecordingReporter::default();

        let transcript = engine
            .transcribe(
                &audio,
                &TranscriptionConfig::default(),
                &reporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(transcript.text, "Hello there.");
        assert_eq!(reporter.values(), vec![0.0, 0.3, 0.8, 1.0]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("audio.mp3");
        std::fs::write(&audio, b"audio").unwrap();
        let engine = WhisperCliEngine::new(
            fake_cli(dir.path(), "echo 'progress = 5%' >&2\nexec sleep 30"),
            dir.path().join("model.bin"),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = engine
            .transcribe(&audio, &TranscriptionConfig::default(), &NoopReporter, &cancel)
            .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_cli_surfaces_stderr() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("audio.mp3");
        std::fs::write(&audio, b"audio").unwrap();
        let engine = WhisperCliEngine::new(
            fake_cli(dir.path(), "echo 'error: failed to read audio' >&2\nexit 3"),
            dir.path().join("model.bin"),
        );

        let err = engine
            .transcribe(
                &audio,
                &TranscriptionConfig::default(),
                &NoopReporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("failed to read audio"));
    }
}
