// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Run events and the mapping from per-stage progress to one global scale.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pipeline::TranscriptionOutput;

/// The stages of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Metadata,
    AudioResolution,
    Download,
    Transcription,
    Summarization,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::Metadata,
        PipelineStage::AudioResolution,
        PipelineStage::Download,
        PipelineStage::Transcription,
        PipelineStage::Summarization,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Progress message shown while the stage runs
    pub fn activity(self) -> &'static str {
        match self {
            PipelineStage::Metadata => "Fetching episode metadata...",
            PipelineStage::AudioResolution => "Resolving audio source...",
            PipelineStage::Download => "Downloading audio...",
            PipelineStage::Transcription => "Transcribing audio...",
            PipelineStage::Summarization => "Generating summary...",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStage::Metadata => "Metadata",
            PipelineStage::AudioResolution => "Audio resolution",
            PipelineStage::Download => "Download",
            PipelineStage::Transcription => "Transcription",
            PipelineStage::Summarization => "Summarization",
        })
    }
}

/// Events emitted during a run, in order
///
/// A run emits any number of `Progress` events followed by exactly one
/// `Error` or `Result`. A cancelled run emits neither.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineEvent {
    Progress { message: String, percent: f64 },
    Error { message: String },
    Result { payload: Box<TranscriptionOutput> },
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineEvent::Progress { .. })
    }
}

/// Relative share of the global progress scale per stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageWeights {
    pub metadata: f64,
    pub audio_resolution: f64,
    pub download: f64,
    pub transcription: f64,
    pub summarization: f64,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            metadata: 10.0,
            audio_resolution: 10.0,
            download: 10.0,
            transcription: 65.0,
            summarization: 5.0,
        }
    }
}

impl StageWeights {
    fn as_array(&self) -> [f64; 5] {
        [
            self.metadata,
            self.audio_resolution,
            self.download,
            self.transcription,
            self.summarization,
        ]
    }

    /// Lay the stages out on `[0, 100]`
    ///
    /// With `skip_fetch` the metadata, resolution and download stages get
    /// zero-width windows at 0 and the remaining weights are rescaled.
    /// Non-finite or negative weights count as zero; if nothing is left the
    /// default weights are used.
    pub fn windows(&self, skip_fetch: bool) -> StageWindows {
        let mut weights = self.as_array().map(|w| if w.is_finite() { w.max(0.0) } else { 0.0 });
        if skip_fetch {
            weights[..3].fill(0.0);
        }

        let mut total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Self::default().windows(skip_fetch);
        }
        if !total.is_finite() {
            // Huge weights overflow the sum; only their ratios matter
            let largest = weights.iter().copied().fold(0.0, f64::max);
            weights = weights.map(|w| w / largest);
            total = weights.iter().sum();
        }

        let mut windows = [Window::default(); 5];
        let mut acc = 0.0;
        for (i, weight) in weights.iter().enumerate() {
            let start = acc / total * 100.0;
            acc += weight;
            let end = if i == weights.len() - 1 {
                100.0
            } else {
                acc / total * 100.0
            };
            windows[i] = Window { start, end };
        }

        StageWindows(windows)
    }
}

/// A stage's `[start, end]` slice of the global percentage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Window {
    pub start: f64,
    pub end: f64,
}

impl Window {
    /// Map a stage-internal fraction to a global percentage
    pub fn map(&self, fraction: f64) -> f64 {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.start + fraction * (self.end - self.start)
    }

    pub fn width(&self) -> f64 {
        self.end - self.start
    }
}

/// Windows for all five stages, contiguous over `[0, 100]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageWindows([Window; 5]);

impl StageWindows {
    pub fn get(&self, stage: PipelineStage) -> Window {
        self.0[stage.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (PipelineStage, Window)> + '_ {
        PipelineStage::ALL.into_iter().zip(self.0.iter().copied())
    }
}

/// Remaps stage fractions to global percentages that never decrease
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    windows: StageWindows,
    last: f64,
}

impl ProgressTracker {
    pub fn new(windows: StageWindows) -> Self {
        Self { windows, last: 0.0 }
    }

    /// Global percentage for `fraction` of `stage`, or `None` if it would
    /// not advance past what was already reported
    pub fn advance(&mut self, stage: PipelineStage, fraction: f64) -> Option<f64> {
        let percent = self.windows.get(stage).map(fraction);
        if percent > self.last {
            self.last = percent;
            Some(percent)
        } else {
            None
        }
    }

    /// Global percentage at the start of `stage`, never below the last value
    pub fn enter(&mut self, stage: PipelineStage) -> f64 {
        self.last = self.last.max(self.windows.get(stage).start);
        self.last
    }

    /// Jump to 100
    pub fn finish(&mut self) -> f64 {
        self.last = 100.0;
        self.last
    }

    pub fn last(&self) -> f64 {
        self.last
    }
}

/// Sink for a stage's internal progress, a fraction in `[0, 1]`
pub trait FractionReporter: Send + Sync {
    fn report(&self, fraction: f64);
}

/// A reporter that silently ignores all updates.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl FractionReporter for NoopReporter {
    fn report(&self, _fraction: f64) {
        // Intentionally empty
    }
}

/// Records every reported fraction
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter(std::sync::Mutex<Vec<f64>>);

#[cfg(test)]
impl RecordingReporter {
    pub(crate) fn values(&self) -> Vec<f64> {
        self.0.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl FractionReporter for RecordingReporter {
    fn report(&self, fraction: f64) {
        self.0.lock().unwrap().push(fraction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(windows: &StageWindows) {
        let mut expected_start = 0.0;
        for (stage, window) in windows.iter() {
            assert_eq!(window.start, expected_start, "{stage} starts where the previous ended");
            assert!(window.end >= window.start, "{stage} has a non-negative width");
            expected_start = window.end;
        }
        assert_eq!(expected_start, 100.0);
    }

    #[test]
    fn default_windows_partition_the_scale() {
        let windows = StageWeights::default().windows(false);
        assert_partition(&windows);

        assert_eq!(windows.get(PipelineStage::Metadata), Window { start: 0.0, end: 10.0 });
        assert_eq!(windows.get(PipelineStage::Download), Window { start: 20.0, end: 30.0 });
        assert_eq!(windows.get(PipelineStage::Transcription).end, 95.0);
        assert_eq!(windows.get(PipelineStage::Summarization).end, 100.0);
    }

    #[test]
    fn local_file_windows_collapse_fetch_stages() {
        let windows = StageWeights::default().windows(true);
        assert_partition(&windows);

        for stage in [
            PipelineStage::Metadata,
            PipelineStage::AudioResolution,
            PipelineStage::Download,
        ] {
            assert_eq!(windows.get(stage).width(), 0.0);
        }
        let transcription = windows.get(PipelineStage::Transcription);
        assert_eq!(transcription.start, 0.0);
        assert!((transcription.end - 65.0 / 70.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn odd_weights_still_partition() {
        let cases = [
            StageWeights {
                metadata: 1.0,
                audio_resolution: 3.0,
                download: 7.0,
                transcription: 11.0,
                summarization: 13.0,
            },
            StageWeights {
                metadata: -5.0,
                audio_resolution: f64::NAN,
                download: 0.0,
                transcription: 1.0,
                summarization: 0.0,
            },
            StageWeights {
                metadata: 0.0,
                audio_resolution: 0.0,
                download: 0.0,
                transcription: 0.0,
                summarization: 0.0,
            },
        ];

        for weights in cases {
            assert_partition(&weights.windows(false));
            assert_partition(&weights.windows(true));
        }
    }

    #[test]
    fn all_zero_weights_fall_back_to_defaults() {
        let zero = StageWeights {
            metadata: 0.0,
            audio_resolution: 0.0,
            download: 0.0,
            transcription: 0.0,
            summarization: 0.0,
        };
        assert_eq!(zero.windows(false), StageWeights::default().windows(false));
        assert_eq!(zero.windows(true), StageWeights::default().windows(true));
    }

    #[test]
    fn huge_weights_do_not_overflow_the_scale() {
        let huge = StageWeights {
            metadata: f64::MAX,
            audio_resolution: f64::MAX,
            download: f64::MAX,
            transcription: f64::MAX,
            summarization: f64::MAX,
        };
        let windows = huge.windows(false);
        assert_partition(&windows);
        for (stage, window) in windows.iter() {
            assert!(window.start.is_finite() && window.end.is_finite(), "{stage}");
            assert!((window.width() - 20.0).abs() < 1e-9, "{stage}: {window:?}");
        }

        let lopsided = StageWeights {
            transcription: f64::MAX,
            summarization: f64::MAX,
            ..StageWeights::default()
        };
        let windows = lopsided.windows(true);
        assert_partition(&windows);
        assert!((windows.get(PipelineStage::Transcription).end - 50.0).abs() < 1e-9);
    }

    #[test]
    fn window_map_clamps_fraction() {
        let window = Window { start: 30.0, end: 95.0 };
        assert_eq!(window.map(0.0), 30.0);
        assert_eq!(window.map(1.0), 95.0);
        assert_eq!(window.map(2.0), 95.0);
        assert_eq!(window.map(-1.0), 30.0);
        assert_eq!(window.map(f64::NAN), 30.0);
    }

    #[test]
    fn tracker_never_goes_backwards() {
        let mut tracker = ProgressTracker::new(StageWeights::default().windows(false));

        assert_eq!(tracker.enter(PipelineStage::Download), 20.0);
        assert_eq!(tracker.advance(PipelineStage::Download, 0.5), Some(25.0));
        assert_eq!(tracker.advance(PipelineStage::Download, 0.4), None);
        assert_eq!(tracker.advance(PipelineStage::Metadata, 1.0), None);
        assert_eq!(tracker.enter(PipelineStage::AudioResolution), 25.0);
        assert_eq!(tracker.advance(PipelineStage::Transcription, 0.0), Some(30.0));
        assert_eq!(tracker.finish(), 100.0);
        assert_eq!(tracker.last(), 100.0);
    }

    #[test]
    fn stage_display_names() {
        assert_eq!(PipelineStage::AudioResolution.to_string(), "Audio resolution");
        assert_eq!(PipelineStage::Transcription.to_string(), "Transcription");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = PipelineEvent::Progress {
            message: "Downloading audio...".to_string(),
            percent: 25.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 25.0);
        assert!(!event.is_terminal());

        let error = PipelineEvent::Error {
            message: "boom".to_string(),
        };
        assert_eq!(serde_json::to_value(&error).unwrap()["type"], "error");
        assert!(error.is_terminal());
    }
}
