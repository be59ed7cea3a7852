// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::http::{HttpClient, Timeouts};
use crate::progress::FractionReporter;

/// Tunables for the audio download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    pub timeouts: Timeouts,
    /// Report whenever progress moved by at least this fraction
    pub progress_step: f64,
    /// ...or at least this often
    #[serde(with = "crate::config::secs")]
    pub progress_interval: Duration,
    /// Size assumed for progress estimation when the length is unknown
    pub assumed_size: u64,
    /// Estimated progress never exceeds this before the stream ends
    pub unknown_size_cap: f64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::from_secs(10, 60),
            progress_step: 0.01,
            progress_interval: Duration::from_secs(1),
            assumed_size: 50 * 1024 * 1024,
            unknown_size_cap: 0.99,
        }
    }
}

/// Rate-limits fraction reports to one per step or per interval
struct Throttle<'a> {
    reporter: &'a dyn FractionReporter,
    options: &'a DownloadOptions,
    content_length: Option<u64>,
    last_fraction: f64,
    last_at: Instant,
}

impl<'a> Throttle<'a> {
    fn new(
        reporter: &'a dyn FractionReporter,
        options: &'a DownloadOptions,
        content_length: Option<u64>,
    ) -> Self {
        reporter.report(0.0);
        Self {
            reporter,
            options,
            content_length,
            last_fraction: 0.0,
            last_at: Instant::now(),
        }
    }

    fn fraction(&self, bytes: u64) -> f64 {
        match self.content_length {
            Some(total) if total > 0 => (bytes as f64 / total as f64).clamp(0.0, 1.0),
            _ => {
                let assumed = self.options.assumed_size.max(1) as f64;
                (bytes as f64 / assumed).min(self.options.unknown_size_cap)
            }
        }
    }

    fn update(&mut self, bytes: u64) {
        let fraction = self.fraction(bytes).max(self.last_fraction);
        let stepped = fraction - self.last_fraction >= self.options.progress_step;
        let stale = self.last_at.elapsed() >= self.options.progress_interval;

        if stepped || stale {
            self.reporter.report(fraction);
            self.last_fraction = fraction;
            self.last_at = Instant::now();
        }
    }
}

/// Download `url` to `dest`, reporting fractional progress
///
/// The body is streamed chunk by chunk straight to disk. Each wait for data
/// is bounded by the read timeout and raced against `cancel`. On any failure
/// the partially written file is removed; a file that ends up empty is a
/// failure too. Returns the number of bytes written.
pub async fn download_audio<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    dest: &Path,
    options: &DownloadOptions,
    reporter: &dyn FractionReporter,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    info!(%url, dest = %dest.display(), "Starting download");

    let result = stream_to_file(client, url, dest, options, reporter, cancel).await;
    let result = match result {
        Ok(bytes) => verify_not_empty(dest, bytes).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(bytes) => {
            reporter.report(1.0);
            info!(%url, bytes, "Download complete");
            Ok(bytes)
        }
        Err(e) => {
            warn!(%url, error = %e, "Download failed, removing partial file");
            remove_partial(dest).await;
            Err(e)
        }
    }
}

async fn stream_to_file<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    dest: &Path,
    options: &DownloadOptions,
    reporter: &dyn FractionReporter,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let timeouts = options.timeouts;
    let header_deadline = timeouts.connect + timeouts.read;

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(DownloadError::Cancelled { url: url.to_string() });
        }
        response = timeout(header_deadline, client.get_stream(url, timeouts)) => response,
    };

    let response = response
        .map_err(|_| DownloadError::Timeout {
            url: url.to_string(),
            after: header_deadline,
        })?
        .map_err(|e| transport_error(url, e, timeouts.read, true))?;

    if response.status >= 400 {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    debug!(%url, status = response.status, content_length = response.content_length, "Response received");

    let mut file = File::create(dest)
        .await
        .map_err(|e| DownloadError::FileCreateFailed {
            path: dest.to_path_buf(),
            source: e,
        })?;

    let mut throttle = Throttle::new(reporter, options, response.content_length);
    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.body;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DownloadError::Cancelled { url: url.to_string() });
            }
            next = timeout(timeouts.read, stream.next()) => next,
        };

        let chunk = match next {
            Err(_) => {
                return Err(DownloadError::Timeout {
                    url: url.to_string(),
                    after: timeouts.read,
                });
            }
            Ok(None) => break,
            Ok(Some(chunk)) => chunk.map_err(|e| transport_error(url, e, timeouts.read, false))?,
        };

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: dest.to_path_buf(),
                source: e,
            })?;

        bytes_downloaded += chunk.len() as u64;
        throttle.update(bytes_downloaded);
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: dest.to_path_buf(),
            source: e,
        })?;

    Ok(bytes_downloaded)
}

fn transport_error(url: &str, e: reqwest::Error, read: Duration, request: bool) -> DownloadError {
    if e.is_timeout() {
        DownloadError::Timeout {
            url: url.to_string(),
            after: read,
        }
    } else if request {
        DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        }
    } else {
        DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        }
    }
}

async fn verify_not_empty(dest: &Path, bytes: u64) -> Result<u64, DownloadError> {
    let on_disk = tokio::fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0);
    if bytes == 0 || on_disk == 0 {
        return Err(DownloadError::EmptyFile {
            path: dest.to_path_buf(),
        });
    }
    Ok(bytes)
}

/// Remove a partial download; a file that is already gone is fine
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}
