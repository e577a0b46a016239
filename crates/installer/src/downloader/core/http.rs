//! HTTP transfer
//!
//! Streaming download into a directory with coalesced progress, an abort
//! hook once the remote file name is known, and whole-transfer retries.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::downloader::config::DownloadConfig;
use super::error::{DownloadError, FileOperation, Result};
use super::files::remove_partial;
use super::metrics::DownloadMetrics;
use super::{
    ResolvedCallback, Transfer, TransferHandle, TransferOutcome, TransferProgressCallback,
    TransferStatus,
};

/// File name used when the resolved URL has no usable last path segment
const FALLBACK_FILE_NAME: &str = "downloaded_file";

/// [`Transfer`] over `reqwest`
pub struct HttpTransfer {
    client: Client,
    config: DownloadConfig,
    metrics: Arc<DownloadMetrics>,
}

impl HttpTransfer {
    /// Create a transfer client from download configuration
    pub fn from_config(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| DownloadError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                field: None,
            })?;

        Ok(Self {
            client,
            config: config.clone(),
            metrics: Arc::new(DownloadMetrics::default()),
        })
    }

    /// Share a metrics instance with other components
    ///
    /// The transfer only counts retries; job outcomes are counted by the
    /// scheduler once the file is in place.
    pub fn with_metrics(mut self, metrics: Arc<DownloadMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<DownloadMetrics> {
        &self.metrics
    }

    /// One attempt: request, resolve the name, stream the body
    async fn attempt(
        &self,
        handle: &TransferHandle,
        dest_dir: &Path,
        resolved: &mut Option<String>,
        on_resolved: ResolvedCallback<'_>,
        on_progress: TransferProgressCallback<'_>,
    ) -> Result<(String, TransferStatus)> {
        let url = handle.url();
        on_progress(None);

        let response = self.client.get(url).send().await.map_err(|e| DownloadError::HttpRequest {
            url: url.to_string(),
            source: e,
        })?;

        let status = response.status();
        if !status.is_success() {
            debug!("Non-success status {} for {}", status, url);
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let file_name = file_name_from_url(response.url());
        if resolved.is_none() {
            *resolved = Some(file_name.clone());
            on_resolved(handle, &file_name);
        }

        if handle.is_aborted() {
            debug!("Transfer of {} aborted before body", url);
            return Ok((file_name, TransferStatus::Skipped));
        }

        let total_size = response.content_length().filter(|len| *len > 0);
        let path = dest_dir.join(&file_name);
        debug!("Receiving {} into {}", url, path.display());

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| DownloadError::file_system(&path, FileOperation::Create, e))?;

        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        let mut throttle = ProgressThrottle::new(self.config.progress_interval, Instant::now());

        let streamed: Result<bool> = async {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = handle.aborted() => return Ok(false),
                    chunk = stream.next() => chunk,
                };
                let Some(chunk) = next else {
                    break;
                };
                let chunk = chunk.map_err(|e| DownloadError::HttpRequest {
                    url: url.to_string(),
                    source: e,
                })?;

                file.write_all(&chunk)
                    .await
                    .map_err(|e| DownloadError::file_system(&path, FileOperation::Write, e))?;
                downloaded += chunk.len() as u64;

                if throttle.ready(Instant::now()) {
                    on_progress(total_size.map(|total| fraction(downloaded, total)));
                }
            }

            file.flush()
                .await
                .map_err(|e| DownloadError::file_system(&path, FileOperation::Write, e))?;
            Ok(true)
        }
        .await;
        drop(file);

        match streamed {
            Ok(true) => {
                on_progress(total_size.map(|_| 1.0));
                debug!("Received {} bytes for {}", downloaded, url);
                Ok((file_name, TransferStatus::Completed { path, bytes: downloaded }))
            }
            Ok(false) => {
                remove_partial(&path).await;
                Ok((file_name, TransferStatus::Skipped))
            }
            Err(e) => {
                remove_partial(&path).await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn transfer(
        &self,
        url: &str,
        dest_dir: &Path,
        on_resolved: ResolvedCallback<'_>,
        on_progress: TransferProgressCallback<'_>,
    ) -> Result<TransferOutcome> {
        check_url(url)?;

        let handle = TransferHandle::new(url);
        let max_attempts = self.config.max_attempts.max(1);
        let mut resolved = None;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.metrics.record_retry();
                let delay = self.config.get_retry_delay(attempt - 2);
                debug!("Retry attempt {} for {} after {:?} delay", attempt, url, delay);
                tokio::time::sleep(delay).await;
            }

            match self.attempt(&handle, dest_dir, &mut resolved, on_resolved, on_progress).await {
                Ok((file_name, status)) => {
                    return Ok(TransferOutcome {
                        file_name,
                        status,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Attempt {}/{} for {} failed: {}", attempt, max_attempts, url, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(DownloadError::TransferFailed {
            url: url.to_string(),
            attempts: max_attempts,
            last_error: last_error.map_or("No specific error recorded".to_string(), |e| e.to_string()),
        })
    }
}

/// Only absolute http(s) URLs can be transferred
fn check_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).map_err(|e| match DownloadError::from(e) {
        DownloadError::InvalidUrl { suggestion, source, .. } => DownloadError::InvalidUrl {
            url: url.to_string(),
            suggestion,
            source,
        },
        other => other,
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(DownloadError::UnsupportedUrl {
            url: url.to_string(),
            scheme: scheme.to_string(),
        }),
    }
}

/// Last non-empty path segment of the (redirect-resolved) URL
pub fn file_name_from_url(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .filter(|segment| *segment != "." && *segment != "..")
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// Lets byte progress through at most once per interval
struct ProgressThrottle {
    interval: Duration,
    last: Instant,
}

impl ProgressThrottle {
    fn new(interval: Duration, start: Instant) -> Self {
        Self { interval, last: start }
    }

    fn ready(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) < self.interval {
            return false;
        }
        self.last = now;
        true
    }
}

fn fraction(downloaded: u64, total: u64) -> f64 {
    (downloaded as f64 / total as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_comes_from_last_segment() {
        let url = url::Url::parse("https://cdn.example.com/files/123/jei-1.12.2.jar?token=x").unwrap();
        assert_eq!(file_name_from_url(&url), "jei-1.12.2.jar");

        let trailing = url::Url::parse("https://cdn.example.com/files/mod.jar/").unwrap();
        assert_eq!(file_name_from_url(&trailing), "mod.jar");

        let bare = url::Url::parse("https://cdn.example.com/").unwrap();
        assert_eq!(file_name_from_url(&bare), FALLBACK_FILE_NAME);
    }

    #[test]
    fn progress_is_coalesced_per_interval() {
        let start = Instant::now();
        let at = |ms: u64| start + Duration::from_millis(ms);
        let mut throttle = ProgressThrottle::new(Duration::from_millis(50), start);

        assert!(!throttle.ready(at(10)));
        assert!(!throttle.ready(at(49)));
        assert!(throttle.ready(at(50)));
        assert!(!throttle.ready(at(60)));
        assert!(!throttle.ready(at(99)));
        assert!(throttle.ready(at(120)));
        assert!(!throttle.ready(at(169)));
    }

    #[test]
    fn zero_interval_lets_every_update_through() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::ZERO, start);
        assert!(throttle.ready(start));
        assert!(throttle.ready(start));
    }

    #[test]
    fn only_http_urls_are_accepted() {
        assert!(check_url("https://example.com/a.jar").is_ok());
        assert!(matches!(
            check_url("ftp://example.com/a.jar"),
            Err(DownloadError::UnsupportedUrl { scheme, .. }) if scheme == "ftp"
        ));
        assert!(matches!(
            check_url("not a url"),
            Err(DownloadError::InvalidUrl { url, .. }) if url == "not a url"
        ));
    }
}
