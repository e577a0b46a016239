//! Core types used throughout the downloader system
//!
//! This module contains the fundamental types that all other modules depend on:
//! errors, progress sinks, file helpers, metrics and the [`Transfer`] seam the
//! scheduler drives.

pub mod error;
pub mod files;
pub mod http;
pub mod metrics;
pub mod progress;

pub use error::{DownloadError, FileOperation, Result};
pub use http::HttpTransfer;
pub use metrics::{DownloadMetrics, DownloadMetricsSnapshot};
pub use progress::{LogSink, Notice, NullSink, ProgressSink, SharedSink};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Callback invoked once the remote file name is known, before the body is read
pub type ResolvedCallback<'a> = &'a (dyn Fn(&TransferHandle, &str) + Send + Sync);

/// Callback for coalesced byte progress; `None` means indeterminate
pub type TransferProgressCallback<'a> = &'a (dyn Fn(Option<f64>) + Send + Sync);

/// Handle to an in-flight transfer that can cancel it
#[derive(Debug, Clone)]
pub struct TransferHandle {
    url: String,
    token: CancellationToken,
}

impl TransferHandle {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            token: CancellationToken::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Cancel the request; the transfer reports the file as skipped
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`abort`](Self::abort) has been called
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }
}

/// How a transfer ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// The body was written to `path` inside the transfer's directory
    Completed { path: PathBuf, bytes: u64 },
    /// Aborted after the name was resolved; nothing was kept
    Skipped,
}

/// Successful result of [`Transfer::transfer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub file_name: String,
    pub status: TransferStatus,
    /// Attempts used, including the successful one
    pub attempts: usize,
}

/// One HTTP download into a directory, with retries
///
/// `on_resolved` is called exactly once per call, before any body bytes are
/// persisted; calling [`TransferHandle::abort`] from it turns the transfer
/// into [`TransferStatus::Skipped`]. After the retry budget is spent the
/// error is [`DownloadError::TransferFailed`].
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn transfer(
        &self,
        url: &str,
        dest_dir: &Path,
        on_resolved: ResolvedCallback<'_>,
        on_progress: TransferProgressCallback<'_>,
    ) -> Result<TransferOutcome>;
}
