//! Counters for download activity
//!
//! Atomic counters shared by every transfer and worker of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Performance metrics for downloads
#[derive(Debug, Default)]
pub struct DownloadMetrics {
    pub total_bytes: AtomicU64,
    pub total_downloads: AtomicU64,
    pub successful_downloads: AtomicU64,
    pub skipped_duplicates: AtomicU64,
    pub failed_downloads: AtomicU64,
    pub retries_attempted: AtomicU64,
}

impl DownloadMetrics {
    pub fn record_download_started(&self) {
        self.total_downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download_completed(&self, size: u64) {
        self.successful_downloads.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    /// File was already installed; the transfer was aborted early
    pub fn record_duplicate_skipped(&self) {
        self.skipped_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download_failed(&self) {
        self.failed_downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DownloadMetricsSnapshot {
        DownloadMetricsSnapshot {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            total_downloads: self.total_downloads.load(Ordering::Relaxed),
            successful_downloads: self.successful_downloads.load(Ordering::Relaxed),
            skipped_duplicates: self.skipped_duplicates.load(Ordering::Relaxed),
            failed_downloads: self.failed_downloads.load(Ordering::Relaxed),
            retries_attempted: self.retries_attempted.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadMetricsSnapshot {
    pub total_bytes: u64,
    pub total_downloads: u64,
    pub successful_downloads: u64,
    pub skipped_duplicates: u64,
    pub failed_downloads: u64,
    pub retries_attempted: u64,
}

impl DownloadMetricsSnapshot {
    /// Share of started downloads that ended completed or skipped
    pub fn success_rate(&self) -> f64 {
        if self.total_downloads == 0 {
            0.0
        } else {
            (self.successful_downloads + self.skipped_duplicates) as f64 / self.total_downloads as f64
        }
    }
}
