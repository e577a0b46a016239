//! Downloader module
//!
//! Transfers, duplicate detection and the slot scheduler that drives them,
//! plus the configuration and core types they share.

pub mod config;
pub mod core;
pub mod guard;
pub mod scheduler;

// Re-export main types for convenience
pub use config::DownloadConfig;
pub use core::{
    DownloadError, DownloadMetrics, DownloadMetricsSnapshot, FileOperation, HttpTransfer,
    LogSink, Notice, NullSink, ProgressSink, Result, SharedSink, Transfer, TransferHandle,
    TransferOutcome, TransferStatus,
};
pub use guard::DuplicateGuard;
pub use scheduler::{DownloadJob, JobSpec, JobState, ResultMap, ScheduleReport, SlotScheduler};
