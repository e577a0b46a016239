//! End-to-end install runs
//!
//! One run partitions the manifest for the install target, downloads every
//! automatic item through the slot scheduler, reconciles the destination and
//! reports which manual items still have to be fetched by hand.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::downloader::config::DownloadConfig;
use crate::downloader::core::files::{ensure_dir, remove_empty_dir};
use crate::downloader::core::{
    DownloadError, DownloadMetrics, HttpTransfer, Notice, Result, SharedSink, Transfer,
};
use crate::downloader::scheduler::{JobSpec, JobState, ScheduleReport, SlotScheduler};
use crate::manifest::{InstallTarget, ItemDescriptor, Manifest};
use crate::manual;
use crate::reconcile::{ReconcileReport, reconcile};

/// Name of the work directory created inside the destination by default
pub const WORK_DIR_NAME: &str = "downloading";

pub const COMPLETE_MESSAGE: &str = "Modpack installation complete!";
pub const WAITING_MESSAGE: &str = "Waiting for manually initiated downloads...";

/// Lifecycle of an [`Installer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    /// No run has started yet
    Idle,
    /// At least one run is in progress
    Running,
    /// The last run has finished and none is in progress
    Done,
}

/// Inputs of one install run
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub manifest: Manifest,
    pub target: InstallTarget,
    pub dest_dir: PathBuf,
    work_dir: Option<PathBuf>,
}

impl InstallRequest {
    pub fn new<P: Into<PathBuf>>(manifest: Manifest, target: InstallTarget, dest_dir: P) -> Self {
        Self {
            manifest,
            target,
            dest_dir: dest_dir.into(),
            work_dir: None,
        }
    }

    /// Download into `work_dir` instead of `<dest>/downloading`
    ///
    /// The directory must be on the same volume as the destination and must
    /// not contain it. It is removed after the run only if nothing else was
    /// left in it.
    pub fn with_work_dir<P: Into<PathBuf>>(mut self, work_dir: P) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| self.dest_dir.join(WORK_DIR_NAME))
    }
}

/// Everything an install run produced
#[derive(Debug)]
pub struct InstallReport {
    pub schedule: ScheduleReport,
    /// `None` when the destination could not be listed
    pub reconcile: Option<ReconcileReport>,
    /// Manual items with no matching file in the destination
    pub pending_manual: Vec<ItemDescriptor>,
    pub message: String,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.pending_manual.is_empty() && self.schedule.count(JobState::Failed) == 0
    }
}

/// Runs installs and keeps at most one run per destination directory
pub struct Installer {
    config: DownloadConfig,
    scheduler: SlotScheduler,
    metrics: Arc<DownloadMetrics>,
    active: Arc<Mutex<HashSet<PathBuf>>>,
    finished: AtomicBool,
}

impl Installer {
    pub fn new(config: DownloadConfig, transfer: Arc<dyn Transfer>) -> Self {
        Self::with_metrics(config, transfer, Arc::new(DownloadMetrics::default()))
    }

    /// Installer downloading over HTTP, sharing its metrics with the transfer
    pub fn from_config(config: DownloadConfig) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(DownloadMetrics::default());
        let transfer = HttpTransfer::from_config(&config)?.with_metrics(metrics.clone());
        Ok(Self::with_metrics(config, Arc::new(transfer), metrics))
    }

    fn with_metrics(config: DownloadConfig, transfer: Arc<dyn Transfer>, metrics: Arc<DownloadMetrics>) -> Self {
        Self {
            config,
            scheduler: SlotScheduler::new(transfer).with_metrics(metrics.clone()),
            metrics,
            active: Arc::new(Mutex::new(HashSet::new())),
            finished: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<DownloadMetrics> {
        &self.metrics
    }

    pub fn state(&self) -> InstallState {
        if !lock(&self.active).is_empty() {
            InstallState::Running
        } else if self.finished.load(Ordering::SeqCst) {
            InstallState::Done
        } else {
            InstallState::Idle
        }
    }

    /// Whether a run for `dest_dir` is in progress
    pub fn is_running(&self, dest_dir: &Path) -> bool {
        lock(&self.active).contains(&run_key(dest_dir))
    }

    /// Install `request` into its destination directory
    ///
    /// Fails with [`DownloadError::AlreadyRunning`] when another run owns the
    /// same destination, and with [`DownloadError::Configuration`] when the
    /// work directory is the destination or one of its parents. Individual
    /// download failures do not fail the run; they are notified to `sink`
    /// and listed in the report.
    pub async fn install(&self, request: InstallRequest, sink: SharedSink) -> Result<InstallReport> {
        let work_dir = request.work_dir();
        if run_key(&request.dest_dir).starts_with(run_key(&work_dir)) {
            return Err(DownloadError::Configuration {
                message: format!(
                    "work directory {} must not contain the destination {}",
                    work_dir.display(),
                    request.dest_dir.display()
                ),
                field: Some("work_dir".to_string()),
            });
        }

        let _run = RunGuard::acquire(&self.active, &request.dest_dir)?;
        let result = self.run(&request, &work_dir, &sink).await;
        self.finished.store(true, Ordering::SeqCst);
        result
    }

    async fn run(&self, request: &InstallRequest, work_dir: &Path, sink: &SharedSink) -> Result<InstallReport> {
        let dest_dir = request.dest_dir.as_path();
        ensure_dir(dest_dir).await?;
        ensure_dir(work_dir).await?;

        let partition = request.manifest.partition(request.target);
        info!(
            "Installing {} automatic and {} manual items for {} into {}",
            partition.automatic.len(),
            partition.manual.len(),
            request.target,
            dest_dir.display()
        );

        let jobs = partition
            .automatic
            .into_iter()
            .map(|item| JobSpec::new(item, work_dir, dest_dir))
            .collect();
        let schedule = self.scheduler.run(jobs, self.config.slots, sink.clone()).await;

        let reconciled = match reconcile(dest_dir, &schedule.result_map, &partition.manual).await {
            Ok(report) => {
                if !report.deleted.is_empty() {
                    info!("Removed {} files not part of the pack", report.deleted.len());
                }
                if !report.is_clean() {
                    warn!("{} stale files could not be removed", report.failed.len());
                }
                Some(report)
            }
            Err(e) => {
                warn!("Skipping cleanup of {}: {}", dest_dir.display(), e);
                sink.notify(Notice::failure(&e));
                None
            }
        };

        let installed = reconciled
            .as_ref()
            .map(|report| report.installed_manual_ids.clone())
            .unwrap_or_default();
        let pending_manual = manual::pending(&partition.manual, &installed);

        if !remove_empty_dir(work_dir).await {
            warn!("Work directory {} is not empty; leaving it in place", work_dir.display());
        }

        let message = if pending_manual.is_empty() {
            sink.set_message(COMPLETE_MESSAGE);
            COMPLETE_MESSAGE
        } else {
            sink.set_message(WAITING_MESSAGE);
            sink.set_percent(None);
            let count = pending_manual.len();
            sink.notify(
                Notice::new(format!(
                    "{} mod{} could not be automatically downloaded",
                    count,
                    if count > 1 { "s" } else { "" }
                ))
                .with_timeout(None)
                .dismissable(),
            );
            WAITING_MESSAGE
        };
        info!("{}", message);

        Ok(InstallReport {
            schedule,
            reconcile: reconciled,
            pending_manual,
            message: message.to_string(),
        })
    }
}

/// Marks a destination busy until dropped
struct RunGuard {
    active: Arc<Mutex<HashSet<PathBuf>>>,
    key: PathBuf,
}

impl RunGuard {
    fn acquire(active: &Arc<Mutex<HashSet<PathBuf>>>, dest_dir: &Path) -> Result<Self> {
        let key = run_key(dest_dir);
        if !lock(active).insert(key.clone()) {
            return Err(DownloadError::AlreadyRunning {
                directory: dest_dir.to_path_buf(),
            });
        }
        Ok(Self {
            active: active.clone(),
            key,
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.key);
    }
}

fn run_key(dir: &Path) -> PathBuf {
    std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
