//! Fixed-slot download scheduler
//!
//! A run owns one [`DownloadJob`] per automatic item. `slots` workers share a
//! cursor into the job list; each claims the next job, transfers it into its
//! own subdirectory of the work directory behind a [`DuplicateGuard`], moves
//! the file into place and records the outcome, until the cursor runs past
//! the end.
//!
//! Workers are polled together on the caller's task, so network I/O
//! interleaves while bookkeeping stays single-threaded. The completion
//! counter and the [`ResultMap`] are still updated under one lock so the
//! overall percentage never goes backwards.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::downloader::core::files::{atomic_rename, ensure_dir, remove_dir_all, remove_partial};
use crate::downloader::core::progress::format_percent;
use crate::downloader::core::{
    DownloadError, DownloadMetrics, Notice, SharedSink, Transfer, TransferHandle, TransferStatus,
};
use crate::downloader::guard::DuplicateGuard;
use crate::manifest::ItemDescriptor;

/// Lifecycle of one job; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobState {
    Pending,
    Verifying,
    Downloading,
    Completed,
    SkippedDuplicate,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::SkippedDuplicate | JobState::Failed)
    }

    /// Terminal states that leave a file in the destination directory
    pub fn is_installed(self) -> bool {
        matches!(self, JobState::Completed | JobState::SkippedDuplicate)
    }
}

/// What to download and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub item: ItemDescriptor,
    /// Transfers land here first
    pub work_dir: PathBuf,
    /// Finished files are renamed into here
    pub dest_dir: PathBuf,
}

impl JobSpec {
    pub fn new<W: Into<PathBuf>, D: Into<PathBuf>>(item: ItemDescriptor, work_dir: W, dest_dir: D) -> Self {
        Self {
            item,
            work_dir: work_dir.into(),
            dest_dir: dest_dir.into(),
        }
    }
}

/// One scheduled download
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadJob {
    item: ItemDescriptor,
    state: JobState,
    percent: Option<f64>,
    resolved_file_name: Option<String>,
    error: Option<String>,
}

impl DownloadJob {
    pub fn new(item: ItemDescriptor) -> Self {
        Self {
            item,
            state: JobState::Pending,
            percent: None,
            resolved_file_name: None,
            error: None,
        }
    }

    pub fn item(&self) -> &ItemDescriptor {
        &self.item
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Latest byte progress; `None` while verifying or when the size is unknown
    pub fn percent(&self) -> Option<f64> {
        self.percent
    }

    pub fn resolved_file_name(&self) -> Option<&str> {
        self.resolved_file_name.as_deref()
    }

    /// Failure description for failed jobs
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Move to `next` if that is a forward transition; returns whether it moved
    pub fn advance(&mut self, next: JobState) -> bool {
        if self.state.is_terminal() || next <= self.state {
            return false;
        }
        self.state = next;
        true
    }

    fn fail(&mut self, error: &DownloadError) {
        self.error = Some(error.to_string());
        self.advance(JobState::Failed);
    }
}

/// Item id to installed file name, append-only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMap {
    entries: BTreeMap<String, String>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id`; an existing entry is never replaced. Returns whether it was added.
    pub fn insert<I: Into<String>, F: Into<String>>(&mut self, id: I, file_name: F) -> bool {
        match self.entries.entry(id.into()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(file_name.into());
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn contains_file(&self, file_name: &str) -> bool {
        self.entries.values().any(|name| name == file_name)
    }

    pub fn file_names(&self) -> BTreeSet<&str> {
        self.entries.values().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(id, name)| (id.as_str(), name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<I: Into<String>, F: Into<String>> FromIterator<(I, F)> for ResultMap {
    fn from_iter<T: IntoIterator<Item = (I, F)>>(iter: T) -> Self {
        let mut map = ResultMap::new();
        for (id, file_name) in iter {
            map.insert(id, file_name);
        }
        map
    }
}

/// Everything a scheduling pass produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleReport {
    pub result_map: ResultMap,
    /// Final state of every job, in manifest order
    pub jobs: Vec<DownloadJob>,
}

impl ScheduleReport {
    pub fn count(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|job| job.state() == state).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &DownloadJob> {
        self.jobs.iter().filter(|job| job.state() == JobState::Failed)
    }
}

struct RunState {
    result_map: ResultMap,
    jobs: Vec<Option<DownloadJob>>,
    finished: usize,
}

/// Runs download jobs over a fixed number of slots
pub struct SlotScheduler {
    transfer: Arc<dyn Transfer>,
    metrics: Arc<DownloadMetrics>,
}

impl SlotScheduler {
    pub fn new(transfer: Arc<dyn Transfer>) -> Self {
        Self {
            transfer,
            metrics: Arc::new(DownloadMetrics::default()),
        }
    }

    /// Share a metrics instance with other components
    pub fn with_metrics(mut self, metrics: Arc<DownloadMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Job outcomes, counted once the file is in place
    pub fn metrics(&self) -> &Arc<DownloadMetrics> {
        &self.metrics
    }

    /// Download every job and return once all of them are terminal
    ///
    /// Per-job failures never escape: they are reported to `sink` as a
    /// notice and leave the item out of the result map. The overall bar is
    /// pushed after every finished job and ends at exactly 1.0.
    pub async fn run(&self, jobs: Vec<JobSpec>, slots: usize, sink: SharedSink) -> ScheduleReport {
        let total = jobs.len();
        if total == 0 {
            debug!("No jobs to schedule");
            return ScheduleReport::default();
        }

        let workers = slots.max(1).min(total);
        info!("Downloading {} mods over {} slots", total, workers);
        sink.set_message(&status_line(0, total));
        sink.set_percent(Some(0.0));

        let cursor = AtomicUsize::new(0);
        let state = Mutex::new(RunState {
            result_map: ResultMap::new(),
            jobs: vec![None; total],
            finished: 0,
        });

        let slots_done = (0..workers).map(|slot| self.worker(slot, &jobs, &cursor, &state, &sink));
        futures::future::join_all(slots_done).await;

        let state = state.into_inner();
        ScheduleReport {
            result_map: state.result_map,
            jobs: state.jobs.into_iter().flatten().collect(),
        }
    }

    async fn worker(
        &self,
        slot: usize,
        jobs: &[JobSpec],
        cursor: &AtomicUsize,
        state: &Mutex<RunState>,
        sink: &SharedSink,
    ) {
        let child = sink.add_child();
        let total = jobs.len();

        loop {
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(spec) = jobs.get(index) else {
                break;
            };

            info!("Slot {}: Downloading {}", slot, spec.item.name);
            let job = self.execute(index, spec, &child, sink).await;
            match job.state() {
                // Counted with its size once the rename succeeded
                JobState::Completed => {}
                JobState::SkippedDuplicate => self.metrics.record_duplicate_skipped(),
                _ => self.metrics.record_download_failed(),
            }

            let mut state = state.lock().await;
            if job.state().is_installed() {
                if let Some(file_name) = job.resolved_file_name() {
                    if !state.result_map.insert(job.item().id.clone(), file_name) {
                        warn!("Item {} was already recorded; keeping first result", job.item().id);
                    }
                }
            }
            state.finished += 1;
            let finished = state.finished;
            state.jobs[index] = Some(job);
            sink.set_percent(Some(finished as f64 / total as f64));
            sink.set_message(&status_line(finished, total));
        }

        sink.remove_child(&child);
        debug!("Slot {} finished", slot);
    }

    async fn execute(&self, index: usize, spec: &JobSpec, child: &SharedSink, sink: &SharedSink) -> DownloadJob {
        self.metrics.record_download_started();

        // Items may resolve to the same file name, so every job streams into its own directory
        let job_dir = spec.work_dir.join(format!("job-{}", index));
        if let Err(e) = ensure_dir(&job_dir).await {
            let mut job = DownloadJob::new(spec.item.clone());
            report_failure(&mut job, &e, sink);
            return job;
        }

        let job = self.transfer_into(&job_dir, spec, child, sink).await;
        if let Err(e) = remove_dir_all(&job_dir).await {
            debug!("Could not remove {}: {}", job_dir.display(), e);
        }
        job
    }

    async fn transfer_into(
        &self,
        job_dir: &Path,
        spec: &JobSpec,
        child: &SharedSink,
        sink: &SharedSink,
    ) -> DownloadJob {
        let name = spec.item.name.as_str();
        let job = std::sync::Mutex::new(DownloadJob::new(spec.item.clone()));
        let guard = DuplicateGuard::new(&spec.dest_dir);

        lock(&job).advance(JobState::Verifying);
        child.set_message(&format!("Verifying {}... (0%)", name));
        child.set_percent(None);

        let on_resolved = |handle: &TransferHandle, file_name: &str| {
            lock(&job).resolved_file_name = Some(file_name.to_string());
            guard.check(handle, file_name);
        };
        let on_progress = |percent: Option<f64>| {
            {
                let mut job = lock(&job);
                job.percent = percent;
                if percent.is_some() {
                    job.advance(JobState::Downloading);
                }
            }
            let verb = if percent.is_none() { "Verifying" } else { "Downloading" };
            child.set_message(&format!("{} {}... ({})", verb, name, format_percent(percent)));
            child.set_percent(percent);
        };

        let result = self
            .transfer
            .transfer(&spec.item.url, job_dir, &on_resolved, &on_progress)
            .await;

        let mut job = job.into_inner().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(outcome) => {
                job.resolved_file_name = Some(outcome.file_name.clone());
                match outcome.status {
                    TransferStatus::Skipped => {
                        debug!("{} already installed as {}", name, outcome.file_name);
                        job.advance(JobState::SkippedDuplicate);
                    }
                    TransferStatus::Completed { path, bytes } => {
                        let destination = spec.dest_dir.join(&outcome.file_name);
                        match atomic_rename(&path, &destination).await {
                            Ok(()) => {
                                job.advance(JobState::Completed);
                                self.metrics.record_download_completed(bytes);
                            }
                            Err(e) => {
                                remove_partial(&path).await;
                                report_failure(&mut job, &e, sink);
                            }
                        }
                    }
                }
            }
            Err(e) => report_failure(&mut job, &e, sink),
        }
        job
    }
}

fn report_failure(job: &mut DownloadJob, error: &DownloadError, sink: &SharedSink) {
    warn!("Failed to download {}: {}", job.item().name, error);
    job.fail(error);
    sink.notify(Notice::failure(error));
}

fn status_line(finished: usize, total: usize) -> String {
    format!("Downloading mods... ({} of {} complete)", finished, total)
}

fn lock(job: &std::sync::Mutex<DownloadJob>) -> std::sync::MutexGuard<'_, DownloadJob> {
    job.lock().unwrap_or_else(PoisonError::into_inner)
}
