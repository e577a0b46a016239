//! Progress reporting for install runs
//!
//! The engine pushes updates into a [`ProgressSink`] owned by the caller.
//! A sink has a status line and a bar (`None` meaning indeterminate), and
//! can hand out child sinks for per-slot displays.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::DownloadError;

/// Shared handle to a sink
pub type SharedSink = Arc<dyn ProgressSink>;

/// A dismissable, time-limited notification for the user
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub message: String,
    /// How long the notice stays up; `None` keeps it until dismissed
    pub timeout: Option<Duration>,
    pub dismissable: bool,
}

impl Notice {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            timeout: Some(Duration::from_secs(5)),
            dismissable: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dismissable(mut self) -> Self {
        self.dismissable = true;
        self
    }

    /// Notice for a failure class, shown for ten seconds
    pub fn failure(error: &DownloadError) -> Self {
        Self::new(format!("{}! See console for details", error.user_label()))
            .with_timeout(Some(Duration::from_secs(10)))
            .dismissable()
    }
}

/// Observer for install progress
///
/// Implementations must be cheap to call; the scheduler calls them from
/// every worker and never holds them across network I/O.
pub trait ProgressSink: Send + Sync {
    fn set_message(&self, message: &str);

    /// `None` means indeterminate (verifying, waiting)
    fn set_percent(&self, percent: Option<f64>);

    /// Create a child display, e.g. one per download slot
    fn add_child(&self) -> SharedSink;

    fn remove_child(&self, child: &SharedSink);

    /// Surface a notification; defaults to a log line
    fn notify(&self, notice: Notice) {
        warn!("{}", notice.message);
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn set_message(&self, _message: &str) {}
    fn set_percent(&self, _percent: Option<f64>) {}

    fn add_child(&self) -> SharedSink {
        Arc::new(NullSink)
    }

    fn remove_child(&self, _child: &SharedSink) {}
    fn notify(&self, _notice: Notice) {}
}

/// Sink that writes updates to the `tracing` log
///
/// Messages go out at INFO, percentages at DEBUG. Children are labelled
/// `slot N` in creation order.
#[derive(Debug)]
pub struct LogSink {
    label: String,
    next_child: Arc<AtomicUsize>,
}

impl LogSink {
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            next_child: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new("install")
    }
}

impl ProgressSink for LogSink {
    fn set_message(&self, message: &str) {
        info!(target: "modpack_installer::progress", "[{}] {}", self.label, message);
    }

    fn set_percent(&self, percent: Option<f64>) {
        match percent {
            Some(p) => debug!("[{}] {:.0}%", self.label, p * 100.0),
            None => debug!("[{}] indeterminate", self.label),
        }
    }

    fn add_child(&self) -> SharedSink {
        let index = self.next_child.fetch_add(1, Ordering::Relaxed);
        Arc::new(LogSink::new(format!("{} / slot {}", self.label, index)))
    }

    fn remove_child(&self, _child: &SharedSink) {}

    fn notify(&self, notice: Notice) {
        warn!("[{}] {}", self.label, notice.message);
    }
}

/// Format a fraction for status lines, `None` reading as 0%
pub fn format_percent(percent: Option<f64>) -> String {
    format!("{:.0}%", percent.unwrap_or(0.0) * 100.0)
}
