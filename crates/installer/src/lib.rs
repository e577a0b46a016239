//! Modpack Installer Library
//!
//! This library installs modpacks: it downloads every item of a pack into a
//! destination directory over a fixed number of parallel slots, skips files
//! that are already installed, retries transient failures, removes files
//! that no longer belong to the pack and tracks items the user has to
//! download by hand.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use modpack_installer::{
//!     Catalog, DownloadConfig, InstallRequest, InstallTarget, Installer, LogSink,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> modpack_installer::Result<()> {
//! let config = DownloadConfig::default();
//!
//! // Load a pack from the catalog
//! let catalog = Catalog::new(&config)?;
//! let pack = catalog.fetch_pack("redpack").await?;
//!
//! // Install the client side of it
//! let installer = Installer::from_config(config)?;
//! let request = InstallRequest::new(pack.manifest()?, InstallTarget::Client, "/path/to/mods");
//! let report = installer.install(request, Arc::new(LogSink::default())).await?;
//!
//! println!("{}", report.message);
//! for item in &report.pending_manual {
//!     println!("Download {} from {}", item.name, item.url);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Bounded concurrency**: jobs are claimed in manifest order by a fixed set of slots
//! - **Duplicate detection**: transfers abort as soon as the remote file name is known to be installed
//! - **Retry logic**: whole-transfer retries with exponential backoff
//! - **Reconciliation**: stale files are removed, manually installed ones are kept
//! - **Progress tracking**: per-slot and overall progress through a [`ProgressSink`]
//! - **Async/await**: Full async support with Tokio runtime

pub mod catalog;
pub mod downloader;
pub mod install;
pub mod manifest;
pub mod manual;
pub mod reconcile;

// Re-export commonly used types for convenience
pub use catalog::Catalog;
pub use downloader::{
    DownloadConfig, DownloadError, DownloadMetrics, HttpTransfer, LogSink, Notice, NullSink,
    ProgressSink, Result, ResultMap, SharedSink, SlotScheduler, Transfer,
};
pub use install::{InstallReport, InstallRequest, InstallState, Installer};
pub use manifest::{InstallTarget, ItemDescriptor, Manifest, PackData, Target, filter_mods};
pub use manual::{ExternalLauncher, ManualCoordinator, ManualState, SystemBrowserLauncher};
pub use reconcile::{ReconcileReport, reconcile};
