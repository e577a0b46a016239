//! Items the user has to download themselves
//!
//! Some hosts cannot be fetched directly. For those the coordinator asks an
//! [`ExternalLauncher`] to open the item's page and then tracks the item
//! through `waiting → downloading → complete` from signals keyed by item
//! name. Each requested item has exactly one status channel; it is dropped
//! once the item completes.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::downloader::core::error::{DownloadError, Result};
use crate::downloader::core::files::snapshot_files;
use crate::manifest::ItemDescriptor;
use crate::reconcile::matching_manual;

/// Status of an out-of-band download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManualState {
    Waiting,
    Downloading,
    Complete,
}

impl ManualState {
    /// Button text for the item
    pub fn label(self) -> &'static str {
        match self {
            ManualState::Waiting => "Waiting for Download...",
            ManualState::Downloading => "Downloading...",
            ManualState::Complete => "Download Complete",
        }
    }
}

impl fmt::Display for ManualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualState::Waiting => write!(f, "waiting"),
            ManualState::Downloading => write!(f, "downloading"),
            ManualState::Complete => write!(f, "complete"),
        }
    }
}

impl FromStr for ManualState {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(ManualState::Waiting),
            "downloading" => Ok(ManualState::Downloading),
            "complete" => Ok(ManualState::Complete),
            other => Err(DownloadError::Configuration {
                message: format!("unknown manual download state '{}'", other),
                field: Some("state".to_string()),
            }),
        }
    }
}

/// Starts a download outside the engine, e.g. in a browser
#[async_trait]
pub trait ExternalLauncher: Send + Sync {
    async fn open_download(&self, name: &str, url: &str, dest_dir: &Path) -> Result<()>;
}

/// Opens the item's page in the user's default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowserLauncher;

#[async_trait]
impl ExternalLauncher for SystemBrowserLauncher {
    async fn open_download(&self, name: &str, url: &str, dest_dir: &Path) -> Result<()> {
        info!("Opening {} for {}; save the file into {}", url, name, dest_dir.display());

        opener_command(url)
            .spawn()
            .map(|_| ())
            .map_err(|e| DownloadError::Launcher {
                name: name.to_string(),
                url: url.to_string(),
                source: e,
            })
    }
}

#[cfg(target_os = "windows")]
fn opener_command(url: &str) -> std::process::Command {
    let mut command = std::process::Command::new("cmd");
    command.args(["/C", "start", "", url]);
    command
}

#[cfg(target_os = "macos")]
fn opener_command(url: &str) -> std::process::Command {
    let mut command = std::process::Command::new("open");
    command.arg(url);
    command
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn opener_command(url: &str) -> std::process::Command {
    let mut command = std::process::Command::new("xdg-open");
    command.arg(url);
    command
}

/// Manual items not yet found in the destination, in manifest order
pub fn pending(manual: &[ItemDescriptor], installed_ids: &BTreeSet<String>) -> Vec<ItemDescriptor> {
    manual
        .iter()
        .filter(|item| !installed_ids.contains(&item.id))
        .cloned()
        .collect()
}

/// Tracks manual items between the launch and the finished file
pub struct ManualCoordinator {
    launcher: Arc<dyn ExternalLauncher>,
    listeners: Mutex<HashMap<String, watch::Sender<ManualState>>>,
    completed: Mutex<HashSet<String>>,
}

impl ManualCoordinator {
    pub fn new(launcher: Arc<dyn ExternalLauncher>) -> Self {
        Self {
            launcher,
            listeners: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashSet::new()),
        }
    }

    /// Begin the external download of `item` and return its status stream
    ///
    /// The launcher runs once per item; asking again while the item is in
    /// flight returns another receiver on the same channel.
    pub async fn request(&self, item: &ItemDescriptor, dest_dir: &Path) -> Result<watch::Receiver<ManualState>> {
        if self.completed.lock().await.contains(&item.name) {
            let (_, receiver) = watch::channel(ManualState::Complete);
            return Ok(receiver);
        }

        let receiver = {
            let mut listeners = self.listeners.lock().await;
            if let Some(sender) = listeners.get(&item.name) {
                debug!("{} already requested", item.name);
                return Ok(sender.subscribe());
            }
            let (sender, receiver) = watch::channel(ManualState::Waiting);
            listeners.insert(item.name.clone(), sender);
            receiver
        };

        // Signals for other items must not wait on the launcher
        if let Err(e) = self.launcher.open_download(&item.name, &item.url, dest_dir).await {
            self.listeners.lock().await.remove(&item.name);
            return Err(e);
        }
        Ok(receiver)
    }

    /// Apply an inbound status signal; returns whether the item was being tracked
    pub async fn signal(&self, name: &str, state: ManualState) -> bool {
        let mut listeners = self.listeners.lock().await;

        if state == ManualState::Complete {
            let Some(sender) = listeners.remove(name) else {
                return false;
            };
            sender.send_replace(ManualState::Complete);
            self.completed.lock().await.insert(name.to_string());
            info!("Manual download of {} complete", name);
            return true;
        }

        match listeners.get(name) {
            Some(sender) => {
                sender.send_replace(state);
                debug!("Manual download of {} is {}", name, state);
                true
            }
            None => false,
        }
    }

    /// Another receiver for an in-flight item
    pub async fn subscribe(&self, name: &str) -> Option<watch::Receiver<ManualState>> {
        self.listeners.lock().await.get(name).map(watch::Sender::subscribe)
    }

    pub async fn state(&self, name: &str) -> Option<ManualState> {
        if self.completed.lock().await.contains(name) {
            return Some(ManualState::Complete);
        }
        self.listeners.lock().await.get(name).map(|sender| *sender.borrow())
    }

    /// Number of requested items that have not completed
    pub async fn in_flight(&self) -> usize {
        self.listeners.lock().await.len()
    }

    /// Poll `dest_dir` until every in-flight item has a matching file
    ///
    /// Items are matched the same way reconciliation recognises manual
    /// files. Returns immediately when nothing is in flight.
    pub async fn watch_directory(&self, dest_dir: &Path, manual: &[ItemDescriptor], every: Duration) -> Result<()> {
        let mut ticker = tokio::time::interval(every);

        while self.in_flight().await > 0 {
            ticker.tick().await;

            for file_name in snapshot_files(dest_dir).await? {
                if let Some(item) = matching_manual(&file_name, manual) {
                    self.signal(&item.name, ManualState::Complete).await;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Target;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Default)]
    struct CountingLauncher {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl ExternalLauncher for CountingLauncher {
        async fn open_download(&self, _name: &str, _url: &str, _dest_dir: &Path) -> Result<()> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenLauncher;

    #[async_trait]
    impl ExternalLauncher for BrokenLauncher {
        async fn open_download(&self, name: &str, url: &str, _dest_dir: &Path) -> Result<()> {
            Err(DownloadError::Launcher {
                name: name.to_string(),
                url: url.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no browser"),
            })
        }
    }

    /// Holds the launch of `held` until the gate opens
    struct GatedLauncher {
        held: &'static str,
        entered: tokio::sync::Notify,
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl ExternalLauncher for GatedLauncher {
        async fn open_download(&self, name: &str, _url: &str, _dest_dir: &Path) -> Result<()> {
            if name == self.held {
                self.entered.notify_one();
                self.gate.notified().await;
            }
            Ok(())
        }
    }

    fn optifine() -> ItemDescriptor {
        ItemDescriptor::new("optifine", "OptiFine", "https://optifine.net/downloads", Target::Client).manual()
    }

    #[test]
    fn state_parsing_is_strict() {
        assert_eq!("waiting".parse::<ManualState>().unwrap(), ManualState::Waiting);
        assert_eq!("complete".parse::<ManualState>().unwrap(), ManualState::Complete);
        assert!("Complete".parse::<ManualState>().is_err());
        assert!("done".parse::<ManualState>().is_err());
        assert_eq!(ManualState::Downloading.to_string(), "downloading");
    }

    #[test]
    fn pending_skips_installed_items() {
        let manual = vec![optifine(), ItemDescriptor::new("b", "B", "https://b", Target::Both).manual()];
        let installed: BTreeSet<String> = ["optifine".to_string()].into();
        let left = pending(&manual, &installed);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "b");
    }

    #[tokio::test]
    async fn request_launches_once_and_tracks_signals() {
        let launcher = Arc::new(CountingLauncher::default());
        let coordinator = ManualCoordinator::new(launcher.clone());
        let dir = tempdir().unwrap();

        let mut status = coordinator.request(&optifine(), dir.path()).await.unwrap();
        let again = coordinator.request(&optifine(), dir.path()).await.unwrap();
        assert_eq!(launcher.opened.load(Ordering::SeqCst), 1);
        assert_eq!(*status.borrow(), ManualState::Waiting);
        assert_eq!(*again.borrow(), ManualState::Waiting);

        assert!(coordinator.signal("OptiFine", ManualState::Downloading).await);
        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), ManualState::Downloading);

        assert!(coordinator.signal("OptiFine", ManualState::Complete).await);
        assert_eq!(*status.borrow_and_update(), ManualState::Complete);
        assert!(coordinator.subscribe("OptiFine").await.is_none());
        assert_eq!(coordinator.state("OptiFine").await, Some(ManualState::Complete));
        assert!(!coordinator.signal("OptiFine", ManualState::Downloading).await);
    }

    #[tokio::test]
    async fn unknown_items_ignore_signals() {
        let coordinator = ManualCoordinator::new(Arc::new(CountingLauncher::default()));
        assert!(!coordinator.signal("Nobody", ManualState::Downloading).await);
        assert_eq!(coordinator.state("Nobody").await, None);
    }

    #[tokio::test]
    async fn launcher_failure_registers_nothing() {
        let coordinator = ManualCoordinator::new(Arc::new(BrokenLauncher));
        let dir = tempdir().unwrap();
        let result = coordinator.request(&optifine(), dir.path()).await;
        assert!(matches!(result, Err(DownloadError::Launcher { .. })));
        assert_eq!(coordinator.in_flight().await, 0);
    }

    #[tokio::test]
    async fn signals_are_not_blocked_by_a_pending_launch() {
        let launcher = Arc::new(GatedLauncher {
            held: "OptiFine",
            entered: tokio::sync::Notify::new(),
            gate: tokio::sync::Notify::new(),
        });
        let coordinator = Arc::new(ManualCoordinator::new(launcher.clone()));
        let dir = tempdir().unwrap();
        let shaders = ItemDescriptor::new("shaders", "Shaders", "https://shaders.example/get", Target::Client).manual();
        let shaders_status = coordinator.request(&shaders, dir.path()).await.unwrap();

        let pending_launch = tokio::spawn({
            let coordinator = coordinator.clone();
            let path = dir.path().to_path_buf();
            async move { coordinator.request(&optifine(), &path).await }
        });
        launcher.entered.notified().await;

        let tracked = tokio::time::timeout(
            Duration::from_secs(1),
            coordinator.signal("Shaders", ManualState::Downloading),
        )
        .await
        .expect("signal waited on the launcher");
        assert!(tracked);
        assert_eq!(*shaders_status.borrow(), ManualState::Downloading);

        launcher.gate.notify_one();
        let status = pending_launch.await.unwrap().unwrap();
        assert_eq!(*status.borrow(), ManualState::Waiting);
        assert_eq!(coordinator.in_flight().await, 2);
    }

    #[tokio::test]
    async fn watch_directory_completes_items_found_on_disk() {
        let coordinator = ManualCoordinator::new(Arc::new(CountingLauncher::default()));
        let dir = tempdir().unwrap();
        let manual = vec![optifine()];

        let status = coordinator.request(&manual[0], dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("OptiFine_1.12.2_HD_U_E3.jar"), b"jar").await.unwrap();

        coordinator
            .watch_directory(dir.path(), &manual, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(*status.borrow(), ManualState::Complete);
        assert_eq!(coordinator.in_flight().await, 0);
    }
}
