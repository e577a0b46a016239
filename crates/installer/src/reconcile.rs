//! Post-download cleanup of the destination directory
//!
//! After a scheduling pass the destination may still hold files from an
//! older version of the pack. Every regular file is kept when the result map
//! accounts for it, or when its name contains the id of a manual item; all
//! others are deleted.
//!
//! The manual match is a case-insensitive substring test, so it is loose:
//! with manual ids `mekanism` and `mekanism-generators`, the file
//! `Mekanism-Generators-9.4.jar` is claimed by whichever id comes first in
//! manifest order. Files are never deleted because of this, but the other id
//! can be reported installed when it is not.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::downloader::core::error::{DownloadError, FileOperation, Result};
use crate::downloader::core::files::snapshot_files;
use crate::downloader::scheduler::ResultMap;
use crate::manifest::ItemDescriptor;

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Files removed from the directory
    pub deleted: Vec<String>,
    /// Manual items with a matching file present
    pub installed_manual_ids: BTreeSet<String>,
    /// Files that should have been removed but could not be
    pub failed: Vec<(PathBuf, DownloadError)>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// First manual item whose id occurs in `file_name`, ignoring case
pub fn matching_manual<'a>(file_name: &str, manual: &'a [ItemDescriptor]) -> Option<&'a ItemDescriptor> {
    let lowered = file_name.to_lowercase();
    manual
        .iter()
        .find(|item| !item.id.is_empty() && lowered.contains(&item.id.to_lowercase()))
}

/// Delete files in `directory` that are neither downloaded nor manual
///
/// The directory is listed once. A listing failure aborts the pass with
/// [`DownloadError::ReconciliationIo`]; a failed delete is logged and
/// recorded, and the pass moves on to the next file.
pub async fn reconcile(
    directory: &Path,
    results: &ResultMap,
    manual: &[ItemDescriptor],
) -> Result<ReconcileReport> {
    let snapshot = snapshot_files(directory).await?;
    let kept = results.file_names();
    let mut report = ReconcileReport::default();

    debug!("Reconciling {} files in {}", snapshot.len(), directory.display());

    for file_name in snapshot {
        if kept.contains(file_name.as_str()) {
            continue;
        }

        if let Some(item) = matching_manual(&file_name, manual) {
            debug!("{} belongs to manual item {}", file_name, item.id);
            report.installed_manual_ids.insert(item.id.clone());
            continue;
        }

        info!("File {} not part of modpack", file_name);
        let path = directory.join(&file_name);
        match fs::remove_file(&path).await {
            Ok(()) => report.deleted.push(file_name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => report.deleted.push(file_name),
            Err(e) => {
                warn!("Could not delete {}: {}", path.display(), e);
                report.failed.push((
                    path.clone(),
                    DownloadError::ReconciliationIo {
                        path,
                        operation: FileOperation::Delete,
                        source: e,
                    },
                ));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Target;
    use tempfile::tempdir;

    fn manual_item(id: &str) -> ItemDescriptor {
        ItemDescriptor::new(id, id, format!("https://example.com/{id}"), Target::Both).manual()
    }

    async fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            tokio::fs::write(dir.join(name), b"x").await.unwrap();
        }
    }

    #[tokio::test]
    async fn deletes_only_unaccounted_files() {
        let dir = tempdir().unwrap();
        touch(dir.path(), &["a.jar", "b.jar", "c.jar"]).await;

        let results: ResultMap = [("x", "a.jar")].into_iter().collect();
        let report = reconcile(dir.path(), &results, &[manual_item("b")]).await.unwrap();

        assert_eq!(report.deleted, vec!["c.jar".to_string()]);
        assert_eq!(report.installed_manual_ids.into_iter().collect::<Vec<_>>(), vec!["b"]);
        assert!(dir.path().join("a.jar").exists());
        assert!(dir.path().join("b.jar").exists());
        assert!(!dir.path().join("c.jar").exists());
    }

    #[tokio::test]
    async fn second_pass_deletes_nothing() {
        let dir = tempdir().unwrap();
        touch(dir.path(), &["a.jar", "stale.jar", "OptiFine_1.12.2.jar"]).await;
        let results: ResultMap = [("a", "a.jar")].into_iter().collect();
        let manual = [manual_item("optifine")];

        let first = reconcile(dir.path(), &results, &manual).await.unwrap();
        let second = reconcile(dir.path(), &results, &manual).await.unwrap();

        assert_eq!(first.deleted, vec!["stale.jar".to_string()]);
        assert!(second.deleted.is_empty());
        assert_eq!(first.installed_manual_ids, second.installed_manual_ids);
    }

    #[tokio::test]
    async fn nested_work_directory_is_left_alone() {
        let dir = tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("downloading")).await.unwrap();
        touch(dir.path(), &["old.jar"]).await;

        let report = reconcile(dir.path(), &ResultMap::new(), &[]).await.unwrap();
        assert_eq!(report.deleted, vec!["old.jar".to_string()]);
        assert!(dir.path().join("downloading").is_dir());
    }

    #[test]
    fn manual_match_is_case_insensitive_and_first_wins() {
        let manual = [manual_item("mekanism"), manual_item("mekanism-generators")];
        let hit = matching_manual("Mekanism-Generators-9.4.jar", &manual).unwrap();
        assert_eq!(hit.id, "mekanism");
        assert!(matching_manual("jei.jar", &manual).is_none());
    }

    #[tokio::test]
    async fn missing_directory_fails_the_pass() {
        let dir = tempdir().unwrap();
        let result = reconcile(&dir.path().join("missing"), &ResultMap::new(), &[]).await;
        assert!(matches!(result, Err(DownloadError::ReconciliationIo { .. })));
    }
}
