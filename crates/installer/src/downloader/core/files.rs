//! File operation utilities
//!
//! Downloads land in a work directory and are moved into the destination
//! with a rename, so the destination never holds a half-written file.

use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs;
use tracing::debug;

use super::error::{DownloadError, FileOperation, Result};

/// Create a directory (and parents) if it does not exist yet
pub async fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| DownloadError::file_system(dir, FileOperation::CreateDir, e))
}

/// Atomically rename a finished download to its final destination
///
/// Both paths must be on the same volume.
pub async fn atomic_rename(temp_path: &Path, dest_path: &Path) -> Result<()> {
    fs::rename(temp_path, dest_path)
        .await
        .map_err(|e| DownloadError::file_system(temp_path, FileOperation::Move, e))?;
    debug!("Atomically renamed {} to {}", temp_path.display(), dest_path.display());
    Ok(())
}

/// Remove a partially written file, ignoring a file that is already gone
pub async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("Could not remove partial file {}: {}", path.display(), e),
    }
}

/// Remove a job directory and everything below it
pub async fn remove_dir_all(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::file_system(dir, FileOperation::Delete, e)),
    }
}

/// Remove a work directory only if nothing is left inside it
///
/// Returns whether the directory is gone.
pub async fn remove_empty_dir(dir: &Path) -> bool {
    match fs::remove_dir(dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            debug!("Keeping {}: {}", dir.display(), e);
            false
        }
    }
}

/// Names of the regular files directly inside `dir`
///
/// Subdirectories (such as a work directory nested in the destination) are
/// not part of the snapshot. Entries that cannot be inspected are skipped.
pub async fn snapshot_files(dir: &Path) -> Result<BTreeSet<String>> {
    let list_err = |e| DownloadError::ReconciliationIo {
        path: dir.to_path_buf(),
        operation: FileOperation::List,
        source: e,
    };

    let mut entries = fs::read_dir(dir).await.map_err(list_err)?;
    let mut names = BTreeSet::new();

    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        if !file_type.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => {
                names.insert(name);
            }
            Err(raw) => debug!("Skipping non UTF-8 file name {:?}", raw),
        }
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn snapshot_lists_only_regular_files() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.jar"), b"a").await.unwrap();
        tokio::fs::write(dir.path().join("b.jar"), b"b").await.unwrap();
        tokio::fs::create_dir(dir.path().join("downloading")).await.unwrap();

        let names = snapshot_files(dir.path()).await.unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["a.jar", "b.jar"]);
    }

    #[tokio::test]
    async fn snapshot_of_missing_directory_is_a_reconciliation_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        match snapshot_files(&missing).await {
            Err(DownloadError::ReconciliationIo { operation, .. }) => {
                assert_eq!(operation, FileOperation::List)
            }
            other => panic!("Expected ReconciliationIo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rename_moves_file_into_place() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        ensure_dir(&work).await.unwrap();
        let temp = work.join("mod.jar");
        tokio::fs::write(&temp, b"bytes").await.unwrap();

        let dest = dir.path().join("mod.jar");
        atomic_rename(&temp, &dest).await.unwrap();

        assert!(!temp.exists());
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn only_empty_directories_are_removed() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty");
        let full = dir.path().join("full");
        ensure_dir(&empty).await.unwrap();
        ensure_dir(&full).await.unwrap();
        tokio::fs::write(full.join("keep.txt"), b"keep").await.unwrap();

        assert!(remove_empty_dir(&empty).await);
        assert!(!remove_empty_dir(&full).await);
        assert!(!empty.exists());
        assert!(full.join("keep.txt").is_file());
    }

    #[tokio::test]
    async fn removing_missing_paths_is_not_an_error() {
        let dir = tempdir().unwrap();
        remove_partial(&dir.path().join("gone.jar")).await;
        remove_dir_all(&dir.path().join("gone")).await.unwrap();
    }
}
