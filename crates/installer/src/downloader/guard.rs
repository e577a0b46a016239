//! Early abort for files that are already installed

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::downloader::core::TransferHandle;

/// Aborts a transfer whose resolved file name already exists in the
/// destination directory
///
/// The check is synchronous and runs from the transfer's resolve hook, so it
/// always happens before any body bytes are written. Only the presence of
/// the name is checked; contents are not compared.
#[derive(Debug, Clone)]
pub struct DuplicateGuard {
    dest_dir: PathBuf,
}

impl DuplicateGuard {
    pub fn new<P: Into<PathBuf>>(dest_dir: P) -> Self {
        Self {
            dest_dir: dest_dir.into(),
        }
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub fn is_installed(&self, file_name: &str) -> bool {
        self.dest_dir.join(file_name).is_file()
    }

    /// Abort `handle` if `file_name` is already installed; returns whether it did
    pub fn check(&self, handle: &TransferHandle, file_name: &str) -> bool {
        if self.is_installed(file_name) {
            debug!("{} already installed, aborting {}", file_name, handle.url());
            handle.abort();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn aborts_only_when_the_file_exists() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("mod-1.0.jar"), b"installed").unwrap();
        let guard = DuplicateGuard::new(dir.path());

        let existing = TransferHandle::new("https://example.com/mod-1.0.jar");
        assert!(guard.check(&existing, "mod-1.0.jar"));
        assert!(existing.is_aborted());

        let fresh = TransferHandle::new("https://example.com/mod-2.0.jar");
        assert!(!guard.check(&fresh, "mod-2.0.jar"));
        assert!(!fresh.is_aborted());
    }

    #[test]
    fn directories_do_not_count_as_installed_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("downloading")).unwrap();
        let guard = DuplicateGuard::new(dir.path());
        assert!(!guard.is_installed("downloading"));
    }
}
