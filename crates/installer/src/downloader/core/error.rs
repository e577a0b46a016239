//! Error types for the installer engine with context and recovery information

use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by transfers, reconciliation and the catalog boundary
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network-level failure talking to the remote host
    #[error("HTTP request to '{url}' failed")]
    HttpRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-2xx status
    #[error("Server returned {status} for '{url}'")]
    HttpStatus {
        url: String,
        status: u16,
    },

    /// File system I/O errors with file context
    #[error("File operation failed on '{path}' ({operation})")]
    FileSystem {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    /// URL parsing errors with helpful suggestions
    #[error("Invalid URL '{url}': {suggestion}")]
    InvalidUrl {
        url: String,
        suggestion: String,
        #[source]
        source: url::ParseError,
    },

    /// Only http and https sources can be fetched automatically
    #[error("Unsupported URL scheme in '{url}' (supported: http, https)")]
    UnsupportedUrl {
        url: String,
        scheme: String,
    },

    /// Every attempt for one file failed
    #[error("Transfer of '{url}' failed after {attempts} attempts: {last_error}")]
    TransferFailed {
        url: String,
        attempts: usize,
        last_error: String,
    },

    /// Listing or deleting during cleanup failed
    #[error("Cleanup of '{path}' failed ({operation})")]
    ReconciliationIo {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    /// The pack catalog could not be fetched within the retry budget
    #[error("Failed to fetch manifest from '{url}': {reason}")]
    ManifestFetch {
        url: String,
        reason: String,
    },

    /// Another install run already owns this destination directory
    #[error("An installation into '{directory}' is already running")]
    AlreadyRunning {
        directory: PathBuf,
    },

    /// The host environment could not start an out-of-band download
    #[error("Could not open '{url}' for manual download of {name}")]
    Launcher {
        name: String,
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Invalid configuration: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

/// Types of file operations for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Delete,
    Move,
    List,
    CreateDir,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Create => write!(f, "creating"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::Move => write!(f, "moving"),
            FileOperation::List => write!(f, "listing"),
            FileOperation::CreateDir => write!(f, "creating directory"),
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

impl DownloadError {
    /// Check if a transfer attempt that produced this error should be retried
    ///
    /// Any network failure, non-2xx status or write error restarts the
    /// transfer; configuration and URL problems never do.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DownloadError::HttpRequest { .. } => true,
            DownloadError::HttpStatus { .. } => true,
            DownloadError::FileSystem { .. } => true,
            DownloadError::InvalidUrl { .. } => false,
            DownloadError::UnsupportedUrl { .. } => false,
            DownloadError::TransferFailed { .. } => false, // Already exhausted retries
            DownloadError::ReconciliationIo { .. } => false,
            DownloadError::ManifestFetch { .. } => false,
            DownloadError::AlreadyRunning { .. } => false,
            DownloadError::Launcher { .. } => false,
            DownloadError::Configuration { .. } => false,
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            DownloadError::HttpRequest { .. } => "http_request",
            DownloadError::HttpStatus { .. } => "http_status",
            DownloadError::FileSystem { .. } => "file_system",
            DownloadError::InvalidUrl { .. } => "invalid_url",
            DownloadError::UnsupportedUrl { .. } => "unsupported_url",
            DownloadError::TransferFailed { .. } => "transfer_failed",
            DownloadError::ReconciliationIo { .. } => "reconciliation_io",
            DownloadError::ManifestFetch { .. } => "manifest_fetch",
            DownloadError::AlreadyRunning { .. } => "already_running",
            DownloadError::Launcher { .. } => "launcher",
            DownloadError::Configuration { .. } => "configuration",
        }
    }

    /// Short user-facing name of the failure class, used in notifications
    pub fn user_label(&self) -> &'static str {
        match self {
            DownloadError::TransferFailed { .. }
            | DownloadError::HttpRequest { .. }
            | DownloadError::HttpStatus { .. } => "Failed to download file",
            DownloadError::FileSystem { .. } | DownloadError::ReconciliationIo { .. } => {
                "Failed to update the mods folder"
            }
            DownloadError::ManifestFetch { .. } => "Failed to load the modpack list",
            DownloadError::AlreadyRunning { .. } => "An installation is already in progress",
            DownloadError::Launcher { .. } => "Failed to open the download page",
            DownloadError::InvalidUrl { .. }
            | DownloadError::UnsupportedUrl { .. }
            | DownloadError::Configuration { .. } => {
                "Invalid installer configuration"
            }
        }
    }

    /// Create a detailed error report for debugging
    pub fn detailed_report(&self) -> String {
        let mut report = format!("Error: {}\n", self);
        report.push_str(&format!("Category: {}\n", self.category()));
        report.push_str(&format!("Recoverable: {}\n", self.is_recoverable()));

        if let Some(source) = self.source() {
            report.push_str(&format!("Root cause: {}\n", source));
        }

        report
    }

    pub(crate) fn file_system(
        path: impl Into<PathBuf>,
        operation: FileOperation,
        source: std::io::Error,
    ) -> Self {
        DownloadError::FileSystem {
            path: path.into(),
            operation,
            source,
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        let url = error.url().map(|u| u.to_string()).unwrap_or_else(|| "<unknown>".to_string());

        match error.status() {
            Some(status) => DownloadError::HttpStatus {
                url,
                status: status.as_u16(),
            },
            None => DownloadError::HttpRequest { url, source: error },
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(error: std::io::Error) -> Self {
        DownloadError::FileSystem {
            path: PathBuf::from("<unknown>"),
            operation: FileOperation::Read,
            source: error,
        }
    }
}

impl From<url::ParseError> for DownloadError {
    fn from(error: url::ParseError) -> Self {
        let suggestion = match error {
            url::ParseError::EmptyHost => "URL must have a valid hostname",
            url::ParseError::InvalidPort => "Port number must be between 1 and 65535",
            url::ParseError::RelativeUrlWithoutBase => "URL must be absolute (include http:// or https://)",
            _ => "Check URL format and try again",
        }.to_string();

        DownloadError::InvalidUrl {
            url: "<unparseable>".to_string(),
            suggestion,
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_errors_are_retried_but_configuration_is_not() {
        let status = DownloadError::HttpStatus { url: "http://x/a.jar".into(), status: 404 };
        assert!(status.is_recoverable());

        let io = DownloadError::file_system(
            "/tmp/a.jar",
            FileOperation::Write,
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(io.is_recoverable());
        assert_eq!(io.category(), "file_system");

        let exhausted = DownloadError::TransferFailed {
            url: "http://x/a.jar".into(),
            attempts: 3,
            last_error: "boom".into(),
        };
        assert!(!exhausted.is_recoverable());
        assert_eq!(exhausted.user_label(), "Failed to download file");
    }

    #[test]
    fn parse_errors_carry_a_suggestion() {
        let err: DownloadError = url::Url::parse("mods/a.jar").unwrap_err().into();
        match err {
            DownloadError::InvalidUrl { suggestion, .. } => assert!(suggestion.contains("absolute")),
            other => panic!("Expected InvalidUrl, got {other:?}"),
        }
    }

    #[test]
    fn detailed_report_includes_root_cause() {
        let err = DownloadError::ReconciliationIo {
            path: "/mods/old.jar".into(),
            operation: FileOperation::Delete,
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let report = err.detailed_report();
        assert!(report.contains("reconciliation_io"));
        assert!(report.contains("denied"));
    }
}
