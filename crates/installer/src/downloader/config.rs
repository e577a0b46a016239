//! Configuration types for the installer engine

use std::time::Duration;

use crate::downloader::core::error::{DownloadError, Result};

/// Public pack catalog the installer reads by default
pub const DEFAULT_CATALOG_URL: &str = "https://raw.githubusercontent.com/Smiley43210/RedPack/master/packs/";

/// Configuration for download and install operations
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Attempts per file, including the first one
    pub max_attempts: usize,
    /// Number of concurrent download slots
    pub slots: usize,
    /// Minimum spacing between byte-progress updates for one transfer
    pub progress_interval: Duration,
    /// Per-request timeout
    pub timeout: Duration,
    pub user_agent: String,
    /// Initial delay between retries (doubles each retry)
    pub retry_delay: Duration,
    /// Maximum retry delay cap
    pub max_retry_delay: Duration,
    /// Base URL of the pack catalog; `index.json` and `<pack>.json` live under it
    pub catalog_url: String,
    /// Attempts for one catalog document before giving up
    pub catalog_attempts: usize,
}

impl DownloadConfig {
    /// Calculate retry delay for the given attempt using exponential backoff
    pub fn get_retry_delay(&self, attempt: usize) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.min(32) as u32);
        let delay = (self.retry_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_retry_delay.as_millis() as u64))
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_catalog_url<S: Into<String>>(mut self, url: S) -> Self {
        self.catalog_url = url.into();
        self
    }

    /// Build a configuration from `INSTALLER_*` environment variables
    ///
    /// Recognised: `INSTALLER_SLOTS`, `INSTALLER_MAX_ATTEMPTS`,
    /// `INSTALLER_TIMEOUT_SECS`, `INSTALLER_RETRY_DELAY_MS`,
    /// `INSTALLER_CATALOG_URL`, `INSTALLER_USER_AGENT`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(slots) = parse_var(&lookup, "INSTALLER_SLOTS")? {
            config.slots = slots;
        }
        if let Some(attempts) = parse_var(&lookup, "INSTALLER_MAX_ATTEMPTS")? {
            config.max_attempts = attempts;
        }
        if let Some(secs) = parse_var(&lookup, "INSTALLER_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs as u64);
        }
        if let Some(ms) = parse_var(&lookup, "INSTALLER_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(ms as u64);
        }
        if let Some(url) = lookup("INSTALLER_CATALOG_URL") {
            config.catalog_url = url;
        }
        if let Some(agent) = lookup("INSTALLER_USER_AGENT") {
            config.user_agent = agent;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.slots == 0 {
            return Err(DownloadError::Configuration {
                message: "at least one download slot is required".to_string(),
                field: Some("slots".to_string()),
            });
        }
        if self.max_attempts == 0 {
            return Err(DownloadError::Configuration {
                message: "at least one attempt per file is required".to_string(),
                field: Some("max_attempts".to_string()),
            });
        }
        Ok(())
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> Result<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<usize>().map(Some).map_err(|_| DownloadError::Configuration {
            message: format!("{} must be a non-negative integer, got '{}'", key, raw),
            field: Some(key.to_string()),
        }),
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            slots: 3,
            progress_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(300),
            user_agent: concat!("modpack-installer/", env!("CARGO_PKG_VERSION")).to_string(),
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(10),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            catalog_attempts: 8,
        }
    }
}
