//! Runtime configuration
//!
//! Every option can be given as a command line flag or through the
//! environment, which is how the service is configured inside a pod.

use std::time::Duration;

use clap::Parser;

use crate::error::{Error, Result};

/// Backup manager configuration
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Namespace where Velero resources live
    #[arg(long, env = "VELERO_NAMESPACE", default_value = "velero")]
    pub namespace: String,

    /// Port of the backup management API
    #[arg(long, env = "API_PORT", default_value_t = 8000)]
    pub api_port: u16,

    /// Port of the metrics and health endpoints
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Interval between two status polls of an asynchronous request (milliseconds)
    #[arg(long, env = "REQUEST_POLL_INTERVAL_MS", default_value_t = 500)]
    pub request_poll_interval_ms: u64,

    /// Maximum time to wait for an asynchronous request to be processed (seconds)
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Backups completed less than this many seconds ago still count as in progress
    #[arg(long, env = "IN_PROGRESS_WINDOW_SECS", default_value_t = 180)]
    pub in_progress_window_secs: u64,

    /// Phase suffix marking a backup as actively running (compared lowercased)
    #[arg(long, env = "IN_PROGRESS_PHASE_SUFFIX", default_value = "ing")]
    pub in_progress_phase_suffix: String,
}

impl Config {
    /// Reject values the services cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.request_poll_interval_ms == 0 {
            return Err(Error::config("request poll interval must be greater than zero"));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::config("request timeout must be greater than zero"));
        }
        if self.in_progress_phase_suffix.trim().is_empty() {
            return Err(Error::config("in-progress phase suffix must not be empty"));
        }
        Ok(())
    }

    /// Polling settings for asynchronous requests
    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            interval: Duration::from_millis(self.request_poll_interval_ms),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// Heuristic used by the in-progress backup filter
    pub fn in_progress_policy(&self) -> InProgressPolicy {
        InProgressPolicy {
            recent_completion_window: Duration::from_secs(self.in_progress_window_secs),
            active_phase_suffix: self.in_progress_phase_suffix.to_lowercase(),
        }
    }
}

/// Polling settings for request correlation
#[derive(Clone, Debug)]
pub struct PollingConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Decides which backups are reported as in progress
#[derive(Clone, Debug)]
pub struct InProgressPolicy {
    /// Completed backups younger than this are still reported
    pub recent_completion_window: Duration,
    /// Lowercase suffix of running phases ("finalizing", "deleting")
    pub active_phase_suffix: String,
}

impl Default for InProgressPolicy {
    fn default() -> Self {
        Self {
            recent_completion_window: Duration::from_secs(180),
            active_phase_suffix: "ing".to_string(),
        }
    }
}
