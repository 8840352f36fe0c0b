//! Workflow engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Enable/disable the poll loop.
    /// When disabled, cycles only run when triggered through the API.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often to poll the ticket source (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Maximum tickets processed at the same time. Must be at least 1.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tickets: usize,

    /// Total attempts per stage for transient failures, first attempt included.
    #[serde(default = "default_max_attempts")]
    pub retry_max_attempts: u32,

    /// Delay before the first retry (seconds). Doubles on every further retry.
    #[serde(default = "default_backoff_base")]
    pub retry_backoff_base_seconds: f64,

    /// Upper bound for a single retry delay (seconds).
    #[serde(default = "default_backoff_max")]
    pub retry_backoff_max_seconds: f64,

    /// Per-stage timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_backoff_max() -> f64 {
    60.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_seconds: default_poll_interval(),
            max_concurrent_tickets: default_max_concurrent(),
            retry_max_attempts: default_max_attempts(),
            retry_backoff_base_seconds: default_backoff_base(),
            retry_backoff_max_seconds: default_backoff_max(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Delay to wait after the given failed attempt (1-based) before trying again.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let base = self.retry_backoff_base_seconds.max(0.0);
        let max = self.retry_backoff_max_seconds.max(0.0);
        let secs = (base * 2f64.powi(exponent)).min(max);
        Duration::from_secs_f64(secs)
    }
}

/// Timeouts for each blocking collaborator call, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout")]
    pub poll_seconds: u64,
    #[serde(default = "default_timeout")]
    pub inspect_seconds: u64,
    #[serde(default = "default_timeout")]
    pub release_seconds: u64,
    #[serde(default = "default_timeout")]
    pub update_seconds: u64,
    #[serde(default = "default_timeout")]
    pub notify_seconds: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            poll_seconds: default_timeout(),
            inspect_seconds: default_timeout(),
            release_seconds: default_timeout(),
            update_seconds: default_timeout(),
            notify_seconds: default_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_seconds)
    }

    pub fn inspect(&self) -> Duration {
        Duration::from_secs(self.inspect_seconds)
    }

    pub fn release(&self) -> Duration {
        Duration::from_secs(self.release_seconds)
    }

    pub fn update(&self) -> Duration {
        Duration::from_secs(self.update_seconds)
    }

    pub fn notify(&self) -> Duration {
        Duration::from_secs(self.notify_seconds)
    }
}
