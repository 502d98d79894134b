//! Engine configuration structure.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::TimeoutPolicy;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum live contexts in the registry.
    pub max_contexts: usize,
    /// Maximum queued jobs before a commit is rejected.
    pub max_queue_depth: usize,
    /// Bound on a blocking commit's wait, in milliseconds.
    pub sync_timeout_ms: u64,
    /// Bound on an asynchronous job's hardware time before the watchdog
    /// reaps it, in milliseconds.
    pub async_timeout_ms: u64,
    /// Watchdog tick interval in milliseconds. Zero disables the watchdog
    /// thread (timeouts are then reaped only on the schedule path).
    pub watchdog_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_contexts: 64,
            max_queue_depth: 128,
            sync_timeout_ms: 5_000,
            async_timeout_ms: 500,
            watchdog_interval_ms: 100,
        }
    }
}

impl EngineConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_contexts == 0 {
            return Err("max_contexts must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.sync_timeout_ms == 0 {
            return Err("sync_timeout_ms must be greater than 0".into());
        }
        if self.async_timeout_ms == 0 {
            return Err("async_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse an engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// A parse or validation failure description.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub(crate) const fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            sync_wait: Duration::from_millis(self.sync_timeout_ms),
            async_job: Duration::from_millis(self.async_timeout_ms),
        }
    }

    pub(crate) const fn watchdog_interval(&self) -> Option<Duration> {
        if self.watchdog_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.watchdog_interval_ms))
        }
    }
}
