//! Configuration types for a stage.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::StageError;

/// Configuration for a [`Stage`](crate::stage::Stage).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Label given to the worker tasks in tracing spans.
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
    /// Number of units processed concurrently.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Default bound for `next_result()`, in seconds.
    #[serde(default = "default_result_timeout")]
    pub result_timeout_seconds: f64,
}

fn default_worker_name() -> String {
    "Consumer".to_string()
}

const fn default_pool_size() -> usize {
    10
}

const fn default_result_timeout() -> f64 {
    0.5
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            worker_name: default_worker_name(),
            pool_size: default_pool_size(),
            result_timeout_seconds: default_result_timeout(),
        }
    }
}

impl StageConfig {
    /// Creates a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, StageError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the worker label.
    #[must_use]
    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// Sets the pool size.
    #[must_use]
    pub const fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the default result timeout.
    #[must_use]
    pub const fn with_result_timeout(mut self, seconds: f64) -> Self {
        self.result_timeout_seconds = seconds;
        self
    }

    /// Gets the result timeout as a Duration.
    #[must_use]
    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.result_timeout_seconds.max(0.0))
    }

    /// Checks the values a stage cannot run with.
    pub fn validate(&self) -> Result<(), StageError> {
        if self.pool_size == 0 {
            return Err(StageError::Config("pool_size must be at least 1".to_string()));
        }
        if !self.result_timeout_seconds.is_finite() || self.result_timeout_seconds < 0.0 {
            return Err(StageError::Config(format!(
                "result_timeout_seconds must be a non-negative number, got {}",
                self.result_timeout_seconds
            )));
        }
        Ok(())
    }
}
