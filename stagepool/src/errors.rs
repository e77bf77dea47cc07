//! Error types for the stagepool crate.
//!
//! Two families live here. [`StageError`] covers the stage's own lifecycle
//! and queue contract. [`CapabilityError`] is what a capability returns when
//! it cannot process a work unit; the stage never propagates it, it turns it
//! into a [`FailureReport`](crate::core::FailureReport) instead.

use std::any::Any;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The main error type for stage operations.
#[derive(Debug, Error)]
pub enum StageError {
    /// Nothing arrived on a queue within the allowed time.
    ///
    /// This is an expected condition for result polling, not a failure.
    #[error("No item available after {0:?}")]
    Timeout(Duration),

    /// A shutdown was requested on a stage whose loop was never started.
    #[error("Stage '{0}' was never started")]
    NotStarted(String),

    /// `start()` was called twice.
    #[error("Stage '{0}' is already started")]
    AlreadyStarted(String),

    /// `join()` or `terminate()` was called after a shutdown was already requested.
    #[error("Stage '{0}' has already been shut down")]
    AlreadyShutdown(String),

    /// A stage was built without any capability.
    #[error("Stage '{0}' has no capabilities")]
    NoCapabilities(String),

    /// `task_done()` was called more times than items were put.
    #[error("task_done() called more times than there were items in the queue")]
    TaskDoneOverflow,

    /// A capability's cleanup hook failed during teardown.
    #[error("Teardown of capability '{capability}' failed: {source}")]
    Teardown {
        /// The capability whose `end()` failed.
        capability: String,
        /// The underlying error.
        #[source]
        source: CapabilityError,
    },

    /// `start()` was called outside a tokio runtime.
    #[error("Stage '{stage}' cannot start outside a tokio runtime: {reason}")]
    NoRuntime {
        /// The stage name.
        stage: String,
        /// What the runtime lookup reported.
        reason: String,
    },

    /// The consumption loop task panicked or was cancelled.
    #[error("Consumption loop of stage '{stage}' aborted: {reason}")]
    LoopAborted {
        /// The stage name.
        stage: String,
        /// What the runtime reported.
        reason: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StageError {
    /// Returns true for the "nothing yet" condition of result polling.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Creates a teardown error.
    #[must_use]
    pub fn teardown(capability: impl Into<String>, source: CapabilityError) -> Self {
        Self::Teardown {
            capability: capability.into(),
            source,
        }
    }
}

/// Error raised by a capability while processing a work unit.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The capability rejected or could not process the unit.
    #[error("{0}")]
    Failed(String),

    /// The capability panicked; the payload message is kept.
    #[error("capability panicked: {0}")]
    Panicked(String),

    /// Any other error raised by capability code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CapabilityError {
    /// Creates a plain failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Builds a panic error from a `catch_unwind` payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }

    /// Returns a short type label for reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Failed(_) => "Failed",
            Self::Panicked(_) => "Panicked",
            Self::Other(_) => "Other",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        if let Self::Other(err) = self {
            let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
            if !chain.is_empty() {
                map.insert("causes".to_string(), serde_json::json!(chain));
            }
        }

        map
    }
}
