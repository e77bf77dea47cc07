//! # Stagepool
//!
//! Pipeline stages that fan a work queue out to a bounded worker pool.
//!
//! A [`Stage`](stage::Stage) takes work units in arrival order, hands each to
//! a pool of at most `pool_size` concurrent workers, and runs every
//! applicable [`Capability`](capabilities::Capability) over it. Results and
//! captured failures travel on one output queue; a sentinel marks the end of
//! the stream so stages can be chained.
//!
//! - **Ordered intake, concurrent processing**: one consumption task, many workers
//! - **Failures as data**: errors and panics become [`FailureReport`](core::FailureReport)s
//! - **Idleness you can trust**: [`Stage::has_pending_work`](stage::Stage::has_pending_work)
//!   accounts for queued, in-flight and undrained work
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagepool::prelude::*;
//!
//! let upper: CapabilityRef<String, String> = Arc::new(FnCapability::new("upper", |s: &String| {
//!     Ok(s.to_uppercase())
//! }));
//! let stage = Stage::builder("shout").capability(upper).build()?;
//!
//! stage.start()?;
//! stage.put_many(["a".to_string(), "b".to_string()]);
//! stage.join_drained().await?;
//!
//! while let Ok(message) = stage.get_result(Duration::from_millis(100)).await {
//!     if message.is_sentinel() {
//!         break;
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod capabilities;
pub mod config;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pool;
pub mod queue;
pub mod stage;
pub mod status;
pub mod testing;
pub mod utils;

#[cfg(feature = "grep")]
pub mod plugins;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::capabilities::{Capability, FnCapability, NoOpCapability};
    pub use crate::config::StageConfig;
    pub use crate::core::{Envelope, FailureReport, StageMessage, StageResult};
    pub use crate::errors::{CapabilityError, StageError};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::stage::{CapabilityRef, Stage, StageBuilder, StageStats};
    pub use crate::status::{InMemoryStatus, NoOpStatus, StatusReporter, StatusSnapshot};
    pub use std::sync::Arc;
    pub use std::time::Duration;
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[tokio::test]
    async fn test_prelude_round_trip() {
        let upper: CapabilityRef<String, String> =
            Arc::new(FnCapability::new("upper", |s: &String| Ok(s.to_uppercase())));
        let stage = Stage::builder("shout").capability(upper).build().unwrap();

        stage.start().unwrap();
        stage.put("a".to_string());
        stage.join_drained().await.unwrap();

        let first = stage.get_result(Duration::from_millis(100)).await.unwrap();
        assert_eq!(first.as_result().map(|r| r.value.as_str()), Some("A"));
        assert!(stage.get_result(Duration::from_millis(100)).await.unwrap().is_sentinel());
    }
}
