//! Core message types for stagepool.
//!
//! This module contains the values that flow through a stage:
//! - Input envelopes (work or end-of-stream)
//! - Output messages (result, captured failure, end-of-stream)
//! - Failure reports

mod failure;
mod message;

pub use failure::FailureReport;
pub use message::{Envelope, StageMessage, StageResult};
