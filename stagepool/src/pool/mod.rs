//! Worker pool and pending-work accounting.
//!
//! This module provides:
//! - WorkerPool for bounded parallel execution with abort-on-stop
//! - PendingCounter for scoped, leak-free in-flight accounting

mod counter;
mod worker_pool;

pub use counter::{PendingCounter, PendingGuard};
pub use worker_pool::WorkerPool;
