//! Testing utilities for stages.
//!
//! This module provides:
//! - Mock capabilities
//! - Assertions over drained output
//! - Output-draining helpers

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_has_failure, assert_has_result, assert_single_trailing_sentinel,
    assert_unit_absent,
};
pub use fixtures::{drain_available, drain_until_sentinel};
pub use mocks::{
    FailingCapability, GatedCapability, PanickingCapability, RecordingCapability,
    SlowCapability,
};
