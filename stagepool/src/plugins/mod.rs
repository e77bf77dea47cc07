//! Capability plugins shipped with the crate.

pub mod grep;
