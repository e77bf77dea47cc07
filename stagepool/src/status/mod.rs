//! Status-reporting collaborator.
//!
//! A stage only talks to its status reporter when it captures a failure: it
//! records where the failure happened and snapshots which capabilities were
//! enabled, so the [`FailureReport`](crate::core::FailureReport) can be read
//! without the rest of the system at hand.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::capabilities::Capability;

/// Enabled capability names grouped by capability kind.
pub type EnabledCapabilities = BTreeMap<String, Vec<String>>;

/// Trait for status collaborators.
pub trait StatusReporter: Send + Sync {
    /// Records the current processing phase.
    fn set_phase(&self, phase: &str);

    /// Records the capability currently running.
    fn set_running_capability(&self, capability: &str);

    /// Records a description of the work unit being processed.
    fn set_current_unit(&self, unit: &str);

    /// Returns the capabilities enabled in the surrounding pipeline.
    fn enabled_capabilities(&self) -> EnabledCapabilities;
}

/// A status reporter that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStatus;

impl StatusReporter for NoOpStatus {
    fn set_phase(&self, _phase: &str) {}

    fn set_running_capability(&self, _capability: &str) {}

    fn set_current_unit(&self, _unit: &str) {}

    fn enabled_capabilities(&self) -> EnabledCapabilities {
        EnabledCapabilities::new()
    }
}

/// Point-in-time view of what a status reporter holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// The current phase.
    pub phase: Option<String>,
    /// The capability running when the snapshot was taken.
    pub running_capability: Option<String>,
    /// Description of the unit being processed.
    pub current_unit: Option<String>,
}

/// A status reporter that keeps the latest values in memory.
#[derive(Debug, Default)]
pub struct InMemoryStatus {
    current: RwLock<StatusSnapshot>,
    enabled: RwLock<EnabledCapabilities>,
}

impl InMemoryStatus {
    /// Creates an empty status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a status with every given capability enabled.
    #[must_use]
    pub fn from_capabilities<W, R>(capabilities: &[std::sync::Arc<dyn Capability<W, R>>]) -> Self {
        capabilities
            .iter()
            .fold(Self::new(), |status, c| status.enable(c.kind(), c.name()))
    }

    /// Marks a capability as enabled.
    #[must_use]
    pub fn enable(self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.enabled
            .write()
            .entry(kind.into())
            .or_default()
            .push(name.into());
        self
    }

    /// Returns a copy of the current values.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.current.read().clone()
    }
}

impl StatusReporter for InMemoryStatus {
    fn set_phase(&self, phase: &str) {
        self.current.write().phase = Some(phase.to_string());
    }

    fn set_running_capability(&self, capability: &str) {
        self.current.write().running_capability = Some(capability.to_string());
    }

    fn set_current_unit(&self, unit: &str) {
        self.current.write().current_unit = Some(unit.to_string());
    }

    fn enabled_capabilities(&self) -> EnabledCapabilities {
        self.enabled.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::NoOpCapability;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_noop_status() {
        let status = NoOpStatus;
        status.set_phase("grep");
        assert!(status.enabled_capabilities().is_empty());
    }

    #[test]
    fn test_in_memory_status_records_latest() {
        let status = InMemoryStatus::new();
        status.set_phase("audit");
        status.set_running_capability("sqli");
        status.set_current_unit("GET http://example.test/");
        status.set_running_capability("xss");

        assert_eq!(
            status.snapshot(),
            StatusSnapshot {
                phase: Some("audit".to_string()),
                running_capability: Some("xss".to_string()),
                current_unit: Some("GET http://example.test/".to_string()),
            }
        );
    }

    #[test]
    fn test_enabled_grouped_by_kind() {
        let status = InMemoryStatus::new()
            .enable("grep", "http_auth_detect")
            .enable("audit", "sqli")
            .enable("grep", "password_profiling");

        let enabled = status.enabled_capabilities();
        assert_eq!(
            enabled.get("grep").unwrap(),
            &vec!["http_auth_detect".to_string(), "password_profiling".to_string()]
        );
        assert_eq!(enabled.get("audit").unwrap(), &vec!["sqli".to_string()]);
    }

    #[test]
    fn test_from_capabilities() {
        let caps: Vec<Arc<dyn Capability<u32, ()>>> = vec![
            Arc::new(NoOpCapability::new("first")),
            Arc::new(NoOpCapability::new("second")),
        ];
        let status = InMemoryStatus::from_capabilities(&caps);
        assert_eq!(
            status.enabled_capabilities().get("generic").unwrap().len(),
            2
        );
    }
}
