//! Structured record of a capability failure.

use serde::Serialize;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt::Debug;
use uuid::Uuid;

use crate::errors::CapabilityError;
use crate::status::{EnabledCapabilities, StatusSnapshot};
use crate::utils::{capture_backtrace, generate_uuid, iso_timestamp, render_frames};

/// What a stage pushes downstream when a capability fails on a unit.
///
/// Failures are data: the report travels on the output queue like any
/// result, and whoever drains the queue decides what to do with it.
#[derive(Debug)]
pub struct FailureReport<W> {
    /// Report identifier.
    pub id: Uuid,
    /// When the failure was captured (ISO 8601).
    pub timestamp: String,
    /// The processing phase the stage was running.
    pub phase: String,
    /// The capability that failed.
    pub capability: String,
    /// The unit being processed.
    pub unit: W,
    /// The captured error.
    pub error: CapabilityError,
    /// Stack captured inside the worker. Symbols are resolved only when
    /// rendered through [`traceback`](Self::traceback).
    pub backtrace: Backtrace,
    /// Capabilities enabled at capture time, grouped by kind.
    pub enabled_capabilities: EnabledCapabilities,
    /// Status values at capture time.
    pub status: StatusSnapshot,
}

impl<W> FailureReport<W> {
    /// Creates a report, capturing the current stack.
    #[must_use]
    pub fn capture(
        phase: impl Into<String>,
        capability: impl Into<String>,
        unit: W,
        error: CapabilityError,
    ) -> Self {
        Self {
            id: generate_uuid(),
            timestamp: iso_timestamp(),
            phase: phase.into(),
            capability: capability.into(),
            unit,
            error,
            backtrace: capture_backtrace(),
            enabled_capabilities: EnabledCapabilities::new(),
            status: StatusSnapshot::default(),
        }
    }

    /// Attaches the enabled-capability snapshot.
    #[must_use]
    pub fn with_enabled_capabilities(mut self, enabled: EnabledCapabilities) -> Self {
        self.enabled_capabilities = enabled;
        self
    }

    /// Attaches the status snapshot.
    #[must_use]
    pub fn with_status(mut self, status: StatusSnapshot) -> Self {
        self.status = status;
        self
    }

    /// The captured stack, one line per entry. Empty when capture was unsupported.
    #[must_use]
    pub fn traceback(&self) -> Vec<String> {
        render_frames(&self.backtrace)
    }

    /// One-line description of the failure.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "An exception was found while running {}.{}: \"{}\"",
            self.phase, self.capability, self.error
        )
    }
}

impl<W: Debug> FailureReport<W> {
    /// Multi-line description including the unit, enabled capabilities and traceback.
    #[must_use]
    pub fn details(&self) -> String {
        let mut out = self.summary();
        out.push('\n');
        out.push_str(&format!("Unit: {:?}\n", self.unit));
        out.push_str(&format!("Error type: {}\n", self.error.kind()));

        if !self.enabled_capabilities.is_empty() {
            out.push_str("Enabled capabilities:\n");
            for (kind, names) in &self.enabled_capabilities {
                out.push_str(&format!("    {kind}: {}\n", names.join(", ")));
            }
        }

        let traceback = self.traceback();
        if !traceback.is_empty() {
            out.push_str("Traceback:\n");
            for frame in &traceback {
                out.push_str("    ");
                out.push_str(frame);
                out.push('\n');
            }
        }
        out
    }
}

impl<W: Serialize> FailureReport<W> {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("id".to_string(), serde_json::json!(self.id.to_string()));
        map.insert("timestamp".to_string(), serde_json::json!(self.timestamp));
        map.insert("phase".to_string(), serde_json::json!(self.phase));
        map.insert("capability".to_string(), serde_json::json!(self.capability));
        map.insert(
            "unit".to_string(),
            serde_json::to_value(&self.unit).unwrap_or(serde_json::Value::Null),
        );
        let error: serde_json::Map<String, serde_json::Value> =
            self.error.to_dict().into_iter().collect();
        map.insert("error".to_string(), serde_json::Value::Object(error));
        map.insert("traceback".to_string(), serde_json::json!(self.traceback()));
        map.insert(
            "enabled_capabilities".to_string(),
            serde_json::json!(self.enabled_capabilities),
        );
        map.insert("status".to_string(), serde_json::json!(self.status));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::backtrace::BacktraceStatus;

    fn sample() -> FailureReport<String> {
        let mut enabled = EnabledCapabilities::new();
        enabled.insert("grep".to_string(), vec!["http_auth_detect".to_string()]);

        FailureReport::capture(
            "grep",
            "http_auth_detect",
            "GET http://example.test/".to_string(),
            CapabilityError::failed("bad header"),
        )
        .with_enabled_capabilities(enabled)
    }

    #[test]
    fn test_capture_fields() {
        let report = sample();
        assert_eq!(report.phase, "grep");
        assert_eq!(report.capability, "http_auth_detect");
        assert_eq!(report.unit, "GET http://example.test/");
        assert_eq!(report.error.to_string(), "bad header");
        assert_eq!(report.id.get_version_num(), 4);
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            sample().summary(),
            "An exception was found while running grep.http_auth_detect: \"bad header\""
        );
    }

    #[test]
    fn test_details_lists_enabled_capabilities() {
        let details = sample().details();
        assert!(details.contains("Unit: \"GET http://example.test/\""));
        assert!(details.contains("grep: http_auth_detect"));
        assert!(details.contains("Error type: Failed"));
    }

    #[test]
    fn test_traceback_rendered_on_demand() {
        let report = sample();
        let frames = report.traceback();
        if report.backtrace.status() == BacktraceStatus::Captured {
            assert!(!frames.is_empty());
            assert!(report.details().contains("Traceback:"));
        } else {
            assert!(frames.is_empty());
        }
        assert_eq!(report.to_dict()["traceback"], serde_json::json!(frames));
    }

    #[test]
    fn test_uncaptured_backtrace_omits_traceback() {
        let mut report = sample();
        report.backtrace = Backtrace::disabled();
        assert!(report.traceback().is_empty());
        assert!(!report.details().contains("Traceback:"));
        assert_eq!(report.to_dict()["traceback"], serde_json::json!([]));
    }

    #[test]
    fn test_to_dict() {
        let dict = sample().to_dict();
        assert_eq!(dict.get("capability").unwrap(), "http_auth_detect");
        assert_eq!(dict.get("unit").unwrap(), "GET http://example.test/");
        assert_eq!(dict["error"]["type"], "Failed");
        assert_eq!(
            dict["enabled_capabilities"],
            serde_json::json!({"grep": ["http_auth_detect"]})
        );
    }
}
