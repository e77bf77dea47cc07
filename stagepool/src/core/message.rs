//! Messages carried on a stage's input and output queues.

use serde::{Deserialize, Serialize};

use super::FailureReport;

/// An item on the input queue: a unit of work or the end-of-stream marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "unit", rename_all = "snake_case")]
pub enum Envelope<W> {
    /// A work unit to dispatch.
    Work(W),
    /// No more work will ever arrive.
    Sentinel,
}

impl<W> Envelope<W> {
    /// Returns true for the end-of-stream marker.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self, Self::Sentinel)
    }
}

/// The value a capability produced for a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult<W, R> {
    /// The capability that produced the value.
    pub capability: String,
    /// The unit the value was computed from.
    pub unit: W,
    /// The computed value.
    pub value: R,
}

impl<W, R> StageResult<W, R> {
    /// Creates a new result.
    #[must_use]
    pub fn new(capability: impl Into<String>, unit: W, value: R) -> Self {
        Self {
            capability: capability.into(),
            unit,
            value,
        }
    }
}

/// An item on the output queue.
///
/// Output order between units is not defined; `Sentinel` is always the last
/// message a stage produces.
#[derive(Debug)]
pub enum StageMessage<W, R> {
    /// A capability succeeded.
    Result(StageResult<W, R>),
    /// A capability failed; the failure was captured.
    Failure(FailureReport<W>),
    /// The stage has shut down.
    Sentinel,
}

impl<W, R> StageMessage<W, R> {
    /// Returns true for the end-of-stream marker.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self, Self::Sentinel)
    }

    /// Returns true for a captured failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns the result if this is one.
    #[must_use]
    pub const fn as_result(&self) -> Option<&StageResult<W, R>> {
        match self {
            Self::Result(result) => Some(result),
            _ => None,
        }
    }

    /// Returns the failure report if this is one.
    #[must_use]
    pub const fn as_failure(&self) -> Option<&FailureReport<W>> {
        match self {
            Self::Failure(report) => Some(report),
            _ => None,
        }
    }

    /// Returns the originating unit, if the message has one.
    #[must_use]
    pub const fn unit(&self) -> Option<&W> {
        match self {
            Self::Result(result) => Some(&result.unit),
            Self::Failure(report) => Some(&report.unit),
            Self::Sentinel => None,
        }
    }

    /// Returns the capability name, if the message has one.
    #[must_use]
    pub fn capability(&self) -> Option<&str> {
        match self {
            Self::Result(result) => Some(&result.capability),
            Self::Failure(report) => Some(&report.capability),
            Self::Sentinel => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_sentinel_is_distinct_from_any_unit() {
        // A payload that looks like a marker is still work.
        let work = Envelope::Work("Sentinel".to_string());
        assert!(!work.is_sentinel());
        assert!(Envelope::<String>::Sentinel.is_sentinel());
    }

    #[test]
    fn test_envelope_serialization() {
        let json = serde_json::to_value(Envelope::Work(3_u8)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "work", "unit": 3}));

        let json = serde_json::to_value(Envelope::<u8>::Sentinel).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "sentinel"}));
    }

    #[test]
    fn test_message_accessors() {
        let msg: StageMessage<&str, usize> =
            StageMessage::Result(StageResult::new("len", "abcd", 4));

        assert!(!msg.is_sentinel());
        assert!(!msg.is_failure());
        assert_eq!(msg.as_result().map(|r| r.value), Some(4));
        assert_eq!(msg.unit(), Some(&"abcd"));
        assert_eq!(msg.capability(), Some("len"));
        assert!(msg.as_failure().is_none());

        let end: StageMessage<&str, usize> = StageMessage::Sentinel;
        assert!(end.is_sentinel());
        assert!(end.unit().is_none());
    }
}
